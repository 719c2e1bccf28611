// src/core/context.rs

use crate::CancellationToken;
use crate::constants::{ENV_COMPILE_BASE, ENV_COMPILE_IN, ENV_COMPILE_OUT};
use crate::models::Profile;
use crate::system::shell::{self, CommandKind, ExecutionError, ShellOutput};
use anyhow::{Result, anyhow};
use chrono::Local;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Process-wide mutable state, constructed once in the driver and threaded
/// explicitly through the jobs. Cleared between source files; the working
/// directories it accumulated persist for inspection.
#[derive(Debug)]
pub struct Context {
    /// Current environment published to every child process.
    pub env: HashMap<String, String>,
    /// Immutable snapshot of the starting environment, restored by `clear`.
    init_env: HashMap<String, String>,
    /// The directory the process started in; restored between source files.
    initial_dir: PathBuf,
    /// The profile's `workdir` parent, set when the first profile is loaded.
    pub root_workdir: Option<PathBuf>,
    /// The per-source working directory; set exactly once per source file.
    pub current_workdir: Option<PathBuf>,
    /// Append-only list of every per-source working directory created.
    pub work_directories: Vec<PathBuf>,
    /// Filter name → shell predicate, populated while options are processed.
    pub filters: HashMap<String, String>,
    /// Name of the most recently attempted section.
    pub last_section: String,
    /// Base names that run regardless of their filter.
    pub mandatory_sections: Vec<String>,
    /// Short identifier appended to workdir and report names; begins with `_`.
    pub tag: String,
    /// `_YYYYMMDD_HHMMSS`; regenerated to disambiguate collisions.
    pub time_stamp: String,
    /// Missing source paths are non-fatal when set.
    pub force: bool,
    cancellation: CancellationToken,
}

impl Context {
    /// Builds the context from the inherited environment. The tag defaults
    /// to the current login name when not supplied.
    pub fn new(tag: Option<&str>, force: bool, cancellation: CancellationToken) -> Result<Self> {
        let env: HashMap<String, String> = std::env::vars().collect();
        let initial_dir = std::env::current_dir()
            .map_err(|e| anyhow!("Could not determine the current directory: {}", e))?;
        let tag = match tag {
            Some(t) if !t.is_empty() => format!("_{}", t),
            _ => format!("_{}", whoami::username()),
        };
        Ok(Self {
            init_env: env.clone(),
            env,
            initial_dir,
            root_workdir: None,
            current_workdir: None,
            work_directories: Vec::new(),
            filters: HashMap::new(),
            last_section: String::new(),
            mandatory_sections: Vec::new(),
            tag,
            time_stamp: generate_time_stamp(),
            force,
            cancellation,
        })
    }

    /// Regenerates the timestamp; used when a working-directory name collides.
    pub fn regenerate_time_stamp(&mut self) {
        self.time_stamp = generate_time_stamp();
    }

    /// The directory shell commands and relative paths resolve against.
    pub fn cwd(&self) -> PathBuf {
        self.current_workdir
            .clone()
            .unwrap_or_else(|| self.initial_dir.clone())
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Runs a shell command under this context's environment and cwd.
    pub fn run_shell(
        &self,
        command: &str,
        kind: CommandKind,
    ) -> Result<ShellOutput, ExecutionError> {
        shell::run(command, kind, &self.env, &self.cwd(), &self.cancellation)
    }

    /// Expands `$VAR` references in a value against the current environment.
    pub fn expand_value(&self, value: &str) -> String {
        shell::expand_env_vars(value, &self.env)
    }

    /// Stores an environment variable. A `$(cmd)` or backtick value is
    /// evaluated through the shell runner and its stdout (trailing
    /// whitespace trimmed) becomes the value; anything else is stored after
    /// `$VAR` expansion.
    pub fn add_env_variable(&mut self, name: &str, value: &str) -> Result<()> {
        let name = name.strip_prefix('$').unwrap_or(name);
        let trimmed = value.trim();

        let substitution = if let Some(inner) = trimmed
            .strip_prefix("$(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            Some(inner)
        } else if trimmed.len() >= 2 {
            trimmed
                .strip_prefix('`')
                .and_then(|rest| rest.strip_suffix('`'))
        } else {
            None
        };

        let stored = match substitution {
            Some(command) => {
                let output = self.run_shell(command, CommandKind::EnvVariable)?;
                if output.exit_code != 0 {
                    log::warn!(
                        "Substitution command for ${} exited with code {}.",
                        name,
                        output.exit_code
                    );
                }
                output.stdout.trim_end().to_string()
            }
            None => self.expand_value(trimmed),
        };

        log::debug!("${} = {}", name, stored);
        self.env.insert(name.to_string(), stored);
        Ok(())
    }

    /// Stores a filter predicate under its name (leading `?` stripped).
    pub fn add_filter(&mut self, name: &str, predicate: &str) {
        let name = name.strip_prefix('?').unwrap_or(name);
        log::debug!("?{} = {}", name, predicate);
        self.filters.insert(name.to_string(), predicate.to_string());
    }

    /// Evaluates the filter gating `section_name`. `None` means "no gate,
    /// run". A missing predicate is fatal for the current source file.
    pub fn evaluate_filter(
        &self,
        section_name: &str,
        filter_name: Option<&str>,
    ) -> Result<Option<bool>> {
        let name = match filter_name {
            Some(n) if !n.is_empty() => n,
            _ => return Ok(None),
        };
        let predicate = self.filters.get(name).ok_or_else(|| {
            anyhow!(
                "Filter '{}' referenced by section '{}' is not defined.",
                name,
                section_name
            )
        })?;
        let output = self.run_shell(predicate, CommandKind::Filter)?;
        let verdict = output.exit_code == 0;
        log::debug!("Filter '{}' for section '{}': {}", name, section_name, verdict);
        Ok(Some(verdict))
    }

    /// Publishes the per-job file variables to every child process.
    pub fn publish_file_vars(&mut self, file_in: &str, base: &str, file_out: &str) {
        self.env
            .insert(ENV_COMPILE_IN.to_string(), file_in.to_string());
        self.env
            .insert(ENV_COMPILE_BASE.to_string(), base.to_string());
        self.env
            .insert(ENV_COMPILE_OUT.to_string(), file_out.to_string());
    }

    /// Restores the context between source files: environment back to the
    /// initial snapshot, filters emptied, completion flags cleared, cwd back
    /// to the starting directory. Accumulated working directories persist.
    pub fn clear(&mut self, profile: &mut Profile) -> Result<()> {
        self.env = self.init_env.clone();
        self.filters.clear();
        self.last_section.clear();
        self.current_workdir = None;
        self.mandatory_sections = profile.mandatory_sections.clone();
        profile.reset_completion();
        std::env::set_current_dir(&self.initial_dir).map_err(|e| {
            anyhow!(
                "Could not restore working directory '{}': {}",
                self.initial_dir.display(),
                e
            )
        })?;
        Ok(())
    }

    /// The initial working directory of the process.
    pub fn initial_dir(&self) -> &Path {
        &self.initial_dir
    }
}

fn generate_time_stamp() -> String {
    Local::now().format("_%Y%m%d_%H%M%S").to_string()
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    fn context() -> Context {
        Context::new(Some("test"), false, Arc::new(AtomicBool::new(false))).expect("context")
    }

    #[test]
    fn test_tag_formatting() {
        let ctx = context();
        assert_eq!(ctx.tag, "_test");

        let ctx = Context::new(None, false, Arc::new(AtomicBool::new(false))).expect("context");
        assert!(ctx.tag.starts_with('_'));
        assert!(ctx.tag.len() > 1);
    }

    #[test]
    fn test_time_stamp_shape() {
        let ctx = context();
        // _YYYYMMDD_HHMMSS
        assert_eq!(ctx.time_stamp.len(), 16);
        assert!(ctx.time_stamp.starts_with('_'));
        assert_eq!(&ctx.time_stamp[9..10], "_");
    }

    #[test]
    fn test_add_env_variable_literal_and_interpolated() {
        let mut ctx = context();
        ctx.add_env_variable("BASE", "/opt/build").expect("literal");
        assert_eq!(ctx.env.get("BASE").map(String::as_str), Some("/opt/build"));

        ctx.add_env_variable("$SUB", "$BASE/out").expect("interpolated");
        assert_eq!(ctx.env.get("SUB").map(String::as_str), Some("/opt/build/out"));
    }

    #[test]
    fn test_add_env_variable_command_substitution() {
        let mut ctx = context();
        ctx.add_env_variable("OUT", "$(echo captured)").expect("dollar-paren");
        assert_eq!(ctx.env.get("OUT").map(String::as_str), Some("captured"));

        ctx.add_env_variable("OUT2", "`echo ticked`").expect("backticks");
        assert_eq!(ctx.env.get("OUT2").map(String::as_str), Some("ticked"));
    }

    #[test]
    fn test_evaluate_filter_verdicts() {
        let mut ctx = context();
        ctx.add_filter("?yes", "true");
        ctx.add_filter("no", "false");

        assert_eq!(ctx.evaluate_filter("s", None).expect("none"), None);
        assert_eq!(ctx.evaluate_filter("s", Some("")).expect("empty"), None);
        assert_eq!(ctx.evaluate_filter("s", Some("yes")).expect("yes"), Some(true));
        assert_eq!(ctx.evaluate_filter("s", Some("no")).expect("no"), Some(false));
    }

    #[test]
    fn test_evaluate_filter_missing_is_fatal() {
        let ctx = context();
        assert!(ctx.evaluate_filter("ofcob", Some("ghost")).is_err());
    }

    #[test]
    fn test_clear_restores_environment() {
        let _guard = test_support::cwd_guard();
        let mut ctx = context();
        let mut profile = Profile::default();
        profile.complete.insert("ofcob".into(), true);
        profile.mandatory_sections.push("ofcob".into());

        ctx.add_env_variable("EPHEMERAL", "1").expect("env var");
        ctx.add_filter("f", "true");
        ctx.last_section = "ofcob".into();

        ctx.clear(&mut profile).expect("clear");
        assert!(!ctx.env.contains_key("EPHEMERAL"));
        assert!(ctx.filters.is_empty());
        assert!(ctx.last_section.is_empty());
        assert!(!profile.is_complete("ofcob"));
        assert_eq!(ctx.mandatory_sections, vec!["ofcob".to_string()]);
    }

    #[test]
    fn test_publish_file_vars() {
        let mut ctx = context();
        ctx.publish_file_vars("a.cbl", "a", "a.so");
        assert_eq!(ctx.env.get("OF_COMPILE_IN").map(String::as_str), Some("a.cbl"));
        assert_eq!(ctx.env.get("OF_COMPILE_BASE").map(String::as_str), Some("a"));
        assert_eq!(ctx.env.get("OF_COMPILE_OUT").map(String::as_str), Some("a.so"));
    }
}
