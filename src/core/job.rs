// src/core/job.rs
//
// The common job lifecycle shared by setup, compile, and deploy sections:
// initialize per-file variables, analyze the gating conditions, process the
// options in order, update the context, and mark completion.

use crate::core::context::Context;
use crate::models::{Profile, ProfileOption, Section, SectionKind};
use crate::system::shell::ExecutionError;
use anyhow::Result;
use std::path::Path;

/// Return code of a section that ran to completion.
pub const RC_OK: i32 = 0;
/// Return code of a section that was skipped (gate off or already complete).
pub const RC_SKIP: i32 = 1;
/// Return code that aborts the pipeline for the current source file.
pub const ABORT_SECTION: i32 = -1;

/// Outcome of `analyze`: whether the section executes, is skipped, or aborts
/// the current source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Run,
    Skip,
    Abort(i32),
}

/// Result of running one job: the return code and the filename handed to the
/// next section.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub rc: i32,
    pub file_out: String,
}

/// Per-file variables derived once per job. A leading `$`, `#`, or `@` in
/// the filename is data, not a shell expansion, and is preserved literally.
#[derive(Debug, Clone, Default)]
pub struct FileVars {
    /// The input path exactly as handed to the job.
    pub file_path_in: String,
    /// Leaf name of the input file.
    pub file_name_in: String,
    /// Output filename; initially equal to the input leaf (pass-through).
    pub file_name_out: String,
    /// Input leaf with its final extension stripped.
    pub base_name: String,
}

impl FileVars {
    pub fn new(file_path_in: &str) -> Self {
        let leaf = Path::new(file_path_in)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_path_in.to_string());
        let base_name = match leaf.rsplit_once('.') {
            Some((base, _)) if !base.is_empty() => base.to_string(),
            _ => leaf.clone(),
        };
        Self {
            file_path_in: file_path_in.to_string(),
            file_name_in: leaf.clone(),
            file_name_out: leaf,
            base_name,
        }
    }
}

/// State every job carries: its section and the per-file variables.
#[derive(Debug, Clone)]
pub struct JobCore {
    pub section: Section,
    pub vars: FileVars,
}

impl JobCore {
    pub fn new(section: Section) -> Self {
        Self {
            section,
            vars: FileVars::default(),
        }
    }
}

/// The common capability surface of the three job kinds. The lifecycle
/// methods are provided; implementors supply the reserved-option handlers
/// and, where needed, override the hooks.
pub trait Job {
    fn core(&self) -> &JobCore;
    fn core_mut(&mut self) -> &mut JobCore;

    /// Handles a section-kind specific (reserved) option. A negative return
    /// aborts the section.
    fn handle_option(&mut self, ctx: &mut Context, key: &str, value: &str) -> Result<i32>;

    /// Hook that runs before the option walk (setup materializes the
    /// working directory here).
    fn before_options(&mut self, _ctx: &mut Context, _profile: &Profile) -> Result<i32> {
        Ok(RC_OK)
    }

    /// Options in processing order. Declared order by default; deploy
    /// forces `file` first.
    fn ordered_options(&self) -> Vec<ProfileOption> {
        self.core().section.options.clone()
    }

    /// Extra gating beyond completion/mandatory/filter (deploy's
    /// at-least-one-compile rule).
    fn extra_gate(&self, _profile: &Profile) -> Decision {
        Decision::Run
    }

    /// Computes run/skip/abort for this section.
    fn analyze(&self, ctx: &Context, profile: &Profile) -> Result<Decision> {
        let section = &self.core().section;

        if profile.is_complete(&section.base) {
            log::debug!("Section '{}' already complete; skipping.", section.name);
            return Ok(Decision::Skip);
        }

        if ctx.mandatory_sections.iter().any(|m| m == &section.base) {
            log::debug!("Section '{}' is mandatory; filter bypassed.", section.name);
            return Ok(self.extra_gate(profile));
        }

        let verdict = match ctx.evaluate_filter(&section.name, section.filter.as_deref()) {
            Ok(v) => v,
            Err(e) => {
                if matches!(
                    e.downcast_ref::<ExecutionError>(),
                    Some(ExecutionError::Interrupted(_))
                ) {
                    return Err(e);
                }
                log::error!("Section '{}': {}", section.name, e);
                return Ok(Decision::Abort(ABORT_SECTION));
            }
        };

        match verdict {
            Some(false) => {
                log::info!("Section '{}' gated off by its filter.", section.name);
                Ok(Decision::Skip)
            }
            _ => Ok(self.extra_gate(profile)),
        }
    }

    /// Walks the options in processing order, dispatching each to the
    /// context or to the job's reserved-key handler. Stops on the first
    /// negative handler return.
    fn process_section(&mut self, ctx: &mut Context) -> Result<i32> {
        for option in self.ordered_options() {
            let rc = match &option {
                ProfileOption::EnvVar { name, value } => {
                    if value.trim().is_empty() {
                        log::warn!("Option '${}' has an empty value; skipped.", name);
                        continue;
                    }
                    ctx.add_env_variable(name, value)?;
                    RC_OK
                }
                ProfileOption::Filter { name, predicate } => {
                    if predicate.trim().is_empty() {
                        log::warn!("Filter '?{}' has an empty predicate; skipped.", name);
                        continue;
                    }
                    ctx.add_filter(name, predicate);
                    RC_OK
                }
                ProfileOption::Reserved { key, value } => {
                    if value.trim().is_empty() {
                        log::warn!("Option '{}' has an empty value; skipped.", key);
                        continue;
                    }
                    self.handle_option(ctx, key, value)?
                }
            };
            if rc < 0 {
                log::error!(
                    "Section '{}' aborted while processing its options.",
                    self.core().section.name
                );
                return Ok(rc);
            }
        }
        Ok(RC_OK)
    }

    /// The full lifecycle for one section of one source file.
    fn run(&mut self, ctx: &mut Context, profile: &mut Profile, file_path_in: &str) -> Result<JobOutcome> {
        self.core_mut().vars = FileVars::new(file_path_in);
        publish_vars(self, ctx);

        let decision = self.analyze(ctx, profile)?;
        // A skipped section was never attempted; it does not become the
        // "last section" shown in the report. Recorded before the option
        // walk so a handler that fails with an error is still the section
        // the report names.
        if decision != Decision::Skip {
            ctx.last_section = self.core().section.name.clone();
        }
        let rc = match decision {
            Decision::Skip => RC_SKIP,
            Decision::Abort(rc) => rc,
            Decision::Run => {
                let rc = self.before_options(ctx, profile)?;
                if rc < 0 {
                    rc
                } else {
                    self.process_section(ctx)?
                }
            }
        };

        // Handlers may have renamed the artifact; republish before leaving.
        publish_vars(self, ctx);
        if rc == RC_OK {
            let base = self.core().section.base.clone();
            profile.mark_complete(&base);
        }

        Ok(JobOutcome {
            rc,
            file_out: self.core().vars.file_name_out.clone(),
        })
    }
}

fn publish_vars<J: Job + ?Sized>(job: &J, ctx: &mut Context) {
    let vars = &job.core().vars;
    ctx.publish_file_vars(&vars.file_name_in, &vars.base_name, &vars.file_name_out);
}

/// Invokes an external tool for a section, echoing the command line the way
/// an operator would type it. A non-zero exit or a missing tool aborts the
/// section; an interrupt propagates.
pub fn run_tool(
    ctx: &Context,
    section_name: &str,
    command: &str,
    kind: crate::system::shell::CommandKind,
) -> Result<i32> {
    use colored::Colorize;

    println!("{} {}", "→".blue(), command.green());
    match ctx.run_shell(command, kind) {
        Ok(output) if output.exit_code == 0 => Ok(RC_OK),
        Ok(output) => {
            log::error!(
                "Section '{}': command exited with code {}.",
                section_name,
                output.exit_code
            );
            Ok(ABORT_SECTION)
        }
        Err(ExecutionError::CommandNotFound(program)) => {
            log::error!(
                "Section '{}': command '{}' not found on PATH.",
                section_name,
                program
            );
            Ok(ABORT_SECTION)
        }
        Err(e) => Err(e.into()),
    }
}

/// Builds the job matching a section's kind.
pub fn build(section: &Section) -> Box<dyn Job> {
    match section.kind {
        SectionKind::Setup => Box::new(crate::core::setup_job::SetupJob::new(section.clone())),
        SectionKind::Deploy => Box::new(crate::core::deploy_job::DeployJob::new(section.clone())),
        SectionKind::Compile => {
            Box::new(crate::core::compile_job::CompileJob::new(section.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    struct ProbeJob {
        core: JobCore,
        handled: Vec<(String, String)>,
    }

    impl ProbeJob {
        fn new(section: Section) -> Self {
            Self {
                core: JobCore::new(section),
                handled: Vec::new(),
            }
        }
    }

    impl Job for ProbeJob {
        fn core(&self) -> &JobCore {
            &self.core
        }
        fn core_mut(&mut self) -> &mut JobCore {
            &mut self.core
        }
        fn handle_option(&mut self, _ctx: &mut Context, key: &str, value: &str) -> Result<i32> {
            self.handled.push((key.to_string(), value.to_string()));
            Ok(RC_OK)
        }
    }

    fn section(name: &str, options: Vec<ProfileOption>) -> Section {
        let (base, filter) = match name.split_once('?') {
            Some((b, f)) => (b.to_string(), Some(f.to_string())),
            None => (name.to_string(), None),
        };
        Section {
            name: name.to_string(),
            kind: SectionKind::from_base(&base),
            base,
            filter,
            options,
        }
    }

    fn context() -> Context {
        Context::new(Some("t"), false, Arc::new(AtomicBool::new(false))).expect("context")
    }

    fn profile_for(sections: &[&str]) -> Profile {
        let mut profile = Profile::default();
        for name in sections {
            let s = section(name, Vec::new());
            profile.complete.insert(s.base.clone(), false);
            profile.sections.push(s);
        }
        profile
    }

    #[test]
    fn test_file_vars_derivation() {
        let vars = FileVars::new("/tmp/src/a.cbl");
        assert_eq!(vars.file_name_in, "a.cbl");
        assert_eq!(vars.file_name_out, "a.cbl");
        assert_eq!(vars.base_name, "a");

        // Leading special characters stay literal.
        let vars = FileVars::new("$PROG.cbl");
        assert_eq!(vars.file_name_in, "$PROG.cbl");
        assert_eq!(vars.base_name, "$PROG");
        let vars = FileVars::new("#MOD.asm");
        assert_eq!(vars.base_name, "#MOD");
        let vars = FileVars::new("@JOB");
        assert_eq!(vars.base_name, "@JOB");
    }

    #[test]
    fn test_analyze_complete_skips() {
        let job = ProbeJob::new(section("ofcob", Vec::new()));
        let ctx = context();
        let mut profile = profile_for(&["setup", "ofcob"]);
        profile.mark_complete("ofcob");
        assert_eq!(job.analyze(&ctx, &profile).expect("analyze"), Decision::Skip);
    }

    #[test]
    fn test_analyze_filter_false_skips() {
        let job = ProbeJob::new(section("ofcob?never", Vec::new()));
        let mut ctx = context();
        ctx.add_filter("never", "false");
        let profile = profile_for(&["setup", "ofcob"]);
        assert_eq!(job.analyze(&ctx, &profile).expect("analyze"), Decision::Skip);
    }

    #[test]
    fn test_analyze_mandatory_bypasses_filter() {
        let job = ProbeJob::new(section("ofcob?never", Vec::new()));
        let mut ctx = context();
        ctx.add_filter("never", "false");
        ctx.mandatory_sections.push("ofcob".into());
        let profile = profile_for(&["setup", "ofcob"]);
        assert_eq!(job.analyze(&ctx, &profile).expect("analyze"), Decision::Run);
    }

    #[test]
    fn test_analyze_missing_filter_aborts() {
        let job = ProbeJob::new(section("ofcob?ghost", Vec::new()));
        let ctx = context();
        let profile = profile_for(&["setup", "ofcob"]);
        assert_eq!(
            job.analyze(&ctx, &profile).expect("analyze"),
            Decision::Abort(ABORT_SECTION)
        );
    }

    #[test]
    fn test_run_marks_complete_only_on_success() {
        let mut ctx = context();
        let mut profile = profile_for(&["setup", "ofcob"]);

        // Filter false: skipped, not marked complete.
        ctx.add_filter("never", "false");
        let mut gated = ProbeJob::new(section("ofcob?never", Vec::new()));
        let outcome = gated.run(&mut ctx, &mut profile, "a.cbl").expect("run");
        assert_eq!(outcome.rc, RC_SKIP);
        assert!(!profile.is_complete("ofcob"));

        // Ungated: runs and completes.
        let mut open = ProbeJob::new(section("ofcob", Vec::new()));
        let outcome = open.run(&mut ctx, &mut profile, "a.cbl").expect("run");
        assert_eq!(outcome.rc, RC_OK);
        assert_eq!(outcome.file_out, "a.cbl");
        assert!(profile.is_complete("ofcob"));
        assert_eq!(ctx.last_section, "ofcob");
    }

    #[test]
    fn test_failing_handler_still_records_last_section() {
        struct FailingJob {
            core: JobCore,
        }
        impl Job for FailingJob {
            fn core(&self) -> &JobCore {
                &self.core
            }
            fn core_mut(&mut self) -> &mut JobCore {
                &mut self.core
            }
            fn handle_option(&mut self, _ctx: &mut Context, key: &str, _value: &str) -> Result<i32> {
                Err(anyhow::anyhow!("handler '{}' failed", key))
            }
        }

        let mut ctx = context();
        let mut profile = profile_for(&["setup", "ofcob"]);
        let mut job = FailingJob {
            core: JobCore::new(section(
                "ofcob",
                vec![ProfileOption::Reserved {
                    key: "args".into(),
                    value: "-x".into(),
                }],
            )),
        };
        assert!(job.run(&mut ctx, &mut profile, "a.cbl").is_err());
        // The failing section is the one the report must name.
        assert_eq!(ctx.last_section, "ofcob");
        assert!(!profile.is_complete("ofcob"));
    }

    #[test]
    fn test_completion_monotonicity() {
        let mut ctx = context();
        let mut profile = profile_for(&["setup", "ofcob"]);
        profile.mark_complete("ofcob");

        let mut job = ProbeJob::new(section(
            "ofcob",
            vec![ProfileOption::Reserved {
                key: "args".into(),
                value: "-o out".into(),
            }],
        ));
        let outcome = job.run(&mut ctx, &mut profile, "a.cbl").expect("run");
        assert_eq!(outcome.rc, RC_SKIP);
        assert!(job.handled.is_empty());
    }

    #[test]
    fn test_process_section_dispatch() {
        let mut ctx = context();
        let mut profile = profile_for(&["setup", "ofcob"]);
        let mut job = ProbeJob::new(section(
            "ofcob",
            vec![
                ProfileOption::EnvVar {
                    name: "X".into(),
                    value: "1".into(),
                },
                ProfileOption::Filter {
                    name: "gate".into(),
                    predicate: "true".into(),
                },
                ProfileOption::EnvVar {
                    name: "EMPTY".into(),
                    value: "  ".into(),
                },
                ProfileOption::Reserved {
                    key: "args".into(),
                    value: "-x".into(),
                },
            ],
        ));
        let outcome = job.run(&mut ctx, &mut profile, "a.cbl").expect("run");
        assert_eq!(outcome.rc, RC_OK);
        assert_eq!(ctx.env.get("X").map(String::as_str), Some("1"));
        assert!(!ctx.env.contains_key("EMPTY"));
        assert!(ctx.filters.contains_key("gate"));
        assert_eq!(job.handled, vec![("args".to_string(), "-x".to_string())]);
    }

    #[test]
    fn test_env_contract_published() {
        let mut ctx = context();
        let mut profile = profile_for(&["setup", "ofcob"]);
        let mut job = ProbeJob::new(section("ofcob", Vec::new()));
        job.run(&mut ctx, &mut profile, "/src/prog.cbl").expect("run");
        assert_eq!(ctx.env.get("OF_COMPILE_IN").map(String::as_str), Some("prog.cbl"));
        assert_eq!(ctx.env.get("OF_COMPILE_BASE").map(String::as_str), Some("prog"));
        assert_eq!(ctx.env.get("OF_COMPILE_OUT").map(String::as_str), Some("prog.cbl"));
    }
}
