// src/system/shell.rs

use crate::CancellationToken;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command as StdCommand, Stdio};
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;
use thiserror::Error;

lazy_static! {
    static ref VAR_RE: Regex =
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
            .expect("variable regex is valid");
}

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Command could not be parsed: {0}")]
    CommandParse(String),
    #[error("Command '{0}' not found on PATH.")]
    CommandNotFound(String),
    #[error("Command '{0}' could not be executed: {1}")]
    CommandFailed(String, std::io::Error),
    #[error("Command '{0}' was interrupted by the user.")]
    Interrupted(String),
}

/// What a command is being run for. Drives the logging policy: a non-zero
/// exit from a `Filter` command is a normal gate outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Init,
    Compile,
    Deploy,
    EnvVariable,
    Filter,
}

impl CommandKind {
    fn label(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Compile => "compile",
            Self::Deploy => "deploy",
            Self::EnvVariable => "env_variable",
            Self::Filter => "filter",
        }
    }
}

/// Captured result of a shell invocation.
#[derive(Debug)]
pub struct ShellOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Expands `$VAR` and `${VAR}` references against the given environment.
/// References to undefined variables are left untouched (the child shell
/// still sees the full environment and may expand them itself).
pub fn expand_env_vars(input: &str, env: &HashMap<String, String>) -> String {
    VAR_RE
        .replace_all(input, |caps: &Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            match env.get(name) {
                Some(value) => value.clone(),
                None => caps
                    .get(0)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default(),
            }
        })
        .into_owned()
}

/// Resolves the first token of a command against PATH (or directly, when it
/// contains a path separator). Used as a guard so that a missing tool is
/// reported without spawning a subshell.
fn resolve_on_path(program: &str, env: &HashMap<String, String>) -> Option<PathBuf> {
    if program.contains('/') {
        let candidate = PathBuf::from(program);
        return candidate.is_file().then_some(candidate);
    }
    let path_var = env
        .get("PATH")
        .cloned()
        .or_else(|| std::env::var("PATH").ok())?;
    for dir in path_var.split(':').filter(|d| !d.is_empty()) {
        let candidate = Path::new(dir).join(program);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

/// Decodes child output as UTF-8, falling back to Latin-1 so that a stray
/// byte from a legacy-encoded compiler listing never aborts the pipeline.
fn decode_stream(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => {
            log::debug!("Child output is not valid UTF-8; decoding as Latin-1.");
            err.into_bytes().iter().map(|&b| b as char).collect()
        }
    }
}

/// Executes a shell command under the provided environment and working
/// directory, capturing stdout, stderr, and the exit code.
///
/// `$VAR` references are expanded against `env` before execution, the first
/// token is checked against PATH, and the command then runs through the
/// platform shell. The wait loop polls the cancellation token and kills the
/// child when an interrupt was requested.
pub fn run(
    command_line: &str,
    kind: CommandKind,
    env: &HashMap<String, String>,
    cwd: &Path,
    cancellation_token: &CancellationToken,
) -> Result<ShellOutput, ExecutionError> {
    if cancellation_token.load(Ordering::Relaxed) {
        return Err(ExecutionError::Interrupted(command_line.to_string()));
    }

    let expanded = expand_env_vars(command_line.trim(), env);
    if expanded.is_empty() {
        return Ok(ShellOutput {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
        });
    }

    // PATH guard on the first token.
    let parts =
        shlex::split(&expanded).ok_or_else(|| ExecutionError::CommandParse(expanded.clone()))?;
    let program = match parts.first() {
        Some(p) => p.clone(),
        None => {
            return Ok(ShellOutput {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
            });
        }
    };
    if resolve_on_path(&program, env).is_none() {
        return Err(ExecutionError::CommandNotFound(program));
    }

    log::debug!("[{}] $ {}", kind.label(), expanded);

    let mut child = StdCommand::new("sh")
        .arg("-c")
        .arg(&expanded)
        .current_dir(cwd)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ExecutionError::CommandFailed(expanded.clone(), e))?;

    // Drain both pipes on side threads so a chatty child can never fill a
    // pipe buffer while the wait loop below is polling.
    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();
    let stdout_reader = thread::spawn(move || read_to_end(stdout_pipe));
    let stderr_reader = thread::spawn(move || read_to_end(stderr_pipe));

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if cancellation_token.load(Ordering::Relaxed) {
                    log::debug!("Cancellation requested, killing child (PID {}).", child.id());
                    if let Err(e) = child.kill() {
                        log::warn!("Failed to kill child process {}: {}", child.id(), e);
                    }
                    child.wait().ok();
                    stdout_reader.join().ok();
                    stderr_reader.join().ok();
                    return Err(ExecutionError::Interrupted(expanded));
                }
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                stdout_reader.join().ok();
                stderr_reader.join().ok();
                return Err(ExecutionError::CommandFailed(expanded, e));
            }
        }
    };

    let stdout = decode_stream(stdout_reader.join().unwrap_or_default());
    let stderr = decode_stream(stderr_reader.join().unwrap_or_default());
    // A signal-terminated child has no exit code; report it as -1.
    let exit_code = status.code().unwrap_or(-1);

    log_outcome(kind, &expanded, &stdout, &stderr, exit_code);

    Ok(ShellOutput {
        stdout,
        stderr,
        exit_code,
    })
}

fn read_to_end<R: Read>(pipe: Option<R>) -> Vec<u8> {
    let mut buffer = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buffer).ok();
    }
    buffer
}

/// Logging policy: at debug level, both streams plus the exit code for all
/// outcomes; at default level, both streams only on a non-zero exit of a
/// non-filter command.
fn log_outcome(kind: CommandKind, command: &str, stdout: &str, stderr: &str, exit_code: i32) {
    if log::log_enabled!(log::Level::Debug) {
        if !stdout.is_empty() {
            log::debug!("[{}] stdout: {}", kind.label(), stdout.trim_end());
        }
        if !stderr.is_empty() {
            log::debug!("[{}] stderr: {}", kind.label(), stderr.trim_end());
        }
        log::debug!("[{}] exit code: {}", kind.label(), exit_code);
        return;
    }
    if exit_code != 0 && kind != CommandKind::Filter {
        log::error!("Command '{}' exited with code {}.", command, exit_code);
        if !stdout.is_empty() {
            log::error!("stdout: {}", stdout.trim_end());
        }
        if !stderr.is_empty() {
            log::error!("stderr: {}", stderr.trim_end());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    fn token() -> CancellationToken {
        Arc::new(AtomicBool::new(false))
    }

    fn env_with_path() -> HashMap<String, String> {
        std::env::vars().collect()
    }

    #[test]
    fn test_expand_env_vars() {
        let mut env = HashMap::new();
        env.insert("OF_COMPILE_IN".to_string(), "a.cbl".to_string());
        env.insert("HOME".to_string(), "/home/u".to_string());

        assert_eq!(expand_env_vars("cat $OF_COMPILE_IN", &env), "cat a.cbl");
        assert_eq!(expand_env_vars("${HOME}/x", &env), "/home/u/x");
        // Undefined references are left untouched.
        assert_eq!(expand_env_vars("echo $UNDEFINED_VAR_42", &env), "echo $UNDEFINED_VAR_42");
    }

    #[test]
    fn test_run_captures_stdout_and_exit_code() {
        let out = run("echo hello", CommandKind::Init, &env_with_path(), Path::new("."), &token())
            .expect("echo should run");
        assert_eq!(out.exit_code, 0);
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn test_run_nonzero_exit_is_not_an_error() {
        let out = run("false", CommandKind::Filter, &env_with_path(), Path::new("."), &token())
            .expect("false should run");
        assert_ne!(out.exit_code, 0);
    }

    #[test]
    fn test_command_not_found_guard() {
        let result = run(
            "definitely-not-a-real-tool-xyz --flag",
            CommandKind::Compile,
            &env_with_path(),
            Path::new("."),
            &token(),
        );
        assert!(matches!(result, Err(ExecutionError::CommandNotFound(_))));
    }

    #[test]
    fn test_latin1_fallback_decode() {
        // 0xFF is invalid UTF-8 on its own; Latin-1 maps it to 'ÿ'.
        let out = run(
            r"printf '\377'",
            CommandKind::Init,
            &env_with_path(),
            Path::new("."),
            &token(),
        )
        .expect("printf should run");
        assert_eq!(out.stdout, "\u{ff}");
    }

    #[test]
    fn test_interrupted_before_start() {
        let cancelled: CancellationToken = Arc::new(AtomicBool::new(true));
        let result = run("echo hi", CommandKind::Init, &env_with_path(), Path::new("."), &cancelled);
        assert!(matches!(result, Err(ExecutionError::Interrupted(_))));
    }

    #[test]
    fn test_expansion_happens_before_path_guard() {
        let mut env = env_with_path();
        env.insert("MY_TOOL".to_string(), "echo".to_string());
        let out = run("$MY_TOOL expanded", CommandKind::Init, &env, Path::new("."), &token())
            .expect("expanded echo should run");
        assert_eq!(out.stdout.trim(), "expanded");
    }
}
