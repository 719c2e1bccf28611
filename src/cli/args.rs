// src/cli/args.rs
use clap::{ArgAction, Parser, ValueEnum};
use log::LevelFilter;
use std::path::PathBuf;

/// ofcompile: profile-driven batch compilation of migrated mainframe sources.
///
/// Each `--profile` is paired positionally with one `--source`; a source may
/// be a single file or a directory of files.
#[derive(Parser, Debug)]
#[command(author, version, about, disable_version_flag = true)]
pub struct Cli {
    /// Path to a profile file. Repeatable; pairs with --source in order.
    #[arg(short, long = "profile", required = true)]
    pub profiles: Vec<PathBuf>,

    /// Source file or directory to compile. Repeatable; pairs with --profile.
    #[arg(short, long = "source", required = true)]
    pub sources: Vec<PathBuf>,

    /// Tag appended to working-directory and report names.
    /// Defaults to the current login name.
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Delete working directories and the report once the run finishes.
    #[arg(short, long)]
    pub clear: bool,

    /// Gather all working directories of the run under one umbrella
    /// directory with an aggregated log.
    #[arg(short, long)]
    pub grouping: bool,

    /// Treat missing source paths as a warning instead of an error.
    #[arg(long)]
    pub force: bool,

    /// Verbosity threshold.
    #[arg(short = 'l', long, value_enum, ignore_case = true, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Print the version and exit.
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    version: Option<bool>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Warning => LevelFilter::Warn,
            // `log` has no level above Error; critical maps onto it.
            LogLevel::Error | LogLevel::Critical => LevelFilter::Error,
        }
    }
}
