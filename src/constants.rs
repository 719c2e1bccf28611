// src/constants.rs

/// The name of the log file written inside each per-source working directory.
pub const WORKDIR_LOG_FILENAME: &str = "oftools_compile.log";

/// The name of the directory holding report files (under the root workdir).
pub const REPORT_DIR: &str = "report";

/// The prefix of report file names: `oftools_compile<tag>_YYYYMMDD_HHMMSS.csv`.
pub const REPORT_PREFIX: &str = "oftools_compile";

/// The prefix of the umbrella directory created by `--grouping`.
pub const GROUP_PREFIX: &str = "group";

/// The name of the aggregated log file inside the grouping directory.
pub const GROUP_LOG_FILENAME: &str = "group.log";

/// The name of the section that must be declared first in every profile.
pub const SETUP_SECTION: &str = "setup";

/// The base name of deploy sections.
pub const DEPLOY_SECTION: &str = "deploy";

// Environment contract: published to every child process.
pub const ENV_COMPILE_IN: &str = "OF_COMPILE_IN";
pub const ENV_COMPILE_BASE: &str = "OF_COMPILE_BASE";
pub const ENV_COMPILE_OUT: &str = "OF_COMPILE_OUT";

// Exit codes. Negative values are passed to `std::process::exit` as-is;
// the OS presents them modulo 256.
pub const EXIT_SOURCE_FAILED: i32 = 1;
pub const EXIT_FATAL: i32 = -1;
pub const EXIT_INTERRUPT: i32 = -2;
pub const EXIT_QUIT: i32 = -3;
pub const EXIT_PROFILE_ERROR: i32 = -4;
