// src/system/logging.rs

use anyhow::{Result, anyhow};
use lazy_static::lazy_static;
use log::{LevelFilter, Log, Metadata, Record};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

lazy_static! {
    // The per-workdir file sink. Attached by SetupJob once the working
    // directory exists, detached by the driver after each source file.
    static ref FILE_SINK: Mutex<Option<File>> = Mutex::new(None);
}

/// A `log::Log` implementation that forwards to a configured
/// `env_logger::Logger` and mirrors every accepted record into the
/// currently-attached working-directory log file.
struct PipelineLogger {
    inner: env_logger::Logger,
}

impl Log for PipelineLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record<'_>) {
        if !self.inner.matches(record) {
            return;
        }
        if let Ok(mut sink) = FILE_SINK.lock() {
            if let Some(file) = sink.as_mut() {
                let _ = writeln!(
                    file,
                    "[{} {:<5}] {}",
                    chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                    record.level(),
                    record.args()
                );
            }
        }
        self.inner.log(record);
    }

    fn flush(&self) {
        if let Ok(mut sink) = FILE_SINK.lock() {
            if let Some(file) = sink.as_mut() {
                let _ = file.flush();
            }
        }
        self.inner.flush();
    }
}

/// Installs the pipeline logger at the given threshold. Safe to call more
/// than once; only the first installation wins.
pub fn init(level: LevelFilter) {
    let inner = env_logger::Builder::new().filter_level(level).build();
    if log::set_boxed_logger(Box::new(PipelineLogger { inner })).is_ok() {
        log::set_max_level(level);
    }
}

/// Attaches the file sink to `path` (append, created if absent).
pub fn attach_file(path: &Path) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| anyhow!("Could not open log file '{}': {}", path.display(), e))?;
    let mut sink = FILE_SINK
        .lock()
        .map_err(|_| anyhow!("Log sink lock is poisoned."))?;
    *sink = Some(file);
    Ok(())
}

/// Detaches and flushes the file sink, if any.
pub fn detach_file() {
    if let Ok(mut sink) = FILE_SINK.lock() {
        if let Some(mut file) = sink.take() {
            let _ = file.flush();
        }
    }
}
