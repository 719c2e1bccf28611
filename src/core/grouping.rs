// src/core/grouping.rs
//
// `--grouping` gathers every per-source working directory of a run under one
// umbrella directory and concatenates their individual logs into a single
// `group.log`, preserving processing order.

use crate::constants::{GROUP_LOG_FILENAME, GROUP_PREFIX, WORKDIR_LOG_FILENAME};
use crate::core::context::Context;
use crate::system::fs_utils::{self, DirKind};
use anyhow::{Context as _, Result, anyhow};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

/// Moves the run's working directories into `<root>/group<tag><timestamp>/`
/// and writes the aggregated log. Returns the grouping directory. The moved
/// paths replace the originals in `ctx.work_directories` so a later
/// `--clear` targets the right locations.
pub fn group(ctx: &mut Context) -> Result<PathBuf> {
    let root = ctx
        .root_workdir
        .clone()
        .ok_or_else(|| anyhow!("No working directory root; nothing to group."))?;
    let group_dir = root.join(format!("{}{}{}", GROUP_PREFIX, ctx.tag, ctx.time_stamp));
    fs_utils::create_directory(&group_dir, DirKind::Group)?;

    let mut moved = Vec::with_capacity(ctx.work_directories.len());
    for workdir in &ctx.work_directories {
        let leaf = workdir
            .file_name()
            .ok_or_else(|| anyhow!("Working directory '{}' has no name.", workdir.display()))?;
        let target = group_dir.join(leaf);
        fs::rename(workdir, &target).with_context(|| {
            format!(
                "Could not move '{}' into '{}'",
                workdir.display(),
                group_dir.display()
            )
        })?;
        log::debug!("Grouped '{}'.", target.display());
        moved.push(target);
    }
    ctx.work_directories = moved;

    write_group_log(&group_dir, &ctx.work_directories)?;
    log::info!("Grouping directory: {}", group_dir.display());
    Ok(group_dir)
}

/// Concatenates each working directory's log, in processing order, into
/// `group.log`. Directories without a log (the setup section never ran far
/// enough) are skipped.
fn write_group_log(group_dir: &std::path::Path, workdirs: &[PathBuf]) -> Result<()> {
    let log_path = group_dir.join(GROUP_LOG_FILENAME);
    let mut sink = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Could not create '{}'", log_path.display()))?;

    for workdir in workdirs {
        let source = workdir.join(WORKDIR_LOG_FILENAME);
        if !source.is_file() {
            log::debug!("No log in '{}'; skipped.", workdir.display());
            continue;
        }
        let mut input = File::open(&source)
            .with_context(|| format!("Could not open '{}'", source.display()))?;
        io::copy(&mut input, &mut sink)
            .with_context(|| format!("Could not append '{}'", source.display()))?;
    }
    sink.flush()?;
    Ok(())
}

/// `--clear` removes everything the run produced: every working directory
/// (or the grouping directory that swallowed them), the report file, and the
/// report directory when it ends up empty.
pub fn clear(ctx: &Context, group_dir: Option<&PathBuf>, report_path: Option<&PathBuf>) -> Result<()> {
    match group_dir {
        Some(dir) => fs_utils::delete_directory(dir, true)?,
        None => {
            for workdir in &ctx.work_directories {
                fs_utils::delete_directory(workdir, true)?;
            }
        }
    }

    if let Some(report) = report_path {
        if report.is_file() {
            fs::remove_file(report)
                .with_context(|| format!("Could not delete report '{}'", report.display()))?;
        }
        if let Some(report_dir) = report.parent() {
            let empty = fs::read_dir(report_dir)
                .map(|mut entries| entries.next().is_none())
                .unwrap_or(false);
            if empty {
                fs::remove_dir(report_dir).with_context(|| {
                    format!("Could not delete '{}'", report_dir.display())
                })?;
            }
        }
    }
    log::info!("Cleared run artifacts.");
    Ok(())
}
