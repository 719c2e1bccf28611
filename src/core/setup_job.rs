// src/core/setup_job.rs
//
// Materializes the per-source working directory: assemble a collision-free
// name from the source leaf, the tag, and the timestamp, copy the source in,
// chdir, and attach the file log sink. Also owns the housekeeping, backup,
// and mandatory options.

use crate::constants::WORKDIR_LOG_FILENAME;
use crate::core::context::Context;
use crate::core::job::{ABORT_SECTION, Job, JobCore, RC_OK, RC_SKIP};
use crate::core::profile_loader::parse_housekeeping_days;
use crate::models::{Profile, Section};
use crate::system::fs_utils::{self, DirKind};
use crate::system::logging;
use crate::system::shell::ExecutionError;
use anyhow::{Result, anyhow};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, SystemTime};

pub struct SetupJob {
    core: JobCore,
    /// The profile's workdir parent; set once the directory is established.
    parent: Option<PathBuf>,
}

impl SetupJob {
    pub fn new(section: Section) -> Self {
        Self {
            core: JobCore::new(section),
            parent: None,
        }
    }

    /// Builds `<source-leaf><tag><time_stamp>` under the workdir parent,
    /// retrying with a regenerated timestamp (after a one-second pause) when
    /// the candidate already exists.
    fn establish_workdir(&mut self, ctx: &mut Context, parent: &Path) -> Result<PathBuf> {
        let leaf = self.core.vars.file_name_in.clone();
        let workdir = loop {
            if ctx.is_cancelled() {
                return Err(anyhow!(ExecutionError::Interrupted(format!(
                    "setup of '{}'",
                    leaf
                ))));
            }
            let candidate = parent.join(format!("{}{}{}", leaf, ctx.tag, ctx.time_stamp));
            match fs_utils::create_directory(&candidate, DirKind::Work)? {
                 0 => break candidate,
                _ => {
                    log::info!(
                        "Working directory '{}' already exists; retrying with a fresh timestamp.",
                        candidate.display()
                    );
                    thread::sleep(Duration::from_secs(1));
                    ctx.regenerate_time_stamp();
                }
            }
        };

        fs_utils::copy_file(
            Path::new(&self.core.vars.file_path_in),
            &workdir.join(&leaf),
        )?;
        std::env::set_current_dir(&workdir).map_err(|e| {
            anyhow!(
                "Could not enter working directory '{}': {}",
                workdir.display(),
                e
            )
        })?;
        logging::attach_file(&workdir.join(WORKDIR_LOG_FILENAME))?;

        ctx.current_workdir = Some(workdir.clone());
        ctx.work_directories.push(workdir.clone());
        log::info!("Working directory: {}", workdir.display());
        Ok(workdir)
    }

    /// Keeps at most `keep` working directories for this source under the
    /// workdir parent, deleting the oldest first. The directory created for
    /// the current run is never deleted.
    fn apply_backup(&self, ctx: &Context, keep: usize) -> Result<i32> {
        let parent = match &self.parent {
            Some(p) => p,
            None => return Ok(ABORT_SECTION),
        };
        let leaf = &self.core.vars.file_name_in;
        let mut duplicates = self.source_duplicates(parent, leaf);
        duplicates.sort_by_key(|(_, mtime)| *mtime);

        let mut count = duplicates.len();
        for (dir, _) in duplicates {
            if count <= keep {
                break;
            }
            if ctx.current_workdir.as_deref() == Some(dir.as_path()) {
                log::debug!("Backup limit reached the current working directory; kept.");
                continue;
            }
            log::info!("Backup limit {}: deleting '{}'.", keep, dir.display());
            fs_utils::delete_directory(&dir, false)?;
            count -= 1;
        }
        Ok(RC_OK)
    }

    /// Deletes working directories of this source older than `days` days.
    fn apply_housekeeping(&self, ctx: &Context, days: u64) -> Result<i32> {
        let parent = match &self.parent {
            Some(p) => p,
            None => return Ok(ABORT_SECTION),
        };
        let leaf = &self.core.vars.file_name_in;
        let cutoff = SystemTime::now() - Duration::from_secs(days * 86_400);

        for (dir, mtime) in self.source_duplicates(parent, leaf) {
            if mtime < cutoff && ctx.current_workdir.as_deref() != Some(dir.as_path()) {
                log::info!(
                    "Housekeeping ({}d): deleting '{}'.",
                    days,
                    dir.display()
                );
                fs_utils::delete_directory(&dir, false)?;
            }
        }
        Ok(RC_OK)
    }

    /// Sibling directories whose leaf names start with the source leaf,
    /// paired with their modification times.
    fn source_duplicates(&self, parent: &Path, leaf: &str) -> Vec<(PathBuf, SystemTime)> {
        fs_utils::get_duplicates(parent, leaf)
            .into_iter()
            .filter(|dir| {
                dir.file_name()
                    .map(|n| n.to_string_lossy().starts_with(leaf))
                    .unwrap_or(false)
            })
            .filter_map(|dir| {
                fs_utils::get_modified_time(&dir)
                    .ok()
                    .map(|mtime| (dir, mtime))
            })
            .collect()
    }
}

impl Job for SetupJob {
    fn core(&self) -> &JobCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut JobCore {
        &mut self.core
    }

    fn before_options(&mut self, ctx: &mut Context, profile: &Profile) -> Result<i32> {
        // workdir is validated at load time, so the directory can be
        // established before the option walk; backup and housekeeping then
        // always see an existing parent regardless of declared order.
        let parent = profile.workdir.clone();
        self.establish_workdir(ctx, &parent)?;
        self.parent = Some(parent);
        Ok(RC_OK)
    }

    fn handle_option(&mut self, ctx: &mut Context, key: &str, value: &str) -> Result<i32> {
        match key {
            "workdir" => {
                log::debug!("Working directory already established.");
                Ok(RC_OK)
            }
            "backup" => match value.trim().parse::<usize>() {
                Ok(keep) => self.apply_backup(ctx, keep),
                Err(_) => {
                    log::error!("Invalid 'backup' value '{}'.", value);
                    Ok(ABORT_SECTION)
                }
            },
            "housekeeping" => match parse_housekeeping_days(value) {
                Some(days) => self.apply_housekeeping(ctx, days),
                None => {
                    log::error!("Invalid 'housekeeping' value '{}'.", value);
                    Ok(ABORT_SECTION)
                }
            },
            "mandatory" => {
                let mut mandatory = Vec::new();
                for entry in value.split(':') {
                    let entry = entry.trim();
                    if entry.is_empty() {
                        log::warn!("Empty entry in the 'mandatory' list; ignored.");
                        continue;
                    }
                    if entry.contains('?') {
                        log::warn!(
                            "Mandatory entry '{}' carries a filter suffix; entry rejected.",
                            entry
                        );
                        continue;
                    }
                    mandatory.push(entry.to_string());
                }
                ctx.mandatory_sections = mandatory;
                Ok(RC_OK)
            }
            unknown => {
                log::warn!("Unsupported option '{}' in section '{}'.", unknown, self.core.section.name);
                Ok(RC_SKIP)
            }
        }
    }
}
