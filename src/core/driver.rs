// src/core/driver.rs
//
// Orchestrates a whole run: pairs each profile with its source argument,
// expands directories into file lists, runs every section of the profile
// against every source file, and records one report row per source.

use crate::CancellationToken;
use crate::constants::{EXIT_INTERRUPT, EXIT_SOURCE_FAILED};
use crate::core::context::Context;
use crate::core::grouping;
use crate::core::job::{self, ABORT_SECTION};
use crate::core::profile_loader;
use crate::core::report::Report;
use crate::models::Profile;
use crate::system::fs_utils;
use crate::system::logging;
use crate::system::shell::ExecutionError;
use anyhow::{Result, anyhow};
use std::path::{Path, PathBuf};
use std::time::Instant;
use walkdir::WalkDir;

pub struct Driver {
    profiles: Vec<PathBuf>,
    sources: Vec<PathBuf>,
    clear: bool,
    grouping: bool,
    ctx: Context,
}

impl Driver {
    pub fn new(
        profiles: Vec<PathBuf>,
        sources: Vec<PathBuf>,
        tag: Option<&str>,
        clear: bool,
        grouping: bool,
        force: bool,
        cancellation: CancellationToken,
    ) -> Result<Self> {
        if profiles.is_empty() {
            return Err(anyhow!("No profile was given."));
        }
        if profiles.len() != sources.len() {
            return Err(anyhow!(
                "{} profile(s) but {} source argument(s); each -p needs its -s.",
                profiles.len(),
                sources.len()
            ));
        }
        Ok(Self {
            profiles,
            sources,
            clear,
            grouping,
            ctx: Context::new(tag, force, cancellation)?,
        })
    }

    /// Runs every profile/source pair. Returns the process exit code:
    /// 0 when every source compiled, 1 when at least one failed. An
    /// interrupt surfaces as an `ExecutionError::Interrupted`.
    pub fn run(&mut self) -> Result<i32> {
        let pairs: Vec<(PathBuf, PathBuf)> = self
            .profiles
            .iter()
            .cloned()
            .zip(self.sources.iter().cloned())
            .collect();

        let mut report: Option<Report> = None;
        let mut exit_rc = 0;

        for (profile_path, source_arg) in pairs {
            let mut profile = profile_loader::load(&profile_path)?;
            log::info!("Profile: {}", profile_path.display());

            if self.ctx.root_workdir.is_none() {
                self.ctx.root_workdir = Some(profile.workdir.clone());
            }
            if report.is_none() {
                report = Some(Report::create(
                    &profile.workdir,
                    &self.ctx.tag,
                    &self.ctx.time_stamp,
                )?);
            }
            let report = report.as_mut().expect("report created above");

            for source in expand_sources(&source_arg, self.ctx.force)? {
                if self.ctx.is_cancelled() {
                    return Err(ExecutionError::Interrupted(format!(
                        "before '{}'",
                        source.display()
                    ))
                    .into());
                }
                let rc = self.process_source(&mut profile, &source, report)?;
                if rc < 0 {
                    exit_rc = EXIT_SOURCE_FAILED;
                }
            }
        }

        // Leave the last working directory before any post-run move/delete.
        std::env::set_current_dir(self.ctx.initial_dir()).map_err(|e| {
            anyhow!(
                "Could not restore working directory '{}': {}",
                self.ctx.initial_dir().display(),
                e
            )
        })?;

        if report.is_none() {
            log::warn!("No source file was processed.");
            return Ok(exit_rc);
        }

        let group_dir = if self.grouping {
            Some(grouping::group(&mut self.ctx)?)
        } else {
            None
        };
        // Teardown is scoped to fully successful runs; after a failure the
        // working directories and the report stay on disk for diagnosis.
        if self.clear {
            if exit_rc == 0 {
                let report_path = report.as_ref().map(|r| r.path().to_path_buf());
                grouping::clear(&self.ctx, group_dir.as_ref(), report_path.as_ref())?;
            } else {
                log::warn!("At least one source failed; run artifacts kept.");
            }
        }

        Ok(exit_rc)
    }

    /// Runs every section of the profile against one source file and appends
    /// its report row. Returns the final section return code (negative on
    /// failure); an interrupt propagates as an error.
    fn process_source(
        &mut self,
        profile: &mut Profile,
        source: &Path,
        report: &mut Report,
    ) -> Result<i32> {
        log::info!("Source: {}", source.display());
        let started = Instant::now();
        self.ctx.clear(profile)?;

        let mut next_input = source.display().to_string();
        let mut rc = 0;
        let mut interrupt = None;
        let sections = profile.sections.clone();
        for section in &sections {
            let mut job = job::build(section);
            match job.run(&mut self.ctx, profile, &next_input) {
                Ok(outcome) => {
                    if outcome.rc < 0 {
                        rc = outcome.rc;
                        break;
                    }
                    next_input = outcome.file_out;
                }
                Err(e) => {
                    if matches!(
                        e.downcast_ref::<ExecutionError>(),
                        Some(ExecutionError::Interrupted(_))
                    ) {
                        // The in-flight source still gets its report row
                        // before the interrupt propagates.
                        rc = EXIT_INTERRUPT;
                        interrupt = Some(e);
                        break;
                    }
                    log::error!("Source '{}': {}", source.display(), e);
                    rc = ABORT_SECTION;
                    break;
                }
            }
        }
        logging::detach_file();

        let elapsed = started.elapsed().as_secs_f64();
        let list_dir = self
            .ctx
            .current_workdir
            .as_ref()
            .map(|d| d.display().to_string())
            .unwrap_or_default();
        let source_leaf = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| source.display().to_string());
        let success = rc >= 0;
        report.add_row(
            &source_leaf,
            &list_dir,
            success,
            if success { 0 } else { rc },
            &self.ctx.last_section,
            elapsed,
        )?;

        if let Some(e) = interrupt {
            return Err(e);
        }
        if success {
            log::info!("Source '{}' finished in {:.2}s.", source.display(), elapsed);
        } else {
            log::error!(
                "Source '{}' failed in section '{}'.",
                source.display(),
                self.ctx.last_section
            );
        }
        Ok(rc)
    }
}

/// Expands a source argument into the list of files to process. A file
/// stands for itself; a directory contributes its files, sorted by path.
/// A missing path is fatal unless `--force` is set.
fn expand_sources(source: &Path, force: bool) -> Result<Vec<PathBuf>> {
    if !fs_utils::check_path_exists(source, force)? {
        return Ok(Vec::new());
    }
    if source.is_file() {
        return Ok(vec![source.to_path_buf()]);
    }
    if source.is_dir() {
        let mut files: Vec<PathBuf> = WalkDir::new(source)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect();
        files.sort();
        return Ok(files);
    }
    Err(anyhow!(
        "Source '{}' is neither a file nor a directory.",
        source.display()
    ))
}
