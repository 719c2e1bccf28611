// src/core/deploy_job.rs
//
// Publishes the final artifact. `file` names the artifact inside the
// working directory and always runs first; `dataset`, `region`, and `tdl`
// then fan the artifact out through the OpenFrame update tools, stopping on
// the first failure. Empty colon-list items are tolerated with a warning.

use crate::core::context::Context;
use crate::core::job::{ABORT_SECTION, Decision, Job, JobCore, RC_OK, RC_SKIP, run_tool};
use crate::models::{Profile, ProfileOption, Section};
use crate::system::fs_utils;
use crate::system::shell::CommandKind;
use anyhow::Result;
use std::path::Path;

pub struct DeployJob {
    core: JobCore,
}

impl DeployJob {
    pub fn new(section: Section) -> Self {
        Self {
            core: JobCore::new(section),
        }
    }

    /// Copies the pipeline's current artifact to its deploy name inside the
    /// working directory and records it as the output filename.
    fn handle_file(&mut self, ctx: &Context, value: &str) -> Result<i32> {
        let target = ctx.expand_value(value);
        let cwd = ctx.cwd();
        fs_utils::copy_file(
            &cwd.join(&self.core.vars.file_name_in),
            &cwd.join(&target),
        )?;
        self.core.vars.file_name_out = target;
        Ok(RC_OK)
    }

    fn handle_dataset(&self, ctx: &Context, value: &str) -> Result<i32> {
        let artifact = ctx.cwd().join(&self.core.vars.file_name_out);
        for dataset in split_list(value, &self.core.section.name) {
            let command = format!("dlupdate {} {}", artifact.display(), dataset);
            let rc = run_tool(ctx, &self.core.section.name, &command, CommandKind::Deploy)?;
            if rc != RC_OK {
                return Ok(ABORT_SECTION);
            }
        }
        Ok(RC_OK)
    }

    fn handle_region(&self, ctx: &Context, value: &str) -> Result<i32> {
        let openframe_home = match ctx.env.get("OPENFRAME_HOME") {
            Some(home) if !home.is_empty() => home.clone(),
            _ => {
                log::error!(
                    "Section '{}': 'region' requires OPENFRAME_HOME.",
                    self.core.section.name
                );
                return Ok(ABORT_SECTION);
            }
        };
        let artifact = &self.core.vars.file_name_out;
        for region in split_list(value, &self.core.section.name) {
            let mod_dir = Path::new(&openframe_home)
                .join("osc/region")
                .join(&region)
                .join("tdl/mod");
            fs_utils::copy_file(&ctx.cwd().join(artifact), &mod_dir.join(artifact))?;
            let command = format!("osctdlupdate {} {}", region, artifact);
            let rc = run_tool(ctx, &self.core.section.name, &command, CommandKind::Deploy)?;
            if rc != RC_OK {
                return Ok(ABORT_SECTION);
            }
        }
        Ok(RC_OK)
    }

    fn handle_tdl(&self, ctx: &Context, value: &str) -> Result<i32> {
        let artifact = &self.core.vars.file_name_out;
        for tdl in split_list(value, &self.core.section.name) {
            let tdl = ctx.expand_value(&tdl);
            let mod_dir = Path::new(&tdl).join("tdl/mod");
            fs_utils::copy_file(&ctx.cwd().join(artifact), &mod_dir.join(artifact))?;
            let command = format!("tdlupdate -m {} -r {}", artifact, mod_dir.display());
            let rc = run_tool(ctx, &self.core.section.name, &command, CommandKind::Deploy)?;
            if rc != RC_OK {
                return Ok(ABORT_SECTION);
            }
        }
        Ok(RC_OK)
    }
}

/// Splits a colon-delimited list, warning on (and dropping) empty items.
fn split_list(value: &str, section_name: &str) -> Vec<String> {
    value
        .split(':')
        .map(str::trim)
        .filter(|item| {
            if item.is_empty() {
                log::warn!("Section '{}': empty list entry ignored.", section_name);
                false
            } else {
                true
            }
        })
        .map(str::to_string)
        .collect()
}

impl Job for DeployJob {
    fn core(&self) -> &JobCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut JobCore {
        &mut self.core
    }

    /// `file` is forced first; everything else keeps its declared order.
    fn ordered_options(&self) -> Vec<ProfileOption> {
        let mut options = self.core.section.options.clone();
        options.sort_by_key(|opt| !matches!(opt, ProfileOption::Reserved { key, .. } if key == "file"));
        options
    }

    /// A deploy runs only after at least one compile section completed,
    /// unless the profile has no compile sections at all.
    fn extra_gate(&self, profile: &Profile) -> Decision {
        if profile.has_compile_sections() && !profile.any_compile_complete() {
            log::info!(
                "Section '{}' skipped: no compile section completed.",
                self.core.section.name
            );
            Decision::Skip
        } else {
            Decision::Run
        }
    }

    fn handle_option(&mut self, ctx: &mut Context, key: &str, value: &str) -> Result<i32> {
        match key {
            "file" => self.handle_file(ctx, value),
            "dataset" => self.handle_dataset(ctx, value),
            "region" => self.handle_region(ctx, value),
            "tdl" => self.handle_tdl(ctx, value),
            unknown => {
                log::warn!(
                    "Unsupported option '{}' in section '{}'.",
                    unknown,
                    self.core.section.name
                );
                Ok(RC_SKIP)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SectionKind;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use tempfile::TempDir;

    fn context() -> Context {
        Context::new(Some("t"), false, Arc::new(AtomicBool::new(false))).expect("context")
    }

    fn deploy_section(options: Vec<ProfileOption>) -> Section {
        Section {
            name: "deploy".into(),
            base: "deploy".into(),
            filter: None,
            kind: SectionKind::Deploy,
            options,
        }
    }

    fn reserved(key: &str, value: &str) -> ProfileOption {
        ProfileOption::Reserved {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Drops a stub executable into `dir` and prepends `dir` to the
    /// context's PATH.
    fn install_stub(ctx: &mut Context, dir: &Path, name: &str, exit_code: i32) {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\nexit {}\n", exit_code)).expect("write stub");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
        let old_path = ctx.env.get("PATH").cloned().unwrap_or_default();
        ctx.env
            .insert("PATH".into(), format!("{}:{}", dir.display(), old_path));
    }

    #[test]
    fn test_file_is_processed_first() {
        let job = DeployJob::new(deploy_section(vec![
            reserved("dataset", "SYS1.LOAD"),
            reserved("file", "a.so"),
            reserved("region", "OSCCICS"),
        ]));
        let ordered = job.ordered_options();
        assert!(matches!(&ordered[0], ProfileOption::Reserved { key, .. } if key == "file"));
        assert!(matches!(&ordered[1], ProfileOption::Reserved { key, .. } if key == "dataset"));
        assert!(matches!(&ordered[2], ProfileOption::Reserved { key, .. } if key == "region"));
    }

    #[test]
    fn test_compile_gate() {
        let job = DeployJob::new(deploy_section(vec![reserved("file", "a.so")]));

        // No compile sections at all: deploy runs.
        let mut profile = Profile::default();
        assert_eq!(job.extra_gate(&profile), Decision::Run);

        // A compile section exists but never completed: deploy is skipped.
        profile.sections.push(Section {
            name: "ofcob".into(),
            base: "ofcob".into(),
            filter: None,
            kind: SectionKind::Compile,
            options: Vec::new(),
        });
        profile.complete.insert("ofcob".into(), false);
        assert_eq!(job.extra_gate(&profile), Decision::Skip);

        profile.mark_complete("ofcob");
        assert_eq!(job.extra_gate(&profile), Decision::Run);
    }

    #[test]
    fn test_file_handler_copies_and_renames_output() {
        let tmp = TempDir::new().expect("tempdir");
        let mut ctx = context();
        ctx.current_workdir = Some(tmp.path().to_path_buf());
        ctx.env.insert("OF_COMPILE_BASE".into(), "a".into());
        fs::write(tmp.path().join("a.cbl"), "artifact").expect("write");

        let mut job = DeployJob::new(deploy_section(vec![reserved("file", "$OF_COMPILE_BASE.so")]));
        job.core_mut().vars = crate::core::job::FileVars::new("a.cbl");

        let rc = job.handle_option(&mut ctx, "file", "$OF_COMPILE_BASE.so").expect("file");
        assert_eq!(rc, RC_OK);
        assert_eq!(job.core().vars.file_name_out, "a.so");
        assert!(tmp.path().join("a.so").is_file());
    }

    #[test]
    fn test_dataset_fanout_stops_on_failure() {
        let tmp = TempDir::new().expect("tempdir");
        let mut ctx = context();
        ctx.current_workdir = Some(tmp.path().to_path_buf());

        let mut job = DeployJob::new(deploy_section(vec![reserved("file", "a.so")]));
        job.core_mut().vars = crate::core::job::FileVars::new("a.so");

        install_stub(&mut ctx, tmp.path(), "dlupdate", 0);
        let rc = job
            .handle_option(&mut ctx, "dataset", "SYS1.LOAD::USER.LOAD")
            .expect("dataset");
        assert_eq!(rc, RC_OK);

        install_stub(&mut ctx, tmp.path(), "dlupdate", 8);
        let rc = job
            .handle_option(&mut ctx, "dataset", "SYS1.LOAD")
            .expect("dataset");
        assert_eq!(rc, ABORT_SECTION);
    }

    #[test]
    fn test_region_requires_openframe_home() {
        let tmp = TempDir::new().expect("tempdir");
        let mut ctx = context();
        ctx.current_workdir = Some(tmp.path().to_path_buf());
        ctx.env.remove("OPENFRAME_HOME");

        let mut job = DeployJob::new(deploy_section(vec![reserved("file", "a.so")]));
        job.core_mut().vars = crate::core::job::FileVars::new("a.so");
        let rc = job.handle_option(&mut ctx, "region", "OSCCICS").expect("region");
        assert_eq!(rc, ABORT_SECTION);
    }

    #[test]
    fn test_region_copies_and_invokes_updater() {
        let tmp = TempDir::new().expect("tempdir");
        let workdir = tmp.path().join("wd");
        fs::create_dir(&workdir).expect("mkdir");
        fs::write(workdir.join("a.so"), "artifact").expect("write");

        let home = tmp.path().join("of");
        let mod_dir = home.join("osc/region/OSCCICS/tdl/mod");
        fs::create_dir_all(&mod_dir).expect("mkdir mod");

        let mut ctx = context();
        ctx.current_workdir = Some(workdir);
        ctx.env
            .insert("OPENFRAME_HOME".into(), home.display().to_string());
        install_stub(&mut ctx, tmp.path(), "osctdlupdate", 0);

        let mut job = DeployJob::new(deploy_section(vec![reserved("file", "a.so")]));
        job.core_mut().vars = crate::core::job::FileVars::new("a.so");

        let rc = job.handle_option(&mut ctx, "region", "OSCCICS").expect("region");
        assert_eq!(rc, RC_OK);
        assert!(mod_dir.join("a.so").is_file());
    }

    #[test]
    fn test_tdl_copies_and_invokes_updater() {
        let tmp = TempDir::new().expect("tempdir");
        let workdir = tmp.path().join("wd");
        fs::create_dir(&workdir).expect("mkdir");
        fs::write(workdir.join("a.so"), "artifact").expect("write");

        let target = tmp.path().join("volume");
        fs::create_dir_all(target.join("tdl/mod")).expect("mkdir mod");

        let mut ctx = context();
        ctx.current_workdir = Some(workdir);
        install_stub(&mut ctx, tmp.path(), "tdlupdate", 0);

        let mut job = DeployJob::new(deploy_section(vec![reserved("file", "a.so")]));
        job.core_mut().vars = crate::core::job::FileVars::new("a.so");

        let rc = job
            .handle_option(&mut ctx, "tdl", &target.display().to_string())
            .expect("tdl");
        assert_eq!(rc, RC_OK);
        assert!(target.join("tdl/mod/a.so").is_file());
    }

    #[test]
    fn test_split_list_tolerates_empty_items() {
        assert_eq!(split_list("A::B:", "deploy"), vec!["A", "B"]);
        assert!(split_list(":", "deploy").is_empty());
    }
}
