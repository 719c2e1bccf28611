// src/core/compile_job.rs
//
// A compile section's base name IS the executable: the job builds
// `<base-name> <args>` and runs it through the shell runner. Any non-zero
// exit aborts the pipeline for the current source file. The output filename
// passes through unchanged; the next section receives what this one got.

use crate::core::context::Context;
use crate::core::job::{Job, JobCore, RC_OK, RC_SKIP, run_tool};
use crate::models::Section;
use crate::system::shell::CommandKind;
use anyhow::Result;

pub struct CompileJob {
    core: JobCore,
}

impl CompileJob {
    pub fn new(section: Section) -> Self {
        Self {
            core: JobCore::new(section),
        }
    }

    fn invoke(&self, ctx: &Context, arguments: &str) -> Result<i32> {
        let command = format!("{} {}", self.core.section.base, arguments);
        run_tool(ctx, &self.core.section.name, &command, CommandKind::Compile)
    }
}

impl Job for CompileJob {
    fn core(&self) -> &JobCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut JobCore {
        &mut self.core
    }

    fn handle_option(&mut self, ctx: &mut Context, key: &str, value: &str) -> Result<i32> {
        match key {
            "args" => self.invoke(ctx, value),
            "option" => {
                if self.core.section.has_reserved("args") {
                    log::debug!(
                        "Section '{}': 'option' ignored because 'args' is present.",
                        self.core.section.name
                    );
                    Ok(RC_OK)
                } else {
                    self.invoke(ctx, value)
                }
            }
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
