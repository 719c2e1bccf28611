// src/models.rs

use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::constants::{DEPLOY_SECTION, SETUP_SECTION};

// --- PROFILE MODELS (what the loader builds from a profile file) ---

/// A single option within a profile section, classified at load time by the
/// first character of its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileOption {
    /// `$NAME = value`: an environment variable definition. The value may be
    /// a literal (with `$OTHER` references) or a `$(cmd)` / backtick
    /// substitution evaluated through the shell runner.
    EnvVar { name: String, value: String },
    /// `?name = predicate`: a filter definition. The predicate is an opaque
    /// shell command; exit 0 means true.
    Filter { name: String, predicate: String },
    /// Any other key is section-kind specific (`workdir`, `args`, `file`, ...).
    Reserved { key: String, value: String },
}

/// The kind of pipeline step a section describes, dispatched on its base name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Setup,
    Compile,
    Deploy,
}

impl SectionKind {
    pub fn from_base(base: &str) -> Self {
        match base {
            SETUP_SECTION => Self::Setup,
            DEPLOY_SECTION => Self::Deploy,
            _ => Self::Compile,
        }
    }
}

/// One step of the pipeline. The declared name may carry a filter suffix
/// (`<base>?<filter>`); the base name is the completion-table key and, for
/// compile sections, the command invoked.
#[derive(Debug, Clone)]
pub struct Section {
    /// The effective name as declared, filter suffix included.
    pub name: String,
    /// The portion before `?`.
    pub base: String,
    /// The filter suffix, if any.
    pub filter: Option<String>,
    pub kind: SectionKind,
    /// Options in declared order.
    pub options: Vec<ProfileOption>,
}

impl Section {
    /// Looks up a reserved option value by key.
    pub fn reserved(&self, key: &str) -> Option<&str> {
        self.options.iter().find_map(|opt| match opt {
            ProfileOption::Reserved { key: k, value } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    pub fn has_reserved(&self, key: &str) -> bool {
        self.reserved(key).is_some()
    }
}

/// A parsed profile: ordered sections, filter definitions, the mandatory
/// list, and the per-run completion table. Section order is execution order.
#[derive(Debug, Clone, Default)]
pub struct Profile {
    pub sections: Vec<Section>,
    /// Filter definitions in declaration order. A later entry under the same
    /// name is a redefinition (allowed; the runtime table applies them in
    /// processing order).
    pub filters: Vec<(String, String)>,
    /// Base names listed in `setup.mandatory`.
    pub mandatory_sections: Vec<String>,
    /// Section base name → completed this source file.
    pub complete: HashMap<String, bool>,
    /// The resolved `setup.workdir` parent directory.
    pub workdir: PathBuf,
}

impl Profile {
    pub fn is_complete(&self, base: &str) -> bool {
        self.complete.get(base).copied().unwrap_or(false)
    }

    pub fn mark_complete(&mut self, base: &str) {
        self.complete.insert(base.to_string(), true);
    }

    /// Clears every completion flag; called between source files.
    pub fn reset_completion(&mut self) {
        for flag in self.complete.values_mut() {
            *flag = false;
        }
    }

    pub fn has_compile_sections(&self) -> bool {
        self.sections
            .iter()
            .any(|s| s.kind == SectionKind::Compile)
    }

    pub fn any_compile_complete(&self) -> bool {
        self.sections
            .iter()
            .filter(|s| s.kind == SectionKind::Compile)
            .any(|s| self.is_complete(&s.base))
    }
}

// --- REPORT MODELS ---

/// One CSV line per processed source.
#[derive(Debug, Clone, Serialize)]
pub struct ReportRow {
    pub count: usize,
    pub source: String,
    pub list_dir: String,
    pub result: String,
    pub rc: i32,
    pub section: String,
    #[serde(rename = "time(s)")]
    pub time_s: String,
}
