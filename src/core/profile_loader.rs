// src/core/profile_loader.rs
//
// Parses a profile file (INI-style, order-significant sections) and builds
// the validated `Profile`. Keys are classified here by their first character
// so that downstream code dispatches on tagged variants instead of string
// prefixes.

use crate::constants::SETUP_SECTION;
use crate::models::{Profile, ProfileOption, Section, SectionKind};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Profile '{path}' could not be read: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Profile '{path}', line {line}: {reason}")]
    Malformed {
        path: String,
        line: usize,
        reason: String,
    },
    #[error("Profile '{path}', section [{section}]: {reason}")]
    Semantic {
        path: String,
        section: String,
        reason: String,
    },
}

/// Loads and validates a profile file.
pub fn load(path: &Path) -> Result<Profile, ProfileError> {
    let display = path.display().to_string();
    let text = fs::read_to_string(path).map_err(|source| ProfileError::Unreadable {
        path: display.clone(),
        source,
    })?;

    let mut sections = parse_sections(&display, &text)?;
    validate_setup_position(&display, &sections)?;

    let mandatory_sections = build_mandatory_list(&sections);
    strip_mandatory_filters(&mut sections, &mandatory_sections);

    let filters = collect_filter_definitions(&sections);
    validate_filter_references(&display, &sections)?;
    validate_section_options(&display, &sections)?;

    let workdir = resolve_workdir(&display, &sections)?;

    let complete = sections
        .iter()
        .map(|s| (s.base.clone(), false))
        .collect();

    Ok(Profile {
        sections,
        filters,
        mandatory_sections,
        complete,
        workdir,
    })
}

// --- Line parsing ---

fn parse_sections(path: &str, text: &str) -> Result<Vec<Section>, ProfileError> {
    let mut sections: Vec<Section> = Vec::new();
    let mut seen_names: HashSet<String> = HashSet::new();

    for (index, raw_line) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = strip_comment(raw_line).trim().to_string();
        if line.is_empty() {
            continue;
        }

        if let Some(header) = line.strip_prefix('[') {
            let name = header
                .strip_suffix(']')
                .ok_or_else(|| ProfileError::Malformed {
                    path: path.to_string(),
                    line: line_no,
                    reason: format!("unterminated section header '{}'", raw_line.trim()),
                })?
                .trim()
                .to_string();
            if name.is_empty() {
                return Err(ProfileError::Malformed {
                    path: path.to_string(),
                    line: line_no,
                    reason: "empty section header".to_string(),
                });
            }
            if !seen_names.insert(name.clone()) {
                return Err(ProfileError::Malformed {
                    path: path.to_string(),
                    line: line_no,
                    reason: format!("duplicate section [{}]", name),
                });
            }
            let (base, filter) = split_section_name(&name);
            sections.push(Section {
                name,
                kind: SectionKind::from_base(&base),
                base,
                filter,
                options: Vec::new(),
            });
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| ProfileError::Malformed {
            path: path.to_string(),
            line: line_no,
            reason: format!("expected 'key = value', got '{}'", line),
        })?;
        let key = key.trim().to_string();
        let value = value.trim().to_string();
        if key.is_empty() {
            return Err(ProfileError::Malformed {
                path: path.to_string(),
                line: line_no,
                reason: "option with an empty key".to_string(),
            });
        }

        let section = sections.last_mut().ok_or_else(|| ProfileError::Malformed {
            path: path.to_string(),
            line: line_no,
            reason: format!("option '{}' appears before any section header", key),
        })?;
        section.options.push(classify_option(key, value));
    }

    Ok(sections)
}

/// Strips a full-line or inline `#`/`;` comment. An inline comment must be
/// preceded by whitespace so that predicates containing `#` survive.
fn strip_comment(line: &str) -> &str {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') || trimmed.starts_with(';') {
        return "";
    }
    for marker in [" #", "\t#", " ;", "\t;"] {
        if let Some(idx) = line.find(marker) {
            return &line[..idx];
        }
    }
    line
}

/// Splits `<base>?<filter>` into its parts.
fn split_section_name(name: &str) -> (String, Option<String>) {
    match name.split_once('?') {
        Some((base, filter)) => (base.to_string(), Some(filter.to_string())),
        None => (name.to_string(), None),
    }
}

fn classify_option(key: String, value: String) -> ProfileOption {
    if let Some(name) = key.strip_prefix('$') {
        ProfileOption::EnvVar {
            name: name.to_string(),
            value,
        }
    } else if let Some(name) = key.strip_prefix('?') {
        ProfileOption::Filter {
            name: name.to_string(),
            predicate: value,
        }
    } else {
        ProfileOption::Reserved { key, value }
    }
}

// --- Semantic validation ---

fn validate_setup_position(path: &str, sections: &[Section]) -> Result<(), ProfileError> {
    let setup_count = sections
        .iter()
        .filter(|s| s.kind == SectionKind::Setup)
        .count();
    if setup_count == 0 {
        return Err(ProfileError::Semantic {
            path: path.to_string(),
            section: SETUP_SECTION.to_string(),
            reason: "profile has no [setup] section".to_string(),
        });
    }
    if setup_count > 1 {
        return Err(ProfileError::Semantic {
            path: path.to_string(),
            section: SETUP_SECTION.to_string(),
            reason: "profile has more than one [setup] section".to_string(),
        });
    }
    match sections.first() {
        Some(first) if first.kind == SectionKind::Setup => Ok(()),
        _ => Err(ProfileError::Semantic {
            path: path.to_string(),
            section: SETUP_SECTION.to_string(),
            reason: "[setup] must be the first section".to_string(),
        }),
    }
}

/// Reads `setup.mandatory` (colon-delimited). Entries containing `?` are
/// rejected with a warning; entries naming absent sections are warned about
/// but kept out of the way by never completing.
fn build_mandatory_list(sections: &[Section]) -> Vec<String> {
    let setup = match sections.iter().find(|s| s.kind == SectionKind::Setup) {
        Some(s) => s,
        None => return Vec::new(),
    };
    let value = match setup.reserved("mandatory") {
        Some(v) => v,
        None => return Vec::new(),
    };

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
        if !sections.iter().any(|s| s.base == entry) {
            log::warn!(
                "Mandatory entry '{}' does not match any section in the profile.",
                entry
            );
        }
        mandatory.push(entry.to_string());
    }
    mandatory
}

/// A filter on a mandatory section can never gate it off; warn and strip it.
fn strip_mandatory_filters(sections: &mut [Section], mandatory: &[String]) {
    for section in sections.iter_mut() {
        if section.filter.is_some() && mandatory.iter().any(|m| m == &section.base) {
            log::warn!(
                "Section '{}' is mandatory; its filter suffix is ignored.",
                section.name
            );
            section.filter = None;
        }
    }
}

/// Scans option keys beginning with `?` across all sections, in order.
/// A later definition under the same name is a redefinition and is allowed.
fn collect_filter_definitions(sections: &[Section]) -> Vec<(String, String)> {
    let mut filters = Vec::new();
    for section in sections {
        for opt in &section.options {
            if let ProfileOption::Filter { name, predicate } = opt {
                filters.push((name.clone(), predicate.clone()));
            }
        }
    }
    filters
}

/// A filter referenced by a section suffix must already be defined by an
/// earlier section's option.
fn validate_filter_references(path: &str, sections: &[Section]) -> Result<(), ProfileError> {
    let mut defined: HashSet<&str> = HashSet::new();
    for section in sections {
        if let Some(filter) = &section.filter {
            if !defined.contains(filter.as_str()) {
                return Err(ProfileError::Semantic {
                    path: path.to_string(),
                    section: section.name.clone(),
                    reason: format!(
                        "filter '{}' is not defined by an earlier section",
                        filter
                    ),
                });
            }
        }
        for opt in &section.options {
            if let ProfileOption::Filter { name, .. } = opt {
                defined.insert(name.as_str());
            }
        }
    }
    Ok(())
}

fn validate_section_options(path: &str, sections: &[Section]) -> Result<(), ProfileError> {
    for section in sections {
        match section.kind {
            SectionKind::Setup => {
                if section.has_reserved("housekeeping") && !section.has_reserved("backup") {
                    return Err(ProfileError::Semantic {
                        path: path.to_string(),
                        section: section.name.clone(),
                        reason: "'housekeeping' requires 'backup'".to_string(),
                    });
                }
                if let Some(backup) = section.reserved("backup") {
                    if backup.trim().parse::<usize>().is_err() {
                        return Err(ProfileError::Semantic {
                            path: path.to_string(),
                            section: section.name.clone(),
                            reason: format!("'backup' must be a number, got '{}'", backup),
                        });
                    }
                }
                if let Some(housekeeping) = section.reserved("housekeeping") {
                    if parse_housekeeping_days(housekeeping).is_none() {
                        return Err(ProfileError::Semantic {
                            path: path.to_string(),
                            section: section.name.clone(),
                            reason: format!(
                                "'housekeeping' must look like '30d', got '{}'",
                                housekeeping
                            ),
                        });
                    }
                }
            }
            SectionKind::Compile => {
                let has_args = section.has_reserved("args");
                let has_option = section.has_reserved("option");
                if !has_args && !has_option {
                    return Err(ProfileError::Semantic {
                        path: path.to_string(),
                        section: section.name.clone(),
                        reason: "compile section needs 'args' or 'option'".to_string(),
                    });
                }
                if has_args && has_option {
                    log::debug!(
                        "Section '{}' declares both 'args' and 'option'; 'args' wins.",
                        section.name
                    );
                }
            }
            SectionKind::Deploy => {
                if !section.has_reserved("file") {
                    return Err(ProfileError::Semantic {
                        path: path.to_string(),
                        section: section.name.clone(),
                        reason: "deploy section needs 'file'".to_string(),
                    });
                }
            }
        }
    }
    Ok(())
}

/// Parses `<number>d` into a day count.
pub fn parse_housekeeping_days(value: &str) -> Option<u64> {
    value.trim().strip_suffix('d')?.parse().ok()
}

/// Resolves `setup.workdir`: `~` and `$VARS` honored, created if absent.
fn resolve_workdir(path: &str, sections: &[Section]) -> Result<std::path::PathBuf, ProfileError> {
    let setup = sections
        .iter()
        .find(|s| s.kind == SectionKind::Setup)
        .expect("setup presence is validated before workdir resolution");

    let raw = setup
        .reserved("workdir")
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ProfileError::Semantic {
            path: path.to_string(),
            section: setup.name.clone(),
            reason: "'workdir' is missing or empty".to_string(),
        })?;

    let expanded = shellexpand::full(raw.trim()).map_err(|e| ProfileError::Semantic {
        path: path.to_string(),
        section: setup.name.clone(),
        reason: format!("could not expand workdir '{}': {}", raw, e),
    })?;
    let workdir = std::path::PathBuf::from(expanded.into_owned());

    if !workdir.exists() {
        fs::create_dir_all(&workdir).map_err(|e| ProfileError::Semantic {
            path: path.to_string(),
            section: setup.name.clone(),
            reason: format!("could not create workdir '{}': {}", workdir.display(), e),
        })?;
    }
    Ok(workdir)
}
