// src/system/fs_utils.rs

use anyhow::{Result, anyhow};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// What a directory is being created for; collisions are reported
/// differently per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirKind {
    /// A per-source working directory. Collision is expected (resolved by a
    /// timestamp retry upstream) and yields return code 1.
    Work,
    /// The `--grouping` umbrella directory. Absence is the normal case;
    /// collision is an error.
    Group,
}

/// Creates a directory if absent. Returns 0 when created, 1 on a benign
/// collision (`Work` kind). A `Group` collision is an error.
pub fn create_directory(path: &Path, kind: DirKind) -> Result<i32> {
    match fs::create_dir(path) {
        Ok(()) => Ok(0),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => match kind {
            DirKind::Work => {
                log::debug!("Directory '{}' already exists.", path.display());
                Ok(1)
            }
            DirKind::Group => Err(anyhow!(
                "Grouping directory '{}' already exists.",
                path.display()
            )),
        },
        Err(e) => Err(anyhow!(
            "Could not create directory '{}': {}",
            path.display(),
            e
        )),
    }
}

/// Copies a file. Same source and destination is benign: return 1, not fatal.
pub fn copy_file(src: &Path, dst: &Path) -> Result<i32> {
    if src == dst {
        log::debug!("Copy source and destination are identical: '{}'.", src.display());
        return Ok(1);
    }
    fs::copy(src, dst).map_err(|e| {
        anyhow!(
            "Could not copy '{}' to '{}': {}",
            src.display(),
            dst.display(),
            e
        )
    })?;
    Ok(0)
}

/// Recursively deletes a directory. A missing path is fatal unless
/// explicitly allowed.
pub fn delete_directory(path: &Path, allow_missing: bool) -> Result<()> {
    if !path.exists() {
        if allow_missing {
            log::debug!("Directory '{}' already absent.", path.display());
            return Ok(());
        }
        return Err(anyhow!("Directory '{}' does not exist.", path.display()));
    }
    let empty = fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false);
    if empty {
        log::debug!("Deleting empty directory '{}'.", path.display());
    } else {
        log::debug!("Deleting non-empty directory '{}'.", path.display());
    }
    fs::remove_dir_all(path)
        .map_err(|e| anyhow!("Could not delete directory '{}': {}", path.display(), e))
}

/// Enumerates directories directly under `root` whose leaf names contain
/// `pattern`. Used by the backup and housekeeping policies.
pub fn get_duplicates(root: &Path, pattern: &str) -> Vec<PathBuf> {
    WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_dir())
        .filter(|entry| entry.file_name().to_string_lossy().contains(pattern))
        .map(|entry| entry.into_path())
        .collect()
}

/// Retrieves the modification timestamp of a path.
pub fn get_modified_time(path: &Path) -> Result<SystemTime> {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map_err(|e| {
            anyhow!(
                "Could not read modification time of '{}': {}",
                path.display(),
                e
            )
        })
}

/// An absent path is fatal unless `force` is set, in which case it yields
/// `false` with a warning.
pub fn check_path_exists(path: &Path, force: bool) -> Result<bool> {
    if path.exists() {
        return Ok(true);
    }
    if force {
        log::warn!("Path '{}' does not exist; skipping.", path.display());
        return Ok(false);
    }
    Err(anyhow!("Path '{}' does not exist.", path.display()))
}

/// True iff the trailing component after the final `.` equals `ext`.
pub fn check_extension(path: &Path, ext: &str) -> bool {
    let matches = path
        .extension()
        .map(|e| e.to_string_lossy() == ext)
        .unwrap_or(false);
    if !matches {
        log::error!(
            "File '{}' does not have the expected '.{}' extension.",
            path.display(),
            ext
        );
    }
    matches
}
