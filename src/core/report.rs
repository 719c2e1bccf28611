// src/core/report.rs
//
// Appends one CSV record per processed source, as each source completes or
// fails, so a partial run still leaves a usable report.

use crate::constants::{REPORT_DIR, REPORT_PREFIX};
use crate::models::ReportRow;
use anyhow::{Context as _, Result};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct Report {
    path: PathBuf,
    count: usize,
}

impl Report {
    /// Creates `<root>/report/oftools_compile<tag><timestamp>.csv` with its
    /// header line.
    pub fn create(root: &Path, tag: &str, time_stamp: &str) -> Result<Self> {
        let dir = root.join(REPORT_DIR);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Could not create report directory '{}'", dir.display()))?;
        let path = dir.join(format!("{}{}{}.csv", REPORT_PREFIX, tag, time_stamp));

        let mut writer = csv::Writer::from_path(&path)
            .with_context(|| format!("Could not create report '{}'", path.display()))?;
        writer.write_record(["count", "source", "list_dir", "result", "rc", "section", "time(s)"])?;
        writer.flush()?;

        log::info!("Report: {}", path.display());
        Ok(Self { path, count: 0 })
    }

    /// Appends one row and returns its count value.
    pub fn add_row(
        &mut self,
        source: &str,
        list_dir: &str,
        success: bool,
        rc: i32,
        section: &str,
        elapsed_seconds: f64,
    ) -> Result<usize> {
        self.count += 1;
        let row = ReportRow {
            count: self.count,
            source: source.to_string(),
            list_dir: list_dir.to_string(),
            result: if success { "SUCCESS" } else { "FAILED" }.to_string(),
            rc,
            section: section.to_string(),
            time_s: format!("{:.2}", elapsed_seconds),
        };

        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Could not open report '{}'", self.path.display()))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer.serialize(&row)?;
        writer.flush()?;
        Ok(self.count)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn count(&self) -> usize {
        self.count
    }
}
