use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::collaborator::SuiteResult;
use crate::error::{Error, Result};
use crate::mutants::{ExecutionOutcome, Granularity};

pub const SCHEMA_VERSION: u32 = 1;

/// Copy of the most recent report, read by `status` and `show`.
pub const STATE_FILE: &str = ".mutcheck-state.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub schema_version: u32,
    pub timestamp: DateTime<Local>,
    pub duration_seconds: f64,
    pub source_file: String,
    pub test_file: String,
    pub granularity: Granularity,
    #[serde(default)]
    pub cancelled: bool,
    pub baseline: SuiteResult,
    pub total_mutants: usize,
    pub caught: usize,
    pub not_caught: usize,
    pub timed_out: usize,
    pub mutation_coverage: f64,
    pub mutants: Vec<ExecutionOutcome>,
}

/// Run-level facts that are not derived from the outcomes.
#[derive(Debug, Clone)]
pub struct ReportMeta {
    pub timestamp: DateTime<Local>,
    pub duration: Duration,
    pub source_file: String,
    pub test_file: String,
    pub granularity: Granularity,
    pub cancelled: bool,
    pub baseline: SuiteResult,
}

/// Percentage of caught mutants, 0 when there are none.
pub fn coverage(caught: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        caught as f64 / total as f64 * 100.0
    }
}

impl Report {
    pub fn aggregate(meta: ReportMeta, mut outcomes: Vec<ExecutionOutcome>) -> Report {
        outcomes.sort_by_key(|o| o.index);
        let total = outcomes.len();
        let caught = outcomes.iter().filter(|o| o.caught).count();
        let timed_out = outcomes.iter().filter(|o| o.timed_out).count();
        Report {
            schema_version: SCHEMA_VERSION,
            timestamp: meta.timestamp,
            duration_seconds: meta.duration.as_secs_f64(),
            source_file: meta.source_file,
            test_file: meta.test_file,
            granularity: meta.granularity,
            cancelled: meta.cancelled,
            baseline: meta.baseline,
            total_mutants: total,
            caught,
            not_caught: total - caught,
            timed_out,
            mutation_coverage: coverage(caught, total),
            mutants: outcomes,
        }
    }

    pub fn survivors(&self) -> impl Iterator<Item = &ExecutionOutcome> {
        self.mutants.iter().filter(|o| !o.caught)
    }

    /// Look up a mutant by `3`, `m3` or `@m3`.
    pub fn find(&self, reference: &str) -> Option<&ExecutionOutcome> {
        let index: usize = parse_ref(reference)?;
        self.mutants.iter().find(|o| o.index == index)
    }
}

pub fn parse_ref(reference: &str) -> Option<usize> {
    let trimmed = reference.trim().trim_start_matches('@');
    trimmed.strip_prefix('m').unwrap_or(trimmed).parse().ok()
}

/// `mutation_report_YYYYmmdd_HHMMSS.json` in the working directory.
pub fn default_report_path(timestamp: &DateTime<Local>) -> PathBuf {
    PathBuf::from(format!(
        "mutation_report_{}.json",
        timestamp.format("%Y%m%d_%H%M%S")
    ))
}

pub fn persist(report: &Report, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report).map_err(|e| Error::ReportIo {
        path: path.to_path_buf(),
        source: e.into(),
    })?;
    std::fs::write(path, json).map_err(|source| Error::ReportIo {
        path: path.to_path_buf(),
        source,
    })
}

fn state_path() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(STATE_FILE)
}

pub fn save_last_run(report: &Report) -> Result<PathBuf> {
    let path = state_path();
    persist(report, &path)?;
    Ok(path)
}

pub fn load_last_run() -> Option<Report> {
    load_from_path(&state_path()).ok()
}

pub fn load_from_path(path: &Path) -> Result<Report> {
    let data = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    serde_json::from_str(&data).map_err(|e| Error::io(path, e.into()))
}
