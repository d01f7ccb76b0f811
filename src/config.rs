use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::mutants::Granularity;

pub const DEFAULT_TIMEOUT_MULT: f64 = 3.0;

/// Added on top of the scaled baseline so fast suites still get a usable limit.
const BASE_ALLOWANCE_MS: u64 = 2000;

/// Limit for the baseline run when no fixed timeout was given.
const BASELINE_LIMIT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeoutPolicy {
    /// The same limit for every run.
    Fixed(Duration),
    /// `baseline_ms * multiplier + 2000ms`.
    Relative { multiplier: f64 },
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        TimeoutPolicy::Relative {
            multiplier: DEFAULT_TIMEOUT_MULT,
        }
    }
}

impl TimeoutPolicy {
    pub fn from_args(timeout_ms: Option<u64>, timeout_mult: f64) -> Self {
        match timeout_ms {
            Some(ms) => TimeoutPolicy::Fixed(Duration::from_millis(ms)),
            None => TimeoutPolicy::Relative {
                multiplier: timeout_mult,
            },
        }
    }

    pub fn baseline_limit(&self) -> Duration {
        match *self {
            TimeoutPolicy::Fixed(limit) => limit,
            TimeoutPolicy::Relative { .. } => BASELINE_LIMIT,
        }
    }

    /// Per-mutant limit given how long the unmutated suite took.
    pub fn resolve(&self, baseline: Duration) -> Duration {
        match *self {
            TimeoutPolicy::Fixed(limit) => limit,
            TimeoutPolicy::Relative { multiplier } => {
                let scaled = (baseline.as_millis() as f64 * multiplier) as u64;
                Duration::from_millis(scaled.saturating_add(BASE_ALLOWANCE_MS))
            }
        }
    }
}

/// Everything a `run` needs, resolved from the command line.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub source_file: PathBuf,
    pub test_file: PathBuf,
    pub granularity: Granularity,
    pub timeout: TimeoutPolicy,
    pub jobs: usize,
    pub fail_under: Option<f64>,
    pub report_path: Option<PathBuf>,
    pub test_cmd: Option<String>,
    pub session_id: String,
}

impl RunConfig {
    pub fn new(source_file: impl Into<PathBuf>, test_file: impl Into<PathBuf>) -> Self {
        RunConfig {
            source_file: source_file.into(),
            test_file: test_file.into(),
            granularity: Granularity::default(),
            timeout: TimeoutPolicy::default(),
            jobs: 1,
            fail_under: None,
            report_path: None,
            test_cmd: None,
            session_id: generate_session_id(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.jobs == 0 {
            return Err(Error::Config("--jobs must be at least 1".into()));
        }
        if let Some(threshold) = self.fail_under {
            if !(0.0..=100.0).contains(&threshold) {
                return Err(Error::Config(format!(
                    "--fail-under must be between 0 and 100, got {threshold}"
                )));
            }
        }
        match self.timeout {
            TimeoutPolicy::Fixed(limit) if limit.is_zero() => {
                Err(Error::Config("--timeout-ms must be positive".into()))
            }
            TimeoutPolicy::Relative { multiplier } if !(multiplier > 0.0) => Err(Error::Config(
                format!("--timeout-mult must be positive, got {multiplier}"),
            )),
            _ => Ok(()),
        }
    }

    /// Module name the test suite imports the unit under, from the file stem.
    pub fn module_name(&self) -> String {
        self.source_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "module".to_string())
    }

    /// Whether `coverage` misses the `--fail-under` threshold.
    pub fn below_threshold(&self, coverage: f64) -> bool {
        self.fail_under.is_some_and(|threshold| coverage < threshold)
    }
}

pub fn generate_session_id() -> String {
    format!("{:08x}", fastrand::u32(..))
}
