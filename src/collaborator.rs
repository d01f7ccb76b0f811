//! The seam between the runner and whatever executes the test suite.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::tree::SourceUnit;

/// A unit that has been serialized and loaded back under its own name.
///
/// Collaborators receive this explicitly instead of looking up a
/// process-wide "current" unit, so runs never observe each other.
#[derive(Debug, Clone)]
pub struct LoadedUnit {
    /// Unique name of this variant, e.g. `calculator__mutant_3`.
    pub name: String,
    /// Module name the test suite imports, e.g. `calculator`.
    pub module_name: String,
    /// Serialized source the tree was loaded from.
    pub source: String,
    pub tree: SourceUnit,
}

/// Time and cancellation limits for one suite run.
#[derive(Debug, Clone)]
pub struct Budget {
    deadline: Instant,
    timeout: Duration,
    cancel: Arc<AtomicBool>,
}

impl Budget {
    pub fn new(timeout: Duration, cancel: Arc<AtomicBool>) -> Self {
        Budget {
            deadline: Instant::now() + timeout,
            timeout,
            cancel,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// `Err(Cancelled)` or `Err(Timeout)` once either limit is hit.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if self.is_expired() {
            return Err(Error::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            });
        }
        Ok(())
    }
}

/// Counts reported by one full run of the suite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteResult {
    pub tests_run: usize,
    pub failures: usize,
    pub errors: usize,
}

impl SuiteResult {
    pub fn was_successful(&self) -> bool {
        self.failures == 0 && self.errors == 0
    }
}

pub trait TestCollaborator: Sync {
    /// Run the whole suite against `unit`.
    ///
    /// Assertion failures and exceptions inside tests are counts, not errors.
    /// `Err` is reserved for `Timeout`, `Cancelled`, and `Execution` (the suite
    /// could not be run at all against this unit).
    fn run_suite(&self, unit: &LoadedUnit, budget: &Budget) -> Result<SuiteResult>;
}
