use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::collaborator::{Budget, LoadedUnit, SuiteResult, TestCollaborator};
use crate::error::{Error, Result};
use crate::mutants::{ExecutionOutcome, Mutant};
use crate::parser;
use crate::tree::SourceUnit;
use crate::unparse;

/// The unmutated unit and the text it was parsed from.
pub struct Subject<'a> {
    pub module_name: &'a str,
    pub source: &'a str,
    pub unit: &'a SourceUnit,
}

pub struct Baseline {
    pub result: SuiteResult,
    pub duration: Duration,
}

pub struct RunOptions {
    pub jobs: usize,
    pub timeout: Duration,
    pub cancel: Arc<AtomicBool>,
}

pub struct RunOutcomes {
    pub outcomes: Vec<ExecutionOutcome>,
    pub cancelled: bool,
}

/// Resolve source and test paths against the working directory.
pub fn resolve_paths(source_file: &Path, test_file: &Path) -> Result<(PathBuf, PathBuf)> {
    let cwd = std::env::current_dir().map_err(|e| Error::io(".", e))?;
    let absolute = |p: &Path| {
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            cwd.join(p)
        }
    };
    Ok((absolute(source_file), absolute(test_file)))
}

pub fn mutant_name(module_name: &str, index: usize) -> String {
    format!("{module_name}__mutant_{index}")
}

/// Serialize `tree` and parse the text back as a fresh unit called `name`.
pub fn load(tree: &SourceUnit, module_name: &str, name: String) -> Result<LoadedUnit> {
    let source = unparse::serialize(tree);
    let reparsed = parser::parse(&source).map_err(|e| Error::Load {
        name: name.clone(),
        message: e.to_string(),
    })?;
    Ok(LoadedUnit {
        name,
        module_name: module_name.to_string(),
        source,
        tree: reparsed,
    })
}

/// Run the suite once against `unit`, turning a collaborator panic into an error.
fn run_contained(
    collaborator: &dyn TestCollaborator,
    unit: &LoadedUnit,
    budget: &Budget,
) -> Result<SuiteResult> {
    panic::catch_unwind(AssertUnwindSafe(|| collaborator.run_suite(unit, budget)))
        .unwrap_or_else(|payload| {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(Error::Execution(format!("test collaborator panicked: {message}")))
        })
}

/// Run the suite against the unmutated unit.
///
/// Failing tests are reported in the result, not as an error. `Err` means the
/// suite could not be run at all.
pub fn run_baseline(
    subject: &Subject,
    collaborator: &dyn TestCollaborator,
    limit: Duration,
    cancel: Arc<AtomicBool>,
) -> Result<Baseline> {
    let unit = load(
        subject.unit,
        subject.module_name,
        format!("{}__baseline", subject.module_name),
    )?;
    let budget = Budget::new(limit, cancel);
    let start = Instant::now();
    let result = run_contained(collaborator, &unit, &budget)?;
    let duration = start.elapsed();
    info!(
        "baseline: {} tests, {} failures, {} errors in {:.2}s",
        result.tests_run,
        result.failures,
        result.errors,
        duration.as_secs_f64()
    );
    if !result.was_successful() {
        warn!("tests fail against the unmutated source; coverage will be inflated");
    }
    Ok(Baseline { result, duration })
}

/// Run the suite against one mutant. `None` only when the run was cancelled.
///
/// A mutant that fails to load, times out or breaks the suite is caught.
/// Infrastructure failures (sandbox, spawn, I/O) are returned as `Err`
/// since they say nothing about the mutant.
pub fn run_mutant(
    mutant: &Mutant,
    subject: &Subject,
    collaborator: &dyn TestCollaborator,
    timeout: Duration,
    cancel: &Arc<AtomicBool>,
) -> Result<Option<ExecutionOutcome>> {
    if cancel.load(Ordering::Relaxed) {
        return Ok(None);
    }
    let start = Instant::now();
    let mutated_source = mutant.apply_to(subject.source);
    let mut outcome = ExecutionOutcome {
        index: mutant.index,
        label: mutant.label.to_string(),
        line: mutant.line,
        caught: false,
        timed_out: false,
        failures: 0,
        errors: 0,
        original_code: line_text(subject.source, mutant.line),
        mutated_code: line_text(&mutated_source, mutant.line),
        diff: generate_diff(subject.source, &mutated_source),
        error: None,
        duration_ms: 0,
    };

    let name = mutant_name(subject.module_name, mutant.index);
    let result = load(&mutant.tree, subject.module_name, name).and_then(|unit| {
        let budget = Budget::new(timeout, cancel.clone());
        run_contained(collaborator, &unit, &budget)
    });
    match result {
        Ok(suite) => {
            outcome.caught = !suite.was_successful();
            outcome.failures = suite.failures;
            outcome.errors = suite.errors;
        }
        Err(Error::Cancelled) => {
            debug!("mutant {} abandoned: run cancelled", mutant.index);
            return Ok(None);
        }
        Err(e) if e.is_infrastructure() => {
            warn!("mutant {}: {e}", mutant.index);
            return Err(e);
        }
        Err(e) => {
            outcome.caught = true;
            outcome.timed_out = matches!(e, Error::Timeout { .. });
            outcome.errors = 1;
            outcome.error = Some(e.to_string());
        }
    }
    outcome.duration_ms = start.elapsed().as_millis() as u64;
    debug!(
        "mutant {} [{}] line {}: caught={} failures={} errors={}",
        outcome.index, outcome.label, outcome.line, outcome.caught, outcome.failures, outcome.errors
    );
    Ok(Some(outcome))
}

/// Run every mutant on a pool of `options.jobs` workers.
///
/// `on_outcome` sees each outcome as soon as it is recorded, in completion
/// order. The returned outcomes are in generation order. An infrastructure
/// error from any mutant aborts the whole run.
pub fn run_all<F>(
    mutants: &[Mutant],
    subject: &Subject,
    collaborator: &dyn TestCollaborator,
    options: &RunOptions,
    on_outcome: F,
) -> Result<RunOutcomes>
where
    F: Fn(&ExecutionOutcome) + Sync,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.jobs.max(1))
        .thread_name(|i| format!("mutcheck-worker-{i}"))
        .build()
        .map_err(|e| Error::Execution(format!("failed to start worker pool: {e}")))?;

    // The first infrastructure error stops the workers; mutants already in
    // flight finish but their outcomes are discarded.
    let collected: Result<Vec<Option<ExecutionOutcome>>> = pool.install(|| {
        mutants
            .par_iter()
            .with_max_len(1)
            .map(|mutant| {
                let outcome =
                    run_mutant(mutant, subject, collaborator, options.timeout, &options.cancel)?;
                if let Some(outcome) = &outcome {
                    on_outcome(outcome);
                }
                Ok(outcome)
            })
            .collect()
    });
    let mut outcomes: Vec<ExecutionOutcome> = collected?.into_iter().flatten().collect();
    outcomes.sort_by_key(|o| o.index);

    let cancelled = options.cancel.load(Ordering::Relaxed);
    if cancelled {
        warn!(
            "run cancelled after {} of {} mutants",
            outcomes.len(),
            mutants.len()
        );
    } else if outcomes.len() != mutants.len() {
        return Err(Error::Consistency(format!(
            "generated {} mutants but recorded {} outcomes",
            mutants.len(),
            outcomes.len()
        )));
    }
    Ok(RunOutcomes {
        outcomes,
        cancelled,
    })
}

/// Trimmed text of 1-based `line`, empty when out of range.
pub fn line_text(source: &str, line: usize) -> String {
    line.checked_sub(1)
        .and_then(|i| source.lines().nth(i))
        .map(|l| l.trim().to_string())
        .unwrap_or_default()
}

pub fn generate_diff(original: &str, mutated: &str) -> String {
    use similar::{ChangeTag, TextDiff};
    let diff = TextDiff::from_lines(original, mutated);
    let mut output = String::new();
    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => "- ",
            ChangeTag::Insert => "+ ",
            ChangeTag::Equal => continue,
        };
        output.push_str(sign);
        output.push_str(change.value());
        if change.missing_newline() {
            output.push('\n');
        }
    }
    output
}
