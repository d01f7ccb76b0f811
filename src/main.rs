use mutcheck::collaborator::TestCollaborator;
use mutcheck::config::{self, RunConfig, TimeoutPolicy};
use mutcheck::error::Error;
use mutcheck::generator;
use mutcheck::mutants::{ExecutionOutcome, Granularity};
use mutcheck::operators::Catalog;
use mutcheck::output;
use mutcheck::parser;
use mutcheck::process::CommandSuite;
use mutcheck::report::{self, Report, ReportMeta};
use mutcheck::runner::{self, RunOptions, Subject};
use mutcheck::unittest::UnittestSuite;

use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use clap::{Parser, Subcommand};
use log::{info, warn};

const EXIT_BELOW_THRESHOLD: i32 = 1;
const EXIT_BAD_INPUT: i32 = 2;
const EXIT_INTERNAL: i32 = 3;
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser)]
#[command(name = "mutcheck", version, about = "Mutation testing for Python units")]
struct Cli {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mutate a source file and run its tests against every mutant
    Run {
        /// Source file to mutate
        source: PathBuf,
        /// Test file to run against each mutant
        test: PathBuf,
        /// Exit with status 1 when coverage is below this percentage
        #[arg(long)]
        fail_under: Option<f64>,
        /// Fixed per-mutant timeout in milliseconds (default: derived from the baseline)
        #[arg(long, env = "MUTCHECK_TIMEOUT_MS")]
        timeout_ms: Option<u64>,
        /// Baseline multiplier for the derived timeout
        #[arg(long, default_value_t = config::DEFAULT_TIMEOUT_MULT)]
        timeout_mult: f64,
        /// Number of mutants to run concurrently
        #[arg(short, long, env = "MUTCHECK_JOBS", default_value_t = 1)]
        jobs: usize,
        /// Replace only the triggering operator, or every operator of its kind
        #[arg(long, value_enum, default_value_t = Granularity::Single)]
        granularity: Granularity,
        /// Report path (default: mutation_report_<timestamp>.json)
        #[arg(long)]
        report: Option<PathBuf>,
        /// Run this command in a sandbox instead of the built-in test runner
        #[arg(long, env = "MUTCHECK_TEST_CMD")]
        test_cmd: Option<String>,
        /// Session ID naming sandbox directories (default: random)
        #[arg(long)]
        session: Option<String>,
        /// Print the report as JSON instead of the summary
        #[arg(long)]
        json: bool,
        /// No per-mutant output, exit code only
        #[arg(short, long)]
        quiet: bool,
    },
    /// List the mutants a run would execute, without running anything
    List {
        /// Source file to mutate
        source: PathBuf,
        #[arg(long, value_enum, default_value_t = Granularity::Single)]
        granularity: Granularity,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Summary of the last run
    Status {
        /// Report to read (default: the last run's state file)
        #[arg(long)]
        report: Option<PathBuf>,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one mutant of the last run with its diff
    Show {
        /// Mutant index or ref (e.g. 3, m3 or @m3)
        #[arg(name = "ref")]
        mutant_ref: String,
        /// Report to read (default: the last run's state file)
        #[arg(long)]
        report: Option<PathBuf>,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();

    let exit_code = match cli.command {
        Commands::Run {
            source,
            test,
            fail_under,
            timeout_ms,
            timeout_mult,
            jobs,
            granularity,
            report,
            test_cmd,
            session,
            json,
            quiet,
        } => {
            let mut config = RunConfig::new(source, test);
            config.fail_under = fail_under;
            config.timeout = TimeoutPolicy::from_args(timeout_ms, timeout_mult);
            config.jobs = jobs;
            config.granularity = granularity;
            config.report_path = report;
            config.test_cmd = test_cmd;
            if let Some(id) = session {
                config.session_id = id;
            }
            cmd_run(&config, json, quiet)
        }
        Commands::List {
            source,
            granularity,
            json,
        } => cmd_list(&source, granularity, json),
        Commands::Status { report, json } => cmd_status(report.as_deref(), json),
        Commands::Show {
            mutant_ref,
            report,
            json,
        } => cmd_show(&mutant_ref, report.as_deref(), json),
    };

    process::exit(exit_code);
}

fn read_source(path: &Path) -> Result<String, i32> {
    std::fs::read_to_string(path).map_err(|e| {
        output::print_error(&format!(
            "Failed to read {}: {}. Check the path and try again.",
            path.display(),
            e
        ));
        EXIT_BAD_INPUT
    })
}

fn load_collaborator(
    config: &RunConfig,
    abs_source: &Path,
    abs_test: &Path,
) -> Result<Box<dyn TestCollaborator>, i32> {
    match &config.test_cmd {
        Some(cmd) => {
            if !abs_test.exists() {
                output::print_error(&format!("Test file not found: {}", abs_test.display()));
                return Err(EXIT_BAD_INPUT);
            }
            CommandSuite::new(cmd, abs_source, abs_test, &config.session_id)
                .map(|suite| Box::new(suite) as Box<dyn TestCollaborator>)
                .map_err(|e| {
                    output::print_error(&format!("Failed to set up test command: {e}"));
                    EXIT_INTERNAL
                })
        }
        None => UnittestSuite::from_path(abs_test)
            .map(|suite| Box::new(suite) as Box<dyn TestCollaborator>)
            .map_err(|e| {
                output::print_error(&format!("{}: {e}", abs_test.display()));
                EXIT_BAD_INPUT
            }),
    }
}

/// First Ctrl-C cancels the run; a second one exits immediately.
fn install_cancel_handler() -> Arc<AtomicBool> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            process::exit(EXIT_INTERRUPTED);
        }
        eprintln!("\nCancelling: finishing with the mutants run so far...");
    }) {
        warn!("could not install Ctrl-C handler: {e}");
    }
    cancel
}

fn cmd_run(config: &RunConfig, json_mode: bool, quiet: bool) -> i32 {
    if let Err(e) = config.validate() {
        output::print_error(&e.to_string());
        return EXIT_BAD_INPUT;
    }
    let started = Instant::now();
    let timestamp = chrono::Local::now();

    let (abs_source, abs_test) = match runner::resolve_paths(&config.source_file, &config.test_file) {
        Ok(paths) => paths,
        Err(e) => {
            output::print_error(&e.to_string());
            return EXIT_INTERNAL;
        }
    };
    let source = match read_source(&abs_source) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let unit = match parser::parse(&source) {
        Ok(unit) => unit,
        Err(e) => {
            output::print_error(&format!("{}: {e}", abs_source.display()));
            return EXIT_BAD_INPUT;
        }
    };
    let collaborator = match load_collaborator(config, &abs_source, &abs_test) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let cancel = install_cancel_handler();
    let module_name = config.module_name();
    let subject = Subject {
        module_name: &module_name,
        source: &source,
        unit: &unit,
    };

    let baseline = match runner::run_baseline(
        &subject,
        collaborator.as_ref(),
        config.timeout.baseline_limit(),
        cancel.clone(),
    ) {
        Ok(b) => b,
        Err(Error::Cancelled) => {
            output::print_warning("Cancelled before any mutant ran.");
            return EXIT_INTERRUPTED;
        }
        Err(e) => {
            output::print_error(&format!("Could not run the test suite: {e}"));
            return EXIT_INTERNAL;
        }
    };
    if !baseline.result.was_successful() && !quiet {
        output::print_warning(&format!(
            "Tests fail against the unmutated source ({} failures, {} errors); coverage will be overstated.",
            baseline.result.failures, baseline.result.errors
        ));
    }

    let timeout = config.timeout.resolve(baseline.duration);
    let mutants: Vec<_> = generator::generate(&unit, Catalog::standard(), config.granularity).collect();
    info!(
        "{} mutants from {}, timeout {}ms, {} jobs",
        mutants.len(),
        abs_source.display(),
        timeout.as_millis(),
        config.jobs
    );

    let options = RunOptions {
        jobs: config.jobs,
        timeout,
        cancel,
    };
    let print_lock = Mutex::new(());
    let feedback = |outcome: &ExecutionOutcome| {
        if quiet || json_mode {
            return;
        }
        let _guard = print_lock.lock().unwrap_or_else(|e| e.into_inner());
        output::print_mutant_feedback(outcome);
    };
    let run = match runner::run_all(&mutants, &subject, collaborator.as_ref(), &options, feedback) {
        Ok(run) => run,
        Err(e) => {
            output::print_error(&e.to_string());
            return EXIT_INTERNAL;
        }
    };

    let meta = ReportMeta {
        timestamp,
        duration: started.elapsed(),
        source_file: config.source_file.display().to_string(),
        test_file: config.test_file.display().to_string(),
        granularity: config.granularity,
        cancelled: run.cancelled,
        baseline: baseline.result,
    };
    let report = Report::aggregate(meta, run.outcomes);

    if json_mode && !quiet {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                output::print_error(&format!("Failed to encode report: {e}"));
                return EXIT_INTERNAL;
            }
        }
    } else if !quiet {
        output::print_summary(&report);
    }

    let report_path = config
        .report_path
        .clone()
        .unwrap_or_else(|| report::default_report_path(&timestamp));
    if let Err(e) = report::persist(&report, &report_path) {
        output::print_error(&e.to_string());
        return EXIT_INTERNAL;
    }
    if let Err(e) = report::save_last_run(&report) {
        warn!("could not update {}: {e}", report::STATE_FILE);
    }
    if !quiet && !json_mode {
        output::print_report_location(&report_path);
    }

    if report.cancelled {
        EXIT_INTERRUPTED
    } else if config.below_threshold(report.mutation_coverage) {
        EXIT_BELOW_THRESHOLD
    } else {
        0
    }
}

fn cmd_list(source_file: &Path, granularity: Granularity, json_mode: bool) -> i32 {
    let source = match read_source(source_file) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let unit = match parser::parse(&source) {
        Ok(unit) => unit,
        Err(e) => {
            output::print_error(&format!("{}: {e}", source_file.display()));
            return EXIT_BAD_INPUT;
        }
    };
    let mutants: Vec<_> = generator::generate(&unit, Catalog::standard(), granularity).collect();

    if json_mode {
        let entries: Vec<serde_json::Value> = mutants
            .iter()
            .map(|m| {
                serde_json::json!({
                    "index": m.index,
                    "label": m.label,
                    "line": m.line,
                    "original_code": runner::line_text(&source, m.line),
                    "mutated_code": runner::line_text(&m.apply_to(&source), m.line),
                })
            })
            .collect();
        println!("{}", serde_json::Value::Array(entries));
    } else {
        output::print_mutant_list(&mutants, &source);
    }
    0
}

fn load_report(path: Option<&Path>) -> Result<Report, i32> {
    let loaded = match path {
        Some(p) => report::load_from_path(p).ok(),
        None => report::load_last_run(),
    };
    loaded.ok_or_else(|| {
        output::print_error("No previous run found. Run `mutcheck run` first.");
        EXIT_BAD_INPUT
    })
}

fn cmd_status(path: Option<&Path>, json_mode: bool) -> i32 {
    let report = match load_report(path) {
        Ok(r) => r,
        Err(code) => return code,
    };
    if json_mode {
        match serde_json::to_string(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                output::print_error(&format!("Failed to encode report: {e}"));
                return EXIT_INTERNAL;
            }
        }
    } else {
        output::print_status(&report);
    }
    0
}

fn cmd_show(mutant_ref: &str, path: Option<&Path>, json_mode: bool) -> i32 {
    let report = match load_report(path) {
        Ok(r) => r,
        Err(code) => return code,
    };
    match report.find(mutant_ref) {
        Some(m) => {
            if json_mode {
                match serde_json::to_string(m) {
                    Ok(json) => println!("{json}"),
                    Err(e) => {
                        output::print_error(&format!("Failed to encode mutant: {e}"));
                        return EXIT_INTERNAL;
                    }
                }
            } else {
                output::print_mutant_detail(m, &report.source_file);
            }
            0
        }
        None => {
            output::print_error(&format!(
                "Mutant {} not found. Valid refs: @m0 to @m{}",
                mutant_ref,
                report.total_mutants.saturating_sub(1)
            ));
            EXIT_BAD_INPUT
        }
    }
}
