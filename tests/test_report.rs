use std::time::Duration;

use mutcheck::Error;
use mutcheck::collaborator::SuiteResult;
use mutcheck::mutants::{ExecutionOutcome, Granularity};
use mutcheck::report::{self, Report, ReportMeta};

fn outcome(index: usize, caught: bool) -> ExecutionOutcome {
    ExecutionOutcome {
        index,
        label: "+ to -".to_string(),
        line: index + 1,
        caught,
        timed_out: false,
        failures: usize::from(caught),
        errors: 0,
        original_code: "return a + b".to_string(),
        mutated_code: "return a - b".to_string(),
        diff: "-     return a + b\n+     return a - b\n".to_string(),
        error: None,
        duration_ms: 12,
    }
}

fn meta() -> ReportMeta {
    ReportMeta {
        timestamp: chrono::Local::now(),
        duration: Duration::from_millis(1500),
        source_file: "calculator.py".to_string(),
        test_file: "test_calculator.py".to_string(),
        granularity: Granularity::Single,
        cancelled: false,
        baseline: SuiteResult {
            tests_run: 5,
            failures: 0,
            errors: 0,
        },
    }
}

// --- coverage ---

#[test]
fn coverage_is_zero_without_mutants() {
    assert_eq!(report::coverage(0, 0), 0.0);
}

#[test]
fn coverage_is_a_percentage() {
    assert_eq!(report::coverage(3, 4), 75.0);
    assert_eq!(report::coverage(5, 5), 100.0);
    assert_eq!(report::coverage(0, 7), 0.0);
}

// --- aggregate ---

#[test]
fn aggregate_counts_and_sorts() {
    let mut timed_out = outcome(1, true);
    timed_out.timed_out = true;
    let report = Report::aggregate(
        meta(),
        vec![outcome(2, false), timed_out, outcome(0, true), outcome(3, true)],
    );
    assert_eq!(report.schema_version, report::SCHEMA_VERSION);
    assert_eq!(report.total_mutants, 4);
    assert_eq!(report.caught, 3);
    assert_eq!(report.not_caught, 1);
    assert_eq!(report.timed_out, 1);
    assert_eq!(report.mutation_coverage, 75.0);
    assert_eq!(report.duration_seconds, 1.5);
    let indices: Vec<usize> = report.mutants.iter().map(|m| m.index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3]);
}

#[test]
fn aggregate_of_nothing() {
    let report = Report::aggregate(meta(), Vec::new());
    assert_eq!(report.total_mutants, 0);
    assert_eq!(report.caught, 0);
    assert_eq!(report.not_caught, 0);
    assert_eq!(report.mutation_coverage, 0.0);
}

#[test]
fn survivors_are_the_uncaught() {
    let report = Report::aggregate(
        meta(),
        vec![outcome(0, true), outcome(1, false), outcome(2, false)],
    );
    let survivors: Vec<usize> = report.survivors().map(|m| m.index).collect();
    assert_eq!(survivors, vec![1, 2]);
}

// --- refs ---

#[test]
fn parse_ref_accepts_all_forms() {
    assert_eq!(report::parse_ref("3"), Some(3));
    assert_eq!(report::parse_ref("m3"), Some(3));
    assert_eq!(report::parse_ref("@m3"), Some(3));
    assert_eq!(report::parse_ref(" @m12 "), Some(12));
    assert_eq!(report::parse_ref("@x3"), None);
    assert_eq!(report::parse_ref(""), None);
}

#[test]
fn find_by_ref() {
    let report = Report::aggregate(meta(), vec![outcome(0, true), outcome(1, false)]);
    assert_eq!(report.find("@m1").map(|m| m.caught), Some(false));
    assert!(report.find("@m9").is_none());
}

// --- persistence ---

#[test]
fn persist_and_load_round_trip() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("report.json");
    let report = Report::aggregate(meta(), vec![outcome(0, true), outcome(1, false)]);
    report::persist(&report, &path).unwrap();

    let loaded = report::load_from_path(&path).unwrap();
    assert_eq!(loaded, report);
}

#[test]
fn report_json_shape() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("report.json");
    let report = Report::aggregate(meta(), vec![outcome(0, true)]);
    report::persist(&report, &path).unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["schema_version"], 1);
    assert_eq!(json["source_file"], "calculator.py");
    assert_eq!(json["granularity"], "single");
    assert_eq!(json["total_mutants"], 1);
    assert_eq!(json["mutation_coverage"], 100.0);
    assert_eq!(json["baseline"]["tests_run"], 5);
    assert_eq!(json["mutants"][0]["original_code"], "return a + b");
    assert!(json["mutants"][0].get("error").is_none());
    assert!(json["timestamp"].is_string());
}

#[test]
fn older_reports_without_optional_fields_load() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("old.json");
    std::fs::write(
        &path,
        r#"{
  "schema_version": 1,
  "timestamp": "2026-01-02T03:04:05+00:00",
  "duration_seconds": 2.0,
  "source_file": "calc.py",
  "test_file": "test_calc.py",
  "granularity": "all",
  "baseline": {"tests_run": 1, "failures": 0, "errors": 0},
  "total_mutants": 1,
  "caught": 0,
  "not_caught": 1,
  "timed_out": 0,
  "mutation_coverage": 0.0,
  "mutants": [{
    "index": 0,
    "label": "> to <",
    "line": 2,
    "caught": false,
    "failures": 0,
    "errors": 0,
    "original_code": "return x > 0",
    "mutated_code": "return x < 0"
  }]
}"#,
    )
    .unwrap();
    let report = report::load_from_path(&path).unwrap();
    assert!(!report.cancelled);
    assert_eq!(report.granularity, Granularity::All);
    assert_eq!(report.mutants[0].diff, "");
    assert_eq!(report.mutants[0].duration_ms, 0);
}

#[test]
fn persist_to_missing_directory_is_report_io_error() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("missing").join("report.json");
    let report = Report::aggregate(meta(), Vec::new());
    let err = report::persist(&report, &path).unwrap_err();
    assert!(matches!(err, Error::ReportIo { .. }), "{err}");
}

#[test]
fn load_of_garbage_fails() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("bad.json");
    std::fs::write(&path, "not json").unwrap();
    assert!(report::load_from_path(&path).is_err());
    assert!(report::load_from_path(&dir.path().join("absent.json")).is_err());
}

#[test]
fn default_report_path_uses_timestamp() {
    let ts = chrono::TimeZone::with_ymd_and_hms(&chrono::Local, 2026, 3, 4, 5, 6, 7).unwrap();
    assert_eq!(
        report::default_report_path(&ts),
        std::path::PathBuf::from("mutation_report_20260304_050607.json")
    );
}
