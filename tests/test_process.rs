use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use mutcheck::Error;
use mutcheck::collaborator::{Budget, SuiteResult, TestCollaborator};
use mutcheck::parser;
use mutcheck::process::{self, CommandSuite};
use mutcheck::runner;

// --- summary parsing ---

#[test]
fn unittest_success_summary() {
    let output = "....\n----------------------------------------------------------------------\nRan 4 tests in 0.001s\n\nOK\n";
    assert_eq!(
        process::parse_summary(output, true),
        SuiteResult {
            tests_run: 4,
            failures: 0,
            errors: 0
        }
    );
}

#[test]
fn unittest_failure_summary() {
    let output = "F.E.\nRan 4 tests in 0.002s\n\nFAILED (failures=1, errors=1)\n";
    assert_eq!(
        process::parse_summary(output, false),
        SuiteResult {
            tests_run: 4,
            failures: 1,
            errors: 1
        }
    );
}

#[test]
fn pytest_summary() {
    let output = "test_calc.py ..F\n=========== 1 failed, 2 passed in 0.03s ===========\n";
    assert_eq!(
        process::parse_summary(output, false),
        SuiteResult {
            tests_run: 3,
            failures: 1,
            errors: 0
        }
    );
}

#[test]
fn pytest_summary_with_errors() {
    let output = "==== 3 passed, 2 errors in 0.10s ====\n";
    assert_eq!(
        process::parse_summary(output, false),
        SuiteResult {
            tests_run: 3,
            failures: 0,
            errors: 2
        }
    );
}

#[test]
fn pytest_all_passed() {
    let output = "======== 5 passed in 0.01s ========\n";
    let result = process::parse_summary(output, true);
    assert_eq!(result.tests_run, 5);
    assert!(result.was_successful());
}

#[test]
fn unrecognized_failure_is_one_failure() {
    let result = process::parse_summary("something went wrong\n", false);
    assert_eq!(result.failures, 1);
    assert_eq!(result.errors, 0);
}

#[test]
fn import_problem_is_one_error() {
    let output = "Traceback (most recent call last):\nModuleNotFoundError: No module named 'calculator'\n";
    let result = process::parse_summary(output, false);
    assert_eq!(result.errors, 1);
    assert_eq!(result.failures, 0);
}

#[test]
fn nonzero_exit_with_clean_summary_still_fails() {
    let result = process::parse_summary("Ran 2 tests in 0.0s\n\nOK\n", false);
    assert!(!result.was_successful());
}

// --- command handling ---

#[test]
fn parse_test_cmd_splits_program_and_args() {
    let (program, args) = process::parse_test_cmd("python -m pytest -x");
    assert_eq!(program, "python");
    assert_eq!(args, vec!["-m", "pytest", "-x"]);

    let (program, args) = process::parse_test_cmd("   ");
    assert!(program.is_empty());
    assert!(args.is_empty());
}

#[test]
fn resolve_cmd_keeps_bare_and_absolute_commands() {
    let root = Path::new("/nonexistent/project");
    assert_eq!(process::resolve_cmd("pytest -q", root, root), "pytest -q");
    assert_eq!(
        process::resolve_cmd("/usr/bin/python3 -m unittest", root, root),
        "/usr/bin/python3 -m unittest"
    );
}

#[test]
fn resolve_cmd_makes_relative_paths_absolute() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join(".venv/bin")).unwrap();
    std::fs::write(dir.path().join(".venv/bin/pytest"), "").unwrap();
    let resolved = process::resolve_cmd(".venv/bin/pytest -q", dir.path(), dir.path());
    assert_eq!(
        resolved,
        format!("{} -q", dir.path().join(".venv/bin/pytest").display())
    );
}

#[test]
fn resolve_cmd_leaves_unknown_relative_paths() {
    let dir = tempfile::TempDir::new().unwrap();
    assert_eq!(
        process::resolve_cmd("bin/missing --flag", dir.path(), dir.path()),
        "bin/missing --flag"
    );
}

// --- sandboxed runs ---

fn project(dir: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
    std::fs::write(dir.join("pyproject.toml"), "[project]\nname = \"calc\"\n").unwrap();
    let source = dir.join("calc.py");
    let test = dir.join("test_calc.py");
    std::fs::write(&source, "def add(a, b):\n    return a + b\n").unwrap();
    std::fs::write(&test, "from calc import add\n").unwrap();
    (source, test)
}

#[test]
fn empty_test_command_is_rejected() {
    let dir = tempfile::TempDir::new().unwrap();
    let (source, test) = project(dir.path());
    assert!(matches!(
        CommandSuite::new("  ", &source, &test, "abcd"),
        Err(Error::Execution(_))
    ));
}

#[test]
fn sandbox_holds_the_loaded_unit_and_leaves_the_original_alone() {
    let dir = tempfile::TempDir::new().unwrap();
    let (source, test) = project(dir.path());
    let suite = CommandSuite::new("true", &source, &test, "abcd").unwrap();

    let mut tree = parser::parse("def add(a, b):\n    return a + b\n").unwrap();
    tree.for_each_operator_mut(&mut |op| op.kind = mutcheck::tree::Operator::Sub);
    let unit = runner::load(&tree, "calc", runner::mutant_name("calc", 0)).unwrap();

    let sandbox_root;
    {
        let sandbox = suite.prepare_sandbox(&unit).unwrap();
        sandbox_root = sandbox.paths.root.clone();
        let copied = std::fs::read_to_string(&sandbox.paths.source_file).unwrap();
        assert!(copied.contains("a - b"), "{copied}");
        assert!(sandbox.paths.test_file.exists());
        let name = sandbox_root
            .ancestors()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .find(|n| n.starts_with("mutcheck-abcd-"));
        assert!(name.is_some(), "{}", sandbox_root.display());
    }
    assert!(!sandbox_root.exists(), "sandbox should be removed on drop");
    let original = std::fs::read_to_string(&source).unwrap();
    assert!(original.contains("a + b"));
}

#[cfg(unix)]
#[test]
fn exit_status_decides_outcome() {
    let dir = tempfile::TempDir::new().unwrap();
    let (source, test) = project(dir.path());
    let tree = parser::parse("def add(a, b):\n    return a + b\n").unwrap();
    let unit = runner::load(&tree, "calc", "calc__baseline".to_string()).unwrap();
    let budget = Budget::new(Duration::from_secs(10), Arc::new(AtomicBool::new(false)));

    let passing = CommandSuite::new("true", &source, &test, "pass").unwrap();
    assert!(passing.run_suite(&unit, &budget).unwrap().was_successful());

    let failing = CommandSuite::new("false", &source, &test, "fail").unwrap();
    assert_eq!(failing.run_suite(&unit, &budget).unwrap().failures, 1);
}

#[cfg(unix)]
#[test]
fn slow_command_is_killed_at_the_deadline() {
    let dir = tempfile::TempDir::new().unwrap();
    let (source, test) = project(dir.path());
    let tree = parser::parse("def add(a, b):\n    return a + b\n").unwrap();
    let unit = runner::load(&tree, "calc", "calc__mutant_0".to_string()).unwrap();
    let budget = Budget::new(Duration::from_millis(200), Arc::new(AtomicBool::new(false)));

    // `sleep` gets the test file as an extra argument, which it rejects,
    // so wrap it in `sh -c`, ignoring the trailing path.
    let suite = CommandSuite::new("sh -c sleep${IFS}30", &source, &test, "slow").unwrap();
    let started = std::time::Instant::now();
    let err = suite.run_suite(&unit, &budget).unwrap_err();
    assert!(matches!(err, Error::Timeout { timeout_ms: 200 }), "{err}");
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[cfg(unix)]
#[test]
fn cancelled_command_is_killed() {
    let dir = tempfile::TempDir::new().unwrap();
    let (source, test) = project(dir.path());
    let tree = parser::parse("def add(a, b):\n    return a + b\n").unwrap();
    let unit = runner::load(&tree, "calc", "calc__mutant_0".to_string()).unwrap();
    let budget = Budget::new(Duration::from_secs(30), Arc::new(AtomicBool::new(true)));

    let suite = CommandSuite::new("sh -c sleep${IFS}30", &source, &test, "cancel").unwrap();
    assert!(matches!(
        suite.run_suite(&unit, &budget),
        Err(Error::Cancelled)
    ));
}

#[test]
fn missing_program_is_an_infrastructure_error() {
    let dir = tempfile::TempDir::new().unwrap();
    let (source, test) = project(dir.path());
    let tree = parser::parse("def add(a, b):\n    return a + b\n").unwrap();
    let unit = runner::load(&tree, "calc", "calc__mutant_0".to_string()).unwrap();
    let budget = Budget::new(Duration::from_secs(10), Arc::new(AtomicBool::new(false)));

    let suite = CommandSuite::new("mutcheck-no-such-runner", &source, &test, "gone").unwrap();
    let err = suite.run_suite(&unit, &budget).unwrap_err();
    assert!(matches!(err, Error::Spawn { .. }), "{err}");
    assert!(err.is_infrastructure());
}

#[cfg(unix)]
#[test]
fn deadline_kills_the_whole_process_group() {
    let dir = tempfile::TempDir::new().unwrap();
    let (source, test) = project(dir.path());
    let tree = parser::parse("def add(a, b):\n    return a + b\n").unwrap();
    let unit = runner::load(&tree, "calc", "calc__mutant_0".to_string()).unwrap();
    let budget = Budget::new(Duration::from_millis(200), Arc::new(AtomicBool::new(false)));

    // A background subshell that would leave a marker behind if it survived.
    let marker = dir.path().join("survivor");
    let cmd = format!(
        "sh -c (sleep${{IFS}}1;touch${{IFS}}{})&sleep${{IFS}}30",
        marker.display()
    );
    let suite = CommandSuite::new(&cmd, &source, &test, "group").unwrap();
    let err = suite.run_suite(&unit, &budget).unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }), "{err}");

    std::thread::sleep(Duration::from_millis(1500));
    assert!(!marker.exists(), "background child outlived the kill");
}
