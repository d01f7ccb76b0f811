use std::path::Path;
use std::process::{Command, Output};

fn mutcheck_bin() -> std::path::PathBuf {
    let mut path = std::env::current_exe().unwrap();
    // test binary is in target/debug/deps/, mutcheck binary is in target/debug/
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.push("mutcheck");
    path
}

fn create_python_project(dir: &Path) {
    let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
    for name in ["calculator.py", "test_calculator.py", "test_calculator_weak.py"] {
        std::fs::copy(fixtures.join(name), dir.join(name)).unwrap();
    }
    std::fs::write(dir.join("pyproject.toml"), "[project]\nname = \"calculator\"\n").unwrap();
}

fn mutcheck(dir: &Path, args: &[&str]) -> Output {
    Command::new(mutcheck_bin())
        .args(args)
        .current_dir(dir)
        .env_remove("MUTCHECK_TEST_CMD")
        .env_remove("MUTCHECK_TIMEOUT_MS")
        .env_remove("MUTCHECK_JOBS")
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run mutcheck")
}

fn json_stdout(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(stdout.trim()).unwrap_or_else(|e| {
        panic!(
            "Invalid JSON: {e}\nstdout: {stdout}\nstderr: {}",
            String::from_utf8_lossy(&output.stderr)
        )
    })
}

#[test]
fn e2e_full_run_json_output() {
    let dir = tempfile::TempDir::new().unwrap();
    create_python_project(dir.path());

    let output = mutcheck(
        dir.path(),
        &["run", "calculator.py", "test_calculator.py", "--json", "-j", "2"],
    );
    assert_eq!(output.status.code(), Some(0));

    let report = json_stdout(&output);
    assert_eq!(report["schema_version"], 1);
    assert_eq!(report["total_mutants"], 5);
    assert_eq!(report["caught"], 5);
    assert_eq!(report["not_caught"], 0);
    assert_eq!(report["mutation_coverage"], 100.0);
    assert_eq!(report["baseline"]["tests_run"], 5);
    let indices: Vec<u64> = report["mutants"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["index"].as_u64().unwrap())
        .collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4]);
}

#[test]
fn e2e_weak_suite_below_threshold() {
    let dir = tempfile::TempDir::new().unwrap();
    create_python_project(dir.path());

    let output = mutcheck(
        dir.path(),
        &[
            "run",
            "calculator.py",
            "test_calculator_weak.py",
            "--json",
            "--fail-under",
            "50",
        ],
    );
    assert_eq!(output.status.code(), Some(1));
    let report = json_stdout(&output);
    assert_eq!(report["caught"], 1);
    assert_eq!(report["not_caught"], 4);
    assert_eq!(report["mutation_coverage"], 20.0);
}

#[test]
fn e2e_human_output_reports_each_mutant() {
    let dir = tempfile::TempDir::new().unwrap();
    create_python_project(dir.path());

    let output = mutcheck(dir.path(), &["run", "calculator.py", "test_calculator_weak.py"]);
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Mutation '+ to -' at line 2 was"), "{stdout}");
    assert!(stdout.contains("NOT CAUGHT"), "{stdout}");
    assert!(stdout.contains("@m0"), "{stdout}");
    assert!(stdout.contains("Report written to"), "{stdout}");
}

#[test]
fn e2e_report_and_state_files_written() {
    let dir = tempfile::TempDir::new().unwrap();
    create_python_project(dir.path());

    let output = mutcheck(
        dir.path(),
        &["run", "calculator.py", "test_calculator.py", "--quiet"],
    );
    assert_eq!(output.status.code(), Some(0));

    assert!(dir.path().join(".mutcheck-state.json").exists());
    let reports: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with("mutation_report_") && n.ends_with(".json"))
        .collect();
    assert_eq!(reports.len(), 1, "{reports:?}");
}

#[test]
fn e2e_custom_report_path() {
    let dir = tempfile::TempDir::new().unwrap();
    create_python_project(dir.path());

    let output = mutcheck(
        dir.path(),
        &[
            "run",
            "calculator.py",
            "test_calculator.py",
            "--quiet",
            "--report",
            "out.json",
        ],
    );
    assert_eq!(output.status.code(), Some(0));
    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("out.json")).unwrap())
            .unwrap();
    assert_eq!(report["total_mutants"], 5);
}

#[test]
fn e2e_unwritable_report_path_is_internal_error() {
    let dir = tempfile::TempDir::new().unwrap();
    create_python_project(dir.path());

    let output = mutcheck(
        dir.path(),
        &[
            "run",
            "calculator.py",
            "test_calculator.py",
            "--quiet",
            "--report",
            "no/such/dir/out.json",
        ],
    );
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn e2e_status_after_run() {
    let dir = tempfile::TempDir::new().unwrap();
    create_python_project(dir.path());

    mutcheck(
        dir.path(),
        &["run", "calculator.py", "test_calculator_weak.py", "--quiet"],
    );

    let output = mutcheck(dir.path(), &["status"]);
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("5 mutants"), "{stdout}");
    assert!(stdout.contains("4 not caught"), "{stdout}");

    let json = json_stdout(&mutcheck(dir.path(), &["status", "--json"]));
    assert_eq!(json["total_mutants"], 5);
}

#[test]
fn e2e_show_mutant() {
    let dir = tempfile::TempDir::new().unwrap();
    create_python_project(dir.path());

    mutcheck(
        dir.path(),
        &["run", "calculator.py", "test_calculator_weak.py", "--quiet"],
    );

    let output = mutcheck(dir.path(), &["show", "@m0"]);
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("not caught"), "{stdout}");
    assert!(stdout.contains("return a - b"), "{stdout}");

    let json = json_stdout(&mutcheck(dir.path(), &["show", "3", "--json"]));
    assert_eq!(json["label"], "== to !=");
    assert_eq!(json["caught"], true);

    let missing = mutcheck(dir.path(), &["show", "@m99"]);
    assert_eq!(missing.status.code(), Some(2));
}

#[test]
fn e2e_status_without_previous_run() {
    let dir = tempfile::TempDir::new().unwrap();
    let output = mutcheck(dir.path(), &["status"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn e2e_list_mutants() {
    let dir = tempfile::TempDir::new().unwrap();
    create_python_project(dir.path());

    let json = json_stdout(&mutcheck(dir.path(), &["list", "calculator.py", "--json"]));
    let entries = json.as_array().unwrap();
    assert_eq!(entries.len(), 5);
    assert_eq!(entries[3]["label"], "== to !=");
    assert_eq!(entries[3]["line"], 14);
    assert_eq!(entries[3]["mutated_code"], "if b != 0:");
}

#[test]
fn e2e_granularity_all() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("poly.py"),
        "def poly(x):\n    return x * x + x + 1\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("test_poly.py"),
        "from poly import poly\n\ndef test_poly():\n    assert poly(2) == 7\n",
    )
    .unwrap();

    let output = mutcheck(
        dir.path(),
        &["run", "poly.py", "test_poly.py", "--json", "--granularity", "all"],
    );
    assert_eq!(output.status.code(), Some(0));
    let report = json_stdout(&output);
    assert_eq!(report["granularity"], "all");
    assert_eq!(report["total_mutants"], 3);
    assert_eq!(report["mutants"][1]["mutated_code"], "return x * x - x - 1");
}

#[test]
fn e2e_missing_source_file() {
    let dir = tempfile::TempDir::new().unwrap();
    create_python_project(dir.path());
    let output = mutcheck(dir.path(), &["run", "nope.py", "test_calculator.py"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn e2e_missing_test_file() {
    let dir = tempfile::TempDir::new().unwrap();
    create_python_project(dir.path());
    let output = mutcheck(dir.path(), &["run", "calculator.py", "test_nope.py"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn e2e_unparseable_source() {
    let dir = tempfile::TempDir::new().unwrap();
    create_python_project(dir.path());
    std::fs::write(dir.path().join("broken.py"), "def broken(:\n    return 1\n").unwrap();
    let output = mutcheck(dir.path(), &["run", "broken.py", "test_calculator.py"]);
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("parse error"), "{stderr}");
}

#[test]
fn e2e_invalid_jobs() {
    let dir = tempfile::TempDir::new().unwrap();
    create_python_project(dir.path());
    let output = mutcheck(
        dir.path(),
        &["run", "calculator.py", "test_calculator.py", "-j", "0"],
    );
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn e2e_quiet_mode_no_output() {
    let dir = tempfile::TempDir::new().unwrap();
    create_python_project(dir.path());
    let output = mutcheck(
        dir.path(),
        &["run", "calculator.py", "test_calculator.py", "--quiet"],
    );
    assert_eq!(output.status.code(), Some(0));
    assert!(output.stdout.is_empty(), "{}", String::from_utf8_lossy(&output.stdout));
}

#[test]
fn e2e_original_source_unchanged() {
    let dir = tempfile::TempDir::new().unwrap();
    create_python_project(dir.path());
    let before = std::fs::read_to_string(dir.path().join("calculator.py")).unwrap();

    mutcheck(
        dir.path(),
        &["run", "calculator.py", "test_calculator_weak.py", "--quiet"],
    );

    let after = std::fs::read_to_string(dir.path().join("calculator.py")).unwrap();
    assert_eq!(before, after);
}

#[test]
fn e2e_source_using_decorators_comprehensions_and_fstrings() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("shapes.py"),
        r#"def logged(fn):
    return fn


@logged
def totals(*values, scale=1):
    counts = {'n': len(values)}
    return [v * scale for v in values], counts


def label(n):
    return f"{n:>3}"
"#,
    )
    .unwrap();
    std::fs::write(
        dir.path().join("test_shapes.py"),
        r#"from shapes import totals, label

def test_totals():
    items, counts = totals(1, 2, scale=3)
    assert items == [3, 6]
    assert counts == {'n': 2}

def test_label():
    assert label(7) == "  7"
"#,
    )
    .unwrap();

    let output = mutcheck(dir.path(), &["run", "shapes.py", "test_shapes.py", "--json"]);
    assert_eq!(
        output.status.code(),
        Some(0),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let report = json_stdout(&output);
    assert_eq!(report["total_mutants"], 1);
    assert_eq!(report["caught"], 1);
    assert_eq!(report["mutants"][0]["mutated_code"], "return [v / scale for v in values], counts");
}
