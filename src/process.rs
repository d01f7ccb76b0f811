//! Subprocess test collaborator: runs an external test command against a
//! sandboxed copy of the project with the loaded unit written in place.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use log::{debug, trace};

use crate::collaborator::{Budget, LoadedUnit, SuiteResult, TestCollaborator};
use crate::copy_tree::{self, CopyResult};
use crate::error::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Output that means the unit could not even be imported.
const UNVIABLE_MARKERS: &[&str] = &[
    "SyntaxError",
    "IndentationError",
    "ImportError",
    "ModuleNotFoundError",
];

const STDOUT_LOG: &str = ".mutcheck-stdout.log";
const STDERR_LOG: &str = ".mutcheck-stderr.log";

pub struct CommandSuite {
    program: String,
    args: Vec<String>,
    project_root: PathBuf,
    source_file: PathBuf,
    test_file: PathBuf,
    session_id: String,
}

/// A per-run copy of the project. Removed when dropped.
pub struct Sandbox {
    pub paths: CopyResult,
    _dir: tempfile::TempDir,
}

impl CommandSuite {
    /// `source_file` and `test_file` must be absolute.
    pub fn new(test_cmd: &str, source_file: &Path, test_file: &Path, session_id: &str) -> Result<Self> {
        let cwd = std::env::current_dir().map_err(|e| Error::io(".", e))?;
        let project_root = copy_tree::find_project_root(source_file);
        let (program, args) = parse_test_cmd(&resolve_cmd(test_cmd, &project_root, &cwd));
        if program.is_empty() {
            return Err(Error::Execution("empty test command".into()));
        }
        Ok(CommandSuite {
            program,
            args,
            project_root,
            source_file: source_file.to_path_buf(),
            test_file: test_file.to_path_buf(),
            session_id: session_id.to_string(),
        })
    }

    pub fn prepare_sandbox(&self, unit: &LoadedUnit) -> Result<Sandbox> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("mutcheck-{}-{}-", self.session_id, unit.name))
            .tempdir()
            .map_err(|e| Error::Sandbox(format!("failed to create temp directory: {e}")))?;
        let paths = copy_tree::copy_tree(&self.project_root, &self.source_file, &self.test_file, dir.path())
            .map_err(|e| Error::Sandbox(format!("failed to copy project tree: {e}")))?;
        std::fs::write(&paths.source_file, &unit.source)
            .map_err(|e| Error::Sandbox(format!("failed to write {}: {e}", paths.source_file.display())))?;
        trace!("{}: sandbox {} ({} files)", unit.name, paths.root.display(), paths.files);
        Ok(Sandbox { paths, _dir: dir })
    }
}

impl TestCollaborator for CommandSuite {
    fn run_suite(&self, unit: &LoadedUnit, budget: &Budget) -> Result<SuiteResult> {
        let sandbox = self.prepare_sandbox(unit)?;
        let root = &sandbox.paths.root;
        let stdout_path = root.join(STDOUT_LOG);
        let stderr_path = root.join(STDERR_LOG);
        let stdout = File::create(&stdout_path).map_err(|e| Error::io(&stdout_path, e))?;
        let stderr = File::create(&stderr_path).map_err(|e| Error::io(&stderr_path, e))?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(&sandbox.paths.test_file)
            .current_dir(root)
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let mut child = command.spawn().map_err(|source| Error::Spawn {
            what: self.program.clone(),
            source,
        })?;
        trace!("{}: spawned {} (pid {}) in {}", unit.name, self.program, child.id(), root.display());

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if let Err(e) = budget.check() {
                        terminate(&mut child, &unit.name);
                        debug!("{}: killed test command ({e})", unit.name);
                        return Err(e);
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    terminate(&mut child, &unit.name);
                    return Err(Error::io(&self.program, e));
                }
            }
        };

        let mut output = std::fs::read_to_string(&stdout_path).unwrap_or_default();
        output.push('\n');
        output.push_str(&std::fs::read_to_string(&stderr_path).unwrap_or_default());
        Ok(parse_summary(&output, status.success()))
    }
}

/// Kill the test command and everything it started, then reap it.
///
/// The child leads its own process group, so signalling the group also
/// reaches runners that fork workers.
fn terminate(child: &mut Child, unit: &str) {
    #[cfg(unix)]
    {
        let group = format!("-{}", child.id());
        match Command::new("kill")
            .args(["-KILL", "--", &group])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) if status.success() => {}
            Ok(status) => debug!("{unit}: kill of process group {group} exited with {status}"),
            Err(e) => debug!("{unit}: could not signal process group {group}: {e}"),
        }
    }
    if let Err(e) = child.kill() {
        debug!("{unit}: kill of pid {} failed: {e}", child.id());
    }
    if let Err(e) = child.wait() {
        debug!("{unit}: wait for pid {} failed: {e}", child.id());
    }
}

pub fn parse_test_cmd(cmd: &str) -> (String, Vec<String>) {
    let mut parts = cmd.split_whitespace().map(str::to_string);
    let program = parts.next().unwrap_or_default();
    (program, parts.collect())
}

/// Make a relative command path (e.g. `.venv/bin/pytest`) absolute so it
/// still resolves from inside the sandbox. Bare names are left to `PATH`.
pub fn resolve_cmd(cmd: &str, project_root: &Path, cwd: &Path) -> String {
    let (program, args) = parse_test_cmd(cmd);
    let p = Path::new(&program);
    if p.is_absolute() || !program.contains('/') {
        return cmd.trim().to_string();
    }
    let resolved = [cwd.join(p), project_root.join(p)]
        .into_iter()
        .find(|candidate| candidate.exists());
    match resolved {
        Some(path) => std::iter::once(path.to_string_lossy().into_owned())
            .chain(args)
            .collect::<Vec<_>>()
            .join(" "),
        None => cmd.trim().to_string(),
    }
}

/// Counts from a unittest or pytest run. A failed exit with no recognizable
/// summary is one error when the output shows an import problem, otherwise
/// one failure.
pub fn parse_summary(output: &str, success: bool) -> SuiteResult {
    let mut result = parse_unittest(output)
        .or_else(|| parse_pytest(output))
        .unwrap_or_default();
    if !success && result.was_successful() {
        if UNVIABLE_MARKERS.iter().any(|m| output.contains(m)) {
            result.errors = 1;
        } else {
            result.failures = 1;
        }
    }
    result
}

fn parse_unittest(output: &str) -> Option<SuiteResult> {
    let tests_run = output.lines().find_map(|line| {
        line.strip_prefix("Ran ")?
            .split_whitespace()
            .next()?
            .parse::<usize>()
            .ok()
    })?;
    let mut result = SuiteResult {
        tests_run,
        ..SuiteResult::default()
    };
    if let Some(line) = output
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("FAILED ("))
    {
        let inner = line.trim_start_matches("FAILED (").trim_end_matches(')');
        for part in inner.split(", ") {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            let n = value.trim().parse().unwrap_or(0);
            match key.trim() {
                "failures" => result.failures = n,
                "errors" => result.errors = n,
                _ => {}
            }
        }
    }
    Some(result)
}

fn parse_pytest(output: &str) -> Option<SuiteResult> {
    const WORDS: &[&str] = &[" passed", " failed", " error"];
    let line = output
        .lines()
        .rev()
        .find(|line| line.contains(" in ") && WORDS.iter().any(|w| line.contains(w)))?;
    let body = line.trim().trim_matches('=').trim();
    let body = body.rsplit_once(" in ").map_or(body, |(counts, _)| counts);

    let mut result = SuiteResult::default();
    let mut matched = false;
    for part in body.split(", ") {
        let mut tokens = part.split_whitespace();
        let (Some(count), Some(word)) = (tokens.next(), tokens.next()) else {
            continue;
        };
        let Ok(n) = count.parse::<usize>() else {
            continue;
        };
        matched = true;
        match word {
            "passed" => result.tests_run += n,
            "failed" => {
                result.tests_run += n;
                result.failures += n;
            }
            "error" | "errors" => result.errors += n,
            _ => {}
        }
    }
    matched.then_some(result)
}
