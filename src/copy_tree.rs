use std::fs;
use std::path::{Path, PathBuf};

const SKIP_NAMES: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    ".venv",
    "venv",
    "__pycache__",
    ".tox",
    ".nox",
    ".mypy_cache",
    ".pytest_cache",
    ".ruff_cache",
    "target",
    "dist",
    "build",
    ".mutcheck-state.json",
];

const SKIP_PREFIXES: &[&str] = &["mutation_report_"];

const SKIP_SUFFIXES: &[&str] = &[".pyc", ".pyo", ".egg-info"];

const PROJECT_MARKERS: &[&str] = &[
    "pyproject.toml",
    "setup.py",
    "setup.cfg",
    "tox.ini",
    "pytest.ini",
    ".git",
];

/// Locations inside a copied tree.
#[derive(Debug)]
pub struct CopyResult {
    pub root: PathBuf,
    pub source_file: PathBuf,
    pub test_file: PathBuf,
    /// Regular files written into the copy.
    pub files: usize,
}

fn should_skip(name: &str) -> bool {
    SKIP_NAMES.iter().any(|s| *s == name)
        || SKIP_PREFIXES.iter().any(|s| name.starts_with(s))
        || SKIP_SUFFIXES.iter().any(|s| name.ends_with(s))
}

fn copy_dir_filtered(src: &Path, dst: &Path) -> std::io::Result<usize> {
    fs::create_dir_all(dst)?;
    let mut files = 0;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        if should_skip(&name.to_string_lossy()) {
            continue;
        }
        let src_path = entry.path();
        let dst_path = dst.join(&name);
        let ft = entry.file_type()?;
        if ft.is_dir() {
            files += copy_dir_filtered(&src_path, &dst_path)?;
        } else if ft.is_file() {
            fs::copy(&src_path, &dst_path)?;
            files += 1;
        }
        // symlinks and special files are not followed
    }
    Ok(files)
}

/// Walk up from `source_file` to the nearest directory with a Python
/// project marker, falling back to the file's own directory.
pub fn find_project_root(source_file: &Path) -> PathBuf {
    let start = source_file.parent().unwrap_or(source_file);
    start
        .ancestors()
        .find(|dir| PROJECT_MARKERS.iter().any(|m| dir.join(m).exists()))
        .unwrap_or(start)
        .to_path_buf()
}

/// Map `file` into the copy. Files outside `project_root` are copied to the
/// copy's root under their own name.
fn place(project_root: &Path, file: &Path, dest_root: &Path) -> std::io::Result<PathBuf> {
    match file.strip_prefix(project_root) {
        Ok(rel) => Ok(dest_root.join(rel)),
        Err(_) => {
            let name = file.file_name().ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("{} has no file name", file.display()),
                )
            })?;
            let target = dest_root.join(name);
            fs::copy(file, &target)?;
            Ok(target)
        }
    }
}

/// Copy the project tree into `dest_root`, returning paths mapped into the copy.
pub fn copy_tree(
    project_root: &Path,
    source_file: &Path,
    test_file: &Path,
    dest_root: &Path,
) -> std::io::Result<CopyResult> {
    let files = copy_dir_filtered(project_root, dest_root)?;
    Ok(CopyResult {
        root: dest_root.to_path_buf(),
        files,
        source_file: place(project_root, source_file, dest_root)?,
        test_file: place(project_root, test_file, dest_root)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn copy_tree_copies_files_and_skips_caches() {
        let src_dir = TempDir::new().unwrap();
        let src = src_dir.path();
        fs::write(src.join("calculator.py"), "x = 1").unwrap();
        fs::write(src.join("test_calculator.py"), "assert True").unwrap();
        fs::create_dir(src.join(".git")).unwrap();
        fs::write(src.join(".git").join("HEAD"), "ref").unwrap();
        fs::create_dir(src.join("__pycache__")).unwrap();
        fs::write(src.join("__pycache__").join("calculator.cpython-311.pyc"), "bytes").unwrap();

        let dst_dir = TempDir::new().unwrap();
        let result = copy_tree(
            src,
            &src.join("calculator.py"),
            &src.join("test_calculator.py"),
            dst_dir.path(),
        )
        .unwrap();

        assert!(result.source_file.exists());
        assert!(result.test_file.exists());
        assert!(!dst_dir.path().join(".git").exists());
        assert!(!dst_dir.path().join("__pycache__").exists());
        assert_eq!(result.files, 2);
    }

    #[test]
    fn copy_tree_preserves_nested_structure() {
        let src_dir = TempDir::new().unwrap();
        let src = src_dir.path();
        fs::create_dir_all(src.join("pkg").join("utils")).unwrap();
        fs::write(src.join("pkg").join("utils").join("ops.py"), "def add(a, b): return a + b").unwrap();
        fs::write(src.join("test_ops.py"), "pass").unwrap();

        let dst_dir = TempDir::new().unwrap();
        let result = copy_tree(
            src,
            &src.join("pkg").join("utils").join("ops.py"),
            &src.join("test_ops.py"),
            dst_dir.path(),
        )
        .unwrap();

        assert_eq!(result.source_file, dst_dir.path().join("pkg").join("utils").join("ops.py"));
        assert_eq!(
            fs::read_to_string(&result.source_file).unwrap(),
            "def add(a, b): return a + b"
        );
    }

    #[test]
    fn copy_tree_places_outside_test_file_at_root() {
        let project = TempDir::new().unwrap();
        let elsewhere = TempDir::new().unwrap();
        fs::write(project.path().join("calculator.py"), "x = 1").unwrap();
        fs::write(elsewhere.path().join("test_calculator.py"), "pass").unwrap();

        let dst_dir = TempDir::new().unwrap();
        let result = copy_tree(
            project.path(),
            &project.path().join("calculator.py"),
            &elsewhere.path().join("test_calculator.py"),
            dst_dir.path(),
        )
        .unwrap();

        assert_eq!(result.test_file, dst_dir.path().join("test_calculator.py"));
        assert!(result.test_file.exists());
    }

    #[test]
    fn copy_tree_skips_reports_and_state() {
        let src_dir = TempDir::new().unwrap();
        let src = src_dir.path();
        fs::write(src.join("app.py"), "x = 1").unwrap();
        fs::write(src.join("test_app.py"), "pass").unwrap();
        fs::write(src.join(".mutcheck-state.json"), "{}").unwrap();
        fs::write(src.join("mutation_report_20240101_120000.json"), "{}").unwrap();

        let dst_dir = TempDir::new().unwrap();
        copy_tree(src, &src.join("app.py"), &src.join("test_app.py"), dst_dir.path()).unwrap();

        assert!(!dst_dir.path().join(".mutcheck-state.json").exists());
        assert!(!dst_dir.path().join("mutation_report_20240101_120000.json").exists());
    }

    #[test]
    fn find_project_root_finds_pyproject() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("pyproject.toml"), "").unwrap();
        fs::write(root.join("src").join("app.py"), "").unwrap();

        assert_eq!(find_project_root(&root.join("src").join("app.py")), root);
    }

    #[test]
    fn find_project_root_finds_git_dir() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir(root.join(".git")).unwrap();
        fs::write(root.join("src").join("main.py"), "").unwrap();

        assert_eq!(find_project_root(&root.join("src").join("main.py")), root);
    }

    #[test]
    fn find_project_root_fallback_to_parent() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src").join("app.py"), "").unwrap();

        // may still find a marker above the temp dir; only assert when none exists
        let found = find_project_root(&root.join("src").join("app.py"));
        if !root.ancestors().any(|d| PROJECT_MARKERS.iter().any(|m| d.join(m).exists())) {
            assert_eq!(found, root.join("src"));
        }
    }

    #[test]
    fn should_skip_filters_correctly() {
        assert!(should_skip(".git"));
        assert!(should_skip("__pycache__"));
        assert!(should_skip(".venv"));
        assert!(should_skip("app.pyc"));
        assert!(should_skip("mutation_report_x.json"));
        assert!(should_skip("mypkg.egg-info"));
        assert!(!should_skip("app.py"));
        assert!(!should_skip("src"));
        assert!(!should_skip("pyproject.toml"));
    }
}
