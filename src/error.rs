use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or unsupported source. Fatal before any mutant is generated.
    #[error("parse error at line {line}, column {column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },

    /// A generated mutant failed to serialize or re-load.
    #[error("failed to load mutant {name}: {message}")]
    Load { name: String, message: String },

    #[error("test execution failed: {0}")]
    Execution(String),

    #[error("test run exceeded {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("run cancelled")]
    Cancelled,

    #[error("failed to write report to {path}: {source}")]
    ReportIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid mutation catalog: {0}")]
    Catalog(String),

    #[error("failed to prepare sandbox: {0}")]
    Sandbox(String),

    #[error("internal consistency error: {0}")]
    Consistency(String),

    #[error("failed to start {what}: {source}")]
    Spawn {
        what: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn parse(line: usize, column: usize, message: impl Into<String>) -> Self {
        Error::Parse {
            line,
            column,
            message: message.into(),
        }
    }

    /// The machinery around a test run broke, so the run says nothing about
    /// the mutant.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Error::Sandbox(_) | Error::Spawn { .. } | Error::Io { .. } | Error::ReportIo { .. }
        )
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
