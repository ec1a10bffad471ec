//! Error kinds shared by every pipeline component.
//!
//! Recoverable per-record problems are logged and skipped by the component that
//! encounters them; everything here is the non-recoverable tier that gets routed
//! through the [`crate::fail::FailureCoordinator`] and ends the run.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed dump record: {0}")]
    InputFormat(String),

    #[error("I/O error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("subprocess `{program}` failed: {detail}")]
    Subprocess { program: String, detail: String },

    #[error("run cancelled")]
    Cancelled,

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
