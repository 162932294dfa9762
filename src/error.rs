use thiserror::Error;

use crate::storage::StorageError;

/// A single backend could not produce its record.
#[derive(Debug, Error)]
#[error("collection from {backend} failed: {cause}")]
pub struct CollectionFailure {
    /// Human-readable identity of the backend (container name, bucket path).
    pub backend: String,
    #[source]
    pub cause: CollectionCause,
}

impl CollectionFailure {
    pub fn new(backend: impl Into<String>, cause: impl Into<CollectionCause>) -> Self {
        Self {
            backend: backend.into(),
            cause: cause.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CollectionCause {
    /// The command ran but exited unsuccessfully.
    #[error("command returned code {code:?}. Stdout: '{stdout}' Stderr: '{stderr}'")]
    Exec {
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    /// The command could not be started at all.
    #[error("could not start command: {0}")]
    Spawn(#[from] std::io::Error),

    /// Backend answered, but not in the shape we expect.
    #[error("malformed backend output: {0}")]
    Malformed(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A record field held a value that no monitor can interpret.
///
/// This is distinct from a health verdict: a date that fails to parse is
/// never silently reported as healthy.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("cannot classify {field} {value:?} (row {row:?}): {reason}")]
pub struct ClassificationFailure {
    /// 1-based data row in the report, once known.
    pub row: Option<usize>,
    pub field: &'static str,
    pub value: String,
    pub reason: String,
}

impl ClassificationFailure {
    pub fn new(field: &'static str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            row: None,
            field,
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Attach the report row this failure belongs to.
    pub fn at_row(mut self, row: usize) -> Self {
        self.row = Some(row);
        self
    }
}

/// The destination spreadsheet rejected or failed an operation.
#[derive(Debug, Error)]
#[error("sink operation '{operation}' failed: {cause}")]
pub struct SinkFailure {
    pub operation: String,
    #[source]
    pub cause: SinkCause,
}

impl SinkFailure {
    pub fn new(operation: impl Into<String>, cause: impl Into<SinkCause>) -> Self {
        Self {
            operation: operation.into(),
            cause: cause.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SinkCause {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx answer, e.g. quota exhausted or permission denied.
    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unexpected response: {0}")]
    Malformed(String),
}
