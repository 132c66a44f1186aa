use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, IndexerError>;

/// Errors surfaced by the indexing engine and its run controller.
///
/// Only [`IndexerError::LockContention`] and [`IndexerError::FlushFailed`] are expected to
/// end a run; [`IndexerError::Render`] is logged per document and the run moves on.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("indexer lock {path} is held by another run{}", .holder.as_deref().map(|h| format!(" ({h})")).unwrap_or_default())]
    LockContention {
        path: PathBuf,
        holder: Option<String>,
    },

    #[error("lock hand-off token does not match the lock at {path}")]
    InvalidLockToken { path: PathBuf },

    #[error("failed to flush {} index partition(s) [{}]: {reason}", .partitions.len(), .partitions.join(", "))]
    FlushFailed {
        partitions: Vec<String>,
        reason: String,
    },

    #[error("could not render {id}: {reason}")]
    Render { id: String, reason: String },

    #[error("{operation} requires a writable index handle")]
    Locked { operation: &'static str },

    #[error("invalid document id {raw:?}")]
    InvalidId { raw: String },

    #[error("invalid queue file {path}: {reason}")]
    InvalidQueue { path: PathBuf, reason: String },

    #[error("invalid configuration: {reason}")]
    Config { reason: String },
}

impl IndexerError {
    /// Whether this error should leave the process with a non-zero exit status.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Render { .. })
    }
}
