//! Error taxonomy for session store operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the session store's public operations.
///
/// Every operation either succeeds and is immediately visible to subsequent
/// calls on the same id, or fails with one of these and leaves prior state
/// untouched.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The id was never created, or TTL/quota eviction already removed it.
    /// Both cases are surfaced identically: the outcome is "nothing there".
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Label was empty or whitespace-only after trimming.
    #[error("label cannot be empty")]
    InvalidLabel,

    /// A recorded workspace size pushed the session past its per-session cap.
    #[error("session {id} disk quota exceeded: {used} > {limit} bytes")]
    WorkspaceQuotaExceeded { id: String, used: u64, limit: u64 },

    /// The table is at capacity and eviction could not free a slot.
    #[error("maximum number of sessions ({0}) reached")]
    MaxSessionsExceeded(usize),

    /// The durable backing (workspace root or snapshot file) is unreachable.
    #[error("store unavailable at {path}: {source}")]
    StoreUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The snapshot at `StorePath` could not be encoded or decoded.
    #[error("snapshot corrupt: {0}")]
    SnapshotCorrupt(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn unavailable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::StoreUnavailable {
            path: path.into(),
            source,
        }
    }
}
