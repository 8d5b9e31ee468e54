//! Error taxonomy shared by workspace, history, and build crates.

use thiserror::Error;

/// Errors surfaced by workspace, snapshot, revert, and build operations.
#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("path escapes workspace root: {0}")]
    PathTraversal(String),
    #[error("invalid message id for snapshot: {0:?}")]
    InvalidMessageId(String),
    #[error("snapshot missing for message {0}")]
    SnapshotMissing(String),
    #[error("unsupported project: {0}")]
    UnsupportedProject(String),
    #[error("command failed (exit={exit_code}): {command}")]
    CommandFailed { command: String, exit_code: i32 },
    #[error("command timed out after {timeout_secs} seconds: {command}")]
    CommandTimeout { command: String, timeout_secs: u64 },
    #[error("project not found: {0}")]
    ProjectNotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ForgeError {
    /// Timeouts and non-zero exits share one failure path in build pipelines.
    pub fn is_command_failure(&self) -> bool {
        matches!(
            self,
            Self::CommandFailed { .. } | Self::CommandTimeout { .. }
        )
    }
}

/// Convenience result type for forge operations.
pub type ForgeResult<T> = Result<T, ForgeError>;
