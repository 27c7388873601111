//! Error types for the synchronization core.
//!
//! Every fallible operation in the library returns [`SyncError`]; the binary
//! wraps it in `anyhow` at its edge.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// A remote call did not complete.
    #[error("remote call `{method}` failed: {source}")]
    RemoteUnreachable {
        method: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The remote completed the call but answered `false`.
    #[error("remote rejected `{method}` for {target}")]
    RemoteRejected { method: &'static str, target: String },

    #[error("malformed response to `{method}`: {detail}")]
    MalformedResponse { method: &'static str, detail: String },

    #[error("no valid session key; authenticate before syncing")]
    AuthenticationMissing,

    #[error("I/O error while {operation} {}: {source}", path.display())]
    LocalFs {
        path: PathBuf,
        operation: &'static str,
        #[source]
        source: io::Error,
    },

    /// The same key names a file on one side and a folder on the other.
    #[error("`{key}` is a file on one side and a folder on the other")]
    InconsistentKind { key: String },

    #[error("a reconciliation pass is already running")]
    PassInProgress,

    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("invalid configuration {}: {detail}", path.display())]
    Config { path: PathBuf, detail: String },
}

impl SyncError {
    /// Wrap an I/O error with the path and the operation that produced it.
    pub fn local(err: io::Error, operation: &'static str, path: impl Into<PathBuf>) -> Self {
        SyncError::LocalFs {
            path: path.into(),
            operation,
            source: err,
        }
    }

    pub fn unreachable(
        method: &'static str,
        err: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        SyncError::RemoteUnreachable {
            method,
            source: Box::new(err),
        }
    }

    pub fn malformed(method: &'static str, detail: impl ToString) -> Self {
        SyncError::MalformedResponse {
            method,
            detail: detail.to_string(),
        }
    }

    /// Errors no later pass can recover from without user action.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::AuthenticationMissing | SyncError::Config { .. }
        )
    }
}

/// Attach path context to `io::Result` values.
pub trait IoContext<T> {
    fn with_path(self, operation: &'static str, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn with_path(self, operation: &'static str, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| SyncError::local(e, operation, path))
    }
}
