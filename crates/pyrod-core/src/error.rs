//! Daemon-wide error types
//!
//! One enum covers every failure class the daemon distinguishes. Variants
//! map directly onto propagation policy: `BadRequest`/`NotFound`/`Conflict`
//! surface to the caller without state changes, `Engine` failures publish an
//! error state and attempt cleanup, `InstallFailed` gates the lifecycle,
//! `Transient` is retried and never blocks, and `Internal` is logged and
//! surfaced generically without crashing the daemon.

use std::path::PathBuf;
use thiserror::Error;

/// Global pyrod error type
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Caller-side validation failure: bad config, missing egg, malformed path
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Unknown instance, missing file, no stats sample yet
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation illegal in the current lifecycle state
    #[error("conflict: {0}")]
    Conflict(String),

    /// Container engine fault (pull/create/start/stop/logs/exec)
    #[error("engine error during {op}: {reason}")]
    Engine { op: String, reason: String },

    /// Install script exited non-zero
    #[error("install failed for server {id} (exit code {code})")]
    InstallFailed { id: String, code: i64 },

    /// Recoverable outbound failure (panel notification)
    #[error("transient error: {0}")]
    Transient(String),

    /// Anything unexpected; never crashes the daemon
    #[error("internal error: {0}")]
    Internal(String),

    /// IO errors with the path that produced them
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DaemonError {
    /// Shorthand for engine faults
    pub fn engine(op: impl Into<String>, reason: impl ToString) -> Self {
        DaemonError::Engine {
            op: op.into(),
            reason: reason.to_string(),
        }
    }

    /// Shorthand for IO faults carrying their path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DaemonError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for pyrod operations
pub type Result<T, E = DaemonError> = std::result::Result<T, E>;
