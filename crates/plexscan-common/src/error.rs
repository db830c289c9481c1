//! Common error types used throughout plexscan.
//!
//! Component-local failures (an unreadable root, a corrupt snapshot) are
//! variants here so the orchestrator can convert them into cycle-level
//! warnings. Only configuration and persistence failures are expected to
//! reach the process boundary.

use crate::types::Snapshot;
use std::path::PathBuf;

/// Common error type for plexscan.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A monitored root could not be read, or could only be read partially.
    ///
    /// `partial` holds whatever inventory was collected before the failure.
    /// It is never used for diffing.
    #[error("Scan IO error in {root}: {message}")]
    ScanIo {
        /// The root being walked.
        root: String,
        /// Human-readable description of the first failure.
        message: String,
        /// The truncated inventory collected before the failure.
        partial: Box<Snapshot>,
    },

    /// A persisted snapshot failed its integrity check.
    #[error("Snapshot corrupt at {path:?}: {reason}")]
    SnapshotCorruption {
        /// File that failed to load.
        path: PathBuf,
        /// Why it was rejected.
        reason: String,
    },

    /// A snapshot could not be written.
    #[error("Persistence error at {path:?}: {message}")]
    Persistence {
        /// Target path of the failed write.
        path: PathBuf,
        /// Human-readable error description.
        message: String,
    },

    /// Invalid configuration. Only raised at startup.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Work was abandoned because a cancellation signal fired.
    #[error("Cancelled")]
    Cancelled,

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new SnapshotCorruption error.
    pub fn corruption<P: Into<PathBuf>, S: Into<String>>(path: P, reason: S) -> Self {
        Self::SnapshotCorruption {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a new Persistence error.
    pub fn persistence<P: Into<PathBuf>, S: Into<String>>(path: P, message: S) -> Self {
        Self::Persistence {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new Configuration error.
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a new Internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error was caused by cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::RootId;

    #[test]
    fn test_error_display() {
        let err = Error::corruption("/tmp/s.json", "checksum mismatch");
        assert_eq!(
            err.to_string(),
            "Snapshot corrupt at \"/tmp/s.json\": checksum mismatch"
        );

        let err = Error::configuration("no roots configured");
        assert_eq!(err.to_string(), "Configuration error: no roots configured");

        let err = Error::Cancelled;
        assert_eq!(err.to_string(), "Cancelled");
    }

    #[test]
    fn test_scan_io_keeps_partial() {
        let partial = Snapshot::empty(RootId::new("/media/movies"));
        let err = Error::ScanIo {
            root: "/media/movies".into(),
            message: "permission denied".into(),
            partial: Box::new(partial),
        };
        assert!(err.to_string().contains("permission denied"));
        match err {
            Error::ScanIo { partial, .. } => assert!(partial.is_empty()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io(_)));
        assert!(!err.is_cancelled());
    }
}
