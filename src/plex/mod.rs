//! Remote media server API.
//!
//! The pipeline only talks to the server through [`MediaServer`], so tests
//! can substitute a scripted fake for [`PlexClient`].

mod client;
mod types;

pub use client::PlexClient;
pub use types::ServerIdentity;

use plexscan_common::{LibrarySection, SectionId};
use std::fmt;

/// Operations plexscan needs from the media server.
#[async_trait::async_trait]
pub trait MediaServer: Send + Sync {
    /// Ask the server to rescan `remote_path` within a section.
    async fn trigger_scan(&self, section_id: &SectionId, remote_path: &str) -> Result<(), ApiError>;

    /// Whether a section is currently scanning.
    async fn poll_scan_status(&self, section_id: &SectionId) -> Result<ScanStatus, ApiError>;

    /// Library sections defined on the server.
    async fn list_sections(&self) -> Result<Vec<LibrarySection>, ApiError>;

    /// Verify the server is reachable and the token is accepted.
    async fn test_connection(&self) -> Result<ServerIdentity, ApiError>;
}

/// Scan state of a library section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    Running,
    Idle,
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Idle => write!(f, "idle"),
        }
    }
}

/// Failure talking to the media server.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out")]
    Timeout,

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response: {0}")]
    Decode(String),

    #[error("request failed: {0}")]
    Request(String),
}

impl ApiError {
    /// Transient failures are worth retrying: network trouble, timeouts,
    /// 5xx and 429. Client errors and undecodable bodies are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connect(_) | Self::Timeout | Self::Request(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() {
            Self::Connect(e.to_string())
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            Self::Status {
                status: status.as_u16(),
                body: String::new(),
            }
        } else {
            Self::Request(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ApiError::Timeout.is_transient());
        assert!(ApiError::Connect("refused".into()).is_transient());
        assert!(ApiError::Status { status: 503, body: String::new() }.is_transient());
        assert!(ApiError::Status { status: 429, body: String::new() }.is_transient());
        assert!(!ApiError::Status { status: 401, body: String::new() }.is_transient());
        assert!(!ApiError::Status { status: 404, body: String::new() }.is_transient());
        assert!(!ApiError::Decode("bad json".into()).is_transient());
    }
}
