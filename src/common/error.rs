//! Error types for minigfs

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Namespace Errors ===
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File already exists: {0}")]
    FileExists(String),

    #[error("Chunk not found: {0}")]
    ChunkNotFound(String),

    // === Node Errors ===
    #[error("Node not registered: {0}")]
    NodeNotRegistered(String),

    #[error("Node is dead, registration handshake required: {0}")]
    NodeDead(String),

    #[error("No live storage nodes available")]
    NoLiveNodes,

    #[error("Insufficient replicas: need {needed}, have {available}")]
    InsufficientReplicas { needed: usize, available: usize },

    // === Lease Errors ===
    #[error("Lease conflict on chunk {chunk}: held by {holder} until {expires_at_ms}")]
    LeaseConflict {
        chunk: String,
        holder: String,
        expires_at_ms: u64,
    },

    #[error("Write without valid lease on chunk {chunk} by node {node}")]
    WriteWithoutLease { chunk: String, node: String },

    // === Replication Errors ===
    #[error("Replication failed for chunk {chunk}: {reason}")]
    ReplicationFailed { chunk: String, reason: String },

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    // === Operation Log Errors ===
    #[error("Operation log error: {0}")]
    OpLog(String),

    #[error("Operation log corrupted: {0}")]
    LogCorrupted(String),

    #[error("Master is read-only: operation log requires manual reconciliation")]
    ReadOnly,

    // === Network Errors ===
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_)
                | Error::ConnectionFailed(_)
                | Error::NoLiveNodes
                | Error::InsufficientReplicas { .. }
                | Error::LeaseConflict { .. }
        )
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::FileNotFound(_) | Error::ChunkNotFound(_) => StatusCode::NOT_FOUND,
            Error::FileExists(_) | Error::LeaseConflict { .. } => StatusCode::CONFLICT,
            Error::WriteWithoutLease { .. } => StatusCode::FORBIDDEN,
            Error::NodeNotRegistered(_) | Error::NodeDead(_) => StatusCode::GONE,
            Error::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            Error::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            Error::NoLiveNodes | Error::InsufficientReplicas { .. } | Error::ReadOnly => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// Implement From for common error types
impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else if e.is_connect() {
            Error::ConnectionFailed(e.to_string())
        } else {
            Error::Http(e.to_string())
        }
    }
}
