//! Error types for the server and client.

use filewire_protocol::FrameError;

/// Errors produced by the connection registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("registry is draining; new sessions are refused")]
    Draining,
}

/// Errors produced by the server listener and its workers.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("timed out {0}")]
    Timeout(&'static str),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cancelled by shutdown")]
    Cancelled,
}

/// Coarse classification of a failed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connect,
    Remote,
    Timeout,
    TruncatedTransfer,
    Integrity,
    Frame,
    InvalidMetadata,
    Io,
    Cancelled,
}

/// Errors produced by the fetch client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("could not connect to {addr} after {attempts} attempt(s): {source}")]
    Connect {
        addr: String,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Remote(String),

    #[error("timed out {0}")]
    Timeout(&'static str),

    #[error("transfer truncated: received {received} of {expected} bytes")]
    Truncated { received: u64, expected: u64 },

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    Integrity { expected: String, actual: String },

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cancelled")]
    Cancelled,
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Connect { .. } => ErrorKind::Connect,
            ClientError::Remote(_) => ErrorKind::Remote,
            ClientError::Timeout(_) => ErrorKind::Timeout,
            ClientError::Truncated { .. } => ErrorKind::TruncatedTransfer,
            ClientError::Integrity { .. } => ErrorKind::Integrity,
            ClientError::Frame(_) => ErrorKind::Frame,
            ClientError::InvalidMetadata(_) => ErrorKind::InvalidMetadata,
            ClientError::Io(_) => ErrorKind::Io,
            ClientError::Cancelled => ErrorKind::Cancelled,
        }
    }
}
