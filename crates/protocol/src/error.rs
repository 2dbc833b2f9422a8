//! Error types for frame decoding.

use std::io;

/// Errors produced while encoding or decoding wire frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("{field} length {declared} exceeds limit of {limit} bytes")]
    TooLong {
        field: &'static str,
        declared: usize,
        limit: usize,
    },

    #[error("stream closed before the frame was complete")]
    Truncated,

    #[error("invalid UTF-8 in {field}")]
    InvalidUtf8 { field: &'static str },

    #[error("invalid checksum field: {0:?}")]
    InvalidChecksum(String),

    #[error("invalid status line: {0:?}")]
    InvalidStatus(String),

    #[error("I/O error: {0}")]
    Io(io::Error),
}

impl From<io::Error> for FrameError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            FrameError::Truncated
        } else {
            FrameError::Io(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unexpected_eof_maps_to_truncated() {
        let err: FrameError = io::Error::from(io::ErrorKind::UnexpectedEof).into();
        assert!(matches!(err, FrameError::Truncated));
    }

    #[test]
    fn other_io_errors_are_kept() {
        let err: FrameError = io::Error::from(io::ErrorKind::ConnectionReset).into();
        match err {
            FrameError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
