//! Wire format and integrity digest for filewire transfers.
//!
//! Both peers link this crate so that framing limits and the digest
//! algorithm can never drift apart between server and client.
//!
//! # Wire format
//!
//! See the [`wire`] module for the byte-level layout.

pub mod digest;
pub mod error;
pub mod wire;

pub use digest::{FileDigest, digest_bytes, digest_file};
pub use error::FrameError;
pub use wire::{FileMetadata, Status, TransferRequest, validate_filename};

/// Default port the server listens on.
pub const DEFAULT_PORT: u16 = 9999;

/// Payload chunk size used by the server when streaming a file.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Upper bound on a filename field (request or metadata).
pub const MAX_FILENAME_LEN: usize = 1024;

/// Upper bound on a status line, including the trailing newline.
pub const MAX_STATUS_LEN: usize = 4096;

/// Length of the hex checksum carried in metadata (MD5, 32 hex chars).
pub const CHECKSUM_LEN: usize = 32;
