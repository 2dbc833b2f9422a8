//! Incremental MD5 digest shared by both ends of a transfer.
//!
//! The server digests a file before advertising it; the client digests
//! the bytes as they arrive. Both go through [`FileDigest`] so the two
//! hex strings are directly comparable.

use std::path::Path;

use md5::{Digest as _, Md5};
use tokio::io::AsyncReadExt;

/// Read buffer used when digesting a file from disk.
const DIGEST_BUFFER_SIZE: usize = 64 * 1024;

/// Running digest over a byte stream.
#[derive(Clone, Default)]
pub struct FileDigest {
    hasher: Md5,
    bytes: u64,
}

impl std::fmt::Debug for FileDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileDigest")
            .field("bytes", &self.bytes)
            .finish_non_exhaustive()
    }
}

impl FileDigest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds the next slice of the stream.
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.bytes += data.len() as u64;
    }

    /// Number of bytes fed so far.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Consumes the digest and returns the lowercase hex string.
    pub fn finalize(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

/// Digests `data` in one pass.
pub fn digest_bytes(data: &[u8]) -> String {
    let mut digest = FileDigest::new();
    digest.update(data);
    digest.finalize()
}

/// Digests a file on disk, returning `(hex_digest, bytes_read)`.
pub async fn digest_file(path: &Path) -> std::io::Result<(String, u64)> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut digest = FileDigest::new();
    let mut buf = vec![0u8; DIGEST_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        digest.update(&buf[..n]);
    }
    let bytes = digest.bytes();
    Ok((digest.finalize(), bytes))
}
