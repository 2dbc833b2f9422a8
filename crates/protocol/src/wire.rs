//! Byte-level framing for the transfer protocol.
//!
//! # Wire format
//!
//! All integers are big-endian.
//!
//! ```text
//! REQUEST (client -> server):
//!   [4 bytes: name_len][name_len bytes: filename UTF-8]
//!
//! STATUS (server -> client), one UTF-8 line:
//!   "OK\n" | "ERROR: <message>\n"
//!
//! METADATA (server -> client, only after OK):
//!   [4 bytes: name_len][name_len bytes: filename UTF-8]
//!   [8 bytes: file_size]
//!   [32 bytes: MD5 hex digest ASCII]
//!
//! PAYLOAD (server -> client):
//!   [file_size bytes: raw file data]
//! ```
//!
//! Every length field is checked against a fixed limit before any buffer
//! is allocated, so a garbled or hostile peer cannot force a large
//! allocation.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::FrameError;
use crate::{CHECKSUM_LEN, MAX_FILENAME_LEN, MAX_STATUS_LEN};

const STATUS_OK: &str = "OK";
const STATUS_ERROR_PREFIX: &str = "ERROR: ";

/// A request for a single named file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub filename: String,
}

/// File description sent by the server after an `OK` status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub filename: String,
    /// Exact number of payload bytes that follow.
    pub size: u64,
    /// Lowercase MD5 hex digest of the payload.
    pub checksum: String,
}

/// Server reply to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Ok,
    Error(String),
}

/// A filename that may not be requested or written.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid filename: {0}")]
pub struct InvalidFilename(pub String);

/// Checks that `name` is a bare file name inside a single directory.
///
/// Rejects empty names, `.`/`..`, path separators, control characters and
/// names longer than [`MAX_FILENAME_LEN`].
pub fn validate_filename(name: &str) -> Result<(), InvalidFilename> {
    if name.is_empty() {
        return Err(InvalidFilename("empty name".into()));
    }
    if name.len() > MAX_FILENAME_LEN {
        return Err(InvalidFilename(format!(
            "name is {} bytes (max {MAX_FILENAME_LEN})",
            name.len()
        )));
    }
    if name == "." || name == ".." {
        return Err(InvalidFilename(format!("{name:?} is not a file name")));
    }
    if name.contains(['/', '\\']) {
        return Err(InvalidFilename(format!(
            "path separators not allowed: {name:?}"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(InvalidFilename(format!(
            "control characters not allowed: {name:?}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Pure encoders / decoders
// ---------------------------------------------------------------------------

/// Encodes a request frame.
pub fn encode_request(filename: &str) -> Result<Vec<u8>, FrameError> {
    let mut buf = Vec::with_capacity(4 + filename.len());
    put_name(&mut buf, filename)?;
    Ok(buf)
}

/// Decodes a request frame from a complete buffer.
pub fn decode_request(buf: &[u8]) -> Result<TransferRequest, FrameError> {
    let mut cursor = buf;
    let filename = take_name(&mut cursor)?;
    Ok(TransferRequest { filename })
}

/// Encodes a metadata frame.
pub fn encode_metadata(meta: &FileMetadata) -> Result<Vec<u8>, FrameError> {
    let checksum = checked_checksum(meta.checksum.as_bytes())?;
    let mut buf = Vec::with_capacity(4 + meta.filename.len() + 8 + CHECKSUM_LEN);
    put_name(&mut buf, &meta.filename)?;
    buf.extend_from_slice(&meta.size.to_be_bytes());
    buf.extend_from_slice(checksum.as_bytes());
    Ok(buf)
}

/// Decodes a metadata frame from a complete buffer.
pub fn decode_metadata(buf: &[u8]) -> Result<FileMetadata, FrameError> {
    let mut cursor = buf;
    let filename = take_name(&mut cursor)?;
    let size = u64::from_be_bytes(take_array::<8>(&mut cursor)?);
    let checksum = checked_checksum(&take_array::<CHECKSUM_LEN>(&mut cursor)?)?;
    Ok(FileMetadata {
        filename,
        size,
        checksum,
    })
}

/// Encodes a status line, newline included.
///
/// Line breaks inside an error message are flattened to spaces so the
/// message cannot terminate the line early.
pub fn encode_status(status: &Status) -> Vec<u8> {
    let line = match status {
        Status::Ok => STATUS_OK.to_string(),
        Status::Error(message) => {
            let flat: String = message
                .chars()
                .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
                .collect();
            let mut line = format!("{STATUS_ERROR_PREFIX}{flat}");
            // Keep room for the newline within MAX_STATUS_LEN.
            if line.len() >= MAX_STATUS_LEN {
                let mut cut = MAX_STATUS_LEN - 1;
                while !line.is_char_boundary(cut) {
                    cut -= 1;
                }
                line.truncate(cut);
            }
            line
        }
    };
    let mut buf = line.into_bytes();
    buf.push(b'\n');
    buf
}

/// Decodes a status line (with or without its trailing newline).
pub fn decode_status(line: &[u8]) -> Result<Status, FrameError> {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let text = std::str::from_utf8(line).map_err(|_| FrameError::InvalidUtf8 { field: "status" })?;

    if text == STATUS_OK {
        Ok(Status::Ok)
    } else if let Some(message) = text.strip_prefix(STATUS_ERROR_PREFIX) {
        Ok(Status::Error(message.to_string()))
    } else {
        Err(FrameError::InvalidStatus(text.to_string()))
    }
}

fn put_name(buf: &mut Vec<u8>, name: &str) -> Result<(), FrameError> {
    let bytes = name.as_bytes();
    check_name_len(bytes.len())?;
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

fn take_name(cursor: &mut &[u8]) -> Result<String, FrameError> {
    let len = u32::from_be_bytes(take_array::<4>(cursor)?) as usize;
    check_name_len(len)?;
    if cursor.len() < len {
        return Err(FrameError::Truncated);
    }
    let (name, rest) = cursor.split_at(len);
    *cursor = rest;
    String::from_utf8(name.to_vec()).map_err(|_| FrameError::InvalidUtf8 { field: "filename" })
}

fn take_array<const N: usize>(cursor: &mut &[u8]) -> Result<[u8; N], FrameError> {
    if cursor.len() < N {
        return Err(FrameError::Truncated);
    }
    let (head, rest) = cursor.split_at(N);
    *cursor = rest;
    let mut out = [0u8; N];
    out.copy_from_slice(head);
    Ok(out)
}

fn check_name_len(len: usize) -> Result<(), FrameError> {
    if len > MAX_FILENAME_LEN {
        return Err(FrameError::TooLong {
            field: "filename",
            declared: len,
            limit: MAX_FILENAME_LEN,
        });
    }
    Ok(())
}

fn checked_checksum(raw: &[u8]) -> Result<String, FrameError> {
    if raw.len() != CHECKSUM_LEN || !raw.iter().all(u8::is_ascii_hexdigit) {
        return Err(FrameError::InvalidChecksum(
            String::from_utf8_lossy(raw).into_owned(),
        ));
    }
    Ok(String::from_utf8_lossy(raw).to_ascii_lowercase())
}

// ---------------------------------------------------------------------------
// Stream readers / writers
// ---------------------------------------------------------------------------

/// Writes a request frame and flushes.
pub async fn write_request<W: AsyncWrite + Unpin>(
    writer: &mut W,
    filename: &str,
) -> Result<(), FrameError> {
    let frame = encode_request(filename)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads a request frame.
pub async fn read_request<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<TransferRequest, FrameError> {
    let filename = read_name(reader).await?;
    Ok(TransferRequest { filename })
}

/// Writes a status line and flushes.
pub async fn write_status<W: AsyncWrite + Unpin>(
    writer: &mut W,
    status: &Status,
) -> Result<(), FrameError> {
    writer.write_all(&encode_status(status)).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one status line, never buffering more than [`MAX_STATUS_LEN`].
pub async fn read_status<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Status, FrameError> {
    let mut line = Vec::new();
    let mut limited = reader.take(MAX_STATUS_LEN as u64);
    limited.read_until(b'\n', &mut line).await?;

    if line.last() != Some(&b'\n') {
        if line.len() >= MAX_STATUS_LEN {
            return Err(FrameError::TooLong {
                field: "status",
                declared: line.len(),
                limit: MAX_STATUS_LEN,
            });
        }
        return Err(FrameError::Truncated);
    }
    decode_status(&line)
}

/// Writes a metadata frame (without flushing; the payload follows).
pub async fn write_metadata<W: AsyncWrite + Unpin>(
    writer: &mut W,
    meta: &FileMetadata,
) -> Result<(), FrameError> {
    let frame = encode_metadata(meta)?;
    writer.write_all(&frame).await?;
    Ok(())
}

/// Reads a metadata frame.
pub async fn read_metadata<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<FileMetadata, FrameError> {
    let filename = read_name(reader).await?;
    let size = reader.read_u64().await?;
    let mut raw = [0u8; CHECKSUM_LEN];
    reader.read_exact(&mut raw).await?;
    let checksum = checked_checksum(&raw)?;
    Ok(FileMetadata {
        filename,
        size,
        checksum,
    })
}

async fn read_name<R: AsyncRead + Unpin>(reader: &mut R) -> Result<String, FrameError> {
    let len = reader.read_u32().await? as usize;
    check_name_len(len)?;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    String::from_utf8(buf).map_err(|_| FrameError::InvalidUtf8 { field: "filename" })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata() -> FileMetadata {
        FileMetadata {
            filename: "report.pdf".into(),
            size: 1_048_576,
            checksum: "d41d8cd98f00b204e9800998ecf8427e".into(),
        }
    }

    #[test]
    fn request_layout() {
        let buf = encode_request("a.txt").unwrap();
        assert_eq!(&buf[..4], &[0, 0, 0, 5]);
        assert_eq!(&buf[4..], b"a.txt");
        assert_eq!(decode_request(&buf).unwrap().filename, "a.txt");
    }

    #[test]
    fn metadata_layout() {
        let meta = sample_metadata();
        let buf = encode_metadata(&meta).unwrap();
        assert_eq!(buf.len(), 4 + 10 + 8 + CHECKSUM_LEN);
        assert_eq!(&buf[14..22], &1_048_576u64.to_be_bytes());
        assert_eq!(decode_metadata(&buf).unwrap(), meta);
    }

    #[test]
    fn decode_rejects_oversized_name_length() {
        let mut buf = ((MAX_FILENAME_LEN + 1) as u32).to_be_bytes().to_vec();
        buf.extend_from_slice(b"whatever");
        assert!(matches!(
            decode_request(&buf),
            Err(FrameError::TooLong { field: "filename", .. })
        ));

        // A huge declared length must be rejected without allocating.
        let buf = u32::MAX.to_be_bytes();
        assert!(matches!(
            decode_request(&buf),
            Err(FrameError::TooLong { .. })
        ));
    }

    #[test]
    fn decode_detects_truncation() {
        let buf = encode_request("complete.bin").unwrap();
        assert!(matches!(
            decode_request(&buf[..buf.len() - 1]),
            Err(FrameError::Truncated)
        ));
        assert!(matches!(decode_request(&[0, 0]), Err(FrameError::Truncated)));

        let meta = encode_metadata(&sample_metadata()).unwrap();
        assert!(matches!(
            decode_metadata(&meta[..meta.len() - 3]),
            Err(FrameError::Truncated)
        ));
    }

    #[test]
    fn encode_rejects_oversized_name() {
        let name = "x".repeat(MAX_FILENAME_LEN + 1);
        assert!(matches!(
            encode_request(&name),
            Err(FrameError::TooLong { .. })
        ));
    }

    #[test]
    fn metadata_rejects_bad_checksum() {
        let mut meta = sample_metadata();
        meta.checksum = "not-a-checksum".into();
        assert!(matches!(
            encode_metadata(&meta),
            Err(FrameError::InvalidChecksum(_))
        ));

        let mut buf = encode_metadata(&sample_metadata()).unwrap();
        let last = buf.len() - 1;
        buf[last] = b'z';
        assert!(matches!(
            decode_metadata(&buf),
            Err(FrameError::InvalidChecksum(_))
        ));
    }

    #[test]
    fn checksum_is_normalised_to_lowercase() {
        let mut meta = sample_metadata();
        meta.checksum = meta.checksum.to_ascii_uppercase();
        let buf = encode_metadata(&meta).unwrap();
        assert_eq!(
            decode_metadata(&buf).unwrap().checksum,
            "d41d8cd98f00b204e9800998ecf8427e"
        );
    }

    #[test]
    fn status_lines() {
        assert_eq!(encode_status(&Status::Ok), b"OK\n");
        assert_eq!(
            encode_status(&Status::Error("File not found: x".into())),
            b"ERROR: File not found: x\n"
        );
        assert_eq!(decode_status(b"OK\n").unwrap(), Status::Ok);
        assert_eq!(decode_status(b"OK\r\n").unwrap(), Status::Ok);
        assert_eq!(
            decode_status(b"ERROR: nope").unwrap(),
            Status::Error("nope".into())
        );
        assert!(matches!(
            decode_status(b"MAYBE\n"),
            Err(FrameError::InvalidStatus(_))
        ));
    }

    #[test]
    fn status_message_cannot_break_the_line() {
        let buf = encode_status(&Status::Error("line one\nline two".into()));
        assert_eq!(buf.iter().filter(|&&b| b == b'\n').count(), 1);
        assert_eq!(
            decode_status(&buf).unwrap(),
            Status::Error("line one line two".into())
        );
    }

    #[test]
    fn long_error_status_fits_limit() {
        let buf = encode_status(&Status::Error("é".repeat(MAX_STATUS_LEN)));
        assert!(buf.len() <= MAX_STATUS_LEN);
        assert!(decode_status(&buf).is_ok());
    }

    #[test]
    fn filename_rules() {
        assert!(validate_filename("report.pdf").is_ok());
        assert!(validate_filename(".hidden").is_ok());
        assert!(validate_filename("with space.txt").is_ok());

        assert!(validate_filename("").is_err());
        assert!(validate_filename(".").is_err());
        assert!(validate_filename("..").is_err());
        assert!(validate_filename("../etc/passwd").is_err());
        assert!(validate_filename("sub/file.txt").is_err());
        assert!(validate_filename("..\\windows").is_err());
        assert!(validate_filename("nul\0byte").is_err());
        assert!(validate_filename(&"a".repeat(MAX_FILENAME_LEN + 1)).is_err());
    }

    #[tokio::test]
    async fn stream_request_roundtrip() {
        let mut buf = Vec::new();
        write_request(&mut buf, "data.json").await.unwrap();

        let mut cursor = &buf[..];
        let req = read_request(&mut cursor).await.unwrap();
        assert_eq!(req.filename, "data.json");
    }

    #[tokio::test]
    async fn stream_reply_sequence() {
        let meta = sample_metadata();
        let mut buf = Vec::new();
        write_status(&mut buf, &Status::Ok).await.unwrap();
        write_metadata(&mut buf, &meta).await.unwrap();
        buf.extend_from_slice(b"payload");

        let mut reader = tokio::io::BufReader::new(&buf[..]);
        assert_eq!(read_status(&mut reader).await.unwrap(), Status::Ok);
        assert_eq!(read_metadata(&mut reader).await.unwrap(), meta);

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"payload");
    }

    #[tokio::test]
    async fn stream_read_request_truncated() {
        let buf = encode_request("partial.txt").unwrap();
        let mut cursor = &buf[..6];
        assert!(matches!(
            read_request(&mut cursor).await,
            Err(FrameError::Truncated)
        ));
    }

    #[tokio::test]
    async fn stream_read_request_too_long() {
        let buf = (u32::MAX).to_be_bytes();
        let mut cursor = &buf[..];
        assert!(matches!(
            read_request(&mut cursor).await,
            Err(FrameError::TooLong { .. })
        ));
    }

    #[tokio::test]
    async fn stream_status_without_newline() {
        let mut reader = tokio::io::BufReader::new(&b"OK"[..]);
        assert!(matches!(
            read_status(&mut reader).await,
            Err(FrameError::Truncated)
        ));
    }

    #[tokio::test]
    async fn stream_status_too_long() {
        let data = vec![b'A'; MAX_STATUS_LEN * 2];
        let mut reader = tokio::io::BufReader::new(&data[..]);
        assert!(matches!(
            read_status(&mut reader).await,
            Err(FrameError::TooLong { field: "status", .. })
        ));
    }
}
