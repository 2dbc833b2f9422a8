//! Fetch client: requests one file and verifies it end to end.
//!
//! The payload is written to a staging file in the download directory
//! while it streams in, fed through a running digest, and renamed to
//! `<name>` only after the byte count and checksum both match the server's
//! metadata. Every fetch stages into its own `<name>.<pid>-<seq>.part`, so
//! overlapping fetches of one name never share a file.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use filewire_protocol::wire::{self, FileMetadata, Status};
use filewire_protocol::{FileDigest, validate_filename};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::connector;
use crate::error::{ClientError, ErrorKind};
use crate::events::{ClientEvent, emit};
use crate::progress::{ProgressMilestones, format_transfer_speed};

/// Receive buffer size. Independent of the server's chunk size.
const RECV_BUFFER_SIZE: usize = 64 * 1024;

/// Suffix of every staging file.
pub const PARTIAL_SUFFIX: &str = ".part";

static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

/// Outcome of a single fetch. Every fetch produces exactly one.
#[derive(Debug)]
pub struct TransferResult {
    /// `true` only when the full advertised size arrived and the checksum
    /// matched.
    pub success: bool,
    pub filename: String,
    pub bytes_received: u64,
    /// Size advertised by the server, once metadata was received.
    pub expected_size: Option<u64>,
    pub expected_checksum: Option<String>,
    pub actual_checksum: Option<String>,
    /// Final path on success; the retained `.part` file on a failure that
    /// kept one.
    pub destination: Option<PathBuf>,
    pub elapsed: Duration,
    pub error: Option<ClientError>,
}

impl TransferResult {
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(ClientError::kind)
    }
}

/// Phases of a fetch, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchPhase {
    Connecting,
    Requesting,
    AwaitingStatus,
    AwaitingMetadata,
    Receiving,
    Verifying,
}

/// Client for a single server. Cheap to share; every fetch is independent.
#[derive(Debug, Clone)]
pub struct FileClient {
    config: ClientConfig,
    events: Option<mpsc::Sender<ClientEvent>>,
}

impl FileClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            events: None,
        }
    }

    /// Like [`new`](Self::new), also emitting [`ClientEvent`]s on `events`.
    pub fn with_events(config: ClientConfig, events: mpsc::Sender<ClientEvent>) -> Self {
        Self {
            config,
            events: Some(events),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Fetches `filename` into the download directory.
    ///
    /// A verified file replaces any existing `<name>` there. Concurrent
    /// fetches of the same name each verify their own copy; the last one
    /// to finish is what remains on disk.
    pub async fn fetch(&self, filename: &str) -> TransferResult {
        self.fetch_cancellable(filename, &CancellationToken::new())
            .await
    }

    /// Like [`fetch`](Self::fetch), but aborts with
    /// [`ClientError::Cancelled`] as soon as `cancel` fires.
    pub async fn fetch_cancellable(
        &self,
        filename: &str,
        cancel: &CancellationToken,
    ) -> TransferResult {
        let mut fetch = Fetch {
            client: self,
            cancel,
            filename,
            phase: FetchPhase::Connecting,
            bytes_received: 0,
            metadata: None,
            actual_checksum: None,
            part_path: None,
        };

        let started = Instant::now();
        let outcome = fetch.run().await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(destination) => {
                info!(
                    file = filename,
                    bytes = fetch.bytes_received,
                    dest = %destination.display(),
                    speed = %format_transfer_speed(fetch.bytes_received, elapsed.as_secs_f64()),
                    "transfer verified"
                );
                fetch.into_result(elapsed, Some(destination), None)
            }
            Err(err) => {
                let kept = fetch.discard_partial().await;
                warn!(
                    file = filename,
                    phase = ?fetch.phase,
                    received = fetch.bytes_received,
                    "transfer failed: {err}"
                );
                fetch.into_result(elapsed, kept, Some(err))
            }
        }
    }
}

struct Fetch<'a> {
    client: &'a FileClient,
    cancel: &'a CancellationToken,
    filename: &'a str,
    phase: FetchPhase,
    bytes_received: u64,
    metadata: Option<FileMetadata>,
    actual_checksum: Option<String>,
    part_path: Option<PathBuf>,
}

impl Fetch<'_> {
    async fn run(&mut self) -> Result<PathBuf, ClientError> {
        let config = &self.client.config;
        let events = self.client.events.as_ref();
        tokio::fs::create_dir_all(&config.download_dir).await?;

        let mut stream = connector::connect(
            &config.host,
            config.port,
            &config.connect,
            events,
            self.cancel,
        )
        .await?;
        let (reader, mut writer) = stream.split();
        let mut reader = BufReader::new(reader);

        self.phase = FetchPhase::Requesting;
        self.guarded(
            "sending request",
            wire::write_request(&mut writer, self.filename),
        )
        .await?;

        self.phase = FetchPhase::AwaitingStatus;
        let status = self
            .guarded("waiting for status", wire::read_status(&mut reader))
            .await?;
        if let Status::Error(message) = status {
            return Err(ClientError::Remote(message));
        }

        self.phase = FetchPhase::AwaitingMetadata;
        let meta = self
            .guarded("waiting for metadata", wire::read_metadata(&mut reader))
            .await?;
        self.check_metadata(&meta)?;
        info!(
            file = %meta.filename,
            size = meta.size,
            checksum = %meta.checksum,
            "receiving file"
        );
        emit(events, ClientEvent::MetadataReceived(meta.clone()));
        let size = meta.size;
        let expected = meta.checksum.clone();
        self.metadata = Some(meta);

        self.phase = FetchPhase::Receiving;
        let (file, part_path) = create_staging_file(&config.download_dir, self.filename).await?;
        self.part_path = Some(part_path.clone());
        let mut out = BufWriter::new(file);

        let mut digest = FileDigest::new();
        let mut milestones = ProgressMilestones::new(size);
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];

        while self.bytes_received < size {
            let want = (size - self.bytes_received).min(buf.len() as u64) as usize;
            let n = match self
                .guarded("receiving payload", reader.read(&mut buf[..want]))
                .await
            {
                Ok(n) => n,
                // A reset mid-payload is a cut-off transfer like a clean EOF.
                Err(ClientError::Io(e)) if is_disconnect(&e) => 0,
                Err(e) => return Err(e),
            };
            if n == 0 {
                return Err(ClientError::Truncated {
                    received: self.bytes_received,
                    expected: size,
                });
            }

            out.write_all(&buf[..n]).await?;
            digest.update(&buf[..n]);
            self.bytes_received += n as u64;

            if let Some(percent) = milestones.advance(self.bytes_received) {
                self.report_progress(size, percent);
            }
        }
        if let Some(percent) = milestones.advance(self.bytes_received) {
            self.report_progress(size, percent);
        }
        out.flush().await?;
        drop(out);
        drop(reader);
        drop(writer);

        self.phase = FetchPhase::Verifying;
        let actual = digest.finalize();
        self.actual_checksum = Some(actual.clone());
        if actual != expected {
            return Err(ClientError::Integrity { expected, actual });
        }

        let destination = config.download_dir.join(self.filename);
        tokio::fs::rename(&part_path, &destination).await?;
        self.part_path = None;
        Ok(destination)
    }

    /// The name must be one we could have asked for, and the one we did.
    fn check_metadata(&self, meta: &FileMetadata) -> Result<(), ClientError> {
        validate_filename(&meta.filename)
            .map_err(|e| ClientError::InvalidMetadata(e.to_string()))?;
        if meta.filename != self.filename {
            return Err(ClientError::InvalidMetadata(format!(
                "requested {:?}, server described {:?}",
                self.filename, meta.filename
            )));
        }
        Ok(())
    }

    fn report_progress(&self, total: u64, percent: u8) {
        info!(
            file = self.filename,
            received = self.bytes_received,
            total,
            "progress {percent}%"
        );
        emit(
            self.client.events.as_ref(),
            ClientEvent::Progress {
                filename: self.filename.to_string(),
                bytes_received: self.bytes_received,
                total,
                percent,
            },
        );
    }

    /// Applies `keep_failed` to the staging file. Returns its path if kept.
    async fn discard_partial(&mut self) -> Option<PathBuf> {
        let path = self.part_path.take()?;
        if self.client.config.keep_failed {
            info!(path = %path.display(), "partial file kept");
            return Some(path);
        }
        if let Err(e) = tokio::fs::remove_file(&path).await {
            debug!(path = %path.display(), "could not remove partial file: {e}");
        }
        None
    }

    async fn guarded<T, E, F>(&self, what: &'static str, fut: F) -> Result<T, ClientError>
    where
        F: Future<Output = Result<T, E>>,
        ClientError: From<E>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ClientError::Cancelled),
            res = tokio::time::timeout(self.client.config.read_timeout, fut) => match res {
                Ok(inner) => inner.map_err(ClientError::from),
                Err(_) => Err(ClientError::Timeout(what)),
            },
        }
    }

    fn into_result(
        self,
        elapsed: Duration,
        destination: Option<PathBuf>,
        error: Option<ClientError>,
    ) -> TransferResult {
        TransferResult {
            success: error.is_none(),
            filename: self.filename.to_string(),
            bytes_received: self.bytes_received,
            expected_size: self.metadata.as_ref().map(|m| m.size),
            expected_checksum: self.metadata.map(|m| m.checksum),
            actual_checksum: self.actual_checksum,
            destination,
            elapsed,
            error,
        }
    }
}

fn is_disconnect(e: &io::Error) -> bool {
    use io::ErrorKind::*;
    matches!(
        e.kind(),
        ConnectionReset | ConnectionAborted | BrokenPipe | UnexpectedEof
    )
}

/// Creates a staging file for `filename` that no other fetch can be using.
async fn create_staging_file(download_dir: &Path, filename: &str) -> io::Result<(File, PathBuf)> {
    let pid = std::process::id();
    loop {
        let seq = STAGING_SEQ.fetch_add(1, Ordering::Relaxed);
        let path = download_dir.join(format!("{filename}.{pid}-{seq}{PARTIAL_SUFFIX}"));
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => return Ok((file, path)),
            // Left over from an earlier process with the same pid.
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Whether `path` is a staging file of a fetch of `filename`.
pub fn is_partial_of(path: &Path, filename: &str) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let Some(tag) = name
        .strip_prefix(filename)
        .and_then(|rest| rest.strip_prefix('.'))
        .and_then(|rest| rest.strip_suffix(PARTIAL_SUFFIX))
    else {
        return false;
    };
    tag.split_once('-').is_some_and(|(pid, seq)| {
        !pid.is_empty()
            && !seq.is_empty()
            && pid.bytes().all(|b| b.is_ascii_digit())
            && seq.bytes().all(|b| b.is_ascii_digit())
    })
}
