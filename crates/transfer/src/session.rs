//! Server-side transfer worker: serves one request on one connection.
//!
//! Every blocking step is raced against the session's cancellation token
//! so that [`ConnectionRegistry::close_all`](crate::ConnectionRegistry::close_all)
//! can force a worker out of a stalled read or write.

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use filewire_protocol::wire::{self, FileMetadata, Status};
use filewire_protocol::{digest_file, validate_filename};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::events::{ServerEvent, emit};
use crate::progress::{ProgressMilestones, format_transfer_speed};
use crate::registry::Registration;

/// Phase a worker is in; reported when a transfer fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerPhase {
    AwaitingRequest,
    Validating,
    SendingMetadata,
    Streaming,
}

/// Entry point spawned by the listener for each accepted connection.
///
/// Never returns an error: the outcome is logged and emitted as an event,
/// and the registration is released when this future completes.
pub(crate) async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registration: Registration,
    config: Arc<ServerConfig>,
    events: Option<mpsc::Sender<ServerEvent>>,
) {
    let mut session = TransferSession {
        peer,
        config,
        events,
        registration,
        phase: WorkerPhase::AwaitingRequest,
        filename: None,
        bytes_sent: 0,
        started_at: Instant::now(),
    };

    match session.run(stream).await {
        Ok(total) => session.finish_ok(total),
        Err(e) => session.finish_err(e),
    }
}

struct TransferSession {
    peer: SocketAddr,
    config: Arc<ServerConfig>,
    events: Option<mpsc::Sender<ServerEvent>>,
    registration: Registration,
    phase: WorkerPhase,
    filename: Option<String>,
    bytes_sent: u64,
    started_at: Instant,
}

impl TransferSession {
    async fn run(&mut self, mut stream: TcpStream) -> Result<u64, ServerError> {
        let cancel = self.registration.cancel_token().clone();
        let (mut reader, mut writer) = stream.split();

        let request = guarded(
            &cancel,
            self.config.request_timeout,
            "waiting for request",
            wire::read_request(&mut reader),
        )
        .await?;
        debug!(peer = %self.peer, file = %request.filename, "request received");

        self.phase = WorkerPhase::Validating;
        let filename = request.filename;
        self.filename = Some(filename.clone());

        if let Err(e) = validate_filename(&filename) {
            let reason = format!("invalid request: {}", e.0);
            self.reply_error(&cancel, &mut writer, &reason).await;
            return Err(ServerError::InvalidRequest(e.0));
        }

        let path = self.config.serve_dir.join(&filename);
        if !is_regular_file(&path).await {
            let reason = format!("File not found: {filename}");
            self.reply_error(&cancel, &mut writer, &reason).await;
            return Err(ServerError::NotFound(filename));
        }

        let (checksum, size) = cancellable(&cancel, async {
            digest_file(&path).await.map_err(ServerError::from)
        })
        .await?;

        self.phase = WorkerPhase::SendingMetadata;
        let meta = FileMetadata {
            filename: filename.clone(),
            size,
            checksum,
        };
        guarded(
            &cancel,
            self.config.io_timeout,
            "sending status",
            wire::write_status(&mut writer, &Status::Ok),
        )
        .await?;
        guarded(
            &cancel,
            self.config.io_timeout,
            "sending metadata",
            wire::write_metadata(&mut writer, &meta),
        )
        .await?;
        info!(
            peer = %self.peer,
            file = %filename,
            size,
            checksum = %meta.checksum,
            "sending file"
        );

        self.phase = WorkerPhase::Streaming;
        let file = File::open(&path).await?;
        // The file may have grown since it was digested; never send more
        // than was announced.
        let mut file = file.take(size);
        let mut buf = vec![0u8; self.config.chunk_size.max(1)];
        let mut milestones = ProgressMilestones::new(size);

        loop {
            let n = cancellable(&cancel, async {
                file.read(&mut buf).await.map_err(ServerError::from)
            })
            .await?;
            if n == 0 {
                break;
            }

            guarded(
                &cancel,
                self.config.io_timeout,
                "writing payload",
                writer.write_all(&buf[..n]),
            )
            .await?;
            self.bytes_sent += n as u64;
            self.registration.record_bytes_sent(self.bytes_sent);

            if let Some(percent) = milestones.advance(self.bytes_sent) {
                self.report_progress(&filename, size, percent);
            }
        }

        if self.bytes_sent < size {
            return Err(ServerError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("file shrank during transfer ({} of {size} bytes)", self.bytes_sent),
            )));
        }
        if let Some(percent) = milestones.advance(self.bytes_sent) {
            self.report_progress(&filename, size, percent);
        }

        guarded(&cancel, self.config.io_timeout, "flushing payload", async {
            writer.flush().await?;
            writer.shutdown().await
        })
        .await?;

        Ok(size)
    }

    /// Best effort: the connection is closed right after either way.
    async fn reply_error<W: AsyncWrite + Unpin>(
        &self,
        cancel: &CancellationToken,
        writer: &mut W,
        reason: &str,
    ) {
        let status = Status::Error(reason.to_string());
        if let Err(e) = guarded(
            cancel,
            self.config.io_timeout,
            "sending error status",
            wire::write_status(writer, &status),
        )
        .await
        {
            debug!(peer = %self.peer, "could not deliver error status: {e}");
        }
    }

    fn report_progress(&self, filename: &str, total: u64, percent: u8) {
        info!(
            peer = %self.peer,
            file = %filename,
            sent = self.bytes_sent,
            total,
            "progress {percent}%"
        );
        emit(
            self.events.as_ref(),
            ServerEvent::Progress {
                peer: self.peer,
                filename: filename.to_string(),
                bytes_sent: self.bytes_sent,
                total,
                percent,
            },
        );
    }

    fn finish_ok(&self, total: u64) {
        let elapsed = self.started_at.elapsed();
        let filename = self.filename.clone().unwrap_or_default();
        info!(
            peer = %self.peer,
            file = %filename,
            bytes = total,
            elapsed_ms = elapsed.as_millis() as u64,
            speed = %format_transfer_speed(total, elapsed.as_secs_f64()),
            "transfer complete"
        );
        emit(
            self.events.as_ref(),
            ServerEvent::TransferCompleted {
                peer: self.peer,
                filename,
                bytes: total,
                elapsed,
            },
        );
    }

    fn finish_err(&self, err: ServerError) {
        let file = self.filename.as_deref().unwrap_or("-");
        match &err {
            ServerError::NotFound(_) | ServerError::InvalidRequest(_) => {
                info!(peer = %self.peer, file, "request refused: {err}");
            }
            ServerError::Cancelled => {
                info!(
                    peer = %self.peer,
                    file,
                    phase = ?self.phase,
                    sent = self.bytes_sent,
                    "transfer closed by shutdown"
                );
            }
            _ => {
                warn!(
                    peer = %self.peer,
                    file,
                    phase = ?self.phase,
                    sent = self.bytes_sent,
                    "transfer failed: {err}"
                );
            }
        }
        emit(
            self.events.as_ref(),
            ServerEvent::TransferFailed {
                peer: self.peer,
                reason: err.to_string(),
            },
        );
    }
}

/// Runs `fut` bounded by `limit`, aborting early if `cancel` fires.
async fn guarded<T, E, F>(
    cancel: &CancellationToken,
    limit: Duration,
    what: &'static str,
    fut: F,
) -> Result<T, ServerError>
where
    F: Future<Output = Result<T, E>>,
    ServerError: From<E>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ServerError::Cancelled),
        res = tokio::time::timeout(limit, fut) => match res {
            Ok(inner) => inner.map_err(ServerError::from),
            Err(_) => Err(ServerError::Timeout(what)),
        },
    }
}

async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, ServerError>
where
    F: Future<Output = Result<T, ServerError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ServerError::Cancelled),
        res = fut => res,
    }
}

async fn is_regular_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}
