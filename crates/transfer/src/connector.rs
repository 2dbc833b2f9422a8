//! Outbound connection with bounded retries and exponential backoff.

use std::io;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ConnectConfig;
use crate::error::ClientError;
use crate::events::{ClientEvent, emit};

/// Progress through a [`ConnectConfig`] retry schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    /// Attempts made so far.
    pub attempt: u32,
    /// Delay to wait before the next attempt.
    pub backoff: Duration,
}

impl RetryState {
    pub fn new(config: &ConnectConfig) -> Self {
        Self {
            attempt: 0,
            backoff: config.delay_for_attempt(1),
        }
    }

    /// Records a failed attempt. Returns the delay before the next one, or
    /// `None` once the attempt budget is spent.
    pub fn on_failure(&mut self, config: &ConnectConfig) -> Option<Duration> {
        if self.attempt >= config.max_attempts.max(1) {
            return None;
        }
        let delay = self.backoff;
        self.backoff = self.backoff.saturating_mul(2).min(config.max_backoff);
        Some(delay)
    }
}

/// Connects to `host:port`, retrying per `config`.
///
/// Each attempt is bounded by `connect_timeout`. Backoff sleeps are
/// interrupted by `cancel`.
pub async fn connect(
    host: &str,
    port: u16,
    config: &ConnectConfig,
    events: Option<&mpsc::Sender<ClientEvent>>,
    cancel: &CancellationToken,
) -> Result<TcpStream, ClientError> {
    let max_attempts = config.max_attempts.max(1);
    let mut retry = RetryState::new(config);

    loop {
        retry.attempt += 1;
        emit(
            events,
            ClientEvent::ConnectAttempt {
                attempt: retry.attempt,
                max_attempts,
            },
        );
        debug!(host, port, attempt = retry.attempt, max_attempts, "connecting");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            r = tokio::time::timeout(config.connect_timeout, TcpStream::connect((host, port))) => {
                r.unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")))
            }
        };

        let err = match result {
            Ok(stream) => {
                if let Ok(addr) = stream.peer_addr() {
                    info!(%addr, attempts = retry.attempt, "connected");
                    emit(
                        events,
                        ClientEvent::Connected {
                            addr,
                            attempts: retry.attempt,
                        },
                    );
                }
                return Ok(stream);
            }
            Err(e) => e,
        };

        let Some(delay) = retry.on_failure(config) else {
            warn!(host, port, attempts = retry.attempt, "giving up: {err}");
            return Err(ClientError::Connect {
                addr: format!("{host}:{port}"),
                attempts: retry.attempt,
                source: err,
            });
        };

        info!(
            host,
            port,
            attempt = retry.attempt,
            delay_secs = format_args!("{:.1}", delay.as_secs_f64()),
            "connection failed, retrying: {err}"
        );
        emit(
            events,
            ClientEvent::RetryScheduled {
                attempt: retry.attempt,
                delay,
                reason: err.to_string(),
            },
        );

        tokio::select! {
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
