//! Explicit configuration for the server and client.
//!
//! Nothing in this crate reads environment variables or config files;
//! callers build these structs and pass them in.

use std::path::PathBuf;
use std::time::Duration;

use filewire_protocol::{DEFAULT_CHUNK_SIZE, DEFAULT_PORT};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to bind (e.g. `0.0.0.0`).
    pub bind_addr: String,
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
    /// Directory files are served from. Subdirectories are never traversed.
    pub serve_dir: PathBuf,
    /// Payload chunk size in bytes.
    pub chunk_size: usize,
    /// How long a new connection may take to send its request.
    pub request_timeout: Duration,
    /// Bound on each individual socket write.
    pub io_timeout: Duration,
    /// How long shutdown waits for workers after force-closing them.
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".into(),
            port: DEFAULT_PORT,
            serve_dir: PathBuf::from("server_files"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            request_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Retry policy for establishing an outbound connection.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Total connection attempts before giving up (at least 1).
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_backoff: Duration,
    /// Cap on the doubled delay.
    pub max_backoff: Duration,
    /// Bound on a single connection attempt.
    pub connect_timeout: Duration,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(8),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl ConnectConfig {
    /// Delay before retrying after failed attempt `attempt` (1-based).
    ///
    /// Doubles from `initial_backoff` and is capped at `max_backoff`. There
    /// is no jitter, so the schedule is exact.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff)
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Directory received files are written to.
    pub download_dir: PathBuf,
    /// Bound on each socket read.
    pub read_timeout: Duration,
    pub connect: ConnectConfig,
    /// Keep the `.part` file when a transfer fails.
    pub keep_failed: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: DEFAULT_PORT,
            download_dir: PathBuf::from("client_downloads"),
            read_timeout: Duration::from_secs(10),
            connect: ConnectConfig::default(),
            keep_failed: true,
        }
    }
}
