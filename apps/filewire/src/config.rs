//! On-disk settings for the filewire binaries.
//!
//! A single optional TOML file carries a `[server]` and a `[client]`
//! table. Every field is optional; missing fields take the library
//! defaults. Timeouts are given in (fractional) seconds.
//!
//! ```toml
//! log_file = "filewire.log"
//!
//! [server]
//! port = 9999
//! serve_dir = "server_files"
//!
//! [client]
//! host = "files.local"
//! max_attempts = 5
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use filewire_transfer::{ClientConfig, ConnectConfig, ServerConfig};
use serde::{Deserialize, Serialize};

/// Top-level settings file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Append logs to this file instead of stderr.
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub client: ClientSettings,
}

impl Settings {
    /// Loads settings from `path`, or returns defaults when no path is given.
    ///
    /// An explicitly named file that does not exist is an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(settings)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_serve_dir")]
    pub serve_dir: PathBuf,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: f64,

    #[serde(default = "default_io_timeout")]
    pub io_timeout_secs: f64,

    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: f64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            serve_dir: default_serve_dir(),
            chunk_size: default_chunk_size(),
            request_timeout_secs: default_request_timeout(),
            io_timeout_secs: default_io_timeout(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl ServerSettings {
    pub fn to_config(&self) -> anyhow::Result<ServerConfig> {
        if self.chunk_size == 0 {
            bail!("server.chunk_size must be greater than zero");
        }
        Ok(ServerConfig {
            bind_addr: self.bind_addr.clone(),
            port: self.port,
            serve_dir: self.serve_dir.clone(),
            chunk_size: self.chunk_size,
            request_timeout: secs("server.request_timeout_secs", self.request_timeout_secs)?,
            io_timeout: secs("server.io_timeout_secs", self.io_timeout_secs)?,
            shutdown_grace: secs("server.shutdown_grace_secs", self.shutdown_grace_secs)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: f64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_secs: f64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: f64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: f64,

    /// Keep the staging `.part` file after a failed transfer.
    #[serde(default = "default_true")]
    pub keep_failed: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            download_dir: default_download_dir(),
            read_timeout_secs: default_read_timeout(),
            max_attempts: default_max_attempts(),
            initial_backoff_secs: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            connect_timeout_secs: default_connect_timeout(),
            keep_failed: default_true(),
        }
    }
}

impl ClientSettings {
    pub fn to_config(&self) -> anyhow::Result<ClientConfig> {
        Ok(ClientConfig {
            host: self.host.clone(),
            port: self.port,
            download_dir: self.download_dir.clone(),
            read_timeout: secs("client.read_timeout_secs", self.read_timeout_secs)?,
            connect: ConnectConfig {
                max_attempts: self.max_attempts.max(1),
                initial_backoff: secs("client.initial_backoff_secs", self.initial_backoff_secs)?,
                max_backoff: secs("client.max_backoff_secs", self.max_backoff_secs)?,
                connect_timeout: secs("client.connect_timeout_secs", self.connect_timeout_secs)?,
            },
            keep_failed: self.keep_failed,
        })
    }
}

fn secs(field: &str, value: f64) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(value)
        .with_context(|| format!("{field} must be a non-negative number of seconds, got {value}"))
}

fn default_bind_addr() -> String {
    ServerConfig::default().bind_addr
}

fn default_port() -> u16 {
    filewire_protocol::DEFAULT_PORT
}

fn default_serve_dir() -> PathBuf {
    ServerConfig::default().serve_dir
}

fn default_chunk_size() -> usize {
    filewire_protocol::DEFAULT_CHUNK_SIZE
}

fn default_request_timeout() -> f64 {
    ServerConfig::default().request_timeout.as_secs_f64()
}

fn default_io_timeout() -> f64 {
    ServerConfig::default().io_timeout.as_secs_f64()
}

fn default_shutdown_grace() -> f64 {
    ServerConfig::default().shutdown_grace.as_secs_f64()
}

fn default_host() -> String {
    ClientConfig::default().host
}

fn default_download_dir() -> PathBuf {
    ClientConfig::default().download_dir
}

fn default_read_timeout() -> f64 {
    ClientConfig::default().read_timeout.as_secs_f64()
}

fn default_max_attempts() -> u32 {
    ConnectConfig::default().max_attempts
}

fn default_initial_backoff() -> f64 {
    ConnectConfig::default().initial_backoff.as_secs_f64()
}

fn default_max_backoff() -> f64 {
    ConnectConfig::default().max_backoff.as_secs_f64()
}

fn default_connect_timeout() -> f64 {
    ConnectConfig::default().connect_timeout.as_secs_f64()
}

fn default_true() -> bool {
    true
}
