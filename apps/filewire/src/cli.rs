//! Command-line arguments for `filewire-server` and `filewire-client`.
//!
//! Flags override the settings file, which overrides built-in defaults.

use std::path::PathBuf;

use clap::{ArgAction, Parser};

use crate::config::Settings;

/// filewire server - serve a directory over TCP.
#[derive(Debug, Parser)]
#[command(name = "filewire-server", version, about = "Serve files from a directory over TCP")]
pub struct ServerCli {
    /// Port to listen on
    pub port: Option<u16>,

    /// Address to bind
    #[arg(short = 'b', long = "bind", value_name = "ADDR")]
    pub bind_addr: Option<String>,

    /// Directory to serve
    #[arg(short = 'd', long = "dir", value_name = "DIR")]
    pub dir: Option<PathBuf>,

    /// Settings file (TOML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Append logs to this file instead of stderr
    #[arg(long = "log-file", value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
}

impl ServerCli {
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(addr) = &self.bind_addr {
            settings.server.bind_addr = addr.clone();
        }
        if let Some(dir) = &self.dir {
            settings.server.serve_dir = dir.clone();
        }
        if self.log_file.is_some() {
            settings.log_file = self.log_file.clone();
        }
    }
}

/// filewire client - fetch one file and verify it.
#[derive(Debug, Parser)]
#[command(name = "filewire-client", version, about = "Fetch a file from a filewire server")]
pub struct ClientCli {
    /// Name of the file to fetch
    pub filename: String,

    /// Server host
    pub host: Option<String>,

    /// Server port
    pub port: Option<u16>,

    /// Directory to save into
    #[arg(short = 'd', long = "dir", value_name = "DIR")]
    pub dir: Option<PathBuf>,

    /// Connection attempts before giving up
    #[arg(long = "attempts", value_name = "N")]
    pub attempts: Option<u32>,

    /// Delete the partial file when a transfer fails
    #[arg(long = "discard-failed")]
    pub discard_failed: bool,

    /// Settings file (TOML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Append logs to this file instead of stderr
    #[arg(long = "log-file", value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
}

impl ClientCli {
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(host) = &self.host {
            settings.client.host = host.clone();
        }
        if let Some(port) = self.port {
            settings.client.port = port;
        }
        if let Some(dir) = &self.dir {
            settings.client.download_dir = dir.clone();
        }
        if let Some(attempts) = self.attempts {
            settings.client.max_attempts = attempts;
        }
        if self.discard_failed {
            settings.client.keep_failed = false;
        }
        if self.log_file.is_some() {
            settings.log_file = self.log_file.clone();
        }
    }
}
