//! Shared plumbing for the `filewire-server` and `filewire-client` binaries.

pub mod cli;
pub mod config;
pub mod logging;
