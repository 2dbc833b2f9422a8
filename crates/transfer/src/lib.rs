//! Concurrent TCP file server and verifying fetch client.
//!
//! The server ([`FileServer`]) serves one directory over the
//! [`filewire_protocol`] wire format, one task per connection, with every
//! live session tracked in a [`ConnectionRegistry`] so shutdown can force
//! them closed. The client ([`FileClient`]) connects with bounded retries,
//! streams the payload to disk and verifies it against the advertised MD5
//! before publishing it.

pub mod client;
pub mod config;
pub mod connector;
pub mod error;
pub mod events;
pub mod progress;
pub mod registry;
pub mod server;
mod session;

pub use client::{FileClient, PARTIAL_SUFFIX, TransferResult, is_partial_of};
pub use config::{ClientConfig, ConnectConfig, ServerConfig};
pub use connector::{RetryState, connect};
pub use error::{ClientError, ErrorKind, RegistryError, ServerError};
pub use events::{ClientEvent, ServerEvent};
pub use progress::ProgressMilestones;
pub use registry::{ConnectionRegistry, Registration, SessionId, SessionInfo};
pub use server::{FileServer, ListenerState};
