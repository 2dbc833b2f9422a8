//! Structured events emitted by the server and client.
//!
//! Callers that want progress or lifecycle notifications pass an
//! `mpsc::Sender` at construction time. Delivery is best-effort
//! (`try_send`), so a slow consumer never stalls a transfer.

use std::net::SocketAddr;
use std::time::Duration;

use filewire_protocol::FileMetadata;
use tokio::sync::mpsc;

use crate::server::ListenerState;

/// Events emitted by [`FileServer`](crate::FileServer).
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    StateChanged(ListenerState),
    ConnectionAccepted {
        peer: SocketAddr,
    },
    /// A 10% boundary was crossed.
    Progress {
        peer: SocketAddr,
        filename: String,
        bytes_sent: u64,
        total: u64,
        percent: u8,
    },
    TransferCompleted {
        peer: SocketAddr,
        filename: String,
        bytes: u64,
        elapsed: Duration,
    },
    TransferFailed {
        peer: SocketAddr,
        reason: String,
    },
}

/// Events emitted while fetching a file.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    ConnectAttempt {
        attempt: u32,
        max_attempts: u32,
    },
    RetryScheduled {
        attempt: u32,
        delay: Duration,
        reason: String,
    },
    Connected {
        addr: SocketAddr,
        attempts: u32,
    },
    MetadataReceived(FileMetadata),
    /// A 10% boundary was crossed.
    Progress {
        filename: String,
        bytes_received: u64,
        total: u64,
        percent: u8,
    },
}

pub(crate) fn emit<E>(tx: Option<&mpsc::Sender<E>>, event: E) {
    if let Some(tx) = tx {
        let _ = tx.try_send(event);
    }
}
