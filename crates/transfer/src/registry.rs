//! Registry of live server sessions.
//!
//! Every accepted connection registers itself for the lifetime of its
//! worker. Shutdown calls [`ConnectionRegistry::close_all`], which flips the
//! registry into draining mode and cancels every registered session under
//! the same lock that `register` takes, so no session can slip in between.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::RegistryError;

/// Identifier handed out by [`ConnectionRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Point-in-time view of a registered session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: SessionId,
    pub peer: SocketAddr,
    pub bytes_sent: u64,
    pub elapsed: Duration,
}

struct Entry {
    peer: SocketAddr,
    started_at: Instant,
    bytes_sent: Arc<AtomicU64>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    draining: bool,
    sessions: HashMap<SessionId, Entry>,
}

/// Thread-safe set of active transfer sessions.
pub struct ConnectionRegistry {
    inner: Mutex<Inner>,
    count_tx: watch::Sender<usize>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        let (count_tx, _) = watch::channel(0);
        Self {
            inner: Mutex::new(Inner::default()),
            count_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a session for `peer`.
    ///
    /// Fails once [`close_all`](Self::close_all) has started; the caller
    /// must then drop its connection. The returned guard unregisters the
    /// session when dropped.
    pub fn register(self: &Arc<Self>, peer: SocketAddr) -> Result<Registration, RegistryError> {
        let mut inner = self.lock();
        if inner.draining {
            return Err(RegistryError::Draining);
        }

        inner.next_id += 1;
        let id = SessionId(inner.next_id);
        let cancel = CancellationToken::new();
        let bytes_sent = Arc::new(AtomicU64::new(0));
        inner.sessions.insert(
            id,
            Entry {
                peer,
                started_at: Instant::now(),
                bytes_sent: Arc::clone(&bytes_sent),
                cancel: cancel.clone(),
            },
        );
        self.count_tx.send_replace(inner.sessions.len());
        drop(inner);

        debug!(session = %id, %peer, "session registered");
        Ok(Registration {
            registry: Arc::clone(self),
            id,
            cancel,
            bytes_sent,
        })
    }

    /// Removes a session. Returns `false` if it was not registered.
    pub fn unregister(&self, id: SessionId) -> bool {
        let mut inner = self.lock();
        let removed = inner.sessions.remove(&id).is_some();
        if removed {
            self.count_tx.send_replace(inner.sessions.len());
            debug!(session = %id, "session unregistered");
        }
        removed
    }

    /// Stops accepting registrations and cancels every registered session.
    ///
    /// Sessions stay listed until their workers exit and unregister; use
    /// [`wait_empty`](Self::wait_empty) to wait for that. Returns the number
    /// of sessions that were cancelled.
    pub fn close_all(&self) -> usize {
        let cancelled = {
            let mut inner = self.lock();
            inner.draining = true;
            for entry in inner.sessions.values() {
                entry.cancel.cancel();
            }
            inner.sessions.len()
        };
        debug!(sessions = cancelled, "registry draining");
        cancelled
    }

    /// Returns `true` once [`close_all`](Self::close_all) has been called.
    pub fn is_draining(&self) -> bool {
        self.lock().draining
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshots the registered sessions, ordered by id.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        let inner = self.lock();
        let mut list: Vec<SessionInfo> = inner
            .sessions
            .iter()
            .map(|(id, entry)| SessionInfo {
                id: *id,
                peer: entry.peer,
                bytes_sent: entry.bytes_sent.load(Ordering::Relaxed),
                elapsed: entry.started_at.elapsed(),
            })
            .collect();
        list.sort_by_key(|s| s.id);
        list
    }

    /// Waits until no sessions remain. Returns `false` on timeout.
    pub async fn wait_empty(&self, timeout: Duration) -> bool {
        let mut rx = self.count_tx.subscribe();
        matches!(
            tokio::time::timeout(timeout, rx.wait_for(|&n| n == 0)).await,
            Ok(Ok(_))
        )
    }
}

/// Guard for a registered session; unregisters on drop.
pub struct Registration {
    registry: Arc<ConnectionRegistry>,
    id: SessionId,
    cancel: CancellationToken,
    bytes_sent: Arc<AtomicU64>,
}

impl Registration {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Token cancelled when the registry force-closes this session.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Publishes the worker's byte count for [`ConnectionRegistry::sessions`].
    pub fn record_bytes_sent(&self, bytes: u64) {
        self.bytes_sent.store(bytes, Ordering::Relaxed);
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration").field("id", &self.id).finish()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn register_and_drop() {
        let registry = Arc::new(ConnectionRegistry::new());
        let a = registry.register(peer(1)).unwrap();
        let b = registry.register(peer(2)).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(registry.len(), 2);

        drop(a);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.sessions()[0].peer, peer(2));

        drop(b);
        assert!(registry.is_empty());
    }

    #[test]
    fn explicit_unregister_is_idempotent() {
        let registry = Arc::new(ConnectionRegistry::new());
        let reg = registry.register(peer(1)).unwrap();
        assert!(registry.unregister(reg.id()));
        assert!(!registry.unregister(reg.id()));
        // Drop after an explicit unregister must not disturb anything.
        drop(reg);
        assert!(registry.is_empty());
    }

    #[test]
    fn progress_is_visible_in_snapshots() {
        let registry = Arc::new(ConnectionRegistry::new());
        let reg = registry.register(peer(1)).unwrap();
        reg.record_bytes_sent(4096);
        assert_eq!(registry.sessions()[0].bytes_sent, 4096);
    }

    #[test]
    fn close_all_cancels_and_rejects_new_sessions() {
        let registry = Arc::new(ConnectionRegistry::new());
        let a = registry.register(peer(1)).unwrap();
        let b = registry.register(peer(2)).unwrap();

        assert_eq!(registry.close_all(), 2);
        assert!(registry.is_draining());
        assert!(a.cancel_token().is_cancelled());
        assert!(b.cancel_token().is_cancelled());
        // Still listed until their workers drop the guards.
        assert_eq!(registry.len(), 2);

        assert!(registry.register(peer(3)).is_err());

        drop(a);
        drop(b);
        assert!(registry.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_registration_loses_nothing() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut handles = Vec::new();
        for i in 0..200u16 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move { registry.register(peer(i)).unwrap() }));
        }

        let mut regs = Vec::new();
        for h in handles {
            regs.push(h.await.unwrap());
        }
        assert_eq!(registry.len(), 200);

        let mut ids: Vec<_> = regs.iter().map(|r| r.id()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 200);

        let mut drops = Vec::new();
        for reg in regs {
            drops.push(tokio::spawn(async move { drop(reg) }));
        }
        for h in drops {
            h.await.unwrap();
        }
        assert!(registry.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn close_all_racing_registrations_leaves_no_orphans() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut handles = Vec::new();
        for i in 0..200u16 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                tokio::task::yield_now().await;
                registry.register(peer(i)).ok()
            }));
        }

        registry.close_all();

        for h in handles {
            if let Some(reg) = h.await.unwrap() {
                // Anything that got in must have been cancelled.
                assert!(reg.cancel_token().is_cancelled());
            }
        }
        assert!(registry.register(peer(9)).is_err());
    }

    #[tokio::test]
    async fn wait_empty_tracks_unregistration() {
        let registry = Arc::new(ConnectionRegistry::new());
        assert!(registry.wait_empty(Duration::from_millis(10)).await);

        let reg = registry.register(peer(1)).unwrap();
        assert!(!registry.wait_empty(Duration::from_millis(50)).await);

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.wait_empty(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(reg);
        assert!(waiter.await.unwrap());
    }
}
