//! TCP file server (listener side).
//!
//! Binds a port, accepts connections and hands each one to its own
//! worker task. The accept loop never waits on a worker. On shutdown the
//! listener stops accepting, force-closes every registered session and
//! waits a bounded grace period for the workers to exit.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::events::{ServerEvent, emit};
use crate::registry::ConnectionRegistry;
use crate::session;

/// Pause after a failed `accept()` so a persistent error (e.g. fd
/// exhaustion) does not spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Lifecycle of the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Stopped,
    Listening,
    Draining,
}

/// File server serving a single directory.
pub struct FileServer {
    config: Arc<ServerConfig>,
    registry: Arc<ConnectionRegistry>,
    cancel: CancellationToken,
    state: watch::Sender<ListenerState>,
    local_addr: Mutex<Option<SocketAddr>>,
    events: Option<mpsc::Sender<ServerEvent>>,
}

impl FileServer {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        Self::build(config, None)
    }

    /// Like [`new`](Self::new), also emitting [`ServerEvent`]s on `events`.
    pub fn with_events(config: ServerConfig, events: mpsc::Sender<ServerEvent>) -> Arc<Self> {
        Self::build(config, Some(events))
    }

    fn build(config: ServerConfig, events: Option<mpsc::Sender<ServerEvent>>) -> Arc<Self> {
        let (state, _) = watch::channel(ListenerState::Stopped);
        Arc::new(Self {
            config: Arc::new(config),
            registry: Arc::new(ConnectionRegistry::new()),
            cancel: CancellationToken::new(),
            state,
            local_addr: Mutex::new(None),
            events,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ListenerState> {
        self.state.subscribe()
    }

    /// Address the listener is bound to, once [`bind`](Self::bind) succeeded.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Requests shutdown. [`serve`](Self::serve) returns once draining ends.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Binds the configured address. A port already in use is reported,
    /// never retried.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let addr = format!("{}:{}", self.config.bind_addr, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner) = Some(local);

        info!(addr = %local, dir = %self.config.serve_dir.display(), "file server bound");
        Ok(listener)
    }

    /// Binds and serves until [`shutdown`](Self::shutdown).
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Runs the accept loop on an already bound listener, then drains.
    pub async fn serve(self: &Arc<Self>, listener: TcpListener) -> Result<(), ServerError> {
        self.set_state(ListenerState::Listening);
        let mut workers = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("shutdown requested");
                    break;
                }

                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!("transfer worker panicked: {e}");
                        }
                    }
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => self.spawn_worker(&mut workers, stream, peer),
                        Err(e) => {
                            warn!("accept error: {e}");
                            tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                        }
                    }
                }
            }
        }

        self.set_state(ListenerState::Draining);
        drop(listener);

        let closed = self.registry.close_all();
        info!(
            sessions = closed,
            grace_secs = self.config.shutdown_grace.as_secs_f64(),
            "draining active transfers"
        );

        let drained = tokio::time::timeout(self.config.shutdown_grace, async {
            while workers.join_next().await.is_some() {}
        })
        .await
        .is_ok();

        if !drained {
            warn!(
                remaining = workers.len(),
                "grace period elapsed, aborting remaining workers"
            );
            workers.shutdown().await;
        }

        self.set_state(ListenerState::Stopped);
        info!("file server stopped");
        Ok(())
    }

    fn spawn_worker(&self, workers: &mut JoinSet<()>, stream: TcpStream, peer: SocketAddr) {
        // Registration happens before spawning so close_all() always sees
        // every worker that exists.
        let registration = match self.registry.register(peer) {
            Ok(r) => r,
            Err(e) => {
                debug!(%peer, "connection dropped: {e}");
                return;
            }
        };

        info!(%peer, session = %registration.id(), "connection accepted");
        emit(self.events.as_ref(), ServerEvent::ConnectionAccepted { peer });

        let config = Arc::clone(&self.config);
        let events = self.events.clone();
        workers.spawn(session::serve_connection(
            stream,
            peer,
            registration,
            config,
            events,
        ));
    }

    fn set_state(&self, state: ListenerState) {
        self.state.send_replace(state);
        debug!(?state, "listener state changed");
        emit(self.events.as_ref(), ServerEvent::StateChanged(state));
    }
}
