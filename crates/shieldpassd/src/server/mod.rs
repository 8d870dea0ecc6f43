//! Unix socket server for the shieldpass daemon.
//!
//! The server:
//! - Listens on a Unix socket for JSON-lines clients
//! - Spawns a `ConnectionHandler` per client
//! - Fans coordinator events out to subscribed clients
//! - Shuts down via `CancellationToken`
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()` or `.expect()`
//! - Accept and broadcast failures are logged; the server keeps running

mod connection;

pub use connection::{ConnectionError, ConnectionHandler, SubscriberWriter, SubscribersMap};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use shieldpass_core::{Clock, SessionView};
use shieldpass_protocol::DaemonMessage;
use tokio::net::UnixListener;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::coordinator::{CoordinatorEvent, CoordinatorHandle};

pub struct DaemonServer {
    socket_path: PathBuf,
    coordinator: CoordinatorHandle,
    clock: Arc<dyn Clock>,
    cancel_token: CancellationToken,
    /// Source of default client ids
    connection_counter: AtomicU64,
    subscribers: SubscribersMap,
}

impl DaemonServer {
    pub fn new(
        socket_path: impl Into<PathBuf>,
        coordinator: CoordinatorHandle,
        clock: Arc<dyn Clock>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            socket_path: socket_path.into(),
            coordinator,
            clock,
            cancel_token,
            connection_counter: AtomicU64::new(0),
            subscribers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Binds the socket and serves until the cancellation token fires.
    pub async fn run(&self) -> Result<(), ServerError> {
        let setup_err = |e: std::io::Error| ServerError::SocketSetup {
            path: self.socket_path.clone(),
            error: e.to_string(),
        };

        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(setup_err)?;
        }
        if let Some(parent) = self.socket_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(setup_err)?;
            }
        }

        let listener = UnixListener::bind(&self.socket_path).map_err(setup_err)?;
        info!(socket = %self.socket_path.display(), "Daemon server listening");

        self.spawn_event_broadcaster();

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let conn_num = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            self.handle_connection(stream, conn_num);
                        }
                        Err(e) => error!(error = %e, "Failed to accept connection"),
                    }
                }
            }
        }

        self.cleanup().await;
        Ok(())
    }

    fn handle_connection(&self, stream: tokio::net::UnixStream, connection_number: u64) {
        let (reader, writer) = stream.into_split();
        let handler = ConnectionHandler::new(
            reader,
            writer,
            self.coordinator.clone(),
            Arc::clone(&self.clock),
            Arc::clone(&self.subscribers),
            connection_number,
        );
        let subscribers = Arc::clone(&self.subscribers);

        tokio::spawn(async move {
            if let Some(id) = handler.run().await {
                if subscribers.write().await.remove(&id).is_some() {
                    debug!(client_id = %id, "Removed disconnected subscriber");
                }
            }
        });
    }

    fn spawn_event_broadcaster(&self) {
        let mut event_rx = self.coordinator.subscribe();
        let subscribers = Arc::clone(&self.subscribers);
        let clock = Arc::clone(&self.clock);
        let cancel_token = self.cancel_token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        debug!("Event broadcaster shutting down");
                        break;
                    }

                    result = event_rx.recv() => {
                        match result {
                            Ok(event) => {
                                let msg = event_message(&event, clock.as_ref());
                                broadcast_message(&subscribers, &msg).await;
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!(skipped = n, "Event broadcaster lagged, skipped events");
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                debug!("Event channel closed");
                                break;
                            }
                        }
                    }
                }
            }
        });
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    async fn cleanup(&self) {
        self.subscribers.write().await.clear();

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(
                    socket = %self.socket_path.display(),
                    error = %e,
                    "Failed to remove socket file"
                );
            }
        }
        info!("Server cleanup complete");
    }
}

/// Wire message for a coordinator event.
fn event_message(event: &CoordinatorEvent, clock: &dyn Clock) -> DaemonMessage {
    let now = clock.now();
    match event {
        CoordinatorEvent::Started { session } => {
            DaemonMessage::session_started(SessionView::from_session(session, now))
        }
        CoordinatorEvent::Closed { session, .. } => {
            DaemonMessage::session_closed(SessionView::from_session(session, now))
        }
        CoordinatorEvent::OrphanRepaired { session } => {
            DaemonMessage::orphan_repaired(SessionView::from_session(session, now))
        }
    }
}

/// Sends `msg` to every subscriber, dropping the ones that fail.
async fn broadcast_message(subscribers: &SubscribersMap, msg: &DaemonMessage) {
    let mut failed_clients = Vec::new();
    {
        let subs = subscribers.read().await;
        for (client_id, writer) in subs.iter() {
            if let Err(e) = connection::write_line(writer, msg).await {
                debug!(client_id = %client_id, error = %e, "Failed to send event to subscriber");
                failed_clients.push(client_id.clone());
            }
        }
    }

    if !failed_clients.is_empty() {
        let mut subs = subscribers.write().await;
        for client_id in failed_clients {
            subs.remove(&client_id);
            debug!(client_id = %client_id, "Removed failed subscriber");
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to setup socket at {path}: {error}")]
    SocketSetup { path: PathBuf, error: String },

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
}
