//! Connection handler for individual client connections.
//!
//! Each client (CLI invocation, notification shim, monitor extension) gets
//! its own `ConnectionHandler` that:
//! - Performs protocol version negotiation
//! - Parses incoming messages and raw callback payloads
//! - Routes requests to the coordinator
//! - Registers subscribers for lifecycle broadcasts
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()` or `.expect()`
//! - Connection errors are logged and end the connection gracefully
//! - Coordinator errors become `error` replies; the connection stays open

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use shieldpass_core::{Clock, Session, SessionId, SessionView};
use shieldpass_protocol::{
    ClientMessage, DaemonMessage, MessageType, ProtocolVersion, RawMonitorCallback,
    RawNotificationCallback,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::coordinator::{CoordinatorError, CoordinatorHandle};

/// Shared writer, so broadcasts and replies interleave by whole lines.
pub type SubscriberWriter = Arc<Mutex<BufWriter<OwnedWriteHalf>>>;

/// Subscribed clients keyed by client id.
pub type SubscribersMap = Arc<RwLock<HashMap<String, SubscriberWriter>>>;

/// Maximum number of concurrent subscribers
pub(crate) const MAX_SUBSCRIBERS: usize = 10;

/// Maximum message size (1 MB)
const MAX_MESSAGE_SIZE: usize = 1_048_576;

/// Read timeout for idle connections
const READ_TIMEOUT: Duration = Duration::from_secs(300);

const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ConnectionHandler {
    reader: BufReader<OwnedReadHalf>,
    writer: SubscriberWriter,
    coordinator: CoordinatorHandle,
    clock: Arc<dyn Clock>,
    subscribers: SubscribersMap,
    /// Assigned after handshake
    client_id: Option<String>,
    connection_number: u64,
}

impl ConnectionHandler {
    pub fn new(
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        coordinator: CoordinatorHandle,
        clock: Arc<dyn Clock>,
        subscribers: SubscribersMap,
        connection_number: u64,
    ) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer: Arc::new(Mutex::new(BufWriter::new(writer))),
            coordinator,
            clock,
            subscribers,
            client_id: None,
            connection_number,
        }
    }

    /// Runs handshake then the message loop. Returns the client id once the
    /// connection closes, so the server can drop its subscription.
    pub async fn run(mut self) -> Option<String> {
        debug!(connection = self.connection_number, "New client connected");

        if let Err(e) = self.handle_handshake().await {
            warn!(connection = self.connection_number, error = %e, "Handshake failed");
            return None;
        }
        debug!(client_id = ?self.client_id, "Client handshake completed");

        if let Err(e) = self.process_messages().await {
            debug!(client_id = ?self.client_id, error = %e, "Connection closed");
        }

        debug!(client_id = ?self.client_id, "Client disconnected");
        self.client_id
    }

    /// Expects `Connect` with a compatible protocol version.
    async fn handle_handshake(&mut self) -> Result<(), ConnectionError> {
        let msg = timeout(READ_TIMEOUT, self.read_message())
            .await
            .map_err(|_| ConnectionError::Timeout)??;

        let client_version = msg.protocol_version;
        if let Err(e) = client_version.check() {
            warn!(
                client_version = %client_version,
                server_version = %ProtocolVersion::CURRENT,
                "Protocol version mismatch"
            );
            self.send_message(DaemonMessage::rejected(&e.to_string()))
                .await?;
            return Err(ConnectionError::VersionMismatch {
                client: client_version,
                server: ProtocolVersion::CURRENT,
            });
        }

        match msg.message {
            MessageType::Connect { client_id } => {
                let assigned_id =
                    client_id.unwrap_or_else(|| format!("client-{}", self.connection_number));
                self.client_id = Some(assigned_id.clone());
                self.send_message(DaemonMessage::connected(assigned_id))
                    .await
            }
            other => {
                self.send_message(DaemonMessage::error("Expected Connect message for handshake"))
                    .await?;
                Err(ConnectionError::UnexpectedMessage(format!("{other:?}")))
            }
        }
    }

    async fn process_messages(&mut self) -> Result<(), ConnectionError> {
        loop {
            let msg = match timeout(READ_TIMEOUT, self.read_message()).await {
                Ok(Ok(msg)) => msg,
                Ok(Err(ConnectionError::Eof)) => return Ok(()),
                Ok(Err(ConnectionError::ParseError(e))) => {
                    // A malformed line does not end the connection
                    self.send_message(DaemonMessage::error_with_code(&e, "parse_error"))
                        .await?;
                    continue;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(ConnectionError::Timeout),
            };

            match self.handle_message(msg).await {
                Ok(()) => {}
                Err(ConnectionError::Eof) => return Ok(()),
                Err(ConnectionError::ParseError(e)) => {
                    self.send_message(DaemonMessage::error_with_code(&e, "parse_error"))
                        .await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn handle_message(&mut self, msg: ClientMessage) -> Result<(), ConnectionError> {
        match msg.message {
            MessageType::Connect { .. } => {
                self.send_message(DaemonMessage::error("Already connected"))
                    .await
            }

            MessageType::StartSession {
                target,
                duration_secs,
            } => {
                let result = self
                    .coordinator
                    .start_session(target, duration_secs.map(Duration::from_secs))
                    .await;
                let reply = self.reply(result, DaemonMessage::session_started);
                self.send_message(reply).await
            }

            MessageType::RestoreEarly => {
                let result = self.coordinator.restore_early().await;
                self.send_reconciled(result).await
            }

            MessageType::Reconcile { trigger } => {
                let result = self.coordinator.reconcile(trigger).await;
                self.send_reconciled(result).await
            }

            MessageType::NotificationCallback { data } => {
                let raw: RawNotificationCallback = serde_json::from_value(data)
                    .map_err(|e| ConnectionError::ParseError(e.to_string()))?;
                let callback = raw.to_callback().ok_or_else(|| {
                    ConnectionError::ParseError(format!(
                        "Unknown notification callback kind: '{}'",
                        raw.kind
                    ))
                })?;

                debug!(client_id = ?self.client_id, callback = ?callback, "Notification callback");
                let result = self.coordinator.notification_callback(callback).await;
                self.send_reconciled(result).await
            }

            MessageType::MonitorCallback { data } => {
                let raw: RawMonitorCallback = serde_json::from_value(data)
                    .map_err(|e| ConnectionError::ParseError(e.to_string()))?;
                let event = raw.event().ok_or_else(|| {
                    ConnectionError::ParseError(format!("Unknown monitor event: '{}'", raw.event))
                })?;

                let Some(trigger) = event.trigger() else {
                    debug!(event = ?event, "Monitor event does not end a pause");
                    return self.send_message(DaemonMessage::Ack).await;
                };

                // The activity name carries the session id when the extension knows it
                let result = match raw.activity.filter(|a| !a.is_empty()) {
                    Some(activity) => {
                        self.coordinator
                            .reconcile_session(SessionId::new(activity), trigger)
                            .await
                    }
                    None => self.coordinator.reconcile(trigger).await,
                };
                self.send_reconciled(result).await
            }

            MessageType::Foreground => {
                let result = self.coordinator.on_foreground().await;
                let now = self.clock.now();
                let reply = match result {
                    Ok(report) => DaemonMessage::foreground_checked(
                        report.orphan.is_some(),
                        report.closed.map(|s| SessionView::from_session(&s, now)),
                    ),
                    Err(e) => coordinator_error(&e),
                };
                self.send_message(reply).await
            }

            MessageType::Status => {
                let reply = match self.coordinator.status().await {
                    Ok(status) => DaemonMessage::status(status),
                    Err(e) => coordinator_error(&e),
                };
                self.send_message(reply).await
            }

            MessageType::History { limit } => {
                let now = self.clock.now();
                let reply = match self.coordinator.history(limit).await {
                    Ok(sessions) => DaemonMessage::history(
                        sessions
                            .iter()
                            .map(|s| SessionView::from_session(s, now))
                            .collect(),
                    ),
                    Err(e) => coordinator_error(&e),
                };
                self.send_message(reply).await
            }

            MessageType::Summary => {
                let reply = match self.coordinator.summary().await {
                    Ok((history, interactions)) => DaemonMessage::summary(history, interactions),
                    Err(e) => coordinator_error(&e),
                };
                self.send_message(reply).await
            }

            MessageType::LogItem => {
                let reply = match self.coordinator.log_item().await {
                    Ok(outcome) => {
                        debug!(outcome = ?outcome, "Item logged");
                        DaemonMessage::Ack
                    }
                    Err(e) => coordinator_error(&e),
                };
                self.send_message(reply).await
            }

            MessageType::ShieldShown {
                target,
                streak_days,
            } => {
                let reply = match self.coordinator.shield_shown(target, streak_days).await {
                    Ok(id) => DaemonMessage::interaction_recorded(id),
                    Err(e) => coordinator_error(&e),
                };
                self.send_message(reply).await
            }

            MessageType::InteractionResponse {
                interaction_id,
                action,
            } => {
                let reply = match self
                    .coordinator
                    .respond_interaction(interaction_id, action)
                    .await
                {
                    Ok(_) => DaemonMessage::Ack,
                    Err(e) => coordinator_error(&e),
                };
                self.send_message(reply).await
            }

            MessageType::Subscribe => self.handle_subscribe().await,

            MessageType::Ping { seq } => self.send_message(DaemonMessage::pong(seq)).await,

            MessageType::Disconnect => {
                debug!(client_id = ?self.client_id, "Client requested disconnect");
                Err(ConnectionError::Eof)
            }
        }
    }

    async fn handle_subscribe(&mut self) -> Result<(), ConnectionError> {
        let Some(client_id) = self.client_id.clone() else {
            return self
                .send_message(DaemonMessage::error("Must connect before subscribing"))
                .await;
        };

        {
            let mut subs = self.subscribers.write().await;
            if subs.len() >= MAX_SUBSCRIBERS && !subs.contains_key(&client_id) {
                drop(subs);
                return self
                    .send_message(DaemonMessage::error(&format!(
                        "Too many subscribers (max: {MAX_SUBSCRIBERS})"
                    )))
                    .await;
            }
            subs.insert(client_id.clone(), Arc::clone(&self.writer));
        }
        info!(client_id = %client_id, "Client subscribed to session events");

        // Current state first, then events as they happen
        let reply = match self.coordinator.status().await {
            Ok(status) => DaemonMessage::status(status),
            Err(e) => coordinator_error(&e),
        };
        self.send_message(reply).await
    }

    async fn send_reconciled(
        &self,
        result: Result<Option<Session>, CoordinatorError>,
    ) -> Result<(), ConnectionError> {
        let now = self.clock.now();
        let reply = match result {
            Ok(closed) => {
                DaemonMessage::reconciled(closed.map(|s| SessionView::from_session(&s, now)))
            }
            Err(e) => coordinator_error(&e),
        };
        self.send_message(reply).await
    }

    fn reply(
        &self,
        result: Result<Session, CoordinatorError>,
        ok: impl FnOnce(SessionView) -> DaemonMessage,
    ) -> DaemonMessage {
        match result {
            Ok(session) => ok(SessionView::from_session(&session, self.clock.now())),
            Err(e) => coordinator_error(&e),
        }
    }

    async fn read_message(&mut self) -> Result<ClientMessage, ConnectionError> {
        let mut line = String::new();
        let bytes_read = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        if bytes_read == 0 {
            return Err(ConnectionError::Eof);
        }
        if line.len() > MAX_MESSAGE_SIZE {
            return Err(ConnectionError::MessageTooLarge {
                size: line.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        let msg: ClientMessage = serde_json::from_str(line.trim_end())
            .map_err(|e| ConnectionError::ParseError(e.to_string()))?;
        Ok(msg)
    }

    async fn send_message(&self, msg: DaemonMessage) -> Result<(), ConnectionError> {
        write_line(&self.writer, &msg).await
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }
}

fn coordinator_error(err: &CoordinatorError) -> DaemonMessage {
    DaemonMessage::error_with_code(&err.to_string(), err.code())
}

/// Writes one JSON line with a timeout.
pub(crate) async fn write_line(
    writer: &SubscriberWriter,
    msg: &DaemonMessage,
) -> Result<(), ConnectionError> {
    let json = serde_json::to_string(msg).map_err(|e| ConnectionError::ParseError(e.to_string()))?;
    let mut writer = writer.lock().await;

    match timeout(WRITE_TIMEOUT, async {
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok::<(), std::io::Error>(())
    })
    .await
    {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ConnectionError::Io(e.to_string())),
        Err(_) => Err(ConnectionError::WriteTimeout),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Protocol version mismatch: client {client}, server {server}")]
    VersionMismatch {
        client: ProtocolVersion,
        server: ProtocolVersion,
    },

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed")]
    Eof,

    #[error("Read timeout")]
    Timeout,

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_display() {
        let err = ConnectionError::VersionMismatch {
            client: ProtocolVersion::new(2, 0),
            server: ProtocolVersion::new(1, 0),
        };
        assert!(err.to_string().contains("2.0"));
        assert!(err.to_string().contains("1.0"));
    }

    #[test]
    fn test_coordinator_error_reply_carries_code() {
        let reply = coordinator_error(&CoordinatorError::PersistenceUnavailable("disk".to_string()));
        match reply {
            DaemonMessage::Error { code, message } => {
                assert_eq!(code.as_deref(), Some("persistence_unavailable"));
                assert!(message.contains("disk"));
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }
}
