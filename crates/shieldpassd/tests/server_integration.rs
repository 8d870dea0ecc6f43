//! Integration tests for the Unix socket server.
//!
//! These tests run a `DaemonServer` over a real socket in a temp directory,
//! backed by a coordinator with recording collaborators, and talk to it the
//! way the CLI and the extension shims do: newline-delimited JSON.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use shieldpass_core::{ManualClock, SessionPhase, Trigger, UserAction};
use shieldpass_protocol::{ClientMessage, DaemonMessage, MessageType, ProtocolVersion};
use shieldpassd::config::CoordinatorSettings;
use shieldpassd::coordinator::{spawn_coordinator, Collaborators};
use shieldpassd::server::DaemonServer;
use shieldpassd::testing::{MemoryRecorder, MemoryStore, RecordingEnforcer, RecordingNotifier};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

/// Maximum time to wait for server socket to appear
const SOCKET_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Interval between socket existence checks
const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Grace period for server shutdown
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_millis(100);

/// Maximum time to wait for a broadcast
const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Test Helpers
// ============================================================================

/// Test server context that manages server lifecycle and cleanup.
struct TestServer {
    socket_path: PathBuf,
    cancel_token: CancellationToken,
    clock: ManualClock,
    enforcer: RecordingEnforcer,
    _temp_dir: TempDir, // Keep alive for RAII cleanup
}

impl TestServer {
    async fn spawn() -> Self {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let socket_path = temp_dir.path().join("test.sock");

        let clock = ManualClock::new(Utc::now());
        let enforcer = RecordingEnforcer::new();
        let coordinator = spawn_coordinator(
            Collaborators {
                store: Box::new(MemoryStore::new()),
                enforcer: Box::new(enforcer.clone()),
                surface: None,
                notifier: Box::new(RecordingNotifier::new()),
                analytics: Box::new(MemoryRecorder::new()),
                clock: Arc::new(clock.clone()),
            },
            CoordinatorSettings {
                targets: vec!["ShopApp".to_string()],
                tick_interval: Duration::from_secs(3600),
                ..CoordinatorSettings::default()
            },
        );

        let cancel_token = CancellationToken::new();
        let server = DaemonServer::new(
            socket_path.clone(),
            coordinator,
            Arc::new(clock.clone()),
            cancel_token.clone(),
        );

        tokio::spawn(async move {
            let _ = server.run().await;
        });

        let start = tokio::time::Instant::now();
        while start.elapsed() < SOCKET_WAIT_TIMEOUT {
            if socket_path.exists() {
                break;
            }
            sleep(SOCKET_POLL_INTERVAL).await;
        }

        assert!(
            socket_path.exists(),
            "Server socket did not appear within {SOCKET_WAIT_TIMEOUT:?}"
        );

        TestServer {
            socket_path,
            cancel_token,
            clock,
            enforcer,
            _temp_dir: temp_dir,
        }
    }

    async fn connect(&self) -> TestClient {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .expect("connect to server");
        TestClient::new(stream)
    }

    /// Connects and completes the handshake.
    async fn connect_ready(&self) -> TestClient {
        let mut client = self.connect().await;
        client.handshake(None).await;
        client
    }

    async fn shutdown(self) {
        self.cancel_token.cancel();
        sleep(SHUTDOWN_GRACE_PERIOD).await;
    }
}

/// Test client connection with protocol helpers.
struct TestClient {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
}

impl TestClient {
    fn new(stream: UnixStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn send(&mut self, msg: ClientMessage) {
        let json = serde_json::to_string(&msg).unwrap();
        self.send_raw(&json).await;
    }

    async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn recv(&mut self) -> DaemonMessage {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.unwrap();
        serde_json::from_str(&line).unwrap()
    }

    async fn request(&mut self, msg: ClientMessage) -> DaemonMessage {
        self.send(msg).await;
        self.recv().await
    }

    async fn handshake(&mut self, client_id: Option<String>) -> String {
        match self.request(ClientMessage::connect(client_id)).await {
            DaemonMessage::Connected { client_id, .. } => client_id,
            other => panic!("Expected Connected, got {other:?}"),
        }
    }
}

// ============================================================================
// Connection Tests
// ============================================================================

#[tokio::test]
async fn test_handshake_success() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    let id = client.handshake(Some("cli".to_string())).await;
    assert_eq!(id, "cli");

    server.shutdown().await;
}

#[tokio::test]
async fn test_handshake_version_mismatch() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    let response = client
        .request(ClientMessage {
            protocol_version: ProtocolVersion::new(99, 0),
            message: MessageType::Connect { client_id: None },
        })
        .await;

    match response {
        DaemonMessage::Rejected { reason, .. } => {
            assert!(reason.contains("Incompatible"), "unexpected reason: {reason}");
        }
        other => panic!("Expected Rejected, got {other:?}"),
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_malformed_line_keeps_connection() {
    let server = TestServer::spawn().await;
    let mut client = server.connect_ready().await;

    client.send_raw("{not json").await;
    match client.recv().await {
        DaemonMessage::Error { code, .. } => assert_eq!(code.as_deref(), Some("parse_error")),
        other => panic!("Expected Error, got {other:?}"),
    }

    assert!(matches!(
        client.request(ClientMessage::ping(7)).await,
        DaemonMessage::Pong { seq: 7 }
    ));

    server.shutdown().await;
}

// ============================================================================
// Session Lifecycle Tests
// ============================================================================

#[tokio::test]
async fn test_pause_status_and_restore() {
    let server = TestServer::spawn().await;
    let mut client = server.connect_ready().await;

    let started = match client
        .request(ClientMessage::start_session(None, Some(300)))
        .await
    {
        DaemonMessage::SessionStarted { session } => session,
        other => panic!("Expected SessionStarted, got {other:?}"),
    };
    assert_eq!(started.target, "ShopApp");
    assert_eq!(started.remaining_secs, 300);
    assert!(!server.enforcer.is_blocked());

    server.clock.advance(ChronoDuration::seconds(75));
    match client.request(ClientMessage::status()).await {
        DaemonMessage::Status { status } => {
            assert!(!status.blocked);
            let view = status.session.expect("session in status");
            assert_eq!(view.id, started.id);
            assert_eq!(view.remaining_display, "3:45");
        }
        other => panic!("Expected Status, got {other:?}"),
    }

    match client.request(ClientMessage::restore_early()).await {
        DaemonMessage::Reconciled { closed } => {
            let closed = closed.expect("session closed");
            assert_eq!(closed.phase, SessionPhase::Closed);
        }
        other => panic!("Expected Reconciled, got {other:?}"),
    }
    assert!(server.enforcer.is_blocked());

    // Nothing left to close
    assert!(matches!(
        client.request(ClientMessage::reconcile(Trigger::Manual)).await,
        DaemonMessage::Reconciled { closed: None }
    ));

    match client.request(ClientMessage::history(None)).await {
        DaemonMessage::History { sessions } => assert_eq!(sessions.len(), 1),
        other => panic!("Expected History, got {other:?}"),
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_notification_callback_payload() {
    let server = TestServer::spawn().await;
    let mut client = server.connect_ready().await;

    let id = match client.request(ClientMessage::start_session(None, None)).await {
        DaemonMessage::SessionStarted { session } => session.id,
        other => panic!("Expected SessionStarted, got {other:?}"),
    };

    let reply = client
        .request(ClientMessage::notification_callback(json!({
            "kind": "action",
            "identifier": id.as_str(),
            "action_identifier": "restore",
        })))
        .await;
    match reply {
        DaemonMessage::Reconciled { closed } => {
            assert!(closed.expect("closed by tap").restoration_method.is_some());
        }
        other => panic!("Expected Reconciled, got {other:?}"),
    }
    assert!(server.enforcer.is_blocked());

    // Unknown kinds are reported without dropping the connection
    let reply = client
        .request(ClientMessage::notification_callback(json!({
            "kind": "dismissed",
            "identifier": id.as_str(),
        })))
        .await;
    assert!(matches!(reply, DaemonMessage::Error { .. }));
    assert!(matches!(
        client.request(ClientMessage::ping(1)).await,
        DaemonMessage::Pong { seq: 1 }
    ));

    server.shutdown().await;
}

#[tokio::test]
async fn test_monitor_callback_for_stale_activity() {
    let server = TestServer::spawn().await;
    let mut client = server.connect_ready().await;

    client.request(ClientMessage::start_session(None, None)).await;

    // A warning never ends a pause
    let reply = client
        .request(ClientMessage::monitor_callback(json!({
            "event": "interval_will_end_warning",
        })))
        .await;
    assert!(matches!(reply, DaemonMessage::Ack));

    // An interval end for some other session is ignored
    let reply = client
        .request(ClientMessage::monitor_callback(json!({
            "event": "interval_did_end",
            "activity": "some-earlier-session",
        })))
        .await;
    assert!(matches!(reply, DaemonMessage::Reconciled { closed: None }));
    assert!(!server.enforcer.is_blocked());

    let reply = client
        .request(ClientMessage::monitor_callback(json!({
            "event": "interval_did_end",
        })))
        .await;
    assert!(matches!(reply, DaemonMessage::Reconciled { closed: Some(_) }));
    assert!(server.enforcer.is_blocked());

    server.shutdown().await;
}

#[tokio::test]
async fn test_foreground_after_missed_expiry() {
    let server = TestServer::spawn().await;
    let mut client = server.connect_ready().await;

    client
        .request(ClientMessage::start_session(None, Some(60)))
        .await;
    server.clock.advance(ChronoDuration::minutes(5));

    match client.request(ClientMessage::foreground()).await {
        DaemonMessage::ForegroundChecked {
            orphan_repaired,
            closed,
        } => {
            assert!(!orphan_repaired);
            assert!(closed.is_some());
        }
        other => panic!("Expected ForegroundChecked, got {other:?}"),
    }
    assert!(server.enforcer.is_blocked());

    server.shutdown().await;
}

#[tokio::test]
async fn test_interaction_response_round() {
    let server = TestServer::spawn().await;
    let mut client = server.connect_ready().await;

    let interaction_id = match client
        .request(ClientMessage::shield_shown("ShopApp", 3))
        .await
    {
        DaemonMessage::InteractionRecorded { interaction_id } => interaction_id,
        other => panic!("Expected InteractionRecorded, got {other:?}"),
    };

    let reply = client
        .request(ClientMessage::interaction_response(
            interaction_id.clone(),
            UserAction::KeptBlocked,
        ))
        .await;
    assert!(matches!(reply, DaemonMessage::Ack));

    match client
        .request(ClientMessage::interaction_response(
            interaction_id,
            UserAction::RequestedPause,
        ))
        .await
    {
        DaemonMessage::Error { code, .. } => assert_eq!(code.as_deref(), Some("already_completed")),
        other => panic!("Expected Error, got {other:?}"),
    }

    match client.request(ClientMessage::summary()).await {
        DaemonMessage::Summary { interactions, .. } => {
            assert_eq!(interactions.shown, 1);
            assert_eq!(interactions.kept_blocked, 1);
        }
        other => panic!("Expected Summary, got {other:?}"),
    }

    server.shutdown().await;
}

// ============================================================================
// Subscription Tests
// ============================================================================

#[tokio::test]
async fn test_subscriber_receives_lifecycle_events() {
    let server = TestServer::spawn().await;
    let mut watcher = server.connect_ready().await;
    let mut cli = server.connect_ready().await;

    assert!(matches!(
        watcher.request(ClientMessage::subscribe()).await,
        DaemonMessage::Status { .. }
    ));

    cli.request(ClientMessage::start_session(None, None)).await;
    let started = timeout(EVENT_TIMEOUT, watcher.recv())
        .await
        .expect("started broadcast");
    assert!(matches!(started, DaemonMessage::SessionStarted { .. }));

    cli.request(ClientMessage::restore_early()).await;
    let closed = timeout(EVENT_TIMEOUT, watcher.recv())
        .await
        .expect("closed broadcast");
    assert!(matches!(closed, DaemonMessage::SessionClosed { .. }));

    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_removes_socket() {
    let server = TestServer::spawn().await;
    let socket_path = server.socket_path.clone();

    server.cancel_token.cancel();
    sleep(SHUTDOWN_GRACE_PERIOD).await;

    assert!(!socket_path.exists());
}
