//! Request/response client for the shieldpass daemon.
//!
//! `DaemonClient` handles:
//! - Connecting to the daemon's Unix socket
//! - The `Connect` handshake and version check
//! - One request, one reply, newline-delimited JSON
//! - Reading broadcast events after `Subscribe`
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()` outside tests.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use shieldpass_protocol::{ClientMessage, DaemonMessage, ProtocolVersion};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::error::{CliError, Result};

/// Default time to wait for a reply.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// A connected, handshaken session with the daemon.
pub struct DaemonClient {
    socket_path: PathBuf,
    client_id: String,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    reply_timeout: Duration,
}

impl DaemonClient {
    /// Connects to the daemon at `socket_path` and performs the handshake.
    ///
    /// # Errors
    ///
    /// - `DaemonNotRunning` if the socket is missing or refuses connections
    /// - `VersionMismatch` if the daemon rejects our protocol version
    pub async fn connect(socket_path: impl AsRef<Path>, client_id: Option<String>) -> Result<Self> {
        let socket_path = socket_path.as_ref().to_path_buf();

        let stream = match UnixStream::connect(&socket_path).await {
            Ok(stream) => stream,
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::ConnectionRefused) => {
                return Err(CliError::DaemonNotRunning(socket_path));
            }
            Err(e) => return Err(e.into()),
        };

        let (reader, writer) = stream.into_split();
        let mut client = Self {
            socket_path,
            client_id: String::new(),
            reader: BufReader::new(reader),
            writer,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        };
        client.handshake(client_id).await?;
        Ok(client)
    }

    /// Overrides the reply timeout.
    #[must_use]
    pub fn with_reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    async fn handshake(&mut self, client_id: Option<String>) -> Result<()> {
        self.send(&ClientMessage::connect(client_id)).await?;

        match self.recv_timed().await? {
            DaemonMessage::Connected {
                protocol_version,
                client_id,
            } => {
                if !ProtocolVersion::CURRENT.is_compatible_with(&protocol_version) {
                    return Err(CliError::VersionMismatch {
                        client_version: ProtocolVersion::CURRENT.to_string(),
                        daemon_version: protocol_version.to_string(),
                    });
                }
                info!(client_id = %client_id, protocol_version = %protocol_version, "Handshake complete");
                self.client_id = client_id;
                Ok(())
            }
            DaemonMessage::Rejected {
                protocol_version, ..
            } => Err(CliError::VersionMismatch {
                client_version: ProtocolVersion::CURRENT.to_string(),
                daemon_version: protocol_version.to_string(),
            }),
            other => Err(CliError::UnexpectedReply(format!("{other:?}"))),
        }
    }

    /// Sends `message` and waits for the reply.
    ///
    /// A daemon `Error` reply is returned as `CliError::Daemon`.
    pub async fn request(&mut self, message: ClientMessage) -> Result<DaemonMessage> {
        self.send(&message).await?;
        match self.recv_timed().await? {
            DaemonMessage::Error { message, code } => Err(CliError::Daemon { message, code }),
            reply => Ok(reply),
        }
    }

    /// Waits for the next pushed message without a timeout.
    ///
    /// Used after `Subscribe` to follow lifecycle broadcasts.
    pub async fn next_event(&mut self) -> Result<DaemonMessage> {
        self.recv().await
    }

    /// Closes the connection politely.
    pub async fn disconnect(mut self) -> Result<()> {
        self.send(&ClientMessage::disconnect()).await
    }

    async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let json = serde_json::to_string(message)?;
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        debug!(message_type = ?message.message, "Sent message to daemon");
        Ok(())
    }

    async fn recv_timed(&mut self) -> Result<DaemonMessage> {
        timeout(self.reply_timeout, self.recv())
            .await
            .map_err(|_| CliError::Timeout)?
    }

    async fn recv(&mut self) -> Result<DaemonMessage> {
        let mut line = String::new();
        let bytes_read = self.reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            return Err(CliError::Disconnected);
        }
        Ok(serde_json::from_str(line.trim_end())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    /// Accepts one connection, answers the handshake, then replies to each
    /// request line with the next canned message.
    async fn fake_daemon(listener: UnixListener, replies: Vec<DaemonMessage>) {
        let (stream, _) = listener.accept().await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let hello = DaemonMessage::connected("client-0".to_string());
        let json = serde_json::to_string(&hello).unwrap();
        writer.write_all(format!("{json}\n").as_bytes()).await.unwrap();

        for reply in replies {
            line.clear();
            if reader.read_line(&mut line).await.unwrap() == 0 {
                return;
            }
            let json = serde_json::to_string(&reply).unwrap();
            writer.write_all(format!("{json}\n").as_bytes()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_missing_socket_is_daemon_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let result = DaemonClient::connect(dir.path().join("missing.sock"), None).await;
        assert!(matches!(result, Err(CliError::DaemonNotRunning(_))));
    }

    #[tokio::test]
    async fn test_handshake_and_request() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.sock");
        let listener = UnixListener::bind(&path).unwrap();
        tokio::spawn(fake_daemon(listener, vec![DaemonMessage::pong(3)]));

        let mut client = DaemonClient::connect(&path, None).await.unwrap();
        assert_eq!(client.client_id(), "client-0");

        let reply = client.request(ClientMessage::ping(3)).await.unwrap();
        assert!(matches!(reply, DaemonMessage::Pong { seq: 3 }));
    }

    #[tokio::test]
    async fn test_error_reply_becomes_daemon_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.sock");
        let listener = UnixListener::bind(&path).unwrap();
        tokio::spawn(fake_daemon(
            listener,
            vec![DaemonMessage::error_with_code("no target", "no_target")],
        ));

        let mut client = DaemonClient::connect(&path, None).await.unwrap();
        let err = client
            .request(ClientMessage::start_session(None, None))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some("no_target"));
    }

    #[tokio::test]
    async fn test_closed_connection_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.sock");
        let listener = UnixListener::bind(&path).unwrap();
        tokio::spawn(fake_daemon(listener, Vec::new()));

        let mut client = DaemonClient::connect(&path, None).await.unwrap();
        let err = client.request(ClientMessage::status()).await.unwrap_err();
        // Depending on timing the write or the read notices first
        assert!(matches!(err, CliError::Disconnected | CliError::Io(_)));
    }
}
