//! Unix Socket Client
//!
//! Caller-side connection to the router daemon. Requests are strictly
//! sequential: each [`request`](UnixSocketClient::request) writes one frame
//! and waits for exactly one response frame.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::UnixStream;

use super::frame::{read_frame, write_frame, FrameDecoder};
use super::TransportError;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::routing::{
    FeedbackAck, FeedbackRequest, RankedWorker, RoutingRequest, SelectionResult, TaskType,
};

/// Default time to wait for a response
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for the router daemon socket
#[derive(Debug)]
pub struct UnixSocketClient {
    socket_path: PathBuf,
    stream: Option<UnixStream>,
    decoder: FrameDecoder,
    timeout: Duration,
}

impl UnixSocketClient {
    /// Create a client for the given socket (not yet connected)
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            stream: None,
            decoder: FrameDecoder::new(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Create a client using the default socket path
    pub fn with_default_path() -> Self {
        Self::new(crate::config::default_socket_path())
    }

    /// Set the per-request timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Socket this client connects to
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Whether a connection is open
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Open the connection
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            TransportError::ConnectionFailed(format!(
                "Failed to connect to {}: {e}",
                self.socket_path.display()
            ))
        })?;

        self.stream = Some(stream);
        self.decoder.clear();
        tracing::debug!(path = %self.socket_path.display(), "Connected to router");
        Ok(())
    }

    /// Connect, creating the client in one step
    pub async fn connect_to(socket_path: impl Into<PathBuf>) -> Result<Self, TransportError> {
        let mut client = Self::new(socket_path);
        client.connect().await?;
        Ok(client)
    }

    /// Close the connection
    pub fn disconnect(&mut self) {
        self.stream = None;
        self.decoder.clear();
    }

    /// Send one message and wait for its response
    ///
    /// The connection is dropped on any transport failure; call
    /// [`connect`](Self::connect) again to retry.
    pub async fn request(&mut self, msg: &ClientMessage) -> Result<ServerMessage, TransportError> {
        let timeout = self.timeout;
        let result = match tokio::time::timeout(timeout, self.exchange(msg)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout)),
        };

        if result.is_err() {
            self.disconnect();
        }
        result
    }

    async fn exchange(&mut self, msg: &ClientMessage) -> Result<ServerMessage, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::ConnectionClosed)?;
        write_frame(stream, msg).await?;
        read_frame(stream, &mut self.decoder)
            .await?
            .ok_or(TransportError::ConnectionClosed)
    }

    /// Route a prompt
    ///
    /// Validation and protocol errors reported by the daemon are returned as
    /// [`TransportError::UnexpectedResponse`].
    pub async fn route(&mut self, request: RoutingRequest) -> Result<SelectionResult, TransportError> {
        match self.request(&ClientMessage::Route(request)).await? {
            ServerMessage::Selection(result) => Ok(result),
            other => Err(unexpected(other)),
        }
    }

    /// Submit feedback
    pub async fn feedback(&mut self, request: FeedbackRequest) -> Result<FeedbackAck, TransportError> {
        match self.request(&ClientMessage::Feedback(request)).await? {
            ServerMessage::FeedbackAck(ack) => Ok(ack),
            other => Err(unexpected(other)),
        }
    }

    /// Fetch the current ranking
    pub async fn rankings(
        &mut self,
        task_type: Option<TaskType>,
    ) -> Result<Vec<RankedWorker>, TransportError> {
        match self.request(&ClientMessage::Rankings { task_type }).await? {
            ServerMessage::Rankings { ranked_workers, .. } => Ok(ranked_workers),
            other => Err(unexpected(other)),
        }
    }

    /// Liveness check
    pub async fn ping(&mut self) -> Result<(), TransportError> {
        match self.request(&ClientMessage::Ping).await? {
            ServerMessage::Pong => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(msg: ServerMessage) -> TransportError {
    match msg {
        ServerMessage::Error { kind, message } => {
            TransportError::UnexpectedResponse(format!("{kind:?}: {message}"))
        }
        other => TransportError::UnexpectedResponse(format!("{other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::frame::{read_frame, write_frame};
    use tempfile::TempDir;
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn test_connect_without_server() {
        let dir = TempDir::new().unwrap();
        let mut client = UnixSocketClient::new(dir.path().join("missing.sock"));
        assert!(matches!(
            client.connect().await,
            Err(TransportError::ConnectionFailed(_))
        ));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_request_when_disconnected() {
        let mut client = UnixSocketClient::new("/nonexistent/router.sock");
        assert!(matches!(
            client.ping().await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_ping_against_stub_server() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("router.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut decoder = FrameDecoder::new();
            let msg: ClientMessage = read_frame(&mut stream, &mut decoder).await.unwrap().unwrap();
            assert_eq!(msg, ClientMessage::Ping);
            write_frame(&mut stream, &ServerMessage::Pong).await.unwrap();
        });

        let mut client = UnixSocketClient::connect_to(&path).await.unwrap();
        client.ping().await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_error_response_surfaces() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("router.sock");
        let listener = UnixListener::bind(&path).unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut decoder = FrameDecoder::new();
            let _: Option<ClientMessage> = read_frame(&mut stream, &mut decoder).await.unwrap();
            let reply = ServerMessage::error(crate::protocol::ErrorKind::Validation, "bad rating");
            write_frame(&mut stream, &reply).await.unwrap();
        });

        let mut client = UnixSocketClient::connect_to(&path).await.unwrap();
        let err = client.feedback(FeedbackRequest::new("w", 9)).await.unwrap_err();
        assert!(err.to_string().contains("bad rating"));
    }

    #[tokio::test]
    async fn test_timeout_drops_connection() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("router.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let _server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            // Hold the connection open without answering
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let mut client = UnixSocketClient::connect_to(&path)
            .await
            .unwrap()
            .with_timeout(Duration::from_millis(50));
        assert!(matches!(client.ping().await, Err(TransportError::Timeout(_))));
        assert!(!client.is_connected());
    }
}
