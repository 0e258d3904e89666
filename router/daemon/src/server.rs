//! Daemon Server Implementation
//!
//! Core server loop for the router daemon:
//! - Accepts connections on a Unix socket (owner-only permissions)
//! - Rejects peers running as a different user
//! - Spawns one handler task per connection
//! - Answers each request frame with exactly one response frame
//!
//! ```text
//!                     DaemonServer
//!                          │
//!          ┌───────────────┼───────────────┐
//!          │               │               │
//!       agent A         agent B          CLI
//!      (conn_1)        (conn_2)        (conn_3)
//!          │               │               │
//!          └───────────────┴───────────────┘
//!                          │
//!                    RouterService
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use dashmap::DashMap;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn, Instrument};

use router_core::protocol::{ClientMessage, ErrorKind, ServerMessage};
use router_core::transport::{read_frame, write_frame, ConnectionId, FrameDecoder, TransportError};
use router_core::RouterService;

/// Connection state tracking
struct ConnectionState {
    /// When the connection was established
    connected_at: Instant,
    /// Remote peer UID (from SO_PEERCRED)
    peer_uid: Option<u32>,
    /// Handle to abort the connection task
    abort_handle: Option<tokio::task::AbortHandle>,
}

/// Statistics for a single connection
#[derive(Debug, Clone)]
pub struct ConnectionStats {
    pub peer_uid: Option<u32>,
    pub uptime_secs: u64,
}

/// The main daemon server
pub struct DaemonServer {
    /// Path to the Unix socket
    socket_path: PathBuf,
    /// Maximum number of concurrent connections
    max_connections: usize,
    /// Router answering requests
    service: Arc<RouterService>,
    /// Active connection state (task handles, peer info)
    connection_states: Arc<DashMap<ConnectionId, ConnectionState>>,
}

impl DaemonServer {
    /// Create a server using the socket path and connection cap from the
    /// service configuration
    pub fn new(service: Arc<RouterService>) -> Self {
        let socket_path = service.config().socket_path.clone();
        let max_connections = service.config().max_connections;
        Self {
            socket_path,
            max_connections,
            service,
            connection_states: Arc::new(DashMap::new()),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Get peer credentials from Unix socket
    #[cfg(target_os = "linux")]
    fn get_peer_uid(stream: &UnixStream) -> Option<u32> {
        use std::os::unix::io::AsRawFd;

        let fd = stream.as_raw_fd();
        let mut cred: libc::ucred = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

        let result = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                std::ptr::addr_of_mut!(cred).cast::<libc::c_void>(),
                &mut len,
            )
        };

        (result == 0).then_some(cred.uid)
    }

    #[cfg(not(target_os = "linux"))]
    fn get_peer_uid(stream: &UnixStream) -> Option<u32> {
        stream.peer_cred().ok().map(|cred| cred.uid())
    }

    /// Prepare the socket path (create directory, remove stale socket)
    fn prepare_socket(&self) -> Result<()> {
        if let Some(parent) = self.socket_path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create socket directory: {parent:?}"))?;
                info!(path = ?parent, "Created socket directory");
            }
        }

        if self.socket_path.exists() {
            warn!(path = ?self.socket_path, "Removing stale socket file");
            fs::remove_file(&self.socket_path).with_context(|| {
                format!("Failed to remove stale socket: {:?}", self.socket_path)
            })?;
        }

        Ok(())
    }

    /// Bind the listening socket
    pub fn bind(&self) -> Result<UnixListener> {
        self.prepare_socket()?;

        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("Failed to bind to {:?}", self.socket_path))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&self.socket_path, perms)?;
        }

        info!(path = ?self.socket_path, "Listening for connections");
        Ok(listener)
    }

    /// Accept connections until `shutdown` is notified
    pub async fn run(&self, listener: UnixListener, shutdown: Arc<Notify>) -> Result<()> {
        loop {
            tokio::select! {
                () = shutdown.notified() => {
                    info!("Shutdown requested, stopping accept loop");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, _addr)) => self.admit(stream).await,
                        Err(e) => error!(error = %e, "Accept failed"),
                    }
                }
            }
        }

        self.shutdown()
    }

    async fn admit(&self, mut stream: UnixStream) {
        if self.connection_states.len() >= self.max_connections {
            warn!(max = self.max_connections, "Connection limit reached, rejecting new connection");
            let reply = ServerMessage::error(ErrorKind::Unavailable, "connection limit reached");
            if let Err(e) = write_frame(&mut stream, &reply).await {
                debug!(error = %e, "Failed to notify rejected connection");
            }
            return;
        }

        let peer_uid = Self::get_peer_uid(&stream);
        let our_uid = unsafe { libc::getuid() };
        if let Some(uid) = peer_uid {
            if uid != our_uid && uid != 0 {
                warn!(
                    peer_uid = uid,
                    our_uid = our_uid,
                    "Rejecting connection from different user"
                );
                return;
            }
        }

        let conn_id = ConnectionId::new();
        info!(
            conn_id = %conn_id,
            peer_uid = ?peer_uid,
            active_connections = self.connection_states.len() + 1,
            "New connection accepted"
        );

        self.connection_states.insert(
            conn_id.clone(),
            ConnectionState {
                connected_at: Instant::now(),
                peer_uid,
                abort_handle: None,
            },
        );

        let span = tracing::info_span!("connection", conn_id = %conn_id);
        let task = tokio::spawn(
            Self::handle_connection(
                conn_id.clone(),
                stream,
                Arc::clone(&self.service),
                Arc::clone(&self.connection_states),
            )
            .instrument(span),
        );

        // Handler may already have finished and removed itself
        if let Some(mut state) = self.connection_states.get_mut(&conn_id) {
            state.abort_handle = Some(task.abort_handle());
        }
    }

    /// Serve one client connection
    ///
    /// Requests are answered in order. A frame that fails its checksum or
    /// does not decode as a request gets a protocol error and the connection
    /// stays open; an oversized length field closes it.
    async fn handle_connection(
        conn_id: ConnectionId,
        stream: UnixStream,
        service: Arc<RouterService>,
        connection_states: Arc<DashMap<ConnectionId, ConnectionState>>,
    ) {
        debug!("Connection handler started");

        let (mut reader, mut writer) = stream.into_split();
        let mut decoder = FrameDecoder::new();

        loop {
            let reply = match read_frame::<_, ClientMessage>(&mut reader, &mut decoder).await {
                Ok(Some(msg)) => {
                    debug!(request = ?msg, "Received request");
                    service.handle(msg)
                }
                Ok(None) => {
                    info!("Client disconnected (EOF)");
                    break;
                }
                Err(e @ (TransportError::Serialization(_) | TransportError::ChecksumMismatch { .. })) => {
                    warn!(error = %e, "Failed to decode request frame");
                    ServerMessage::error(ErrorKind::Protocol, e.to_string())
                }
                Err(e @ TransportError::FrameTooLarge { .. }) => {
                    warn!(error = %e, "Closing connection after oversized frame");
                    let reply = ServerMessage::error(ErrorKind::Protocol, e.to_string());
                    if let Err(e) = write_frame(&mut writer, &reply).await {
                        debug!(error = %e, "Failed to send protocol error");
                    }
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Read error");
                    break;
                }
            };

            if let Err(e) = write_frame(&mut writer, &reply).await {
                error!(error = %e, "Write error");
                break;
            }
        }

        connection_states.remove(&conn_id);
        info!(
            active_connections = connection_states.len(),
            "Connection handler finished"
        );
    }

    /// Abort open connections and remove the socket file
    fn shutdown(&self) -> Result<()> {
        info!("Initiating graceful shutdown");

        let conn_ids: Vec<ConnectionId> =
            self.connection_states.iter().map(|r| r.key().clone()).collect();
        for conn_id in conn_ids {
            if let Some((_, state)) = self.connection_states.remove(&conn_id) {
                info!(conn_id = %conn_id, "Aborting connection");
                if let Some(handle) = state.abort_handle {
                    handle.abort();
                }
            }
        }

        if self.socket_path.exists() {
            fs::remove_file(&self.socket_path)
                .with_context(|| format!("Failed to remove socket: {:?}", self.socket_path))?;
            info!(path = ?self.socket_path, "Socket file removed");
        }

        Ok(())
    }

    /// Get number of active connections
    pub fn connection_count(&self) -> usize {
        self.connection_states.len()
    }

    /// Get connection statistics
    pub fn connection_stats(&self) -> Vec<(ConnectionId, ConnectionStats)> {
        self.connection_states
            .iter()
            .map(|r| {
                (
                    r.key().clone(),
                    ConnectionStats {
                        peer_uid: r.value().peer_uid,
                        uptime_secs: r.value().connected_at.elapsed().as_secs(),
                    },
                )
            })
            .collect()
    }
}
