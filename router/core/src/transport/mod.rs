//! Socket Transport
//!
//! Local IPC between the router daemon and its callers over Unix domain
//! sockets, one [`ClientMessage`](crate::protocol::ClientMessage) answered by
//! one [`ServerMessage`](crate::protocol::ServerMessage), each carried in a
//! checksummed frame (see [`frame`]).

pub mod client;
pub mod frame;

pub use client::UnixSocketClient;
pub use frame::{encode, read_frame, write_frame, FrameDecoder, MAX_FRAME_SIZE};

use std::fmt;

use thiserror::Error;

/// Unique identifier for an accepted connection
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Fresh random ID
    #[must_use]
    pub fn new() -> Self {
        Self(format!("conn_{}", uuid::Uuid::new_v4().simple()))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors that can occur during transport operations
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection to peer failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection was closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Message serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Length field exceeds the frame limit
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Declared payload length
        size: usize,
        /// Configured limit
        max: usize,
    },

    /// Frame checksum mismatch - data corruption detected
    #[error("Checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// CRC32 carried in the header
        expected: u32,
        /// CRC32 computed over the payload
        actual: u32,
    },

    /// IO error from underlying transport
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No response within the configured timeout
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Peer sent something other than what the exchange expects
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}
