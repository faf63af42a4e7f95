//! Connection capability and identity types

use std::future::Future;

use bytes::Bytes;

/// Unique identifier assigned to a connection when it is registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Close code and message surfaced to a client when its connection is closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    /// WebSocket-style close code
    pub code: u16,
    /// Human-readable message
    pub message: String,
}

impl CloseReason {
    /// Close code for "going away" (RFC 6455 §7.4.1)
    pub const GOING_AWAY: u16 = 1001;
    /// Close code for "policy violation"
    pub const POLICY_VIOLATION: u16 = 1008;
    /// Close code for "internal error"
    pub const INTERNAL_ERROR: u16 = 1011;

    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The reason used when the server shuts down
    pub fn server_shutdown() -> Self {
        Self::new(Self::GOING_AWAY, "Server shutdown")
    }

    /// The reason used when a send to the connection fails
    pub fn send_failed() -> Self {
        Self::new(Self::INTERNAL_ERROR, "Send failed")
    }

    /// The reason used when a connection keeps missing frames
    pub fn too_slow() -> Self {
        Self::new(Self::POLICY_VIOLATION, "Client too slow")
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

/// Error returned by [`Connection::send`] and [`Connection::close`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The peer or the local transport already closed the channel
    #[error("Connection closed")]
    Closed,
    /// The write itself failed
    #[error("Write failed: {0}")]
    Write(String),
}

impl From<std::io::Error> for SendError {
    fn from(err: std::io::Error) -> Self {
        SendError::Write(err.to_string())
    }
}

/// Outbound half of an accepted, upgraded client channel
///
/// Implemented by the transport layer (WebSocket, raw TCP, ...). Both
/// methods may suspend on backpressure; the broadcaster bounds every call
/// with a timeout and drops the returned future on expiry, so
/// implementations should be cancellation safe.
pub trait Connection: Send + Sync + 'static {
    /// Send one encoded frame
    fn send(&self, payload: Bytes) -> impl Future<Output = Result<(), SendError>> + Send;

    /// Close the channel with the given reason
    fn close(&self, reason: &CloseReason) -> impl Future<Output = Result<(), SendError>> + Send;
}
