//! Channel-backed connection
//!
//! For transports that own their socket in a dedicated per-connection task:
//! the broadcaster pushes into a bounded channel and the transport task
//! drains it onto the wire.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::registry::{CloseReason, Connection, SendError};

/// Message handed to the transport task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// An encoded frame to write
    Frame(Bytes),
    /// Close the client with this reason, then stop
    Close(CloseReason),
}

/// [`Connection`] implementation backed by a bounded tokio mpsc channel
///
/// `send` waits for channel capacity, which makes it cancellation safe: a
/// send dropped by the broadcaster's timeout never enqueues its frame.
///
/// # Example
/// ```no_run
/// use framecast::{ChannelConnection, ConnectionRegistry, Outbound};
///
/// # async fn example(registry: &ConnectionRegistry<ChannelConnection>) {
/// let (conn, mut outbound) = ChannelConnection::new(8);
/// let id = registry.register(conn).await.unwrap();
///
/// while let Some(msg) = outbound.recv().await {
///     match msg {
///         Outbound::Frame(bytes) => { /* write to socket */ }
///         Outbound::Close(reason) => break,
///     }
/// }
///
/// registry.unregister(id).await;
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ChannelConnection {
    tx: mpsc::Sender<Outbound>,
}

impl ChannelConnection {
    /// Create a connection and the receiver the transport task drains
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Whether the transport side dropped its receiver
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl Connection for ChannelConnection {
    async fn send(&self, payload: Bytes) -> Result<(), SendError> {
        self.tx
            .send(Outbound::Frame(payload))
            .await
            .map_err(|_| SendError::Closed)
    }

    async fn close(&self, reason: &CloseReason) -> Result<(), SendError> {
        self.tx
            .send(Outbound::Close(reason.clone()))
            .await
            .map_err(|_| SendError::Closed)
    }
}
