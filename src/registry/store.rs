//! Connection registry implementation
//!
//! The shared set of live client connections. The broadcaster iterates a
//! point-in-time snapshot, so the lock is never held while frames are
//! being delivered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinSet;

use super::connection::{CloseReason, Connection, ConnectionId};
use super::entry::ConnectionEntry;
use super::error::RegistryError;

struct Members<C> {
    entries: HashMap<ConnectionId, Arc<ConnectionEntry<C>>>,
    closed: bool,
}

/// Registry of all active client connections
///
/// Thread-safe via `RwLock`. Register and unregister are linearizable with
/// respect to [`snapshot`](Self::snapshot).
pub struct ConnectionRegistry<C> {
    members: RwLock<Members<C>>,
    next_id: AtomicU64,
    close_timeout: Duration,
}

impl<C: Connection> ConnectionRegistry<C> {
    /// Create a new registry with a 1 second per-connection close timeout
    pub fn new() -> Self {
        Self::with_close_timeout(Duration::from_secs(1))
    }

    /// Create a new registry with a custom per-connection close timeout
    pub fn with_close_timeout(close_timeout: Duration) -> Self {
        Self {
            members: RwLock::new(Members {
                entries: HashMap::new(),
                closed: false,
            }),
            next_id: AtomicU64::new(1),
            close_timeout,
        }
    }

    /// Register a connection
    ///
    /// The connection receives frames starting with the next broadcast.
    /// Fails only once the registry has been closed by [`close_all`](Self::close_all).
    ///
    /// Every call creates a new member with a fresh id; the registry cannot
    /// tell two handles to the same channel apart. The transport registers
    /// each accepted channel once and keeps the returned id for
    /// [`unregister`](Self::unregister).
    pub async fn register(&self, connection: C) -> Result<ConnectionId, RegistryError> {
        let mut members = self.members.write().await;
        if members.closed {
            return Err(RegistryError::Closed);
        }

        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        members
            .entries
            .insert(id, Arc::new(ConnectionEntry::new(id, connection)));

        tracing::info!(
            connection = %id,
            connections = members.entries.len(),
            "Connection registered"
        );

        Ok(id)
    }

    /// Remove a connection and mark it closed
    ///
    /// No-op if the connection is not present.
    pub async fn unregister(&self, id: ConnectionId) -> Option<Arc<ConnectionEntry<C>>> {
        let removed = self.members.write().await.entries.remove(&id);

        if let Some(ref entry) = removed {
            entry.mark_closed();
            tracing::debug!(connection = %id, "Connection unregistered");
        }

        removed
    }

    /// Remove a connection and close it with `reason`
    ///
    /// Used when a connection misbehaves during delivery. Returns `None`
    /// without touching the transport if the connection was already gone.
    pub async fn evict(
        &self,
        id: ConnectionId,
        reason: &CloseReason,
    ) -> Option<Arc<ConnectionEntry<C>>> {
        let removed = self.members.write().await.entries.remove(&id)?;

        close_entry(&removed, reason, self.close_timeout).await;
        tracing::info!(connection = %id, reason = %reason, "Connection evicted");

        Some(removed)
    }

    /// Point-in-time copy of the current membership
    pub async fn snapshot(&self) -> Vec<Arc<ConnectionEntry<C>>> {
        self.members.read().await.entries.values().cloned().collect()
    }

    /// Look up a registered connection
    pub async fn get(&self, id: ConnectionId) -> Option<Arc<ConnectionEntry<C>>> {
        self.members.read().await.entries.get(&id).cloned()
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.members.read().await.entries.contains_key(&id)
    }

    /// Number of registered connections
    pub async fn len(&self) -> usize {
        self.members.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.members.read().await.entries.is_empty()
    }

    /// Whether `close_all` has run
    pub async fn is_closed(&self) -> bool {
        self.members.read().await.closed
    }

    /// Close every registered connection and stop accepting new ones
    ///
    /// Each connection moves to `Closing`, is sent `reason`, then ends
    /// `Closed` and unregistered. Close failures and timeouts are logged and
    /// never prevent the remaining connections from being closed. Returns
    /// the number of connections closed.
    pub async fn close_all(&self, reason: CloseReason) -> usize {
        let drained: Vec<Arc<ConnectionEntry<C>>> = {
            let mut members = self.members.write().await;
            members.closed = true;
            members.entries.drain().map(|(_, entry)| entry).collect()
        };

        let count = drained.len();
        let mut closes = JoinSet::new();

        for entry in drained {
            let reason = reason.clone();
            let timeout = self.close_timeout;

            closes.spawn(async move {
                close_entry(&entry, &reason, timeout).await;
            });
        }

        while let Some(joined) = closes.join_next().await {
            if let Err(e) = joined {
                tracing::warn!(error = %e, "Close task failed");
            }
        }

        tracing::info!(connections = count, reason = %reason, "All connections closed");

        count
    }
}

/// Tell the transport to close, then leave the entry `Closed`
///
/// Only the caller that wins `Open → Closing` talks to the transport, so a
/// connection is sent at most one close.
async fn close_entry<C: Connection>(
    entry: &ConnectionEntry<C>,
    reason: &CloseReason,
    timeout: Duration,
) {
    if entry.begin_close() {
        match tokio::time::timeout(timeout, entry.connection().close(reason)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(
                    connection = %entry.id(),
                    error = %e,
                    "Connection failed to close cleanly"
                );
            }
            Err(_) => {
                tracing::warn!(
                    connection = %entry.id(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Connection close timed out"
                );
            }
        }
    }

    entry.mark_closed();
}

impl<C: Connection> Default for ConnectionRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}
