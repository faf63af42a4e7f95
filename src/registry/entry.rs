//! Connection entry and state types
//!
//! This module defines the per-connection state stored in the registry.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::time::Instant;

use super::connection::{Connection, ConnectionId};

/// Liveness state of a connection
///
/// Transitions only move forward: `Open → Closing → Closed`, or straight
/// from `Open` to `Closed` when a send fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Receiving broadcast frames
    Open,
    /// Orderly close in progress
    Closing,
    /// Terminal
    Closed,
}

impl ConnectionState {
    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Open => 0,
            ConnectionState::Closing => 1,
            ConnectionState::Closed => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Open,
            1 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Entry for a single connection in the registry
pub struct ConnectionEntry<C> {
    id: ConnectionId,
    connection: C,
    state: AtomicU8,
    missed_frames: AtomicU32,
    /// When the connection was registered
    pub registered_at: Instant,
}

impl<C: Connection> ConnectionEntry<C> {
    pub(super) fn new(id: ConnectionId, connection: C) -> Self {
        Self {
            id,
            connection,
            state: AtomicU8::new(ConnectionState::Open.as_u8()),
            missed_frames: AtomicU32::new(0),
            registered_at: Instant::now(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The transport handle
    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Frames dropped in a row because the send timed out
    pub fn missed_frames(&self) -> u32 {
        self.missed_frames.load(Ordering::Acquire)
    }

    /// Count one more timed-out send, returning the new streak length
    pub(crate) fn record_missed_frame(&self) -> u32 {
        self.missed_frames.fetch_add(1, Ordering::AcqRel).saturating_add(1)
    }

    /// A completed send ends the streak
    pub(crate) fn reset_missed_frames(&self) {
        self.missed_frames.store(0, Ordering::Release);
    }

    /// Move `Open → Closing`
    ///
    /// Returns false if the connection already left `Open`.
    pub fn begin_close(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Open.as_u8(),
                ConnectionState::Closing.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Move to the terminal `Closed` state
    ///
    /// Returns false if the connection was already closed.
    pub fn mark_closed(&self) -> bool {
        let prev = self
            .state
            .swap(ConnectionState::Closed.as_u8(), Ordering::AcqRel);
        prev != ConnectionState::Closed.as_u8()
    }
}

impl<C> std::fmt::Debug for ConnectionEntry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionEntry")
            .field("id", &self.id)
            .field("state", &ConnectionState::from_u8(self.state.load(Ordering::Acquire)))
            .field("missed_frames", &self.missed_frames.load(Ordering::Acquire))
            .field("registered_at", &self.registered_at)
            .finish()
    }
}
