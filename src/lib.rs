//! # framecast
//!
//! Core of a live-frame broadcast server: a single capture source produces
//! frames on a dedicated thread, each frame is encoded and fanned out to
//! every connected streaming client.
//!
//! ```text
//!   [FrameSource] ──read()──► [Encoder] ──► CaptureEvent ──mpsc──► [Broadcaster]
//!   (capture thread)                                                     │
//!                                                        registry.snapshot()
//!                                                                        │
//!                                          ┌─────────────────────────────┼───────────┐
//!                                          ▼                             ▼           ▼
//!                                     conn.send()                  conn.send()  conn.send()
//! ```
//!
//! The transport layer that accepts and upgrades client connections is not
//! part of this crate. It implements [`Connection`] and calls
//! [`ConnectionRegistry::register`] / [`ConnectionRegistry::unregister`]
//! around its own accept and teardown.
//!
//! # Example
//! ```no_run
//! use bytes::Bytes;
//! use framecast::{BroadcastServer, ChannelConnection, FrameSource, IdentityEncoder, ServerConfig};
//!
//! struct Pattern(u8);
//!
//! impl FrameSource for Pattern {
//!     type Frame = Bytes;
//!
//!     fn read(&mut self) -> Option<Bytes> {
//!         self.0 = self.0.wrapping_add(1);
//!         Some(Bytes::from(vec![self.0; 64]))
//!     }
//!
//!     fn release(&mut self) {}
//! }
//!
//! # async fn example() -> framecast::Result<()> {
//! let server = BroadcastServer::<ChannelConnection>::new(ServerConfig::default());
//! server
//!     .run_until(Pattern(0), IdentityEncoder, async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! # }
//! ```

pub mod broadcast;
pub mod capture;
pub mod channel;
pub mod error;
pub mod frame;
pub mod registry;
pub mod server;
pub mod stats;

#[cfg(test)]
pub(crate) mod test_util;

pub use broadcast::{BroadcastReport, Broadcaster};
pub use capture::{
    CaptureExit, CaptureHandle, CaptureLoop, CaptureState, Encoder, FrameSource, IdentityEncoder,
};
pub use channel::{ChannelConnection, Outbound};
pub use error::{Error, Result};
pub use frame::{CaptureEvent, Frame};
pub use registry::{
    CloseReason, Connection, ConnectionEntry, ConnectionId, ConnectionRegistry, ConnectionState,
    RegistryError, SendError,
};
pub use server::{BroadcastServer, LifecycleState, ServerConfig};
pub use stats::{BroadcastStats, StatsSnapshot};
