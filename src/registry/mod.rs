//! Connection registry for frame fan-out
//!
//! The registry owns every live client connection from registration until
//! removal. The broadcaster never iterates it directly; it takes a snapshot
//! and delivers to that, so connections may come and go mid-broadcast.
//!
//! # Architecture
//!
//! ```text
//!                     Arc<ConnectionRegistry>
//!                 ┌──────────────────────────────┐
//!                 │ entries: HashMap<Id,         │
//!                 │   Arc<ConnectionEntry {      │
//!                 │     connection: C,           │
//!                 │     state: Open|Closing|..,  │
//!                 │   }>                         │
//!                 │ >                            │
//!                 └──────────────┬───────────────┘
//!                                │
//!      ┌─────────────────────────┼─────────────────────────┐
//!      │                         │                         │
//!      ▼                         ▼                         ▼
//! [transport]              [Broadcaster]              [Lifecycle]
//! register()/unregister()  snapshot() → send()        close_all()
//! ```

pub mod connection;
pub mod entry;
pub mod error;
pub mod store;

pub use connection::{CloseReason, Connection, ConnectionId, SendError};
pub use entry::{ConnectionEntry, ConnectionState};
pub use error::RegistryError;
pub use store::ConnectionRegistry;
