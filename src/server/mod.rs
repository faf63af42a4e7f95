//! Broadcast server lifecycle
//!
//! Ties the capture worker, the broadcaster, and the connection registry
//! together and owns their startup and shutdown.

pub mod config;
pub mod lifecycle;

pub use config::ServerConfig;
pub use lifecycle::{BroadcastServer, LifecycleState};
