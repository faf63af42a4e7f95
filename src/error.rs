//! Crate error types

use crate::registry::RegistryError;
use crate::server::LifecycleState;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O failure, e.g. the capture thread could not be spawned
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection registry rejected the operation
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Operation not allowed in the current lifecycle state
    #[error("Invalid server state: {state:?}")]
    InvalidState { state: LifecycleState },
}
