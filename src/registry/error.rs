//! Registry error types

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The registry was closed by `close_all` and accepts no new connections
    #[error("Registry is closed")]
    Closed,
}
