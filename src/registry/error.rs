//! Registry error types
//!
//! Error types for path registration.

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The normalized path is already taken on this port
    #[error("path {path} already registered on port {port}")]
    DuplicatePath { port: u16, path: String },

    /// No front door or path table exists for the port
    #[error("no front door on port {0}")]
    UnknownPort(u16),
}
