//! Error types
//!
//! Fatal errors (bind failures, invalid configuration) are returned to the
//! caller. Transport and handler errors are logged where they occur and never
//! surface here.

use std::io;

use crate::registry::RegistryError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-level error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The OS refused to bind or listen on an address
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Operation on a datagram socket that was closed (or never bound)
    #[error("socket is not bound")]
    NotBound,

    /// Joining or leaving a multicast group failed
    #[error("multicast membership for {group} failed: {source}")]
    Multicast {
        group: String,
        #[source]
        source: io::Error,
    },

    /// Configuration cannot be turned into a relay
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Path table error
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A close operation did not finish within the configured bound
    #[error("timed out closing {0}")]
    DisposalTimeout(String),

    /// WebSocket protocol error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn bind(addr: impl ToString, source: io::Error) -> Self {
        Error::Bind {
            addr: addr.to_string(),
            source,
        }
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_error_display() {
        let err = Error::bind(
            "0.0.0.0:41234",
            io::Error::new(io::ErrorKind::AddrInUse, "address in use"),
        );
        assert_eq!(
            err.to_string(),
            "failed to bind 0.0.0.0:41234: address in use"
        );
    }

    #[test]
    fn test_registry_error_is_transparent() {
        let err: Error = RegistryError::DuplicatePath {
            port: 9000,
            path: "/a".into(),
        }
        .into();
        assert_eq!(err.to_string(), "path /a already registered on port 9000");
    }
}
