//! Relay: one datagram socket paired with one stream server

use std::sync::Arc;
use std::time::Duration;

use crate::datagram::DatagramBinding;
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::server::StreamServer;

/// Who is responsible for closing a relay's stream server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerOwnership {
    /// Created for this relay; closed with it
    Owned,
    /// Path-scoped server on the external HTTP server; closed by registry disposal
    Shared,
    /// Supplied by the caller; never closed here
    External,
}

/// Where a path-scoped server is registered
#[derive(Debug, Clone)]
pub(crate) struct RelayRoute {
    pub(crate) registry: Arc<Registry>,
    pub(crate) port: u16,
    pub(crate) path: String,
}

/// A datagram socket and the stream server its output is broadcast on
///
/// Clones refer to the same socket and server.
#[derive(Debug, Clone)]
pub struct Relay {
    socket: DatagramBinding,
    server: StreamServer,
    ownership: ServerOwnership,
    route: Option<RelayRoute>,
    close_timeout: Duration,
}

impl Relay {
    pub(crate) fn new(
        socket: DatagramBinding,
        server: StreamServer,
        ownership: ServerOwnership,
        route: Option<RelayRoute>,
        close_timeout: Duration,
    ) -> Self {
        Self {
            socket,
            server,
            ownership,
            route,
            close_timeout,
        }
    }

    pub fn socket(&self) -> &DatagramBinding {
        &self.socket
    }

    pub fn server(&self) -> &StreamServer {
        &self.server
    }

    pub fn ownership(&self) -> ServerOwnership {
        self.ownership
    }

    /// Registered path (path-scoped servers)
    pub fn path(&self) -> Option<&str> {
        self.route.as_ref().map(|r| r.path.as_str())
    }

    /// Close the socket, and the server if this relay owns it
    ///
    /// An owned path-scoped server is also unregistered so its path can be
    /// reused. Closing twice is harmless.
    pub async fn close(&self) -> Result<()> {
        self.socket.close();

        if self.ownership != ServerOwnership::Owned {
            tracing::info!(ownership = ?self.ownership, "Relay closed, server kept");
            return Ok(());
        }

        if let Some(ref route) = self.route {
            route.registry.unregister_path(route.port, &route.path).await;
        }

        match tokio::time::timeout(self.close_timeout, self.server.close()).await {
            Ok(_) => {
                tracing::info!(path = self.path().unwrap_or("-"), "Relay closed");
                Ok(())
            }
            Err(_) => {
                tracing::warn!(
                    path = self.path().unwrap_or("-"),
                    "Stream server close timed out"
                );
                Err(Error::DisposalTimeout("stream server".into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdapterOptions;
    use crate::server::StreamServerConfig;

    async fn relay(ownership: ServerOwnership, route: Option<RelayRoute>) -> Relay {
        let socket = DatagramBinding::bind(&AdapterOptions::default().address("127.0.0.1"))
            .await
            .unwrap();
        let server = StreamServer::no_listen(StreamServerConfig::default().path("/a"));
        Relay::new(socket, server, ownership, route, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_external_server_survives_close() {
        let relay = relay(ServerOwnership::External, None).await;

        relay.close().await.unwrap();
        assert!(relay.socket().is_closed());
        assert!(!relay.server().is_closed());
    }

    #[tokio::test]
    async fn test_owned_server_unregistered_and_closed() {
        let registry = Arc::new(Registry::new());
        let route = RelayRoute {
            registry: Arc::clone(&registry),
            port: 9000,
            path: "/a".into(),
        };
        let relay = relay(ServerOwnership::Owned, Some(route)).await;
        registry
            .register_path(9000, "/a", relay.server().clone())
            .await
            .unwrap();

        relay.close().await.unwrap();

        assert!(relay.server().is_closed());
        assert!(registry.route(9000, "/a").await.is_none());

        // Second close is a no-op
        relay.close().await.unwrap();
    }
}
