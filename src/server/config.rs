//! Stream server configuration

use std::time::Duration;

use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

use crate::config::DEFAULT_CLIENT_QUEUE_CAPACITY;
use crate::registry::normalize_path;

use super::stream_server::StreamServer;

/// Settings of a single WebSocket stream server
#[derive(Debug, Clone)]
pub struct StreamServerConfig {
    /// Normalized path this server is reachable under (path-scoped servers only)
    pub path: Option<String>,

    /// Pass-through protocol settings
    pub websocket: Option<WebSocketConfig>,

    /// Handshake must complete within this time
    pub handshake_timeout: Duration,

    /// Capacity of the connection/error event channels
    pub event_capacity: usize,

    /// Per-client outbound queue; messages for a full queue are dropped
    pub client_queue_capacity: usize,

    /// Enable TCP_NODELAY on accepted connections (standalone servers)
    pub tcp_nodelay: bool,
}

impl Default for StreamServerConfig {
    fn default() -> Self {
        Self {
            path: None,
            websocket: None,
            handshake_timeout: Duration::from_secs(10),
            event_capacity: 1024,
            client_queue_capacity: DEFAULT_CLIENT_QUEUE_CAPACITY,
            tcp_nodelay: true, // Relay traffic is latency sensitive
        }
    }
}

impl StreamServerConfig {
    /// Set the path (normalized)
    pub fn path(mut self, path: &str) -> Self {
        self.path = Some(normalize_path(path));
        self
    }

    pub fn websocket(mut self, config: Option<WebSocketConfig>) -> Self {
        self.websocket = config;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn client_queue_capacity(mut self, capacity: usize) -> Self {
        self.client_queue_capacity = capacity.max(1);
        self
    }

    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }

    pub(crate) fn channel_capacity(&self) -> usize {
        self.event_capacity.max(1)
    }

    pub(crate) fn queue_capacity(&self) -> usize {
        self.client_queue_capacity.max(1)
    }
}

/// Stream-server part of a relay request
///
/// `server` hands in an externally owned server which the relay never
/// closes. `path` selects path-multiplexed mode.
#[derive(Debug, Clone, Default)]
pub struct StreamServerOptions {
    pub server: Option<StreamServer>,
    pub path: Option<String>,
    pub websocket: Option<WebSocketConfig>,
}

impl StreamServerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for a path-scoped server
    pub fn with_path(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    /// Options reusing an externally owned server
    pub fn with_server(server: StreamServer) -> Self {
        Self {
            server: Some(server),
            ..Default::default()
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn server(mut self, server: StreamServer) -> Self {
        self.server = Some(server);
        self
    }

    pub fn websocket(mut self, config: WebSocketConfig) -> Self {
        self.websocket = Some(config);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StreamServerConfig::default();

        assert!(config.path.is_none());
        assert!(config.websocket.is_none());
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert!(config.tcp_nodelay);
    }

    #[test]
    fn test_path_is_normalized() {
        let config = StreamServerConfig::default().path("feeds/a/");
        assert_eq!(config.path.as_deref(), Some("/feeds/a"));
    }

    #[test]
    fn test_builder_chaining() {
        let config = StreamServerConfig::default()
            .path("/x")
            .handshake_timeout(Duration::from_secs(3))
            .event_capacity(0)
            .tcp_nodelay(false);

        assert_eq!(config.path.as_deref(), Some("/x"));
        assert_eq!(config.handshake_timeout, Duration::from_secs(3));
        assert_eq!(config.event_capacity, 1);
        assert!(!config.tcp_nodelay);
    }

    #[test]
    fn test_zero_capacities_clamped_on_use() {
        let mut config = StreamServerConfig::default();
        config.event_capacity = 0;
        config.client_queue_capacity = 0;

        assert_eq!(config.channel_capacity(), 1);
        assert_eq!(config.queue_capacity(), 1);
    }

    #[test]
    fn test_options_builders() {
        let options = StreamServerOptions::with_path("/a");
        assert_eq!(options.path.as_deref(), Some("/a"));
        assert!(options.server.is_none());

        let options = StreamServerOptions::new().path("b");
        assert_eq!(options.path.as_deref(), Some("b"));
    }
}
