//! UDP to WebSocket adapter
//!
//! Creates relays, binds handlers and lifecycle hooks to them, and disposes
//! of everything it registered.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

use crate::config::AdapterOptions;
use crate::datagram::DatagramBinding;
use crate::error::{Error, Result};
use crate::registry::{Registry, RegistryConfig};
use crate::server::{
    ClientHandle, ExternalHttpServer, FrontDoorSource, StreamServer, StreamServerConfig,
    StreamServerOptions,
};

use super::bridge::{Relay, RelayRoute, ServerOwnership};
use super::handler::{HandlerBinding, Transform};
use super::pipeline::{InFlightPolicy, MessagePipeline};

/// Port value selecting the external HTTP server
pub const UNDERLYING_HTTP_SERVER_PORT: u16 = 0;

/// Stream server prepared for a relay, before the socket is paired with it
struct ServerSetup {
    server: StreamServer,
    ownership: ServerOwnership,
    route: Option<RelayRoute>,
}

impl ServerSetup {
    /// Undo the setup after the socket failed to bind
    async fn discard(self) {
        if let Some(ref route) = self.route {
            route.registry.unregister_path(route.port, &route.path).await;
        }
        if self.ownership != ServerOwnership::External {
            self.server.close().await;
        }
    }
}

/// Builds relays from datagram sockets and WebSocket stream servers
#[derive(Debug)]
pub struct Udp2WsAdapter {
    options: AdapterOptions,
    registry: Arc<Registry>,
    http_server: Option<ExternalHttpServer>,
    in_flight: InFlightPolicy,
}

impl Udp2WsAdapter {
    /// Create an adapter without an external HTTP server
    pub fn new(options: AdapterOptions) -> Self {
        let registry = Registry::with_config(
            RegistryConfig::default()
                .handshake_timeout(options.handshake_timeout)
                .close_timeout(options.close_timeout),
        );

        Self {
            options,
            registry: Arc::new(registry),
            http_server: None,
            in_flight: InFlightPolicy::default(),
        }
    }

    /// Create an adapter serving the sentinel port on `http_server`
    pub fn with_http_server(http_server: ExternalHttpServer, options: AdapterOptions) -> Self {
        Self {
            http_server: Some(http_server),
            ..Self::new(options)
        }
    }

    /// Policy for transform streams in flight when a relay closes
    pub fn in_flight_policy(mut self, policy: InFlightPolicy) -> Self {
        self.in_flight = policy;
        self
    }

    pub fn options(&self) -> &AdapterOptions {
        &self.options
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Create a relay
    ///
    /// The datagram socket is bound while the stream server is set up. If
    /// either side fails the other is released again.
    pub async fn create(&self, port: u16, server_options: StreamServerOptions) -> Result<Relay> {
        let (socket, setup) = tokio::join!(
            DatagramBinding::bind(&self.options),
            self.create_stream_server(port, server_options)
        );

        match (socket, setup) {
            (Ok(socket), Ok(setup)) => {
                tracing::info!(
                    port = port,
                    udp = ?socket.local_addr().ok(),
                    path = setup.route.as_ref().map(|r| r.path.as_str()).unwrap_or("-"),
                    ownership = ?setup.ownership,
                    "Relay created"
                );
                Ok(Relay::new(
                    socket,
                    setup.server,
                    setup.ownership,
                    setup.route,
                    self.options.close_timeout,
                ))
            }
            (Ok(socket), Err(e)) => {
                socket.close();
                Err(e)
            }
            (Err(e), Ok(setup)) => {
                setup.discard().await;
                Err(e)
            }
            (Err(e), Err(_)) => Err(e),
        }
    }

    async fn create_stream_server(
        &self,
        port: u16,
        options: StreamServerOptions,
    ) -> Result<ServerSetup> {
        let StreamServerOptions {
            server,
            path,
            websocket,
        } = options;

        if port == UNDERLYING_HTTP_SERVER_PORT && path.is_none() && server.is_none() {
            return Err(Error::config("port 0 needs a path or an existing stream server"));
        }

        if port == UNDERLYING_HTTP_SERVER_PORT {
            if let (Some(http), Some(path)) = (&self.http_server, path.as_deref()) {
                self.registry
                    .ensure_front_door(port, FrontDoorSource::External(http.clone()))
                    .await?;
                return self
                    .register_path_server(port, path, websocket, ServerOwnership::Shared)
                    .await;
            }
        }

        if let Some(server) = server {
            return Ok(ServerSetup {
                server,
                ownership: ServerOwnership::External,
                route: None,
            });
        }

        match path {
            Some(_) if port == UNDERLYING_HTTP_SERVER_PORT => {
                Err(Error::config("a path on port 0 needs an external HTTP server"))
            }
            Some(path) => {
                let addr = SocketAddr::new(self.options.listen_address, port);
                self.registry
                    .ensure_front_door(port, FrontDoorSource::Listen(addr))
                    .await?;
                self.register_path_server(port, &path, websocket, ServerOwnership::Owned)
                    .await
            }
            None => {
                let addr = SocketAddr::new(self.options.listen_address, port);
                let server = StreamServer::listen(addr, self.server_config(websocket)).await?;
                Ok(ServerSetup {
                    server: bind_error_handler(server),
                    ownership: ServerOwnership::Owned,
                    route: None,
                })
            }
        }
    }

    async fn register_path_server(
        &self,
        port: u16,
        path: &str,
        websocket: Option<WebSocketConfig>,
        ownership: ServerOwnership,
    ) -> Result<ServerSetup> {
        let server =
            bind_error_handler(StreamServer::no_listen(self.server_config(websocket).path(path)));

        let path = match self.registry.register_path(port, path, server.clone()).await {
            Ok(path) => path,
            Err(e) => {
                server.close().await;
                return Err(e);
            }
        };

        Ok(ServerSetup {
            server,
            ownership,
            route: Some(RelayRoute {
                registry: Arc::clone(&self.registry),
                port,
                path,
            }),
        })
    }

    fn server_config(&self, websocket: Option<WebSocketConfig>) -> StreamServerConfig {
        StreamServerConfig::default()
            .websocket(websocket)
            .handshake_timeout(self.options.handshake_timeout)
            .event_capacity(self.options.event_capacity)
            .client_queue_capacity(self.options.client_queue_capacity)
    }

    /// Subscribe handlers to the relay's socket events
    pub fn bind_message_handlers(
        &self,
        relay: &Relay,
        handlers: Vec<HandlerBinding>,
        transform: Transform,
    ) -> MessagePipeline {
        MessagePipeline::bind_with_policy(relay, handlers, transform, self.in_flight)
    }

    /// Run `callback` once the relay's socket is ready
    pub fn bind_client_connect<F>(&self, relay: &Relay, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Relay) + Send + 'static,
    {
        let relay = relay.clone();
        tokio::spawn(async move {
            if relay.socket().ready().await.is_ok() {
                callback(relay);
            }
        })
    }

    /// Run `callback` once the relay's socket is closed
    pub fn bind_client_disconnect<F>(&self, relay: &Relay, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Relay) + Send + 'static,
    {
        let relay = relay.clone();
        tokio::spawn(async move {
            relay.socket().closed().await;
            callback(relay);
        })
    }

    /// Close a relay (its server only if the relay owns it)
    pub async fn close(&self, relay: &Relay) -> Result<()> {
        relay.close().await
    }

    /// Close every front door and path-scoped server this adapter registered
    ///
    /// Returns the number of managed front doors closed.
    pub async fn dispose(&self) -> usize {
        self.registry.dispose_all().await
    }
}

/// Log the server's errors and the transport errors of each of its clients
///
/// Must be called from within a Tokio runtime. The logging task ends with
/// the server.
pub fn bind_error_handler(server: StreamServer) -> StreamServer {
    let mut errors = server.subscribe_errors();
    let mut connections = server.subscribe_connections();
    let mut closed = server.closed_signal();
    let path = server.path().unwrap_or("-").to_string();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = closed.wait() => break,
                error = errors.recv() => match error {
                    Ok(e) => tracing::error!(path = %path, error = %e, "Stream server error"),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                },
                client = connections.recv() => match client {
                    Ok(client) => log_client_errors(&client),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                },
            }
        }
    });

    server
}

fn log_client_errors(client: &ClientHandle) {
    let mut errors = client.subscribe_errors();
    let client_id = client.id();
    let peer = client.peer_addr();

    tokio::spawn(async move {
        loop {
            match errors.recv().await {
                Ok(e) => {
                    tracing::error!(client_id = client_id, peer = %peer, error = %e, "Client error")
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use super::*;

    fn options() -> AdapterOptions {
        AdapterOptions::default()
            .address("127.0.0.1")
            .listen_address("127.0.0.1".parse().unwrap())
    }

    #[tokio::test]
    async fn test_sentinel_port_needs_path_or_server() {
        let adapter = Udp2WsAdapter::new(options());

        let result = adapter
            .create(UNDERLYING_HTTP_SERVER_PORT, StreamServerOptions::new())
            .await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_sentinel_path_without_http_server() {
        let adapter = Udp2WsAdapter::new(options());

        let result = adapter
            .create(UNDERLYING_HTTP_SERVER_PORT, StreamServerOptions::with_path("/a"))
            .await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_external_server_reused() {
        let adapter = Udp2WsAdapter::new(options());
        let server = StreamServer::no_listen(StreamServerConfig::default());

        let relay = adapter
            .create(9000, StreamServerOptions::with_server(server.clone()))
            .await
            .unwrap();
        assert_eq!(relay.ownership(), ServerOwnership::External);
        assert!(relay.server().ptr_eq(&server));

        adapter.close(&relay).await.unwrap();
        assert!(!server.is_closed());
    }

    #[tokio::test]
    async fn test_standalone_server_owned() {
        let adapter = Udp2WsAdapter::new(options());
        let port = free_port().await;

        let relay = adapter.create(port, StreamServerOptions::new()).await.unwrap();
        assert_eq!(relay.ownership(), ServerOwnership::Owned);
        assert_eq!(relay.server().local_addr().unwrap().port(), port);

        adapter.close(&relay).await.unwrap();
        assert!(relay.server().is_closed());
        assert!(relay.socket().is_closed());
    }

    #[tokio::test]
    async fn test_path_server_registered_on_managed_front_door() {
        let adapter = Udp2WsAdapter::new(options());
        let port = free_port().await;

        let relay = adapter
            .create(port, StreamServerOptions::with_path("feed/"))
            .await
            .unwrap();
        assert_eq!(relay.path(), Some("/feed"));
        assert!(adapter.registry().has_front_door(port).await);

        // Same path again is rejected, and the new socket is released
        let duplicate = adapter
            .create(port, StreamServerOptions::with_path("/feed"))
            .await;
        assert!(matches!(duplicate, Err(Error::Registry(_))));

        adapter.close(&relay).await.unwrap();
        assert!(adapter.registry().route(port, "/feed").await.is_none());
        assert_eq!(adapter.dispose().await, 1);
    }

    #[tokio::test]
    async fn test_shared_server_on_external_http() {
        let (_tap, http) = crate::server::channel(4);
        let adapter = Udp2WsAdapter::with_http_server(http, options());

        let relay = adapter
            .create(UNDERLYING_HTTP_SERVER_PORT, StreamServerOptions::with_path("/a"))
            .await
            .unwrap();
        assert_eq!(relay.ownership(), ServerOwnership::Shared);

        // Closing a relay keeps the shared server registered
        adapter.close(&relay).await.unwrap();
        assert!(!relay.server().is_closed());

        // External front doors do not count as managed
        assert_eq!(adapter.dispose().await, 0);
        assert!(relay.server().is_closed());
    }

    #[tokio::test]
    async fn test_connect_and_disconnect_hooks() {
        let adapter = Udp2WsAdapter::new(options());
        let server = StreamServer::no_listen(StreamServerConfig::default());
        let relay = adapter
            .create(9000, StreamServerOptions::with_server(server))
            .await
            .unwrap();

        let connected = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&connected);
        let on_connect = adapter.bind_client_connect(&relay, move |_| {
            flag.store(true, Ordering::SeqCst);
        });

        let disconnected = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&disconnected);
        let on_disconnect = adapter.bind_client_disconnect(&relay, move |relay| {
            assert!(relay.socket().is_closed());
            flag.store(true, Ordering::SeqCst);
        });

        on_connect.await.unwrap();
        assert!(connected.load(Ordering::SeqCst));
        assert!(!disconnected.load(Ordering::SeqCst));

        adapter.close(&relay).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), on_disconnect)
            .await
            .unwrap()
            .unwrap();
        assert!(disconnected.load(Ordering::SeqCst));
    }

    async fn free_port() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }
}
