//! WebSocket stream server
//!
//! A stream server tracks its connected clients and fans messages out to
//! them. It either owns a listener (standalone) or is fed upgraded
//! connections by a front door (no-listen mode).

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::error::{Error, Result};
use crate::shutdown::{ShutdownListener, ShutdownSignal};

use super::client::{ClientHandle, ConnectRequest, ReadyState};
use super::config::StreamServerConfig;
use super::listener;

pub type ServerError = Arc<io::Error>;

pub(super) struct ServerInner {
    config: StreamServerConfig,
    local_addr: Option<SocketAddr>,
    clients: RwLock<HashMap<u64, ClientHandle>>,
    next_client_id: AtomicU64,
    connections: broadcast::Sender<ClientHandle>,
    errors: broadcast::Sender<ServerError>,
    closed: ShutdownSignal,
    listener_task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ServerInner {
    fn drop(&mut self) {
        let task = self
            .listener_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

/// WebSocket stream server
///
/// Clones share the same client set.
#[derive(Clone)]
pub struct StreamServer {
    inner: Arc<ServerInner>,
}

impl StreamServer {
    fn with_parts(config: StreamServerConfig, local_addr: Option<SocketAddr>) -> Self {
        let (connections, _) = broadcast::channel(config.channel_capacity());
        let (errors, _) = broadcast::channel(config.channel_capacity());

        Self {
            inner: Arc::new(ServerInner {
                config,
                local_addr,
                clients: RwLock::new(HashMap::new()),
                next_client_id: AtomicU64::new(1),
                connections,
                errors,
                closed: ShutdownSignal::new(),
                listener_task: Mutex::new(None),
            }),
        }
    }

    /// Create a server that does not listen itself
    ///
    /// Connections are handed in through `handle_upgrade`.
    pub fn no_listen(config: StreamServerConfig) -> Self {
        Self::with_parts(config, None)
    }

    /// Create a standalone server listening on `addr`
    pub async fn listen(addr: SocketAddr, config: StreamServerConfig) -> Result<Self> {
        let tcp_listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::bind(addr, e))?;
        let local_addr = tcp_listener.local_addr()?;

        let server = Self::with_parts(config, Some(local_addr));
        let task = tokio::spawn(listener::accept_loop(
            tcp_listener,
            Arc::downgrade(&server.inner),
        ));
        *server
            .inner
            .listener_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(task);

        tracing::info!(addr = %local_addr, "Stream server listening");
        Ok(server)
    }

    pub(super) fn from_weak(inner: &Weak<ServerInner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    /// Path this server is registered under (path-scoped servers)
    pub fn path(&self) -> Option<&str> {
        self.inner.config.path.as_deref()
    }

    /// Listening address (standalone servers)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr
    }

    pub fn config(&self) -> &StreamServerConfig {
        &self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_triggered()
    }

    pub fn closed_signal(&self) -> ShutdownListener {
        self.inner.closed.subscribe()
    }

    /// Subscribe to connection events (one per completed handshake)
    pub fn subscribe_connections(&self) -> broadcast::Receiver<ClientHandle> {
        self.inner.connections.subscribe()
    }

    /// Subscribe to server-level errors
    pub fn subscribe_errors(&self) -> broadcast::Receiver<ServerError> {
        self.inner.errors.subscribe()
    }

    pub(super) fn report_error(&self, error: io::Error) {
        let _ = self.inner.errors.send(Arc::new(error));
    }

    /// Snapshot of connected clients
    pub async fn clients(&self) -> Vec<ClientHandle> {
        self.inner.clients.read().await.values().cloned().collect()
    }

    pub async fn client_count(&self) -> usize {
        self.inner.clients.read().await.len()
    }

    /// Same underlying server
    pub fn ptr_eq(&self, other: &StreamServer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Complete the WebSocket handshake on `stream` and serve the client
    ///
    /// Returns once the client is registered (or the handshake failed); the
    /// connection itself is served on a spawned task.
    pub async fn handle_upgrade<S>(&self, stream: S, peer_addr: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        if self.is_closed() {
            tracing::debug!(peer = %peer_addr, "Upgrade on closed server dropped");
            return;
        }

        let mut captured: Option<ConnectRequest> = None;
        let callback = |request: &Request, response: Response| {
            captured = Some(ConnectRequest {
                method: request.method().clone(),
                uri: request.uri().clone(),
                headers: request.headers().clone(),
            });
            Ok::<Response, ErrorResponse>(response)
        };

        let handshake = tokio_tungstenite::accept_hdr_async_with_config(
            stream,
            callback,
            self.inner.config.websocket,
        );

        let ws = match tokio::time::timeout(self.inner.config.handshake_timeout, handshake).await {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => {
                tracing::debug!(peer = %peer_addr, error = %e, "WebSocket handshake failed");
                return;
            }
            Err(_) => {
                tracing::debug!(peer = %peer_addr, "WebSocket handshake timed out");
                return;
            }
        };

        let Some(request) = captured else {
            return;
        };

        let id = self.inner.next_client_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.config.queue_capacity());
        let capacity = self.inner.config.channel_capacity();
        let client = ClientHandle::new(id, peer_addr, request, tx, capacity);

        self.inner.clients.write().await.insert(id, client.clone());

        // The server may have closed while the handshake was in flight
        if self.is_closed() {
            self.inner.clients.write().await.remove(&id);
            return;
        }

        client.set_state(ReadyState::Open);
        tracing::debug!(
            client_id = id,
            peer = %peer_addr,
            path = client.request().path(),
            "Client connected"
        );
        let _ = self.inner.connections.send(client.clone());

        tokio::spawn(serve_client(Arc::clone(&self.inner), client, ws, rx));
    }

    #[cfg(test)]
    pub(crate) async fn inject_client(&self, client: ClientHandle) {
        self.inner
            .clients
            .write()
            .await
            .insert(client.id(), client);
    }

    /// Send `message` to every open client
    ///
    /// Clients that are connecting, closing or closed are skipped. Returns the
    /// number of clients the message was queued for.
    pub async fn broadcast(&self, message: Message) -> usize {
        if self.is_closed() {
            return 0;
        }

        let clients = self.inner.clients.read().await;
        let mut delivered = 0;
        for client in clients.values() {
            if client.send(message.clone()) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Close the server
    ///
    /// Stops the listener (if any) and starts the closing handshake with every
    /// client. Returns false if it was already closed.
    pub async fn close(&self) -> bool {
        if !self.inner.closed.trigger() {
            return false;
        }

        let task = self
            .inner
            .listener_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
        }

        let clients: Vec<ClientHandle> = self
            .inner
            .clients
            .write()
            .await
            .drain()
            .map(|(_, client)| client)
            .collect();
        for client in &clients {
            client.close();
        }

        tracing::info!(
            path = self.path().unwrap_or("-"),
            addr = ?self.inner.local_addr,
            clients = clients.len(),
            "Stream server closed"
        );
        true
    }
}

impl std::fmt::Debug for StreamServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamServer")
            .field("path", &self.inner.config.path)
            .field("local_addr", &self.inner.local_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn serve_client<S>(
    inner: Arc<ServerInner>,
    client: ClientHandle,
    ws: WebSocketStream<S>,
    mut rx: mpsc::Receiver<Message>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut stream) = ws.split();
    let mut closed = inner.closed.subscribe();
    let mut closing = client.closing_signal();

    loop {
        tokio::select! {
            outgoing = rx.recv() => match outgoing {
                Some(message) => {
                    if let Err(e) = sink.send(message).await {
                        client.report_error(e);
                        break;
                    }
                }
                None => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) => {
                    client.set_state(ReadyState::Closing);
                    break;
                }
                // Inbound frames are not relayed; pings are answered by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    client.report_error(e);
                    break;
                }
                None => break,
            },
            _ = closed.wait() => {
                drain_queue(&mut sink, &mut rx).await;
                break;
            }
            _ = closing.wait() => {
                drain_queue(&mut sink, &mut rx).await;
                break;
            }
        }
    }

    let _ = sink.close().await;
    client.set_state(ReadyState::Closed);
    inner.clients.write().await.remove(&client.id());

    tracing::debug!(client_id = client.id(), peer = %client.peer_addr(), "Client disconnected");
}

/// Write out whatever was queued before the close, ending with the close frame
async fn drain_queue<K>(sink: &mut K, rx: &mut mpsc::Receiver<Message>)
where
    K: futures_util::Sink<Message> + Unpin,
{
    while let Ok(message) = rx.try_recv() {
        if sink.send(message).await.is_err() {
            break;
        }
    }
}
