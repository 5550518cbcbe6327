//! Connected stream-server clients

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::http::{HeaderMap, Method, Uri};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::shutdown::{ShutdownListener, ShutdownSignal};

/// Connection state of a client, mirroring the WebSocket readyState values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ReadyState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }
}

/// The upgrade request a client connected with
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

impl ConnectRequest {
    pub fn path(&self) -> &str {
        self.uri.path()
    }
}

pub type ClientError = Arc<WsError>;

struct ClientInner {
    id: u64,
    peer_addr: SocketAddr,
    request: ConnectRequest,
    state: AtomicU8,
    tx: mpsc::Sender<Message>,
    closing: ShutdownSignal,
    /// Set while the queue is full, cleared by the next queued message
    lagging: AtomicBool,
    dropped: AtomicU64,
    errors: broadcast::Sender<ClientError>,
}

/// Handle to one connected client
///
/// Sending only queues the message; a per-connection task writes it out.
/// The queue is bounded: while a slow client's queue is full, new messages
/// for it are dropped.
#[derive(Clone)]
pub struct ClientHandle {
    inner: Arc<ClientInner>,
}

impl ClientHandle {
    pub(crate) fn new(
        id: u64,
        peer_addr: SocketAddr,
        request: ConnectRequest,
        tx: mpsc::Sender<Message>,
        error_capacity: usize,
    ) -> Self {
        let (errors, _) = broadcast::channel(error_capacity);
        Self {
            inner: Arc::new(ClientInner {
                id,
                peer_addr,
                request,
                state: AtomicU8::new(ReadyState::Connecting as u8),
                tx,
                closing: ShutdownSignal::new(),
                lagging: AtomicBool::new(false),
                dropped: AtomicU64::new(0),
                errors,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    /// The original upgrade request
    pub fn request(&self) -> &ConnectRequest {
        &self.inner.request
    }

    pub fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }

    pub(crate) fn set_state(&self, state: ReadyState) {
        self.inner.state.store(state as u8, Ordering::Release);
    }

    /// Queue a message
    ///
    /// Returns false if the client is not open, its queue is full or its
    /// writer is gone.
    pub fn send(&self, message: Message) -> bool {
        if !self.is_open() {
            return false;
        }

        match self.inner.tx.try_send(message) {
            Ok(()) => {
                self.inner.lagging.store(false, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                let dropped = self.inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if !self.inner.lagging.swap(true, Ordering::Relaxed) {
                    tracing::warn!(
                        client_id = self.inner.id,
                        peer = %self.inner.peer_addr,
                        dropped = dropped,
                        "Client queue full, dropping messages"
                    );
                }
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Messages dropped because the queue was full
    pub fn dropped_messages(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Start the closing handshake
    pub fn close(&self) {
        if self.is_open() {
            self.set_state(ReadyState::Closing);
            // A full queue loses the frame; the writer closes the sink anyway
            let _ = self.inner.tx.try_send(Message::Close(None));
            self.inner.closing.trigger();
        }
    }

    pub(crate) fn closing_signal(&self) -> ShutdownListener {
        self.inner.closing.subscribe()
    }

    /// Subscribe to this connection's transport errors
    pub fn subscribe_errors(&self) -> broadcast::Receiver<ClientError> {
        self.inner.errors.subscribe()
    }

    pub(crate) fn report_error(&self, error: WsError) {
        tracing::debug!(
            client_id = self.inner.id,
            peer = %self.inner.peer_addr,
            error = %error,
            "Client transport error"
        );
        let _ = self.inner.errors.send(Arc::new(error));
    }
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.inner.id)
            .field("peer_addr", &self.inner.peer_addr)
            .field("state", &self.ready_state())
            .finish()
    }
}
