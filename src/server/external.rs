//! Externally owned HTTP server
//!
//! An application that runs its own HTTP stack hands upgrade connections to
//! the relay through an `UpgradeTap`. The matching `ExternalHttpServer` is
//! given to the adapter, which serves those connections on the sentinel port.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};

use crate::error::{Error, Result};

use super::upgrade::{AsyncStream, BoxedStream};

/// A connection taken over from an external HTTP server
pub struct IncomingConnection {
    pub(crate) stream: BoxedStream,
    pub(crate) peer_addr: SocketAddr,
    /// Bytes the external server already read from the stream
    pub(crate) prefix: Bytes,
}

impl IncomingConnection {
    pub fn new<S: AsyncStream + 'static>(stream: S, peer_addr: SocketAddr) -> Self {
        Self {
            stream: Box::new(stream),
            peer_addr,
            prefix: Bytes::new(),
        }
    }

    /// Replay `prefix` before reading from the stream
    pub fn with_prefix(mut self, prefix: impl Into<Bytes>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

impl std::fmt::Debug for IncomingConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingConnection")
            .field("peer_addr", &self.peer_addr)
            .field("prefix_len", &self.prefix.len())
            .finish()
    }
}

/// Sending half: the application offers connections here
#[derive(Debug, Clone)]
pub struct UpgradeTap {
    tx: mpsc::Sender<IncomingConnection>,
}

impl UpgradeTap {
    /// Hand a connection to the relay
    ///
    /// Gives the connection back if nothing serves the tap any more.
    pub async fn offer(
        &self,
        connection: IncomingConnection,
    ) -> std::result::Result<(), IncomingConnection> {
        self.tx.send(connection).await.map_err(|e| e.0)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half, attached to at most one front door at a time
#[derive(Debug, Clone)]
pub struct ExternalHttpServer {
    incoming: Arc<Mutex<mpsc::Receiver<IncomingConnection>>>,
}

impl ExternalHttpServer {
    pub(crate) fn attach(&self) -> Result<OwnedMutexGuard<mpsc::Receiver<IncomingConnection>>> {
        Arc::clone(&self.incoming)
            .try_lock_owned()
            .map_err(|_| Error::config("external HTTP server already attached"))
    }
}

/// Create a connected tap/server pair
pub fn channel(capacity: usize) -> (UpgradeTap, ExternalHttpServer) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        UpgradeTap { tx },
        ExternalHttpServer {
            incoming: Arc::new(Mutex::new(rx)),
        },
    )
}
