//! Path-multiplexing front door
//!
//! One front door per port accepts upgrade requests, reads the request head,
//! and hands the connection to the stream server registered for the request
//! path. Requests for unknown paths are dropped without a handshake response.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, OwnedMutexGuard};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::registry::{PathTable, RegistryConfig};
use crate::shutdown::{ShutdownListener, ShutdownSignal};

use super::external::{ExternalHttpServer, IncomingConnection};
use super::upgrade::{read_request_head, RewindStream, UpgradeError, UpgradeRequest};

/// Where a front door gets its connections from
#[derive(Debug, Clone)]
pub enum FrontDoorSource {
    /// Listen on this address (managed front door)
    Listen(SocketAddr),
    /// Take connections from an external HTTP server
    External(ExternalHttpServer),
}

enum Acceptor {
    Listener(TcpListener),
    External(OwnedMutexGuard<mpsc::Receiver<IncomingConnection>>),
}

impl Acceptor {
    /// Next connection; `None` once the source is gone
    async fn accept(&mut self) -> Option<std::io::Result<IncomingConnection>> {
        match self {
            Acceptor::Listener(listener) => Some(
                listener
                    .accept()
                    .await
                    .map(|(socket, peer)| {
                        let _ = socket.set_nodelay(true);
                        IncomingConnection::new(socket, peer)
                    }),
            ),
            Acceptor::External(rx) => rx.recv().await.map(Ok),
        }
    }
}

/// Shared upgrade front door of one port
#[derive(Debug)]
pub struct FrontDoor {
    port: u16,
    local_addr: Option<SocketAddr>,
    shutdown: ShutdownSignal,
    task: JoinHandle<()>,
}

impl FrontDoor {
    /// Start accepting on `source`, routing through `table`
    pub(crate) async fn start(
        port: u16,
        source: FrontDoorSource,
        table: PathTable,
        config: &RegistryConfig,
    ) -> Result<Self> {
        let (acceptor, local_addr) = match source {
            FrontDoorSource::Listen(addr) => {
                let listener = TcpListener::bind(addr)
                    .await
                    .map_err(|e| Error::bind(addr, e))?;
                let local_addr = listener.local_addr()?;
                tracing::info!(port = port, addr = %local_addr, "Front door listening");
                (Acceptor::Listener(listener), Some(local_addr))
            }
            FrontDoorSource::External(http) => {
                let rx = http.attach()?;
                tracing::info!(port = port, "Front door attached to external HTTP server");
                (Acceptor::External(rx), None)
            }
        };

        let shutdown = ShutdownSignal::new();
        let task = tokio::spawn(accept_loop(
            port,
            acceptor,
            table,
            config.clone(),
            shutdown.subscribe(),
        ));

        Ok(Self {
            port,
            local_addr,
            shutdown,
            task,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Listening address (managed front doors only)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Whether this front door owns its listener
    pub fn is_managed(&self) -> bool {
        self.local_addr.is_some()
    }

    /// Stop accepting and wait for the accept loop to finish
    ///
    /// Connections already handed to a stream server are unaffected.
    pub async fn close(mut self, timeout: Duration) -> Result<()> {
        self.shutdown.trigger();

        match tokio::time::timeout(timeout, &mut self.task).await {
            Ok(_) => {
                tracing::info!(port = self.port, "Front door closed");
                Ok(())
            }
            Err(_) => {
                self.task.abort();
                tracing::warn!(port = self.port, "Front door close timed out");
                Err(Error::DisposalTimeout(format!("front door on port {}", self.port)))
            }
        }
    }
}

impl Drop for FrontDoor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_loop(
    port: u16,
    mut acceptor: Acceptor,
    table: PathTable,
    config: RegistryConfig,
    mut shutdown: ShutdownListener,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.wait() => break,
            accepted = acceptor.accept() => accepted,
        };

        match accepted {
            Some(Ok(connection)) => {
                let table = table.clone();
                let config = config.clone();
                tokio::spawn(async move {
                    let peer = connection.peer_addr;
                    if let Err(e) = intercept(connection, &table, &config).await {
                        tracing::debug!(port = port, peer = %peer, error = %e, "Upgrade rejected");
                    }
                });
            }
            Some(Err(e)) => {
                tracing::error!(port = port, error = %e, "Failed to accept connection");
            }
            None => {
                tracing::debug!(port = port, "Front door source closed");
                break;
            }
        }
    }
}

/// Read the upgrade request and hand the connection to the matching server
async fn intercept(
    connection: IncomingConnection,
    table: &PathTable,
    config: &RegistryConfig,
) -> std::result::Result<(), UpgradeError> {
    let IncomingConnection {
        mut stream,
        peer_addr,
        prefix,
    } = connection;

    let head = tokio::time::timeout(
        config.handshake_timeout,
        read_request_head(&mut stream, prefix, config.request_head_limit()),
    )
    .await
    .map_err(|_| UpgradeError::Incomplete)??;

    let path = route_path(&head)?;
    match table.lookup(&path).await {
        Some(server) => {
            tracing::debug!(peer = %peer_addr, path = %path, "Routing upgrade");
            server
                .handle_upgrade(RewindStream::new(head, stream), peer_addr)
                .await;
            Ok(())
        }
        None => Err(UpgradeError::NoRoute(path)),
    }
}

fn route_path(head: &Bytes) -> std::result::Result<String, UpgradeError> {
    let request = UpgradeRequest::parse(head)?;
    if !request.is_websocket_upgrade() {
        return Err(UpgradeError::NotUpgrade);
    }
    request.pathname()
}

/// Serve a single stream through the front door logic (used by tests)
#[cfg(test)]
pub(crate) async fn intercept_stream<S>(
    stream: S,
    peer_addr: SocketAddr,
    table: &PathTable,
) -> std::result::Result<(), UpgradeError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    intercept(
        IncomingConnection::new(stream, peer_addr),
        table,
        &RegistryConfig::default(),
    )
    .await
}
