//! Standalone stream server listener
//!
//! Handles the TCP accept loop and spawns one handshake task per connection.

use std::net::SocketAddr;
use std::sync::Weak;

use tokio::net::{TcpListener, TcpStream};

use super::stream_server::{ServerInner, StreamServer};

/// Accept connections until the server is dropped or its task is aborted
pub(super) async fn accept_loop(listener: TcpListener, server: Weak<ServerInner>) {
    loop {
        let accepted = listener.accept().await;

        let Some(server) = StreamServer::from_weak(&server) else {
            return;
        };
        if server.is_closed() {
            return;
        }

        match accepted {
            Ok((socket, peer_addr)) => handle_connection(server, socket, peer_addr),
            Err(e) => {
                tracing::error!(error = %e, "Failed to accept connection");
                server.report_error(e);
            }
        }
    }
}

fn handle_connection(server: StreamServer, socket: TcpStream, peer_addr: SocketAddr) {
    tracing::debug!(peer = %peer_addr, "New connection");

    if let Err(e) = configure_socket(&server, &socket) {
        tracing::error!(error = %e, "Failed to configure socket");
        return;
    }

    tokio::spawn(async move {
        server.handle_upgrade(socket, peer_addr).await;
    });
}

fn configure_socket(server: &StreamServer, socket: &TcpStream) -> std::io::Result<()> {
    if server.config().tcp_nodelay {
        socket.set_nodelay(true)?;
    }
    Ok(())
}
