//! UDP to WebSocket relay
//!
//! Datagrams received on a UDP socket are passed through message handlers
//! and broadcast to every open client of a WebSocket stream server. Several
//! stream servers can share one port, each reachable under its own path.
//!
//! # Example
//!
//! ```no_run
//! use udp2ws::{identity, AdapterOptions, HandlerBinding, StreamServerOptions, Udp2WsAdapter};
//!
//! # async fn run() -> udp2ws::Result<()> {
//! let adapter = Udp2WsAdapter::new(AdapterOptions::with_port(41234));
//!
//! // WebSocket clients connect to ws://host:8080/feed
//! let relay = adapter.create(8080, StreamServerOptions::with_path("/feed")).await?;
//!
//! let echo = HandlerBinding::on_message(|payload, _remote| Ok(Some(payload.into())));
//! adapter.bind_message_handlers(&relay, vec![echo], identity());
//!
//! tokio::signal::ctrl_c().await?;
//! adapter.close(&relay).await?;
//! adapter.dispose().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! ```text
//!   UDP ──► DatagramBinding ──► MessagePipeline ──► StreamServer ──► WS clients
//!                                                        ▲
//!   TCP ──► FrontDoor (per port) ── path lookup ─────────┘
//!                 ▲
//!              Registry
//! ```

pub mod config;
pub mod datagram;
pub mod error;
pub mod registry;
pub mod relay;
pub mod server;
pub mod shutdown;

pub use config::{AdapterOptions, BindOptions, SocketOptions, SocketType, MAX_DATAGRAM_SIZE};
pub use datagram::{Datagram, DatagramBinding, RemoteInfo};
pub use error::{Error, Result};
pub use registry::{normalize_path, Registry, RegistryConfig, RegistryError};
pub use relay::{
    bind_error_handler, identity, transform_fn, Delivery, HandlerBinding, InFlightPolicy,
    MessagePipeline, Outgoing, Relay, ServerOwnership, Transform, Udp2WsAdapter,
    UNDERLYING_HTTP_SERVER_PORT,
};
pub use server::{
    ClientHandle, ExternalHttpServer, IncomingConnection, ReadyState, StreamServer,
    StreamServerConfig, StreamServerOptions, UpgradeTap,
};
