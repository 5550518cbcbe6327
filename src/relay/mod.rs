//! Relays and the adapter that builds them
//!
//! A `Relay` pairs one datagram socket with one stream server. The
//! `Udp2WsAdapter` decides where that server comes from (standalone, behind
//! a managed front door, on the external HTTP server, or supplied by the
//! caller) and a `MessagePipeline` carries datagrams over to it.

pub mod adapter;
pub mod bridge;
pub mod handler;
pub mod message;
pub mod pipeline;

pub use adapter::{bind_error_handler, Udp2WsAdapter, UNDERLYING_HTTP_SERVER_PORT};
pub use bridge::{Relay, ServerOwnership};
pub use handler::{identity, transform_fn, HandlerBinding, MessageCallback, Transform};
pub use message::{Delivery, Outgoing};
pub use pipeline::{InFlightPolicy, MessagePipeline};
