//! WebSocket side of the relay
//!
//! - `StreamServer`: tracks clients and broadcasts to the open ones. Either
//!   listens itself (standalone) or receives upgraded connections.
//! - `FrontDoor`: the shared upgrade interceptor of one port. Reads the
//!   request head, looks the path up in the port's `PathTable` and replays the
//!   consumed bytes to the chosen server.
//! - `UpgradeTap` / `ExternalHttpServer`: lets an application that owns the
//!   HTTP listener hand connections to a front door.

pub mod client;
pub mod config;
pub mod external;
pub mod front_door;
mod listener;
pub mod stream_server;
pub mod upgrade;

pub use client::{ClientError, ClientHandle, ConnectRequest, ReadyState};
pub use config::{StreamServerConfig, StreamServerOptions};
pub use external::{channel, ExternalHttpServer, IncomingConnection, UpgradeTap};
pub use front_door::{FrontDoor, FrontDoorSource};
pub use stream_server::{ServerError, StreamServer};
pub use upgrade::{RewindStream, UpgradeError, UpgradeRequest};
