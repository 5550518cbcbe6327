//! Datagram event types

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use bytes::Bytes;

/// Event name carrying received datagrams
pub const MESSAGE_EVENT: &str = "message";
/// Event name fired once the socket is bound
pub const LISTENING_EVENT: &str = "listening";
/// Event name fired once the socket is closed
pub const CLOSE_EVENT: &str = "close";
/// Event name carrying transport errors
pub const ERROR_EVENT: &str = "error";

/// Sender metadata accompanying a received datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteInfo {
    pub address: IpAddr,
    pub port: u16,
    /// Payload length in bytes
    pub size: usize,
}

impl RemoteInfo {
    pub fn new(addr: SocketAddr, size: usize) -> Self {
        Self {
            address: addr.ip(),
            port: addr.port(),
            size,
        }
    }

    /// Address family as reported to handlers ("IPv4" / "IPv6")
    pub fn family(&self) -> &'static str {
        match self.address {
            IpAddr::V4(_) => "IPv4",
            IpAddr::V6(_) => "IPv6",
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

impl fmt::Display for RemoteInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

/// A received datagram
///
/// Cheap to clone: the payload is reference counted.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub payload: Bytes,
    pub remote: RemoteInfo,
}

impl Datagram {
    pub fn new(payload: Bytes, from: SocketAddr) -> Self {
        let remote = RemoteInfo::new(from, payload.len());
        Self { payload, remote }
    }
}
