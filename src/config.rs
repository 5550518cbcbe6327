//! Adapter configuration
//!
//! `AdapterOptions` describes the datagram side of every relay an adapter
//! creates, plus a few knobs for the WebSocket front doors it manages.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

use crate::error::Error;

/// Largest payload a UDP datagram can carry
pub const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Default per-client outbound queue length
pub const DEFAULT_CLIENT_QUEUE_CAPACITY: usize = 256;

/// Datagram socket family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SocketType {
    /// IPv4 (`udp4`)
    #[default]
    Udp4,
    /// IPv6 (`udp6`)
    Udp6,
}

impl SocketType {
    /// Wildcard address used when no bind address is configured
    pub fn unspecified(&self) -> IpAddr {
        match self {
            SocketType::Udp4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            SocketType::Udp6 => IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED),
        }
    }

    pub fn is_ipv6(&self) -> bool {
        matches!(self, SocketType::Udp6)
    }
}

impl FromStr for SocketType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "udp4" => Ok(SocketType::Udp4),
            "udp6" => Ok(SocketType::Udp6),
            other => Err(Error::config(format!("unknown socket type: {}", other))),
        }
    }
}

impl fmt::Display for SocketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketType::Udp4 => f.write_str("udp4"),
            SocketType::Udp6 => f.write_str("udp6"),
        }
    }
}

/// Raw socket options applied before binding
///
/// When present, `socket_type` here takes precedence over
/// `AdapterOptions::socket_type`.
#[derive(Debug, Clone, Default)]
pub struct SocketOptions {
    pub socket_type: SocketType,
    /// SO_REUSEADDR
    pub reuse_addr: bool,
    /// IPV6_V6ONLY (udp6 only)
    pub ipv6_only: bool,
    /// SO_RCVBUF (None = OS default)
    pub recv_buffer_size: Option<usize>,
    /// SO_SNDBUF (None = OS default)
    pub send_buffer_size: Option<usize>,
}

impl SocketOptions {
    pub fn new(socket_type: SocketType) -> Self {
        Self {
            socket_type,
            ..Default::default()
        }
    }

    pub fn reuse_addr(mut self, reuse: bool) -> Self {
        self.reuse_addr = reuse;
        self
    }

    pub fn ipv6_only(mut self, only: bool) -> Self {
        self.ipv6_only = only;
        self
    }

    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = Some(size);
        self
    }

    pub fn send_buffer_size(mut self, size: usize) -> Self {
        self.send_buffer_size = Some(size);
        self
    }
}

/// Bind-time overrides
///
/// Fields that are set override the adapter's `port` and `address`.
#[derive(Debug, Clone, Default)]
pub struct BindOptions {
    pub port: Option<u16>,
    pub address: Option<String>,
    /// SO_REUSEPORT (unix only)
    pub reuse_port: bool,
}

/// Options shared by every relay an adapter creates
#[derive(Debug, Clone)]
pub struct AdapterOptions {
    /// Socket family (ignored when `socket_options` is set)
    pub socket_type: SocketType,

    /// UDP port to bind (None = ephemeral)
    pub port: Option<u16>,

    /// Bind address or host name (None = wildcard of the socket family)
    pub address: Option<String>,

    /// Raw socket options
    pub socket_options: Option<SocketOptions>,

    /// Bind overrides
    pub bind_options: Option<BindOptions>,

    /// Multicast group joined once the socket is bound
    pub multicast_address: Option<String>,

    /// Interface used for the multicast join (IPv4 address or IPv6 scope id)
    pub multicast_interface: Option<String>,

    /// Address managed front doors and standalone stream servers listen on
    pub listen_address: IpAddr,

    /// Receive buffer for a single datagram
    pub recv_buffer_size: usize,

    /// Upper bound for reading an upgrade request and completing the handshake
    pub handshake_timeout: Duration,

    /// Upper bound for any close operation
    pub close_timeout: Duration,

    /// Capacity of the message/event broadcast channels
    pub event_capacity: usize,

    /// Outbound messages queued per WebSocket client before new ones are dropped
    pub client_queue_capacity: usize,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            socket_type: SocketType::Udp4,
            port: None,
            address: None,
            socket_options: None,
            bind_options: None,
            multicast_address: None,
            multicast_interface: None,
            listen_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            recv_buffer_size: MAX_DATAGRAM_SIZE,
            handshake_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(5),
            event_capacity: 1024,
            client_queue_capacity: DEFAULT_CLIENT_QUEUE_CAPACITY,
        }
    }
}

impl AdapterOptions {
    /// Create options binding the given UDP port
    pub fn with_port(port: u16) -> Self {
        Self {
            port: Some(port),
            ..Default::default()
        }
    }

    pub fn socket_type(mut self, socket_type: SocketType) -> Self {
        self.socket_type = socket_type;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn socket_options(mut self, options: SocketOptions) -> Self {
        self.socket_options = Some(options);
        self
    }

    pub fn bind_options(mut self, options: BindOptions) -> Self {
        self.bind_options = Some(options);
        self
    }

    /// Join `group` on `interface` once bound
    pub fn multicast(mut self, group: impl Into<String>, interface: Option<String>) -> Self {
        self.multicast_address = Some(group.into());
        self.multicast_interface = interface;
        self
    }

    pub fn listen_address(mut self, addr: IpAddr) -> Self {
        self.listen_address = addr;
        self
    }

    /// Set datagram receive buffer (capped at the UDP maximum)
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size.clamp(1, MAX_DATAGRAM_SIZE);
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn client_queue_capacity(mut self, capacity: usize) -> Self {
        self.client_queue_capacity = capacity.max(1);
        self
    }

    /// Broadcast channel capacity, valid even if the field was set to 0
    pub(crate) fn channel_capacity(&self) -> usize {
        self.event_capacity.max(1)
    }

    /// Datagram receive buffer length, kept within `1..=MAX_DATAGRAM_SIZE`
    pub(crate) fn datagram_buffer_size(&self) -> usize {
        self.recv_buffer_size.clamp(1, MAX_DATAGRAM_SIZE)
    }

    /// Effective socket family
    pub fn effective_socket_type(&self) -> SocketType {
        self.socket_options
            .as_ref()
            .map(|o| o.socket_type)
            .unwrap_or(self.socket_type)
    }

    /// Effective bind port (bind options win)
    pub fn effective_port(&self) -> u16 {
        self.bind_options
            .as_ref()
            .and_then(|b| b.port)
            .or(self.port)
            .unwrap_or(0)
    }

    /// Effective bind address (bind options win)
    pub fn effective_address(&self) -> Option<&str> {
        self.bind_options
            .as_ref()
            .and_then(|b| b.address.as_deref())
            .or(self.address.as_deref())
    }
}
