//! Datagram socket lifecycle

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::config::AdapterOptions;
use crate::error::{Error, Result};
use crate::shutdown::{ShutdownListener, ShutdownSignal};

use super::event::{Datagram, MESSAGE_EVENT};
use super::socket::{new_udp_socket, parse_ipv6_interface, resolve_bind_addr};

struct BindingInner {
    /// None once closed
    socket: Mutex<Option<Arc<UdpSocket>>>,
    local_addr: SocketAddr,
    ready_tx: watch::Sender<Option<SocketAddr>>,
    closed: ShutdownSignal,
    messages: broadcast::Sender<Datagram>,
    errors: broadcast::Sender<Arc<io::Error>>,
    recv_task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for BindingInner {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.recv_task).take() {
            task.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A bound UDP socket and its event channels
///
/// Clones share the same socket.
#[derive(Clone)]
pub struct DatagramBinding {
    inner: Arc<BindingInner>,
}

impl DatagramBinding {
    /// Create and bind a socket as described by `options`
    ///
    /// Ready fires once the OS confirmed the bind. Only then is the
    /// multicast group joined, after which the receive loop starts.
    pub async fn bind(options: &AdapterOptions) -> Result<Self> {
        let addr = resolve_bind_addr(options).await?;
        let std_socket = new_udp_socket(options, addr).map_err(|e| Error::bind(addr, e))?;
        let socket = UdpSocket::from_std(std_socket).map_err(|e| Error::bind(addr, e))?;
        let local_addr = socket.local_addr()?;
        let socket = Arc::new(socket);

        let (ready_tx, _) = watch::channel(None);
        let (messages, _) = broadcast::channel(options.channel_capacity());
        let (errors, _) = broadcast::channel(options.channel_capacity());

        let binding = Self {
            inner: Arc::new(BindingInner {
                socket: Mutex::new(Some(Arc::clone(&socket))),
                local_addr,
                ready_tx,
                closed: ShutdownSignal::new(),
                messages,
                errors,
                recv_task: Mutex::new(None),
            }),
        };

        binding.inner.ready_tx.send_replace(Some(local_addr));
        tracing::info!(addr = %local_addr, "Datagram socket bound");

        if let Some(ref group) = options.multicast_address {
            if let Err(e) = binding.add_membership(group, options.multicast_interface.as_deref()) {
                binding.close();
                return Err(e);
            }
        }

        let task = tokio::spawn(recv_loop(
            socket,
            binding.inner.messages.clone(),
            binding.inner.errors.clone(),
            options.datagram_buffer_size(),
        ));
        *lock(&binding.inner.recv_task) = Some(task);

        Ok(binding)
    }

    fn socket(&self) -> Result<Arc<UdpSocket>> {
        lock(&self.inner.socket).clone().ok_or(Error::NotBound)
    }

    /// Local address the socket is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket().map(|_| self.inner.local_addr)
    }

    /// Wait for the ready event
    ///
    /// Resolves immediately once the socket is bound. Fails with `NotBound`
    /// if the binding was closed.
    pub async fn ready(&self) -> Result<SocketAddr> {
        if self.is_closed() {
            return Err(Error::NotBound);
        }
        let mut rx = self.inner.ready_tx.subscribe();
        let addr = *rx
            .wait_for(|addr| addr.is_some())
            .await
            .map_err(|_| Error::NotBound)?;
        addr.ok_or(Error::NotBound)
    }

    /// Subscribe to received datagrams
    pub fn subscribe_messages(&self) -> broadcast::Receiver<Datagram> {
        self.inner.messages.subscribe()
    }

    /// Subscribe to a payload-carrying event by name
    ///
    /// Only `"message"` carries datagrams; other names yield `None`.
    pub fn subscribe(&self, event: &str) -> Option<broadcast::Receiver<Datagram>> {
        if event == MESSAGE_EVENT {
            Some(self.subscribe_messages())
        } else {
            None
        }
    }

    /// Subscribe to receive-side transport errors
    pub fn subscribe_errors(&self) -> broadcast::Receiver<Arc<io::Error>> {
        self.inner.errors.subscribe()
    }

    /// Single-fire closed signal
    pub fn closed_signal(&self) -> ShutdownListener {
        self.inner.closed.subscribe()
    }

    /// Wait for the close event
    pub async fn closed(&self) {
        self.closed_signal().wait().await;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_triggered()
    }

    /// Send a datagram
    pub async fn send_to(&self, payload: &[u8], target: SocketAddr) -> Result<usize> {
        let socket = self.socket()?;
        Ok(socket.send_to(payload, target).await?)
    }

    /// Join a multicast group
    ///
    /// For IPv4 groups `interface` is the local interface address; for IPv6
    /// groups it is a numeric scope id.
    pub fn add_membership(&self, group: &str, interface: Option<&str>) -> Result<()> {
        let socket = self.socket()?;
        let group_ip = parse_group(group)?;

        let result = match group_ip {
            IpAddr::V4(group_v4) => {
                let iface = parse_ipv4_interface(interface)?;
                socket.join_multicast_v4(group_v4, iface)
            }
            IpAddr::V6(group_v6) => {
                let scope = parse_ipv6_interface(interface)?;
                socket.join_multicast_v6(&group_v6, scope)
            }
        };

        result.map_err(|source| Error::Multicast {
            group: group.to_string(),
            source,
        })?;

        tracing::info!(
            group = group,
            interface = interface.unwrap_or("default"),
            "Joined multicast group"
        );
        Ok(())
    }

    /// Leave a multicast group
    pub fn drop_membership(&self, group: &str, interface: Option<&str>) -> Result<()> {
        let socket = self.socket()?;
        let group_ip = parse_group(group)?;

        let result = match group_ip {
            IpAddr::V4(group_v4) => {
                let iface = parse_ipv4_interface(interface)?;
                socket.leave_multicast_v4(group_v4, iface)
            }
            IpAddr::V6(group_v6) => {
                let scope = parse_ipv6_interface(interface)?;
                socket.leave_multicast_v6(&group_v6, scope)
            }
        };

        result.map_err(|source| Error::Multicast {
            group: group.to_string(),
            source,
        })
    }

    /// Close the socket and fire the close event
    ///
    /// Returns false if the binding was already closed.
    pub fn close(&self) -> bool {
        let socket = lock(&self.inner.socket).take();
        if socket.is_none() {
            return false;
        }

        self.inner.closed.trigger();

        if let Some(task) = lock(&self.inner.recv_task).take() {
            task.abort();
        }

        tracing::info!(addr = %self.inner.local_addr, "Datagram socket closed");
        true
    }
}

impl std::fmt::Debug for DatagramBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatagramBinding")
            .field("local_addr", &self.inner.local_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn parse_group(group: &str) -> Result<IpAddr> {
    let ip: IpAddr = group
        .parse()
        .map_err(|_| Error::config(format!("invalid multicast address: {}", group)))?;
    if !ip.is_multicast() {
        return Err(Error::config(format!("{} is not a multicast address", group)));
    }
    Ok(ip)
}

fn parse_ipv4_interface(interface: Option<&str>) -> Result<Ipv4Addr> {
    match interface {
        Some(iface) => iface
            .parse()
            .map_err(|_| Error::config(format!("invalid multicast interface: {}", iface))),
        None => Ok(Ipv4Addr::UNSPECIFIED),
    }
}

const RECV_BACKOFF_MIN: Duration = Duration::from_millis(10);
const RECV_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Errors that say nothing about the socket itself
fn is_transient(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
    )
}

/// Delay after the `failures`-th consecutive receive error
fn recv_backoff(failures: u32) -> Duration {
    let exp = failures.saturating_sub(1).min(16);
    RECV_BACKOFF_MIN
        .saturating_mul(1 << exp)
        .min(RECV_BACKOFF_MAX)
}

async fn recv_loop(
    socket: Arc<UdpSocket>,
    messages: broadcast::Sender<Datagram>,
    errors: broadcast::Sender<Arc<io::Error>>,
    buffer_size: usize,
) {
    let mut buf = vec![0u8; buffer_size];
    let mut failures: u32 = 0;

    loop {
        match socket.recv_from(&mut buf).await {
            Ok((n, from)) => {
                failures = 0;
                let datagram = Datagram::new(Bytes::copy_from_slice(&buf[..n]), from);
                tracing::trace!(from = %from, size = n, "Datagram received");
                // No receivers is fine: nothing is bound to this socket yet.
                let _ = messages.send(datagram);
            }
            Err(e) if is_transient(e.kind()) => {
                tracing::debug!(error = %e, "Transient datagram receive error");
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                let delay = recv_backoff(failures);
                tracing::warn!(
                    error = %e,
                    failures = failures,
                    retry_in_ms = delay.as_millis() as u64,
                    "Datagram receive error"
                );
                let _ = errors.send(Arc::new(e));
                tokio::time::sleep(delay).await;
            }
        }
    }
}
