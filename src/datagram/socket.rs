use std::io;
use std::net::{IpAddr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};

use crate::config::AdapterOptions;
use crate::error::{Error, Result};

/// Resolve the address the datagram socket binds to
pub(crate) async fn resolve_bind_addr(options: &AdapterOptions) -> Result<SocketAddr> {
    let socket_type = options.effective_socket_type();
    let port = options.effective_port();

    let Some(address) = options.effective_address() else {
        return Ok(SocketAddr::new(socket_type.unspecified(), port));
    };

    if let Ok(ip) = address.parse::<IpAddr>() {
        if ip.is_ipv6() != socket_type.is_ipv6() {
            return Err(Error::config(format!(
                "{} is not a {} address",
                address, socket_type
            )));
        }
        return Ok(SocketAddr::new(ip, port));
    }

    let candidates = tokio::net::lookup_host((address, port))
        .await
        .map_err(|e| Error::bind(address, e))?;

    for candidate in candidates {
        if candidate.is_ipv6() == socket_type.is_ipv6() {
            return Ok(candidate);
        }
    }

    Err(Error::config(format!(
        "{} does not resolve to a {} address",
        address, socket_type
    )))
}

/// Create and bind a non-blocking UDP socket with the configured options
pub(crate) fn new_udp_socket(
    options: &AdapterOptions,
    addr: SocketAddr,
) -> io::Result<std::net::UdpSocket> {
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

    if let Some(ref socket_options) = options.socket_options {
        if socket_options.reuse_addr {
            socket.set_reuse_address(true)?;
        }
        if addr.is_ipv6() && socket_options.ipv6_only {
            socket.set_only_v6(true)?;
        }
        if let Some(size) = socket_options.recv_buffer_size {
            socket.set_recv_buffer_size(size)?;
        }
        if let Some(size) = socket_options.send_buffer_size {
            socket.set_send_buffer_size(size)?;
        }
    }

    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    {
        let reuse_port = options
            .bind_options
            .as_ref()
            .map(|b| b.reuse_port)
            .unwrap_or(false);
        if reuse_port {
            socket.set_reuse_port(true)?;
        }
    }

    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;

    Ok(socket.into())
}

/// Parse the IPv6 multicast interface (scope id)
///
/// Accepts a bare index ("3") or an address with a numeric zone ("::%3").
pub(crate) fn parse_ipv6_interface(interface: Option<&str>) -> Result<u32> {
    let Some(interface) = interface else {
        return Ok(0);
    };
    let scope = interface.rsplit('%').next().unwrap_or(interface);
    scope.parse::<u32>().map_err(|_| {
        Error::config(format!(
            "unsupported IPv6 multicast interface: {}",
            interface
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BindOptions, SocketType};

    #[tokio::test]
    async fn test_resolve_defaults_to_wildcard() {
        let addr = resolve_bind_addr(&AdapterOptions::default()).await.unwrap();
        assert_eq!(addr, "0.0.0.0:0".parse::<SocketAddr>().unwrap());

        let options = AdapterOptions::with_port(41234).socket_type(SocketType::Udp6);
        let addr = resolve_bind_addr(&options).await.unwrap();
        assert_eq!(addr, "[::]:41234".parse::<SocketAddr>().unwrap());
    }

    #[tokio::test]
    async fn test_resolve_bind_options_win() {
        let options = AdapterOptions::with_port(1).address("10.0.0.1").bind_options(BindOptions {
            port: Some(2),
            address: Some("127.0.0.1".into()),
            reuse_port: false,
        });
        let addr = resolve_bind_addr(&options).await.unwrap();
        assert_eq!(addr, "127.0.0.1:2".parse::<SocketAddr>().unwrap());
    }

    #[tokio::test]
    async fn test_resolve_rejects_family_mismatch() {
        let options = AdapterOptions::default()
            .socket_type(SocketType::Udp6)
            .address("127.0.0.1");
        assert!(matches!(
            resolve_bind_addr(&options).await,
            Err(Error::Config(_))
        ));

        let options = AdapterOptions::default().address("::1");
        assert!(matches!(
            resolve_bind_addr(&options).await,
            Err(Error::Config(_))
        ));

        let options = AdapterOptions::default()
            .socket_type(SocketType::Udp6)
            .address("::1");
        let addr = resolve_bind_addr(&options).await.unwrap();
        assert_eq!(addr, "[::1]:0".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn test_ipv6_interface() {
        assert_eq!(parse_ipv6_interface(None).unwrap(), 0);
        assert_eq!(parse_ipv6_interface(Some("3")).unwrap(), 3);
        assert_eq!(parse_ipv6_interface(Some("::%7")).unwrap(), 7);
        assert!(parse_ipv6_interface(Some("::%eth0")).is_err());
    }

    #[test]
    fn test_new_udp_socket_ephemeral() {
        let options = AdapterOptions::default();
        let socket = new_udp_socket(&options, "127.0.0.1:0".parse().unwrap()).unwrap();
        assert_ne!(socket.local_addr().unwrap().port(), 0);
    }
}
