//! HTTP upgrade request handling
//!
//! The front door reads the request head itself so it can pick a stream
//! server by path before any handshake happens. The bytes it consumed are then
//! replayed to the chosen server through `RewindStream`.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use url::Url;

/// Upper bound for an upgrade request head
pub const MAX_REQUEST_HEAD: usize = 16 * 1024;

/// Any bidirectional byte stream a WebSocket can run over
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<S> AsyncStream for S where S: AsyncRead + AsyncWrite + Unpin + Send {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Reasons an upgrade request is not routed
#[derive(Debug, thiserror::Error)]
pub enum UpgradeError {
    #[error("connection closed before the request head was complete")]
    Incomplete,

    #[error("request head exceeds {0} bytes")]
    HeadTooLarge(usize),

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("not a websocket upgrade request")]
    NotUpgrade,

    #[error("missing Host header")]
    MissingHost,

    #[error("no stream server registered for path {0}")]
    NoRoute(String),

    #[error("invalid request url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Parsed upgrade request head
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    pub method: String,
    pub target: String,
    pub version: String,
    /// Header names are lowercased
    pub headers: Vec<(String, String)>,
}

impl UpgradeRequest {
    /// Parse a complete request head (terminated by an empty line)
    pub fn parse(head: &[u8]) -> Result<Self, UpgradeError> {
        let end = find_head_end(head).ok_or(UpgradeError::Incomplete)?;
        let text = std::str::from_utf8(&head[..end])
            .map_err(|_| UpgradeError::Malformed("request head is not utf-8".into()))?;

        let mut lines = text.split("\r\n");
        let request_line = lines.next().unwrap_or_default();
        let mut parts = request_line.split_whitespace();

        let (method, target, version) = match (parts.next(), parts.next(), parts.next()) {
            (Some(method), Some(target), Some(version)) => (method, target, version),
            _ => {
                return Err(UpgradeError::Malformed(format!(
                    "invalid request line: {}",
                    request_line
                )))
            }
        };

        if !version.starts_with("HTTP/1.") {
            return Err(UpgradeError::Malformed(format!(
                "unsupported http version: {}",
                version
            )));
        }

        let mut headers = Vec::new();
        for line in lines.filter(|l| !l.is_empty()) {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| UpgradeError::Malformed(format!("invalid header: {}", line)))?;
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }

        Ok(Self {
            method: method.to_string(),
            target: target.to_string(),
            version: version.to_string(),
            headers,
        })
    }

    /// First value of a header (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    /// GET with `Upgrade: websocket`
    pub fn is_websocket_upgrade(&self) -> bool {
        self.method.eq_ignore_ascii_case("GET")
            && self
                .header("upgrade")
                .map(|v| {
                    v.split(',')
                        .any(|token| token.trim().eq_ignore_ascii_case("websocket"))
                })
                .unwrap_or(false)
    }

    /// URL path of the request target, resolved against `ws://<host>/`
    ///
    /// Fails without a Host header rather than guessing one.
    pub fn pathname(&self) -> Result<String, UpgradeError> {
        let host = self
            .header("host")
            .filter(|h| !h.is_empty())
            .ok_or(UpgradeError::MissingHost)?;
        let base = Url::parse(&format!("ws://{}/", host))?;
        let url = base.join(&self.target)?;
        Ok(url.path().to_string())
    }
}

/// Offset just past the blank line ending the head
pub(crate) fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| i + 4)
}

/// Read until the request head is complete
///
/// Returns everything read so far, including `prefix` and any bytes past the
/// head, so the caller can replay it.
pub(crate) async fn read_request_head<S>(
    stream: &mut S,
    prefix: Bytes,
    max_size: usize,
) -> Result<Bytes, UpgradeError>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let mut buf = BytesMut::with_capacity(1024.max(prefix.len()));
    buf.extend_from_slice(&prefix);

    loop {
        if find_head_end(&buf).is_some() {
            return Ok(buf.freeze());
        }
        if buf.len() >= max_size {
            return Err(UpgradeError::HeadTooLarge(max_size));
        }
        if stream.read_buf(&mut buf).await? == 0 {
            return Err(UpgradeError::Incomplete);
        }
    }
}

/// Stream that yields already-consumed bytes before reading from the inner stream
pub struct RewindStream<S> {
    prefix: Bytes,
    inner: S,
}

impl<S> RewindStream<S> {
    pub fn new(prefix: Bytes, inner: S) -> Self {
        Self { prefix, inner }
    }

    pub fn into_inner(self) -> (Bytes, S) {
        (self.prefix, self.inner)
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for RewindStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.prefix.is_empty() {
            let n = self.prefix.len().min(buf.remaining());
            buf.put_slice(&self.prefix[..n]);
            self.prefix.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for RewindStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;

    use super::*;

    const REQUEST: &[u8] = b"GET /a/?x=1 HTTP/1.1\r\n\
        Host: localhost:9000\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\r\n";

    #[test]
    fn test_parse_request() {
        let request = UpgradeRequest::parse(REQUEST).unwrap();

        assert_eq!(request.method, "GET");
        assert_eq!(request.target, "/a/?x=1");
        assert_eq!(request.header("HOST"), Some("localhost:9000"));
        assert!(request.is_websocket_upgrade());
        assert_eq!(request.pathname().unwrap(), "/a/");
    }

    #[test]
    fn test_absolute_target() {
        let request = UpgradeRequest::parse(
            b"GET ws://example.com/feed HTTP/1.1\r\nHost: other\r\nUpgrade: websocket\r\n\r\n",
        )
        .unwrap();
        assert_eq!(request.pathname().unwrap(), "/feed");
    }

    #[test]
    fn test_missing_host() {
        let request =
            UpgradeRequest::parse(b"GET /a HTTP/1.1\r\nUpgrade: websocket\r\n\r\n").unwrap();
        assert!(matches!(request.pathname(), Err(UpgradeError::MissingHost)));
    }

    #[test]
    fn test_not_upgrade() {
        let request = UpgradeRequest::parse(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        assert!(!request.is_websocket_upgrade());

        let request =
            UpgradeRequest::parse(b"POST / HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\n\r\n")
                .unwrap();
        assert!(!request.is_websocket_upgrade());
    }

    #[test]
    fn test_malformed() {
        assert!(matches!(
            UpgradeRequest::parse(b"GET\r\n\r\n"),
            Err(UpgradeError::Malformed(_))
        ));
        assert!(matches!(
            UpgradeRequest::parse(b"GET / SPDY/3\r\n\r\n"),
            Err(UpgradeError::Malformed(_))
        ));
        assert!(matches!(
            UpgradeRequest::parse(b"GET / HTTP/1.1\r\nHost"),
            Err(UpgradeError::Incomplete)
        ));
    }

    #[tokio::test]
    async fn test_read_head_keeps_trailing_bytes() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let mut payload = REQUEST.to_vec();
        payload.extend_from_slice(b"extra");
        client.write_all(&payload).await.unwrap();

        let head = read_request_head(&mut server, Bytes::new(), MAX_REQUEST_HEAD)
            .await
            .unwrap();
        assert!(head.starts_with(REQUEST));
        assert!(head.len() <= payload.len());
    }

    #[tokio::test]
    async fn test_read_head_with_prefix() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let (first, rest) = REQUEST.split_at(10);
        client.write_all(rest).await.unwrap();

        let head = read_request_head(&mut server, Bytes::copy_from_slice(first), MAX_REQUEST_HEAD)
            .await
            .unwrap();
        assert_eq!(&head[..], REQUEST);
    }

    #[tokio::test]
    async fn test_read_head_too_large() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            let _ = client.write_all(&[b'a'; 2048]).await;
        });

        let result = read_request_head(&mut server, Bytes::new(), 1024).await;
        assert!(matches!(result, Err(UpgradeError::HeadTooLarge(1024))));
    }

    #[tokio::test]
    async fn test_read_head_eof() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);

        let result = read_request_head(&mut server, Bytes::new(), 1024).await;
        assert!(matches!(result, Err(UpgradeError::Incomplete)));
    }

    #[tokio::test]
    async fn test_rewind_replays_prefix() {
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(b" world").await.unwrap();
        drop(client);

        let mut stream = RewindStream::new(Bytes::from_static(b"hello"), server);
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello world");
    }
}
