//! End-to-end relay scenarios over loopback sockets

use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::broadcast;
use tokio_test::{assert_err, assert_ok};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use udp2ws::server::{channel, IncomingConnection};
use udp2ws::{
    identity, AdapterOptions, ClientHandle, Error, HandlerBinding, Relay, StreamServerOptions,
    Udp2WsAdapter, UNDERLYING_HTTP_SERVER_PORT,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn options() -> AdapterOptions {
    AdapterOptions::default()
        .address("127.0.0.1")
        .listen_address("127.0.0.1".parse().unwrap())
}

fn echo() -> HandlerBinding {
    HandlerBinding::on_message(|payload, _| Ok(Some(payload.into())))
}

async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn send_datagram(relay: &Relay, payload: &[u8]) {
    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let target = relay.socket().local_addr().unwrap();
    sender.send_to(payload, target).await.unwrap();
}

async fn wait_connected(rx: &mut broadcast::Receiver<ClientHandle>) -> ClientHandle {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("no connection event")
        .unwrap()
}

#[tokio::test]
async fn test_paths_on_one_port_are_isolated() {
    init_tracing();
    let adapter = Udp2WsAdapter::new(options());
    let port = free_port().await;

    let relay_a = assert_ok!(adapter.create(port, StreamServerOptions::with_path("/a")).await);
    let relay_b = assert_ok!(adapter.create(port, StreamServerOptions::with_path("b")).await);
    adapter.bind_message_handlers(&relay_a, vec![echo()], identity());
    adapter.bind_message_handlers(&relay_b, vec![echo()], identity());

    let mut connections_a = relay_a.server().subscribe_connections();
    let mut connections_b = relay_b.server().subscribe_connections();

    let (mut ws_a, _) = connect_async(format!("ws://127.0.0.1:{}/a", port)).await.unwrap();
    let (mut ws_b, _) = connect_async(format!("ws://127.0.0.1:{}/b/", port)).await.unwrap();
    wait_connected(&mut connections_a).await;
    wait_connected(&mut connections_b).await;

    send_datagram(&relay_a, b"for-a").await;

    let received = tokio::time::timeout(Duration::from_secs(2), ws_a.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(received, Message::Binary(b"for-a".to_vec()));

    let nothing = tokio::time::timeout(Duration::from_millis(300), ws_b.next()).await;
    assert!(nothing.is_err(), "/b client received relay A output");

    adapter.dispose().await;
}

#[tokio::test]
async fn test_unknown_path_refused() {
    init_tracing();
    let adapter = Udp2WsAdapter::new(options());
    let port = free_port().await;
    let _relay = assert_ok!(adapter.create(port, StreamServerOptions::with_path("/a")).await);

    let result = connect_async(format!("ws://127.0.0.1:{}/c", port)).await;
    assert!(result.is_err());

    adapter.dispose().await;
}

#[tokio::test]
async fn test_sentinel_port_requires_path_or_server() {
    let adapter = Udp2WsAdapter::new(options());

    let error = assert_err!(
        adapter
            .create(UNDERLYING_HTTP_SERVER_PORT, StreamServerOptions::new())
            .await
    );
    assert!(matches!(error, Error::Config(_)));
}

#[tokio::test]
async fn test_dispose_closes_front_doors_once() {
    init_tracing();
    let adapter = Udp2WsAdapter::new(options());
    let first = free_port().await;
    let relay_a = assert_ok!(adapter.create(first, StreamServerOptions::with_path("/a")).await);
    let second = free_port().await;
    let relay_b = assert_ok!(adapter.create(second, StreamServerOptions::with_path("/a")).await);

    assert_eq!(adapter.dispose().await, 2);
    assert_eq!(adapter.registry().port_count().await, 0);
    assert!(relay_a.server().is_closed());
    assert!(relay_b.server().is_closed());
    assert!(connect_async(format!("ws://127.0.0.1:{}/a", first)).await.is_err());

    assert_eq!(adapter.dispose().await, 0);
}

#[tokio::test]
async fn test_no_broadcast_after_close() {
    init_tracing();
    let adapter = Udp2WsAdapter::new(options());
    let port = free_port().await;
    let relay = assert_ok!(adapter.create(port, StreamServerOptions::with_path("/a")).await);
    let pipeline = adapter.bind_message_handlers(&relay, vec![echo()], identity());
    let mut deliveries = pipeline.subscribe_deliveries();

    let mut connections = relay.server().subscribe_connections();
    let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{}/a", port)).await.unwrap();
    wait_connected(&mut connections).await;

    let udp_addr = relay.socket().local_addr().unwrap();
    assert_ok!(adapter.close(&relay).await);

    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let _ = sender.send_to(b"late", udp_addr).await;

    // The client only sees the closing handshake
    while let Ok(Some(message)) = tokio::time::timeout(Duration::from_secs(2), ws.next()).await {
        match message {
            Ok(Message::Binary(data)) => panic!("broadcast after close: {:?}", data),
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }
    assert!(deliveries.try_recv().is_err());

    tokio::time::timeout(Duration::from_secs(2), pipeline.join())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_handler_failure_does_not_stop_relay() {
    init_tracing();
    let adapter = Udp2WsAdapter::new(options());
    let port = free_port().await;
    let relay = assert_ok!(adapter.create(port, StreamServerOptions::new()).await);

    let picky = HandlerBinding::on_message(|payload, _| {
        if payload.as_ref() == b"bad" {
            anyhow::bail!("rejected payload");
        }
        Ok(Some(payload.into()))
    });
    adapter.bind_message_handlers(&relay, vec![picky], identity());

    let mut connections = relay.server().subscribe_connections();
    let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{}/", port)).await.unwrap();
    wait_connected(&mut connections).await;

    send_datagram(&relay, b"bad").await;
    send_datagram(&relay, b"good").await;

    let received = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(received, Message::Binary(b"good".to_vec()));

    assert_ok!(adapter.close(&relay).await);
}

#[tokio::test]
async fn test_external_http_server() {
    init_tracing();
    let (tap, http) = channel(8);
    let adapter = Udp2WsAdapter::with_http_server(http, options());
    let relay = assert_ok!(
        adapter
            .create(UNDERLYING_HTTP_SERVER_PORT, StreamServerOptions::with_path("/live"))
            .await
    );
    adapter.bind_message_handlers(&relay, vec![echo()], identity());

    // The application owns the listener and hands connections over
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, peer)) = listener.accept().await {
            if tap.offer(IncomingConnection::new(stream, peer)).await.is_err() {
                break;
            }
        }
    });

    let mut connections = relay.server().subscribe_connections();
    let (mut ws, _) = connect_async(format!("ws://{}/live", addr)).await.unwrap();
    let client = wait_connected(&mut connections).await;
    assert_eq!(client.request().path(), "/live");

    send_datagram(&relay, b"shared").await;
    let received = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(received, Message::Binary(b"shared".to_vec()));

    // External front doors are not counted, but the shared server is closed
    assert_eq!(adapter.dispose().await, 0);
    assert!(relay.server().is_closed());
}
