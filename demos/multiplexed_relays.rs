//! Several relays sharing one WebSocket port
//!
//! Run with: cargo run --example multiplexed_relays [WS_PORT]
//!
//! Each relay gets its own ephemeral UDP port and its own path on WS_PORT
//! (default 9000):
//!
//!   ws://127.0.0.1:9000/feeds/raw     datagrams as sent
//!   ws://127.0.0.1:9000/feeds/upper   datagrams as upper-case text
//!
//! The UDP ports are printed on startup. Clients on an unknown path are
//! disconnected without a handshake.

use bytes::Bytes;
use udp2ws::{
    identity, transform_fn, AdapterOptions, HandlerBinding, Outgoing, StreamServerOptions,
    Udp2WsAdapter,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let ws_port: u16 = match std::env::args().nth(1) {
        Some(s) => s.parse()?,
        None => 9000,
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("udp2ws=debug".parse()?)
                .add_directive("multiplexed_relays=debug".parse()?),
        )
        .init();

    let adapter = Udp2WsAdapter::new(AdapterOptions::default().address("127.0.0.1"));

    let raw = adapter
        .create(ws_port, StreamServerOptions::with_path("/feeds/raw"))
        .await?;
    adapter.bind_message_handlers(
        &raw,
        vec![HandlerBinding::on_message(|payload, _| Ok(Some(payload.into())))],
        identity(),
    );

    let upper = adapter
        .create(ws_port, StreamServerOptions::with_path("/feeds/upper"))
        .await?;
    let to_text = HandlerBinding::on_message(|payload: Bytes, _| {
        let text = String::from_utf8_lossy(&payload).to_uppercase();
        Ok(Some(Outgoing::Text(text)))
    });
    // Drop blank lines before they reach clients
    let skip_blank = transform_fn(|output: Option<Outgoing>| {
        let output = output.filter(|o| match o {
            Outgoing::Text(text) => !text.trim().is_empty(),
            Outgoing::Binary(_) => true,
        });
        futures_util::stream::iter([output])
    });
    adapter.bind_message_handlers(&upper, vec![to_text], skip_blank);

    for relay in [&raw, &upper] {
        println!(
            "udp://{} -> ws://127.0.0.1:{}{}",
            relay.socket().local_addr()?,
            ws_port,
            relay.path().unwrap_or("/")
        );
    }
    println!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");

    adapter.close(&raw).await?;
    adapter.close(&upper).await?;
    let closed = adapter.dispose().await;
    println!("Closed {} front door(s)", closed);

    Ok(())
}
