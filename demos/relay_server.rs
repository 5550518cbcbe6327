//! UDP to WebSocket relay
//!
//! Run with: cargo run --example relay_server [UDP_PORT] [WS_PORT]
//!
//! Examples:
//!   cargo run --example relay_server                # UDP 41234 -> ws://0.0.0.0:3000
//!   cargo run --example relay_server 5000 8080      # UDP 5000  -> ws://0.0.0.0:8080
//!
//! ## Sending datagrams
//!
//!   echo -n "hello" | nc -u -w0 127.0.0.1 41234
//!
//! ## Receiving
//!
//!   websocat ws://127.0.0.1:3000/
//!
//! Every datagram is forwarded unchanged, as a binary frame, to all
//! connected WebSocket clients.

use udp2ws::{identity, AdapterOptions, HandlerBinding, StreamServerOptions, Udp2WsAdapter};

fn parse_port(arg: Option<&String>, default: u16) -> Result<u16, String> {
    match arg {
        Some(s) => s.parse().map_err(|_| format!("Invalid port: {}", s)),
        None => Ok(default),
    }
}

fn print_usage() {
    eprintln!("Usage: relay_server [UDP_PORT] [WS_PORT]");
    eprintln!();
    eprintln!("Defaults: UDP_PORT=41234 WS_PORT=3000");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let udp_port = parse_port(args.get(1), 41234);
    let ws_port = parse_port(args.get(2), 3000);
    let (udp_port, ws_port) = match (udp_port, ws_port) {
        (Ok(udp), Ok(ws)) => (udp, ws),
        (Err(e), _) | (_, Err(e)) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("udp2ws=debug".parse()?)
                .add_directive("relay_server=debug".parse()?),
        )
        .init();

    let adapter = Udp2WsAdapter::new(AdapterOptions::with_port(udp_port));
    let relay = adapter.create(ws_port, StreamServerOptions::new()).await?;

    let forward = HandlerBinding::on_message(|payload, remote| {
        tracing::debug!(remote = %remote, bytes = payload.len(), "Datagram received");
        Ok(Some(payload.into()))
    });
    adapter.bind_message_handlers(&relay, vec![forward], identity());

    adapter.bind_client_connect(&relay, |relay| {
        if let Ok(addr) = relay.socket().local_addr() {
            println!("Relaying udp://{} -> WebSocket clients", addr);
        }
    });

    println!("WebSocket clients: ws://0.0.0.0:{}/", ws_port);
    println!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");

    adapter.close(&relay).await?;
    adapter.dispose().await;

    Ok(())
}
