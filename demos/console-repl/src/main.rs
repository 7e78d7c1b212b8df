//! Line-oriented console for a remote debug port.
//!
//! Run with: cargo run -p console-repl-demo -- [host:port] [--json]
//!
//! Each line read from stdin is sent as one command. Responses, state
//! changes, and errors are printed from the event stream as they arrive.

use std::sync::Arc;

use anyhow::Context as _;
use futures::StreamExt;
use remote_console_core::{
    ConnectionConfig, ConnectionEvent, ConnectionManager, ConnectionState, EventStore,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

struct Args {
    config: ConnectionConfig,
    json: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut config = ConnectionConfig::default();
    let mut json = false;

    for arg in std::env::args().skip(1) {
        if arg == "--json" {
            json = true;
            continue;
        }
        let (host, port) = arg
            .rsplit_once(':')
            .with_context(|| format!("expected host:port, got {arg:?}"))?;
        config.host = host.to_string();
        config.port = port
            .parse()
            .with_context(|| format!("invalid port {port:?}"))?;
    }

    Ok(Args { config, json })
}

fn print_event(event: &ConnectionEvent) {
    match event {
        ConnectionEvent::StateChanged {
            state: ConnectionState::Disconnected,
            retry_in: Some(secs),
        } => println!("-- reconnecting in {secs:.0}s"),
        ConnectionEvent::StateChanged { state, .. } => println!("-- {state}"),
        ConnectionEvent::Response { payload } => println!("{payload}"),
        ConnectionEvent::Error { message, .. } => eprintln!("!! {message}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let Args { config, json } = parse_args()?;

    let events = Arc::new(EventStore::new());
    let manager = ConnectionManager::with_handler(config, Arc::clone(&events))?;

    // Forward events to the terminal.
    let mut stream = events.history_plus_stream();
    let printer = tokio::spawn(async move {
        while let Some(event) = stream.next().await {
            if json {
                match event.to_json() {
                    Ok(line) => println!("{line}"),
                    Err(e) => tracing::error!("Failed to serialize event: {e}"),
                }
            } else {
                print_event(&event);
            }
        }
    });

    manager.start();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = line.trim();
        match command {
            "" => {}
            "/quit" => break,
            "/status" => println!("-- {}", manager.status_line()),
            "/help" => {
                println!("-- /status  show connection status");
                println!("-- /quit    exit");
                println!("-- anything else is sent as a command");
            }
            _ => {
                if !manager.is_connected() {
                    println!("-- not connected; command queued");
                }
                // The response itself is printed by the event printer.
                if let Err(e) = manager.execute(command).await {
                    tracing::debug!("command produced no response: {e}");
                }
            }
        }
    }

    manager.stop().await;
    printer.abort();

    Ok(())
}
