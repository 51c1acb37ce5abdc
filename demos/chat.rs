//! Chat over an ActionCable server.
//!
//! Demonstrates:
//! - Opening a shared connection
//! - Subscribing a session with camelCase/snake_case conversion
//! - Queuing actions before the subscription is confirmed
//! - Reading lines from stdin and sending them
//!
//! Usage:
//!   cargo run --example chat
//!   cargo run --example chat -- ws://localhost:3000/cable lobby
//!   cargo run --example chat -- --debug

// ============================================================================
// Imports
// ============================================================================

use cable_session::{
    ChannelCallbacks, ChannelDescriptor, ConnectionHandle, Result, SessionOptions,
};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

const DEFAULT_URL: &str = "ws://localhost:3000/cable";
const DEFAULT_ROOM: &str = "lobby";

// ============================================================================
// Args
// ============================================================================

/// Command-line arguments.
#[derive(Debug, Clone)]
struct Args {
    url: String,
    room: String,
    debug: bool,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().skip(1).collect();
        let mut positional = args.iter().filter(|a| !a.starts_with("--"));

        Self {
            url: positional.next().cloned().unwrap_or_else(|| DEFAULT_URL.to_string()),
            room: positional.next().cloned().unwrap_or_else(|| DEFAULT_ROOM.to_string()),
            debug: args.iter().any(|a| a == "--debug"),
        }
    }
}

fn init_logging(debug: bool) {
    let filter = if debug {
        "cable_session=debug"
    } else {
        "cable_session=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    println!("=== Chat: {} / {} ===\n", args.url, args.room);

    let connection = ConnectionHandle::builder()
        .url(&args.url)
        .verbose(true)
        .open()?;

    let session = connection.session(
        SessionOptions::new()
            .with_case_conversion()
            .with_verbose(true),
    );

    session.subscribe(
        ChannelDescriptor::new("ChatChannel").with_param("roomName", args.room.as_str()),
        ChannelCallbacks::new()
            .on_connected(|| println!("[Chat] Connected"))
            .on_disconnected(|| println!("[Chat] Disconnected"))
            .on_rejected(|| println!("[Chat] Subscription rejected"))
            .on_received(|message| println!("[Chat] {message}")),
    )?;

    // Queued until the server confirms the subscription.
    session.enqueue("join", json!({ "displayName": "demo" }));

    println!("Type a message and press Enter. Ctrl+C to exit.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) if !line.trim().is_empty() => {
                        session.enqueue("speak", json!({ "messageBody": line }));
                    }
                    Ok(Some(_)) => {}
                    Ok(None) | Err(_) => break,
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    println!("\n[Chat] {} message(s) still queued", session.queue_len());
    session.close();
    connection.close();
    Ok(())
}
