//! Connects to a remote debugging endpoint and prints its version.
//!
//! Demonstrates:
//! - Connecting with custom options
//! - A typed command round-trip
//! - Listening for an event while commands are in flight
//!
//! Start a browser with `--remote-debugging-port=9222`, read the browser
//! WebSocket URL from `http://127.0.0.1:9222/json/version`, then:
//!
//!   cargo run --example get_version -- ws://127.0.0.1:9222/devtools/browser/<id>
//!   cargo run --example get_version -- ws://127.0.0.1:9222/devtools/browser/<id> --debug

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use devtools_transport::{Command, Result, Transport, TransportOptions};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Commands
// ============================================================================

#[derive(Serialize)]
struct GetVersion;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Version {
    protocol_version: String,
    product: String,
    user_agent: String,
    js_version: String,
}

impl Command for GetVersion {
    const METHOD: &'static str = "Browser.getVersion";
    type Output = Version;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SetDiscoverTargets {
    discover: bool,
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let debug = args.iter().any(|a| a == "--debug");
    let url = args.iter().find(|a| !a.starts_with("--")).cloned();

    let filter = if debug {
        "devtools_transport=trace"
    } else {
        "devtools_transport=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();

    let Some(url) = url else {
        eprintln!("usage: get_version <ws-url> [--debug]");
        std::process::exit(2);
    };

    if let Err(e) = run(&url).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run(url: &str) -> Result<()> {
    let options = TransportOptions::new()
        .with_connect_timeout(Duration::from_secs(5))
        .with_command_timeout(Duration::from_secs(10));

    let transport = Transport::connect_with(url, options).await?;

    transport.add_event_handler("Target.targetCreated", |event| {
        println!("[event] {} {}", event.method, event.params.get());
    });

    let version = transport.call(&GetVersion).await?;
    println!("Product:    {}", version.product);
    println!("Protocol:   {}", version.protocol_version);
    println!("JavaScript: {}", version.js_version);
    println!("User agent: {}", version.user_agent);

    transport
        .call_raw("Target.setDiscoverTargets", &SetDiscoverTargets { discover: true })
        .await?;
    tokio::time::sleep(Duration::from_millis(500)).await;

    transport.stop();
    transport.wait_closed().await;

    println!("Transport {:?}", transport.state());
    Ok(())
}
