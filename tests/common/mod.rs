//! Shared harness for transport integration tests.
//!
//! Provides an in-memory WebSocket pair where the test plays the remote end.

#![allow(dead_code)]

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use anyhow::{Context, Result, bail};
use devtools_transport::{Transport, TransportOptions};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::io::{DuplexStream, duplex};
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::Role;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// In-memory pipe capacity per direction.
const PIPE_CAPACITY: usize = 256 * 1024;

// ============================================================================
// Setup
// ============================================================================

/// Initialize tracing/logging once per test binary.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("devtools_transport=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Creates a transport with default options and its remote end.
pub async fn connected() -> (Transport, Remote) {
    connected_with(TransportOptions::default()).await
}

/// Creates a transport with `options` and its remote end.
pub async fn connected_with(options: TransportOptions) -> (Transport, Remote) {
    init_logging();

    let (local, remote) = duplex(PIPE_CAPACITY);
    let client = WebSocketStream::from_raw_socket(local, Role::Client, None).await;
    let server = WebSocketStream::from_raw_socket(remote, Role::Server, None).await;

    let transport = Transport::with_options(client, options).expect("valid options");
    (transport, Remote { ws: server })
}

// ============================================================================
// Remote
// ============================================================================

/// The remote end of the connection, driven by the test.
pub struct Remote {
    ws: WebSocketStream<DuplexStream>,
}

impl Remote {
    /// Reads the next command the transport wrote.
    pub async fn next_request(&mut self) -> Result<Value> {
        loop {
            let message = timeout(WAIT, self.ws.next())
                .await
                .context("timed out waiting for a request")?
                .context("stream ended")??;

            match message {
                Message::Text(text) => {
                    return serde_json::from_str(text.as_str()).context("request is not JSON");
                }
                Message::Close(_) => bail!("transport closed the connection"),
                _ => continue,
            }
        }
    }

    /// Waits for the transport's close frame (or end of stream).
    pub async fn expect_close(&mut self) -> Result<()> {
        loop {
            match timeout(WAIT, self.ws.next())
                .await
                .context("timed out waiting for close")?
            {
                None | Some(Ok(Message::Close(_))) | Some(Err(_)) => return Ok(()),
                Some(Ok(Message::Text(text))) => bail!("unexpected frame: {}", text.as_str()),
                Some(Ok(_)) => continue,
            }
        }
    }

    /// Sends a JSON value as a text frame.
    pub async fn send_json(&mut self, value: Value) -> Result<()> {
        self.send_text(&value.to_string()).await
    }

    /// Sends raw text.
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.ws.send(Message::Text(text.to_string().into())).await?;
        Ok(())
    }

    /// Sends raw bytes as a binary frame.
    pub async fn send_binary(&mut self, bytes: Vec<u8>) -> Result<()> {
        self.ws.send(Message::Binary(bytes.into())).await?;
        Ok(())
    }

    /// Answers command `id` with `result`.
    pub async fn respond(&mut self, id: &Value, result: Value) -> Result<()> {
        self.send_json(json!({"id": id, "result": result})).await
    }

    /// Sends an event notification.
    pub async fn notify(&mut self, method: &str, params: Value) -> Result<()> {
        self.send_json(json!({"method": method, "params": params}))
            .await
    }

    /// Closes the connection from the remote side.
    pub async fn close(mut self) -> Result<()> {
        self.ws.close(None).await?;
        Ok(())
    }
}
