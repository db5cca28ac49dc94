//! Connecting to a remote debugging endpoint.
//!
//! # Connection Flow
//!
//! 1. Validate the `ws://` (or `wss://`) debugger URL
//! 2. Perform the WebSocket client handshake (bounded by `connect_timeout`)
//! 3. Hand the stream to [`Transport`], which starts its event loop
//!
//! `wss://` needs one of tokio-tungstenite's TLS features enabled by the
//! final binary; without it the handshake reports [`Error::WebSocket`](crate::Error::WebSocket).

// ============================================================================
// Imports
// ============================================================================

use tokio::time::timeout;
use tokio_tungstenite::connect_async_with_config;
use tokio_tungstenite::tungstenite::Error as WsError;
use tracing::{debug, info};
use url::Url;

use crate::error::{Error, Result};

use super::connection::Transport;
use super::options::TransportOptions;

// ============================================================================
// URL Validation
// ============================================================================

/// Parses a debugger URL and checks that it is a WebSocket URL.
///
/// # Errors
///
/// - [`Error::Url`] if the URL does not parse
/// - [`Error::Config`] if the scheme is not `ws` or `wss`, or there is no host
pub fn parse_ws_url(url: &str) -> Result<Url> {
    let url = Url::parse(url)?;

    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(Error::config(format!(
                "Unsupported URL scheme '{other}', expected ws or wss"
            )));
        }
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(Error::config(format!("URL has no host: {url}")));
    }

    Ok(url)
}

// ============================================================================
// Transport - Connect
// ============================================================================

impl Transport {
    /// Connects to a debugger URL with default options.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let transport = Transport::connect("ws://127.0.0.1:9222/devtools/browser/abc").await?;
    /// ```
    ///
    /// # Errors
    ///
    /// Same as [`Transport::connect_with`].
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with(url, TransportOptions::default()).await
    }

    /// Connects to a debugger URL.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] / [`Error::Url`] if the options or URL are invalid
    /// - [`Error::ConnectionTimeout`] if the handshake exceeds `connect_timeout`
    /// - [`Error::Connection`] if the server rejects the upgrade
    /// - [`Error::WebSocket`] if the handshake fails otherwise
    pub async fn connect_with(url: &str, options: TransportOptions) -> Result<Self> {
        options.validate()?;
        let url = parse_ws_url(url)?;

        debug!(%url, "Connecting");

        let handshake = connect_async_with_config(url.as_str(), options.websocket_config(), true);
        let (ws_stream, response) = timeout(options.connect_timeout, handshake)
            .await
            .map_err(|_| Error::connection_timeout(options.connect_timeout.as_millis() as u64))?
            .map_err(|e| match e {
                WsError::Http(response) => Error::connection(format!(
                    "WebSocket upgrade rejected with status {}",
                    response.status()
                )),
                other => Error::WebSocket(other),
            })?;

        info!(%url, status = %response.status(), "WebSocket connection established");

        Ok(Self::spawn(ws_stream, options))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use serde_json::{Value, json};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;

    #[test]
    fn test_parse_ws_url() {
        let url = parse_ws_url("ws://127.0.0.1:9222/devtools/browser/abc").expect("valid");
        assert_eq!(url.port(), Some(9222));
        assert_eq!(url.path(), "/devtools/browser/abc");

        assert!(parse_ws_url("wss://example.com/devtools").is_ok());
    }

    #[test]
    fn test_parse_ws_url_rejects_other_schemes() {
        assert!(matches!(
            parse_ws_url("http://127.0.0.1:9222/json"),
            Err(Error::Config { .. })
        ));
        assert!(matches!(parse_ws_url("not a url"), Err(Error::Url(_))));
    }

    #[tokio::test]
    async fn test_connect_and_call() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        let remote = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(stream).await.expect("upgrade");

            let Some(Ok(Message::Text(text))) = ws.next().await else {
                panic!("expected a command");
            };
            let request: Value = serde_json::from_str(text.as_str()).expect("json");
            assert_eq!(request["method"], "Browser.getVersion");

            let reply = json!({"id": request["id"], "result": {"product": "Test/1.0"}});
            ws.send(Message::Text(reply.to_string().into())).await.expect("reply");
        });

        let transport = Transport::connect(&format!("ws://127.0.0.1:{port}"))
            .await
            .expect("connect");
        let raw = transport
            .call_raw("Browser.getVersion", &())
            .await
            .expect("result");
        let result: Value = serde_json::from_str(raw.get()).expect("json");
        assert_eq!(result["product"], "Test/1.0");

        remote.await.expect("remote task");
        transport.stop();
        transport.wait_closed().await;
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        // Accepts TCP but never answers the WebSocket handshake.
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        let options = TransportOptions::new().with_connect_timeout(Duration::from_millis(200));
        let err = Transport::connect_with(&format!("ws://127.0.0.1:{port}"), options)
            .await
            .expect_err("must time out");

        assert!(matches!(err, Error::ConnectionTimeout { timeout_ms: 200 }));
        drop(listener);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let err = Transport::connect(&format!("ws://127.0.0.1:{port}"))
            .await
            .expect_err("nothing listening");
        assert!(matches!(err, Error::WebSocket(WsError::Io(_))));
        assert!(err.is_connection_error());
    }

    #[tokio::test]
    async fn test_connect_rejected_upgrade() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        let remote = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await.expect("read request");
            stream
                .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n")
                .await
                .expect("write response");
        });

        let err = Transport::connect(&format!("ws://127.0.0.1:{port}/devtools/missing"))
            .await
            .expect_err("rejected");
        match err {
            Error::Connection { message } => assert!(message.contains("404"), "{message}"),
            other => panic!("unexpected error: {other:?}"),
        }
        remote.await.expect("remote task");
    }
}
