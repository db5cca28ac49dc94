//! Error types for the devtools transport.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use devtools_transport::{Error, Result, Transport};
//!
//! async fn example(transport: &Transport) -> Result<()> {
//!     match transport.call_raw("Browser.getVersion", &()).await {
//!         Ok(raw) => println!("{}", raw.get()),
//!         Err(Error::Remote { message, .. }) => eprintln!("remote refused: {message}"),
//!         Err(e) => return Err(e),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`], [`Error::TransportClosed`] |
//! | Protocol | [`Error::Protocol`], [`Error::Remote`] |
//! | Commands | [`Error::RequestTimeout`], [`Error::Cancelled`], [`Error::TooManyPending`], [`Error::IdsExhausted`] |
//! | External | [`Error::Json`], [`Error::WebSocket`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use serde_json::Value;
use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::CommandId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when transport options or the target URL are invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// WebSocket connection refused.
    ///
    /// Returned when the server answers the handshake with a non-upgrade
    /// HTTP response.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connection handshake did not complete in time.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The remote end closed the connection.
    ///
    /// Delivered to commands still pending when the socket went away
    /// without a local [`Transport::stop`](crate::Transport::stop).
    #[error("Connection closed by remote")]
    ConnectionClosed,

    /// The transport was stopped locally.
    ///
    /// Returned by every send after `stop`, and delivered to every
    /// command that was still pending when `stop` ran.
    #[error("Transport closed")]
    TransportClosed,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Protocol violation or malformed frame.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// The remote end answered a command with an error object.
    #[error("Remote error {code} for {method}: {message}")]
    Remote {
        /// Method of the command that failed.
        method: String,
        /// Error code reported by the remote end.
        code: i64,
        /// Error message reported by the remote end.
        message: String,
        /// Optional extra detail attached to the error.
        data: Option<Value>,
    },

    // ========================================================================
    // Command Errors
    // ========================================================================
    /// Command did not receive a response in time.
    ///
    /// The command is abandoned; a late response is discarded.
    #[error("Command {command_id} ({method}) timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The command ID that timed out.
        command_id: CommandId,
        /// Method of the command.
        method: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The command was abandoned with `cancel` while still pending.
    ///
    /// The transport itself is unaffected.
    #[error("Command {command_id} was cancelled")]
    Cancelled {
        /// The command ID that was cancelled.
        command_id: CommandId,
    },

    /// Too many commands in flight.
    #[error("Too many pending commands: {pending}/{max}")]
    TooManyPending {
        /// Commands currently pending.
        pending: usize,
        /// Configured limit.
        max: usize,
    },

    /// The command identifier space is used up.
    #[error("Command identifiers exhausted")]
    IdsExhausted,

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    ///
    /// Handshake failures other than an HTTP rejection, and failed writes.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// URL parse error.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a remote error.
    #[inline]
    pub fn remote(
        method: impl Into<String>,
        code: i64,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        Self::Remote {
            method: method.into(),
            code,
            message: message.into(),
            data,
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(
        command_id: CommandId,
        method: impl Into<String>,
        timeout_ms: u64,
    ) -> Self {
        Self::RequestTimeout {
            command_id,
            method: method.into(),
            timeout_ms,
        }
    }

    /// Creates a cancellation error.
    #[inline]
    pub fn cancelled(command_id: CommandId) -> Self {
        Self::Cancelled { command_id }
    }

    /// Creates a too-many-pending error.
    #[inline]
    pub fn too_many_pending(pending: usize, max: usize) -> Self {
        Self::TooManyPending { pending, max }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. } | Self::RequestTimeout { .. }
        )
    }

    /// Returns `true` if the transport can no longer carry commands.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::TransportClosed | Self::ConnectionClosed)
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::TransportClosed
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if the remote end rejected the command.
    #[inline]
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry over the same transport.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::RequestTimeout { .. }
                | Self::Cancelled { .. }
                | Self::TooManyPending { .. }
                | Self::Remote { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
