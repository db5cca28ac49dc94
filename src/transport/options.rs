//! Transport configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use devtools_transport::TransportOptions;
//!
//! let options = TransportOptions::new()
//!     .with_command_timeout(Duration::from_secs(10))
//!     .with_max_pending(256);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default time allowed for the WebSocket handshake.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time allowed for the closing handshake during `stop`.
const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// TransportOptions
// ============================================================================

/// Transport configuration options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOptions {
    /// Timeout applied by `call`/`call_raw`. `None` waits indefinitely.
    pub command_timeout: Option<Duration>,

    /// Maximum commands in flight. `None` is unbounded.
    pub max_pending: Option<usize>,

    /// Timeout for the WebSocket handshake in `connect`.
    pub connect_timeout: Duration,

    /// Timeout for sending the close frame during `stop`.
    pub close_timeout: Duration,

    /// Largest inbound message accepted, in bytes. `None` keeps the
    /// WebSocket library default.
    pub max_message_size: Option<usize>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl TransportOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            command_timeout: None,
            max_pending: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            max_message_size: None,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl TransportOptions {
    /// Sets the default timeout for `call` and `call_raw`.
    #[inline]
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// Limits the number of commands in flight.
    #[inline]
    #[must_use]
    pub fn with_max_pending(mut self, max: usize) -> Self {
        self.max_pending = Some(max);
        self
    }

    /// Sets the WebSocket handshake timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the closing handshake timeout.
    #[inline]
    #[must_use]
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Sets the largest inbound message size in bytes.
    #[inline]
    #[must_use]
    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = Some(bytes);
        self
    }
}

// ============================================================================
// Validation & Conversion
// ============================================================================

impl TransportOptions {
    /// Checks the options for values that can never work.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero `max_pending`, zero timeouts or
    /// a zero message size.
    pub fn validate(&self) -> Result<()> {
        if self.max_pending == Some(0) {
            return Err(Error::config("max_pending must be at least 1"));
        }
        if self.command_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::config("command_timeout must be non-zero"));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::config("connect_timeout must be non-zero"));
        }
        if self.max_message_size == Some(0) {
            return Err(Error::config("max_message_size must be non-zero"));
        }
        Ok(())
    }

    /// Builds the WebSocket configuration for the handshake.
    #[must_use]
    pub(crate) fn websocket_config(&self) -> Option<WebSocketConfig> {
        self.max_message_size.map(|size| {
            WebSocketConfig::default()
                .max_message_size(Some(size))
                .max_frame_size(Some(size))
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = TransportOptions::default();
        assert_eq!(options, TransportOptions::new());
        assert!(options.command_timeout.is_none());
        assert!(options.max_pending.is_none());
        assert_eq!(options.connect_timeout.as_secs(), 30);
        assert_eq!(options.close_timeout.as_secs(), 5);
        assert!(options.websocket_config().is_none());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_builder_chain() {
        let options = TransportOptions::new()
            .with_command_timeout(Duration::from_millis(500))
            .with_max_pending(8)
            .with_connect_timeout(Duration::from_secs(2))
            .with_close_timeout(Duration::from_secs(1))
            .with_max_message_size(1 << 20);

        assert_eq!(options.command_timeout, Some(Duration::from_millis(500)));
        assert_eq!(options.max_pending, Some(8));
        assert_eq!(options.connect_timeout, Duration::from_secs(2));
        assert_eq!(options.close_timeout, Duration::from_secs(1));
        assert_eq!(options.max_message_size, Some(1 << 20));
        assert!(options.websocket_config().is_some());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        assert!(TransportOptions::new().with_max_pending(0).validate().is_err());
        assert!(
            TransportOptions::new()
                .with_command_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(
            TransportOptions::new()
                .with_connect_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(
            TransportOptions::new()
                .with_max_message_size(0)
                .validate()
                .is_err()
        );
    }
}
