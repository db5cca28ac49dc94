//! Inbound frame decoding.
//!
//! Every inbound text frame is decoded into a [`Frame`] and then classified
//! into one of two shapes:
//!
//! Response (answers a command by `id`):
//! ```json
//! { "id": 1, "result": { ... } }
//! { "id": 1, "error": { "code": -32000, "message": "..." } }
//! ```
//!
//! Notification (unsolicited, matched by `method`):
//! ```json
//! { "method": "Domain.eventName", "params": { ... }, "sessionId": "..." }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::Deserialize;
use serde_json::Value;
use serde_json::value::RawValue;

use crate::error::{Error, Result};
use crate::identifiers::CommandId;

use super::Event;

// ============================================================================
// Frame
// ============================================================================

/// One decoded inbound message, before classification.
///
/// All members are optional on the wire; [`Frame::classify`] decides which
/// shape the frame actually has.
#[derive(Debug, Default, Deserialize)]
pub struct Frame {
    /// Command id (responses only).
    #[serde(default)]
    pub id: Option<u64>,

    /// Event name (notifications only).
    #[serde(default)]
    pub method: Option<String>,

    /// Event payload.
    #[serde(default)]
    pub params: Option<Box<RawValue>>,

    /// Command result payload.
    #[serde(default)]
    pub result: Option<Box<RawValue>>,

    /// Command failure reported by the remote end.
    #[serde(default)]
    pub error: Option<RemoteError>,

    /// Session the notification originates from.
    #[serde(default, rename = "sessionId")]
    pub session_id: Option<String>,
}

impl Frame {
    /// Decodes one frame from its JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the text is not a JSON object of the
    /// expected member types.
    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Classifies the frame as a response or a notification.
    ///
    /// A non-zero `id` makes the frame a response. Otherwise a `method`
    /// makes it a notification.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the frame has neither shape.
    pub fn classify(self) -> Result<Inbound> {
        match (self.id, self.method) {
            (Some(id), _) if id != 0 => {
                let outcome = match self.error {
                    Some(error) => Err(error),
                    None => Ok(self.result.unwrap_or_else(|| RawValue::NULL.to_owned())),
                };
                Ok(Inbound::Response(Response {
                    id: CommandId::new(id),
                    outcome,
                }))
            }
            (_, Some(method)) => Ok(Inbound::Notification(Event {
                method,
                params: self.params.unwrap_or_else(|| RawValue::NULL.to_owned()),
                session_id: self.session_id,
            })),
            (id, None) => Err(Error::protocol(format!(
                "frame has neither a command id nor a method (id={id:?})"
            ))),
        }
    }
}

/// Decodes and classifies one inbound text frame.
///
/// # Errors
///
/// Returns [`Error::Json`] or [`Error::Protocol`] for malformed frames.
#[inline]
pub fn decode(text: &str) -> Result<Inbound> {
    Frame::decode(text)?.classify()
}

// ============================================================================
// Inbound
// ============================================================================

/// A classified inbound frame.
#[derive(Debug)]
pub enum Inbound {
    /// Answer to a command.
    Response(Response),
    /// Unsolicited event.
    Notification(Event),
}

// ============================================================================
// Response
// ============================================================================

/// A response from remote end to local end.
#[derive(Debug)]
pub struct Response {
    /// Matches the command `id`.
    pub id: CommandId,

    /// Raw result, or the error object the remote end sent instead.
    pub outcome: std::result::Result<Box<RawValue>, RemoteError>,
}

impl Response {
    /// Returns `true` if the remote end reported success.
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Converts the response into the caller-facing result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] carrying `method` if the remote end failed
    /// the command.
    pub fn into_result(self, method: &str) -> Result<Box<RawValue>> {
        self.outcome.map_err(|error| error.into_error(method))
    }
}

// ============================================================================
// RemoteError
// ============================================================================

/// Error object carried by a failed response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteError {
    /// Error code.
    #[serde(default)]
    pub code: i64,

    /// Human readable message.
    #[serde(default)]
    pub message: String,

    /// Extra detail, when present.
    #[serde(default)]
    pub data: Option<Value>,
}

impl RemoteError {
    /// Converts into the crate error for the command that failed.
    #[must_use]
    pub fn into_error(self, method: &str) -> Error {
        Error::remote(method, self.code, self.message, self.data)
    }
}

// ============================================================================
// Tests
// ============================================================================
