//! Outbound command messages.
//!
//! A command travels as one JSON text frame:
//!
//! ```json
//! {
//!   "id": 1,
//!   "method": "Domain.methodName",
//!   "params": { ... },
//!   "sessionId": "optional-target-session"
//! }
//! ```
//!
//! `params` is omitted when the parameters serialize to `null`, and
//! `sessionId` is omitted unless the command targets an attached session.

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::value::{RawValue, to_raw_value};

use crate::error::Result;
use crate::identifiers::CommandId;

// ============================================================================
// Command
// ============================================================================

/// A typed remote method.
///
/// Implemented by per-domain parameter structs. The struct itself is the
/// `params` object; [`Command::Output`] is what the `result` decodes into.
///
/// # Example
///
/// ```ignore
/// #[derive(Serialize)]
/// struct Navigate {
///     url: String,
/// }
///
/// #[derive(Deserialize)]
/// #[serde(rename_all = "camelCase")]
/// struct NavigateResult {
///     frame_id: String,
/// }
///
/// impl Command for Navigate {
///     const METHOD: &'static str = "Page.navigate";
///     type Output = NavigateResult;
/// }
/// ```
pub trait Command: Serialize {
    /// Remote method name in `Domain.methodName` format.
    const METHOD: &'static str;

    /// Shape of the `result` payload.
    type Output: DeserializeOwned;
}

// ============================================================================
// Request
// ============================================================================

/// A command request from local end to remote end.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Request<'a> {
    /// Identifier echoed back in the matching response.
    pub id: CommandId,

    /// Remote method name.
    pub method: &'a str,

    /// Serialized parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<&'a RawValue>,

    /// Target session for flattened session protocols.
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<&'a str>,
}

impl<'a> Request<'a> {
    /// Creates a request addressed to the browser-level endpoint.
    #[inline]
    #[must_use]
    pub const fn new(id: CommandId, method: &'a str, params: Option<&'a RawValue>) -> Self {
        Self {
            id,
            method,
            params,
            session_id: None,
        }
    }

    /// Addresses the request to an attached session.
    #[inline]
    #[must_use]
    pub const fn with_session(mut self, session_id: Option<&'a str>) -> Self {
        self.session_id = session_id;
        self
    }

    /// Encodes the request as one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) if encoding fails.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// Params Encoding
// ============================================================================

/// Serializes command parameters into a raw JSON value.
///
/// Returns `None` for parameters that serialize to `null` (such as `()`),
/// so those commands go out without a `params` member.
///
/// # Errors
///
/// Returns [`Error::Json`](crate::Error::Json) if the parameters cannot be serialized.
pub fn encode_params<P>(params: &P) -> Result<Option<Box<RawValue>>>
where
    P: Serialize + ?Sized,
{
    let raw = to_raw_value(params)?;
    if raw.get() == "null" {
        return Ok(None);
    }
    Ok(Some(raw))
}

// ============================================================================
// Tests
// ============================================================================
