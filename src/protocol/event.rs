//! Event message types.
//!
//! Events are notifications sent from the remote end to the local end
//! when something happens in the instrumented process. They carry no id and
//! are routed purely by `method`.

// ============================================================================
// Imports
// ============================================================================

use serde::de::DeserializeOwned;
use serde_json::value::RawValue;

use crate::error::Result;

// ============================================================================
// Event
// ============================================================================

/// An event notification from remote end to local end.
#[derive(Debug, Clone)]
pub struct Event {
    /// Event name in `Domain.eventName` format.
    pub method: String,

    /// Raw event payload (`null` when the frame had none).
    pub params: Box<RawValue>,

    /// Session the event belongs to, for flattened session protocols.
    pub session_id: Option<String>,
}

impl Event {
    /// Returns the domain part of the method.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let event = Event { method: "Page.loadEventFired".into(), .. };
    /// assert_eq!(event.domain(), "Page");
    /// ```
    #[inline]
    #[must_use]
    pub fn domain(&self) -> &str {
        self.method.split('.').next().unwrap_or_default()
    }

    /// Returns the event name part of the method.
    #[inline]
    #[must_use]
    pub fn event_name(&self) -> &str {
        self.method.split('.').nth(1).unwrap_or_default()
    }

    /// Decodes the payload into a typed value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) if the payload does not match `T`.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(self.params.get())?)
    }
}

// ============================================================================
// EventKind
// ============================================================================

/// A typed event payload.
///
/// Implemented by per-domain event structs so they can be registered with
/// [`Transport::on`](crate::Transport::on).
pub trait EventKind: DeserializeOwned {
    /// Event name in `Domain.eventName` format.
    const METHOD: &'static str;
}

// ============================================================================
// Tests
// ============================================================================
