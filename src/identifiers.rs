//! Type-safe identifiers.
//!
//! Newtype wrappers keep command ids and handler ids from being mixed up.
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`CommandId`] | Correlates a command with its response (`id` on the wire) |
//! | [`HandlerId`] | Identity of one registered event handler |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// CommandId
// ============================================================================

/// Identifier of one command on a transport.
///
/// Assigned by the transport at send time, starting at 1 and strictly
/// increasing for the lifetime of the connection. `0` never names a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(u64);

impl CommandId {
    /// Wraps a raw wire id.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw wire id.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<CommandId> for u64 {
    #[inline]
    fn from(id: CommandId) -> Self {
        id.0
    }
}

// ============================================================================
// HandlerId
// ============================================================================

/// Identity of a registered event handler.
///
/// Returned by [`Transport::add_event_handler`](crate::Transport::add_event_handler)
/// and used to remove exactly that handler later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl HandlerId {
    #[inline]
    pub(crate) const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
