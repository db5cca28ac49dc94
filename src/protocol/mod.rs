//! Wire protocol message types.
//!
//! This module defines the JSON message format exchanged with the remote
//! end over the WebSocket.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `Request` | Local → Remote | Command `{id, method, params}` |
//! | `Response` | Remote → Local | Result or error for one `id` |
//! | `Event` | Remote → Local | Notification routed by `method` |
//!
//! # Method Naming
//!
//! Methods follow `Domain.methodName` format:
//!
//! - `Page.navigate`
//! - `Runtime.evaluate`
//! - `Network.requestWillBeSent` (event)
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `command` | Outbound requests and the typed [`Command`] trait |
//! | `event` | Events and the typed [`EventKind`] trait |
//! | `frame` | Inbound frame decoding and classification |

// ============================================================================
// Submodules
// ============================================================================

/// Outbound command messages.
pub mod command;

/// Event message types.
pub mod event;

/// Inbound frame decoding.
pub mod frame;

// ============================================================================
// Re-exports
// ============================================================================

pub use command::{Command, Request, encode_params};
pub use event::{Event, EventKind};
pub use frame::{Frame, Inbound, RemoteError, Response};
