//! Devtools Transport - command/event multiplexer for remote debugging protocols.
//!
//! This library drives a remote, instrumentable process (such as a browser's
//! remote-debugging interface) over a single WebSocket that carries JSON
//! commands, their responses and unsolicited events.
//!
//! # Architecture
//!
//! - **Commands**: `{id, method, params}` out, `{id, result | error}` back,
//!   correlated by id and delivered to exactly one waiting caller
//! - **Events**: `{method, params}` from the remote end, fanned out to every
//!   handler registered for that method, in registration order
//!
//! Key design principles:
//!
//! - Each [`Transport`] owns: one connection + one event loop task
//! - Ids start at 1 and are never reused while the transport lives
//! - A command is registered before it is written
//! - [`Transport::stop`] fails every pending command; nobody waits forever
//! - A malformed frame or a panicking handler never stops the event loop
//!
//! # Quick Start
//!
//! ```no_run
//! use devtools_transport::{Result, Transport};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let transport = Transport::connect("ws://127.0.0.1:9222/devtools/browser/abc").await?;
//!
//!     transport.add_event_handler("Target.targetCreated", |event| {
//!         println!("target created: {}", event.params.get());
//!     });
//!
//!     let version = transport.call_raw("Browser.getVersion", &()).await?;
//!     println!("{}", version.get());
//!
//!     transport.stop();
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Wire message types |
//! | [`transport`] | Connection, command table, event dispatch |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for commands and handlers.
pub mod identifiers;

/// Wire protocol message types.
///
/// Outbound requests, inbound frame decoding, events.
pub mod protocol;

/// WebSocket transport layer.
///
/// The [`Transport`] and the structures it shares with its event loop.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{CommandId, HandlerId};

// Protocol types
pub use protocol::{Command, Event, EventKind, RemoteError};

// Transport types
pub use transport::{
    EventCallback, EventSubscription, PendingInfo, PendingResponse, Transport, TransportOptions,
    TransportState, WeakTransport,
};
