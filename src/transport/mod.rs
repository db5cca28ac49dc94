//! WebSocket transport layer.
//!
//! This module owns the single connection to the remote end and multiplexes
//! many concurrent commands and event listeners over it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐                         ┌─────────────────┐
//! │  Transport (Rust)        │        WebSocket        │  Remote end     │
//! │                          │◄───────────────────────►│  (debuggee)     │
//! │  CommandTable   id → tx  │  {id, method, params}   │                 │
//! │  HandlerRegistry name →  │  {id, result | error}   │                 │
//! │     [handler, ...]       │  {method, params}       │                 │
//! └──────────────────────────┘                         └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `Transport::connect` (or `Transport::new` over an existing stream)
//! 2. `send` / `call` commands, `add_event_handler` / `subscribe` for events
//! 3. `Transport::stop` - close, fail pending commands, drop handlers
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `commands` | Id allocation, pending command table, result handles |
//! | `connect` | Client handshake against a debugger URL |
//! | `connection` | The transport and its event loop |
//! | `handlers` | Event handler registry and subscriptions |
//! | `options` | Transport configuration |

// ============================================================================
// Submodules
// ============================================================================

/// Id allocation and pending commands.
pub mod commands;

/// Client handshake against a debugger URL.
pub mod connect;

/// The transport and its event loop.
pub mod connection;

/// Event handler registry and subscriptions.
pub mod handlers;

/// Transport configuration.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use commands::{IdAllocator, PendingInfo, PendingResponse};
pub use connect::parse_ws_url;
pub use connection::{Transport, TransportState, WeakTransport};
pub use handlers::{EventCallback, EventSubscription};
pub use options::TransportOptions;
