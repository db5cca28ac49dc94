//! Event handler registry and dispatch.
//!
//! Handlers are stored per event name in registration order. Dispatch takes a
//! snapshot of the handlers for one name and releases the lock before running
//! any callback, so callbacks are free to add or remove handlers (including
//! themselves), send commands or stop the transport.

// ============================================================================
// Imports
// ============================================================================

use std::any::Any;
use std::fmt;
use std::mem::take;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures_util::Stream;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::identifiers::HandlerId;
use crate::protocol::Event;

// ============================================================================
// Types
// ============================================================================

/// Event handler callback type.
///
/// Runs on the transport's event loop and must not block.
pub type EventCallback = Arc<dyn Fn(&Event) + Send + Sync>;

// ============================================================================
// EventHandler
// ============================================================================

/// A registered listener: event name plus callback.
#[derive(Clone)]
pub(crate) struct EventHandler {
    id: HandlerId,
    method: String,
    callback: EventCallback,
}

impl EventHandler {
    /// Runs the callback, containing any panic.
    ///
    /// Returns `false` if the callback panicked.
    fn invoke(&self, event: &Event) -> bool {
        match catch_unwind(AssertUnwindSafe(|| (self.callback)(event))) {
            Ok(()) => true,
            Err(payload) => {
                warn!(
                    handler = %self.id,
                    method = %self.method,
                    panic = panic_message(payload.as_ref()),
                    "Event handler panicked"
                );
                false
            }
        }
    }
}

impl fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandler")
            .field("id", &self.id)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}

// ============================================================================
// HandlerRegistry
// ============================================================================

#[derive(Default)]
struct RegistryState {
    by_method: FxHashMap<String, Vec<EventHandler>>,
    index: FxHashMap<HandlerId, String>,
    closed: bool,
}

/// Outcome of dispatching one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct DispatchReport {
    /// Callbacks that ran to completion.
    pub invoked: usize,
    /// Callbacks that panicked.
    pub panicked: usize,
}

/// Multimap of event name to handlers.
#[derive(Default)]
pub(crate) struct HandlerRegistry {
    next_id: AtomicU64,
    state: RwLock<RegistryState>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` for `method`.
    ///
    /// After the registry is closed the handler is never stored, but an id
    /// is still returned so callers need not special-case shutdown.
    pub fn add(&self, method: impl Into<String>, callback: EventCallback) -> HandlerId {
        let id = HandlerId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let method = method.into();

        let mut state = self.state.write();
        if state.closed {
            debug!(%method, "Handler registered after close, ignoring");
            return id;
        }

        state.index.insert(id, method.clone());
        state
            .by_method
            .entry(method.clone())
            .or_default()
            .push(EventHandler {
                id,
                method,
                callback,
            });
        id
    }

    /// Removes one handler. Unknown ids are ignored.
    pub fn remove(&self, id: HandlerId) -> bool {
        let removed = {
            let mut state = self.state.write();
            let Some(method) = state.index.remove(&id) else {
                return false;
            };

            let mut removed = None;
            if let Some(handlers) = state.by_method.get_mut(&method) {
                if let Some(position) = handlers.iter().position(|handler| handler.id == id) {
                    removed = Some(handlers.remove(position));
                }
                if handlers.is_empty() {
                    state.by_method.remove(&method);
                }
            }
            removed
        };

        // Callbacks are dropped outside the lock; their captures may
        // reach back into the registry.
        drop(removed);
        true
    }

    /// Clones the current handlers for `method`, in registration order.
    pub fn snapshot(&self, method: &str) -> Vec<EventHandler> {
        self.state
            .read()
            .by_method
            .get(method)
            .cloned()
            .unwrap_or_default()
    }

    /// Runs every handler registered for the event's method.
    ///
    /// Handlers see the registry as it was when dispatch began. Dispatch
    /// stops early if the registry is closed by one of the callbacks.
    pub fn dispatch(&self, event: &Event) -> DispatchReport {
        let handlers = self.snapshot(&event.method);
        let mut report = DispatchReport::default();

        if handlers.is_empty() {
            trace!(method = %event.method, "No handlers for event");
            return report;
        }

        for handler in &handlers {
            if self.is_closed() {
                break;
            }
            if handler.invoke(event) {
                report.invoked += 1;
            } else {
                report.panicked += 1;
            }
        }
        report
    }

    /// Drops every handler and refuses new ones.
    pub fn close(&self) -> usize {
        let (by_method, index) = {
            let mut state = self.state.write();
            state.closed = true;
            (take(&mut state.by_method), take(&mut state.index))
        };

        let count = index.len();
        drop(by_method);
        count
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.state.read().closed
    }

    /// Number of handlers registered for `method`.
    #[inline]
    pub fn count(&self, method: &str) -> usize {
        self.state.read().by_method.get(method).map_or(0, Vec::len)
    }

    /// Registers a handler that forwards matching events into a channel.
    pub fn subscribe(self: &Arc<Self>, method: impl Into<String>) -> EventSubscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handler = self.add(
            method,
            Arc::new(move |event: &Event| {
                // The subscription may be mid-drop; its Drop removes us.
                let _ = sender.send(event.clone());
            }),
        );

        EventSubscription {
            receiver,
            handler,
            registry: Arc::downgrade(self),
        }
    }
}

// ============================================================================
// EventSubscription
// ============================================================================

/// A stream of events for one event name.
///
/// Yields events in arrival order. Ends once the transport stops. Dropping
/// the subscription unregisters it.
#[derive(Debug)]
pub struct EventSubscription {
    receiver: mpsc::UnboundedReceiver<Event>,
    handler: HandlerId,
    registry: Weak<HandlerRegistry>,
}

impl EventSubscription {
    /// Receives the next event, or `None` once the transport has stopped.
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Returns an already-delivered event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.receiver.try_recv().ok()
    }

    /// Returns the identity of the underlying handler.
    #[inline]
    #[must_use]
    pub fn handler_id(&self) -> HandlerId {
        self.handler
    }
}

impl Stream for EventSubscription {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.handler);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
