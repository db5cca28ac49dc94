//! The transport and its event loop.
//!
//! [`Transport`] owns one WebSocket connection. It assigns command ids,
//! correlates responses back to the waiting caller and fans events out to
//! every handler registered for the event's name.
//!
//! # Event Loop
//!
//! The transport spawns a single tokio task that handles:
//!
//! - Incoming frames (responses and events)
//! - Outgoing commands, written one whole frame at a time
//! - Shutdown on [`Transport::stop`], remote close or last handle dropped
//!
//! # Lifecycle
//!
//! ```text
//! Open ──stop() / remote close──► Closing ──pending failed, loop ended──► Closed
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::value::RawValue;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{CommandId, HandlerId};
use crate::protocol::frame::{self, Inbound};
use crate::protocol::{Command, Event, EventKind, Request, encode_params};

use super::commands::{CommandTable, IdAllocator, PendingCommand, PendingInfo, PendingResponse};
use super::handlers::{EventSubscription, HandlerRegistry};
use super::options::TransportOptions;

// ============================================================================
// TransportState
// ============================================================================

/// Lifecycle state of a [`Transport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportState {
    /// Accepting commands and dispatching events.
    Open,
    /// Shutting down; new commands fail immediately.
    Closing,
    /// Terminal. Every pending command has been failed.
    Closed,
}

// ============================================================================
// Outbound
// ============================================================================

/// Internal messages for the event loop.
enum Outbound {
    /// Write one encoded command.
    Frame { id: CommandId, text: String },
    /// Close the connection.
    Shutdown,
}

/// Why the event loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    /// `stop` was called.
    Stopped,
    /// The remote end closed or the stream failed.
    Remote,
    /// Every `Transport` handle was dropped.
    Dropped,
}

// ============================================================================
// Transport
// ============================================================================

/// Multiplexed command/event transport over one WebSocket.
///
/// Cloning is cheap; all clones share the same connection. The connection
/// is closed once every clone is dropped. An event handler that needs to
/// send commands should capture a [`WeakTransport`] from
/// [`Transport::downgrade`]; a handler owning a `Transport` keeps the
/// connection open until [`Transport::stop`].
///
/// # Thread Safety
///
/// `Transport` is `Send + Sync`. Commands may be sent and handlers added
/// or removed from any task, including from inside an event handler.
pub struct Transport {
    /// Channel for sending frames to the event loop.
    outbound: mpsc::UnboundedSender<Outbound>,
    /// In-flight commands (shared with event loop).
    commands: Arc<CommandTable>,
    /// Event handlers (shared with event loop).
    handlers: Arc<HandlerRegistry>,
    /// Command id counter.
    ids: Arc<IdAllocator>,
    /// Lifecycle state (shared with event loop).
    state: Arc<watch::Sender<TransportState>>,
    /// Configuration.
    options: Arc<TransportOptions>,
}

impl Clone for Transport {
    fn clone(&self) -> Self {
        Self {
            outbound: self.outbound.clone(),
            commands: Arc::clone(&self.commands),
            handlers: Arc::clone(&self.handlers),
            ids: Arc::clone(&self.ids),
            state: Arc::clone(&self.state),
            options: Arc::clone(&self.options),
        }
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .field("current_id", &self.current_id())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// WeakTransport
// ============================================================================

/// Non-owning handle to a [`Transport`].
///
/// Does not keep the connection open. [`WeakTransport::upgrade`] returns
/// `None` once every `Transport` clone has been dropped.
#[derive(Clone)]
pub struct WeakTransport {
    outbound: mpsc::WeakUnboundedSender<Outbound>,
    commands: Arc<CommandTable>,
    handlers: Weak<HandlerRegistry>,
    ids: Arc<IdAllocator>,
    state: Arc<watch::Sender<TransportState>>,
    options: Arc<TransportOptions>,
}

impl WeakTransport {
    /// Returns a usable [`Transport`] if any clone is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Transport> {
        Some(Transport {
            outbound: self.outbound.upgrade()?,
            commands: Arc::clone(&self.commands),
            handlers: self.handlers.upgrade()?,
            ids: Arc::clone(&self.ids),
            state: Arc::clone(&self.state),
            options: Arc::clone(&self.options),
        })
    }
}

impl fmt::Debug for WeakTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakTransport")
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Transport - Constructors
// ============================================================================

impl Transport {
    /// Creates a transport over an established WebSocket with default options.
    ///
    /// Spawns the event loop task, so this must run inside a tokio runtime.
    pub fn new<S>(ws_stream: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self::spawn(ws_stream, TransportOptions::default())
    }

    /// Creates a transport over an established WebSocket.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the options are invalid.
    pub fn with_options<S>(ws_stream: WebSocketStream<S>, options: TransportOptions) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        options.validate()?;
        Ok(Self::spawn(ws_stream, options))
    }

    /// Wires up shared state and spawns the event loop.
    pub(crate) fn spawn<S>(ws_stream: WebSocketStream<S>, options: TransportOptions) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let commands = Arc::new(CommandTable::new(options.max_pending));
        let handlers = Arc::new(HandlerRegistry::new());
        let (state, _) = watch::channel(TransportState::Open);
        let state = Arc::new(state);

        tokio::spawn(Self::run_event_loop(
            ws_stream,
            outbound_rx,
            Arc::clone(&commands),
            Arc::clone(&handlers),
            Arc::clone(&state),
            options.close_timeout,
        ));

        debug!("Transport opened");

        Self {
            outbound,
            commands,
            handlers,
            ids: Arc::new(IdAllocator::new()),
            state,
            options: Arc::new(options),
        }
    }

    /// Creates a [`WeakTransport`] that does not keep the connection open.
    #[must_use]
    pub fn downgrade(&self) -> WeakTransport {
        WeakTransport {
            outbound: self.outbound.downgrade(),
            commands: Arc::clone(&self.commands),
            handlers: Arc::downgrade(&self.handlers),
            ids: Arc::clone(&self.ids),
            state: Arc::clone(&self.state),
            options: Arc::clone(&self.options),
        }
    }
}

// ============================================================================
// Transport - Commands
// ============================================================================

impl Transport {
    /// Sends a command and returns a handle to its result.
    ///
    /// The command is registered before it is written, so a response can
    /// never arrive for an id the transport does not yet know. Parameters
    /// that serialize to `null` (such as `()`) are omitted.
    ///
    /// # Errors
    ///
    /// - [`Error::TransportClosed`] if the transport is closing or closed
    /// - [`Error::Json`] if the parameters cannot be serialized
    /// - [`Error::TooManyPending`] if `max_pending` is reached
    /// - [`Error::IdsExhausted`] if no id is left
    pub fn send<P>(&self, method: &str, params: &P) -> Result<PendingResponse>
    where
        P: Serialize + ?Sized,
    {
        self.send_inner(method, params, None)
    }

    /// Sends a command addressed to an attached session.
    ///
    /// # Errors
    ///
    /// Same as [`Transport::send`].
    pub fn send_to_session<P>(
        &self,
        session_id: &str,
        method: &str,
        params: &P,
    ) -> Result<PendingResponse>
    where
        P: Serialize + ?Sized,
    {
        self.send_inner(method, params, Some(session_id))
    }

    fn send_inner<P>(
        &self,
        method: &str,
        params: &P,
        session_id: Option<&str>,
    ) -> Result<PendingResponse>
    where
        P: Serialize + ?Sized,
    {
        if !self.is_open() {
            return Err(Error::TransportClosed);
        }

        let params = encode_params(params)?;
        let id = self.ids.next()?;
        let text = Request::new(id, method, params.as_deref())
            .with_session(session_id)
            .encode()?;

        let (completion, receiver) = oneshot::channel();
        self.commands.insert(
            id,
            PendingCommand {
                method: method.to_string(),
                params,
                session_id: session_id.map(str::to_string),
                completion,
                issued_at: Instant::now(),
            },
        )?;

        if self.outbound.send(Outbound::Frame { id, text }).is_err() {
            self.commands.cancel(id);
            return Err(Error::TransportClosed);
        }

        trace!(%id, method, "Command queued");

        Ok(PendingResponse::new(
            id,
            method.to_string(),
            receiver,
            Arc::clone(&self.commands),
        ))
    }

    /// Sends a command and waits for its result, giving up after `limit`.
    ///
    /// On timeout the command is abandoned; its response, if it ever
    /// arrives, is discarded.
    ///
    /// # Errors
    ///
    /// - [`Error::RequestTimeout`] if no response arrived in time
    /// - [`Error::Remote`] if the remote end failed the command
    /// - anything [`Transport::send`] returns
    pub async fn send_with_timeout<P>(
        &self,
        method: &str,
        params: &P,
        limit: Duration,
    ) -> Result<Box<RawValue>>
    where
        P: Serialize + ?Sized,
    {
        let pending = self.send(method, params)?;
        self.wait(pending, Some(limit)).await
    }

    /// Sends a command and waits for its raw result.
    ///
    /// Uses the configured `command_timeout`, if any.
    ///
    /// # Errors
    ///
    /// Same as [`Transport::send_with_timeout`].
    pub async fn call_raw<P>(&self, method: &str, params: &P) -> Result<Box<RawValue>>
    where
        P: Serialize + ?Sized,
    {
        let pending = self.send(method, params)?;
        self.wait(pending, self.options.command_timeout).await
    }

    /// Sends a typed command and decodes its result.
    ///
    /// # Errors
    ///
    /// Same as [`Transport::call_raw`], plus [`Error::Json`] if the result
    /// does not match `C::Output`.
    pub async fn call<C: Command>(&self, command: &C) -> Result<C::Output> {
        let raw = self.call_raw(C::METHOD, command).await?;
        Ok(serde_json::from_str(raw.get())?)
    }

    async fn wait(&self, pending: PendingResponse, limit: Option<Duration>) -> Result<Box<RawValue>> {
        let Some(limit) = limit else {
            return pending.await;
        };

        let id = pending.id();
        let method = pending.method().to_string();
        let started = Instant::now();

        match timeout(limit, pending).await {
            Ok(result) => result,
            Err(_) => {
                self.commands.cancel(id);
                debug!(%id, %method, waited_ms = started.elapsed().as_millis() as u64, "Command timed out");
                Err(Error::request_timeout(id, method, limit.as_millis() as u64))
            }
        }
    }

    /// Abandons a pending command.
    ///
    /// A handle still awaiting it resolves to [`Error::Cancelled`]. Returns
    /// `true` if the command was still pending.
    pub fn cancel(&self, id: CommandId) -> bool {
        self.commands.cancel(id)
    }
}

// ============================================================================
// Transport - Events
// ============================================================================

impl Transport {
    /// Registers a callback for every event named `method`.
    ///
    /// Callbacks run on the event loop, in registration order, and must not
    /// block. A panicking callback is logged and does not affect other
    /// handlers. Capture a [`WeakTransport`] to send commands from inside a
    /// callback.
    pub fn add_event_handler<F>(&self, method: impl Into<String>, callback: F) -> HandlerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let method = method.into();
        let id = self.handlers.add(method.clone(), Arc::new(callback));
        debug!(handler = %id, %method, "Event handler added");
        id
    }

    /// Removes a previously added handler.
    ///
    /// Returns `false` if the handler was not registered; that is not an error.
    pub fn remove_event_handler(&self, id: HandlerId) -> bool {
        let removed = self.handlers.remove(id);
        if removed {
            debug!(handler = %id, "Event handler removed");
        }
        removed
    }

    /// Registers a callback for a typed event.
    ///
    /// Events whose params do not decode into `E` are logged and skipped.
    pub fn on<E, F>(&self, callback: F) -> HandlerId
    where
        E: EventKind,
        F: Fn(E) + Send + Sync + 'static,
    {
        self.add_event_handler(E::METHOD, move |event: &Event| match event.parse::<E>() {
            Ok(parsed) => callback(parsed),
            Err(e) => warn!(method = E::METHOD, error = %e, "Failed to decode event params"),
        })
    }

    /// Returns a stream of every event named `method`.
    pub fn subscribe(&self, method: impl Into<String>) -> EventSubscription {
        self.handlers.subscribe(method)
    }
}

// ============================================================================
// Transport - Lifecycle
// ============================================================================

impl Transport {
    /// Stops the transport.
    ///
    /// Closes the connection, fails every pending command with
    /// [`Error::TransportClosed`] and drops all event handlers. Later sends
    /// fail immediately. Calling `stop` again does nothing.
    pub fn stop(&self) {
        let first = self.state.send_if_modified(|state| {
            if *state == TransportState::Open {
                *state = TransportState::Closing;
                true
            } else {
                false
            }
        });
        if !first {
            return;
        }

        // The loop may already be gone; the table is failed below regardless.
        let _ = self.outbound.send(Outbound::Shutdown);

        let failed = self.commands.close(|| Error::TransportClosed);
        let handlers = self.handlers.close();

        debug!(failed, handlers, "Transport stopping");
    }

    /// Returns the current lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> TransportState {
        *self.state.borrow()
    }

    /// Returns `true` while the transport accepts commands.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == TransportState::Open
    }

    /// Waits until the transport is [`TransportState::Closed`].
    pub async fn wait_closed(&self) {
        let mut receiver = self.state.subscribe();
        // The sender lives in `self`, so this only returns once Closed.
        let _ = receiver
            .wait_for(|state| *state == TransportState::Closed)
            .await;
    }

    /// Returns the options this transport was created with.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &TransportOptions {
        &self.options
    }
}

// ============================================================================
// Transport - Diagnostics
// ============================================================================

impl Transport {
    /// Allocates and returns a fresh command id without sending anything.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IdsExhausted`] once the id space is used up.
    #[inline]
    pub fn next_id(&self) -> Result<CommandId> {
        self.ids.next()
    }

    /// Returns the most recently allocated command id (`0` before any).
    #[inline]
    #[must_use]
    pub fn current_id(&self) -> CommandId {
        self.ids.current()
    }

    /// Returns the number of pending commands.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.commands.len()
    }

    /// Lists pending commands, oldest id first.
    #[must_use]
    pub fn pending_commands(&self) -> Vec<PendingInfo> {
        self.commands.snapshot()
    }

    /// Returns the number of handlers registered for `method`.
    #[inline]
    #[must_use]
    pub fn handler_count(&self, method: &str) -> usize {
        self.handlers.count(method)
    }
}

// ============================================================================
// Event Loop
// ============================================================================

impl Transport {
    /// Event loop that handles WebSocket I/O.
    async fn run_event_loop<S>(
        ws_stream: WebSocketStream<S>,
        mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
        commands: Arc<CommandTable>,
        handlers: Arc<HandlerRegistry>,
        state: Arc<watch::Sender<TransportState>>,
        close_timeout: Duration,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let reason = loop {
            tokio::select! {
                // Incoming frames from the remote end
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            Self::handle_incoming_message(text.as_str(), &commands, &handlers);
                        }

                        Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                            Ok(text) => Self::handle_incoming_message(text, &commands, &handlers),
                            Err(e) => warn!(error = %e, len = data.len(), "Binary frame is not UTF-8"),
                        },

                        Some(Ok(Message::Close(frame))) => {
                            debug!(?frame, "WebSocket closed by remote");
                            break CloseReason::Remote;
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            break CloseReason::Remote;
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break CloseReason::Remote;
                        }

                        // Ignore Ping, Pong and raw frames
                        _ => {}
                    }
                }

                // Commands from the API
                command = outbound_rx.recv() => {
                    match command {
                        Some(Outbound::Frame { id, text }) => {
                            Self::write_frame(&mut ws_write, id, text, &commands).await;
                        }

                        Some(Outbound::Shutdown) => {
                            debug!("Shutdown requested");
                            if timeout(close_timeout, ws_write.close()).await.is_err() {
                                warn!(timeout_ms = close_timeout.as_millis() as u64, "Close handshake timed out");
                            }
                            break CloseReason::Stopped;
                        }

                        None => {
                            debug!("All transport handles dropped");
                            let _ = timeout(close_timeout, ws_write.close()).await;
                            break CloseReason::Dropped;
                        }
                    }
                }
            }
        };

        Self::finish(reason, &commands, &handlers, &state);

        debug!(?reason, "Event loop terminated");
    }

    /// Handles one inbound text frame.
    fn handle_incoming_message(text: &str, commands: &CommandTable, handlers: &HandlerRegistry) {
        match frame::decode(text) {
            Ok(Inbound::Response(response)) => {
                let id = response.id;
                if !commands.complete(response) {
                    debug!(%id, "Response for unknown command, discarding");
                }
            }

            Ok(Inbound::Notification(event)) => {
                let report = handlers.dispatch(&event);
                trace!(
                    method = %event.method,
                    invoked = report.invoked,
                    panicked = report.panicked,
                    "Event dispatched"
                );
            }

            Err(e) => {
                warn!(error = %e, len = text.len(), "Failed to decode inbound frame");
            }
        }
    }

    /// Writes one command frame.
    async fn write_frame<S>(
        ws_write: &mut SplitSink<WebSocketStream<S>, Message>,
        id: CommandId,
        text: String,
        commands: &CommandTable,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        // Abandoned before it reached the wire.
        if !commands.contains(id) {
            trace!(%id, "Skipping write for abandoned command");
            return;
        }

        if let Err(e) = ws_write.send(Message::Text(text.into())).await {
            warn!(%id, error = %e, "Failed to write command");
            commands.fail(id, Error::WebSocket(e));
            return;
        }

        trace!(%id, "Command written");
    }

    /// Moves the transport to Closed after the loop ends.
    fn finish(
        reason: CloseReason,
        commands: &CommandTable,
        handlers: &HandlerRegistry,
        state: &watch::Sender<TransportState>,
    ) {
        state.send_if_modified(|state| {
            if *state == TransportState::Open {
                *state = TransportState::Closing;
                true
            } else {
                false
            }
        });

        let failed = commands.close(|| match reason {
            CloseReason::Remote => Error::ConnectionClosed,
            CloseReason::Stopped | CloseReason::Dropped => Error::TransportClosed,
        });
        handlers.close();

        if failed > 0 {
            debug!(failed, ?reason, "Failed pending commands on close");
        }

        state.send_replace(TransportState::Closed);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::duplex;
    use tokio_tungstenite::tungstenite::protocol::Role;

    async fn pair() -> (Transport, WebSocketStream<tokio::io::DuplexStream>) {
        let (local, remote) = duplex(64 * 1024);
        let client = WebSocketStream::from_raw_socket(local, Role::Client, None).await;
        let server = WebSocketStream::from_raw_socket(remote, Role::Server, None).await;
        (Transport::new(client), server)
    }

    #[tokio::test]
    async fn test_starts_open() {
        let (transport, _remote) = pair().await;
        assert_eq!(transport.state(), TransportState::Open);
        assert!(transport.is_open());
        assert_eq!(transport.current_id(), CommandId::new(0));
        assert_eq!(transport.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (transport, _remote) = pair().await;
        transport.stop();
        transport.stop();
        transport.wait_closed().await;
        transport.stop();
        assert_eq!(transport.state(), TransportState::Closed);
    }

    #[tokio::test]
    async fn test_send_after_stop_fails_fast() {
        let (transport, _remote) = pair().await;
        transport.stop();

        let err = transport.send("Foo.bar", &()).expect_err("closed");
        assert!(matches!(err, Error::TransportClosed));
        assert_eq!(transport.current_id(), CommandId::new(0));
    }

    #[tokio::test]
    async fn test_serialization_error_registers_nothing() {
        use serde::ser::Error as _;

        struct Broken;
        impl Serialize for Broken {
            fn serialize<S: serde::Serializer>(&self, _: S) -> std::result::Result<S::Ok, S::Error> {
                Err(S::Error::custom("broken"))
            }
        }

        let (transport, _remote) = pair().await;
        let err = transport.send("Foo.bar", &Broken).expect_err("serialize");
        assert!(matches!(err, Error::Json(_)));
        assert_eq!(transport.pending_count(), 0);
        assert_eq!(transport.current_id(), CommandId::new(0));
    }

    #[tokio::test]
    async fn test_with_options_validates() {
        let (local, _remote) = duplex(1024);
        let client = WebSocketStream::from_raw_socket(local, Role::Client, None).await;
        let result = Transport::with_options(client, TransportOptions::new().with_max_pending(0));
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn test_clone_shares_state() {
        let (transport, _remote) = pair().await;
        let clone = transport.clone();

        let _pending = transport.send("Foo.bar", &()).expect("send");
        assert_eq!(clone.pending_count(), 1);
        assert_eq!(clone.current_id(), CommandId::new(1));

        clone.stop();
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn test_weak_handle_shares_state() {
        let (transport, _remote) = pair().await;
        let weak = transport.downgrade();

        let upgraded = weak.upgrade().expect("transport alive");
        let _pending = upgraded.send("Foo.bar", &()).expect("send");
        assert_eq!(transport.pending_count(), 1);
        assert_eq!(transport.current_id(), CommandId::new(1));
    }

    #[tokio::test]
    async fn test_weak_handle_does_not_keep_loop_alive() {
        let (transport, _remote) = pair().await;
        let weak = transport.downgrade();
        let state = Arc::clone(&transport.state);
        let pending = transport.send("Foo.bar", &()).expect("send");

        drop(transport);
        assert!(weak.upgrade().is_none());

        let err = pending.await.expect_err("failed on close");
        assert!(matches!(err, Error::TransportClosed));

        let mut receiver = state.subscribe();
        receiver
            .wait_for(|state| *state == TransportState::Closed)
            .await
            .expect("state sender alive");
    }
}
