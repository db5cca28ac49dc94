//! Command identifiers and the table of in-flight commands.
//!
//! A command is *pending* from the moment it is inserted into the
//! [`CommandTable`] until exactly one of these happens:
//!
//! - a response with its id is processed (removed, caller completed)
//! - the caller abandons it with `cancel` (removed, caller failed)
//! - the transport closes (table drained, caller failed)
//!
//! The table is closed and drained under the same lock that guards insertion,
//! so nothing can slip into the table after shutdown has walked it.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::value::RawValue;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::CommandId;
use crate::protocol::Response;

// ============================================================================
// Types
// ============================================================================

/// Outcome delivered to a waiting caller.
pub(crate) type CommandResult = Result<Box<RawValue>>;

/// Completion side of a pending command.
pub(crate) type Completion = oneshot::Sender<CommandResult>;

// ============================================================================
// IdAllocator
// ============================================================================

/// Hands out command ids: 1, 2, 3, ...
///
/// Safe to share between any number of callers. An exhausted counter
/// reports [`Error::IdsExhausted`] rather than wrapping around.
#[derive(Debug, Default)]
pub struct IdAllocator {
    last: AtomicU64,
}

impl IdAllocator {
    /// Creates an allocator whose first id is 1.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    /// Returns a fresh id, strictly greater than every id returned before.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IdsExhausted`] once `u64::MAX` has been issued.
    pub fn next(&self) -> Result<CommandId> {
        self.last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| last.checked_add(1))
            .map(|previous| CommandId::new(previous + 1))
            .map_err(|_| Error::IdsExhausted)
    }

    /// Returns the most recently issued id (`0` before the first one).
    #[inline]
    #[must_use]
    pub fn current(&self) -> CommandId {
        CommandId::new(self.last.load(Ordering::Acquire))
    }

    #[cfg(test)]
    fn resume_after(last: u64) -> Self {
        Self {
            last: AtomicU64::new(last),
        }
    }
}

// ============================================================================
// PendingCommand
// ============================================================================

/// One in-flight command, owned by the [`CommandTable`].
#[derive(Debug)]
pub(crate) struct PendingCommand {
    /// Remote method name.
    pub method: String,
    /// Serialized parameters as sent.
    pub params: Option<Box<RawValue>>,
    /// Target session, if any.
    pub session_id: Option<String>,
    /// Completion signal, fired at most once.
    pub completion: Completion,
    /// When the command was registered.
    pub issued_at: Instant,
}

impl PendingCommand {
    fn finish(self, result: CommandResult) {
        // The caller may have dropped its handle; nobody to tell then.
        let _ = self.completion.send(result);
    }
}

/// Snapshot of a pending command, for diagnostics.
#[derive(Debug, Clone)]
pub struct PendingInfo {
    /// Command id.
    pub id: CommandId,
    /// Remote method name.
    pub method: String,
    /// Serialized parameters as sent.
    pub params: Option<Box<RawValue>>,
    /// Target session, if any.
    pub session_id: Option<String>,
    /// Time since the command was registered.
    pub age: Duration,
}

// ============================================================================
// CommandTable
// ============================================================================

#[derive(Debug, Default)]
struct TableState {
    entries: FxHashMap<CommandId, PendingCommand>,
    closed: bool,
}

/// Map of command ids to in-flight commands.
#[derive(Debug)]
pub(crate) struct CommandTable {
    state: Mutex<TableState>,
    max_pending: Option<usize>,
}

impl CommandTable {
    /// Creates an empty, open table.
    pub fn new(max_pending: Option<usize>) -> Self {
        Self {
            state: Mutex::new(TableState::default()),
            max_pending,
        }
    }

    /// Registers a command under `id`.
    ///
    /// # Errors
    ///
    /// - [`Error::TransportClosed`] if the table has been closed
    /// - [`Error::TooManyPending`] if the pending limit is reached
    /// - [`Error::Protocol`] if `id` is already pending
    pub fn insert(&self, id: CommandId, command: PendingCommand) -> Result<()> {
        let mut state = self.state.lock();

        if state.closed {
            return Err(Error::TransportClosed);
        }

        if let Some(max) = self.max_pending
            && state.entries.len() >= max
        {
            return Err(Error::too_many_pending(state.entries.len(), max));
        }

        if state.entries.contains_key(&id) {
            return Err(Error::protocol(format!("command id {id} is already pending")));
        }

        state.entries.insert(id, command);
        Ok(())
    }

    /// Completes the command a response belongs to.
    ///
    /// Returns `false` if no command with that id is pending (late,
    /// duplicate or abandoned). The response is dropped in that case.
    pub fn complete(&self, response: Response) -> bool {
        let Some(command) = self.state.lock().entries.remove(&response.id) else {
            return false;
        };

        trace!(
            id = %response.id,
            method = %command.method,
            success = response.is_success(),
            elapsed_ms = command.issued_at.elapsed().as_millis() as u64,
            "Command completed"
        );

        let result = response.into_result(&command.method);
        command.finish(result);
        true
    }

    /// Fails one pending command with `error`.
    pub fn fail(&self, id: CommandId, error: Error) -> bool {
        let Some(command) = self.state.lock().entries.remove(&id) else {
            return false;
        };
        command.finish(Err(error));
        true
    }

    /// Removes a pending command without a response.
    ///
    /// The caller's handle resolves to [`Error::Cancelled`] if it is still
    /// being awaited; a response arriving later is discarded.
    pub fn cancel(&self, id: CommandId) -> bool {
        let Some(command) = self.state.lock().entries.remove(&id) else {
            return false;
        };
        debug!(%id, method = %command.method, "Abandoned pending command");
        command.finish(Err(Error::cancelled(id)));
        true
    }

    /// Closes the table and fails every pending command.
    ///
    /// Subsequent inserts fail with [`Error::TransportClosed`]. Calling this
    /// again is a no-op. Returns the number of commands failed.
    pub fn close(&self, make_error: impl Fn() -> Error) -> usize {
        let drained: Vec<PendingCommand> = {
            let mut state = self.state.lock();
            if state.closed {
                return 0;
            }
            state.closed = true;
            state.entries.drain().map(|(_, command)| command).collect()
        };

        let count = drained.len();
        for command in drained {
            command.finish(Err(make_error()));
        }

        if count > 0 {
            debug!(count, "Failed pending commands on close");
        }
        count
    }

    /// Returns `true` once [`CommandTable::close`] has run.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Returns `true` if `id` is pending.
    #[inline]
    pub fn contains(&self, id: CommandId) -> bool {
        self.state.lock().entries.contains_key(&id)
    }

    /// Returns the number of pending commands.
    #[inline]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Lists pending commands ordered by id.
    pub fn snapshot(&self) -> Vec<PendingInfo> {
        let mut pending: Vec<PendingInfo> = self
            .state
            .lock()
            .entries
            .iter()
            .map(|(id, command)| PendingInfo {
                id: *id,
                method: command.method.clone(),
                params: command.params.clone(),
                session_id: command.session_id.clone(),
                age: command.issued_at.elapsed(),
            })
            .collect();
        pending.sort_by_key(|info| info.id);
        pending
    }
}

// ============================================================================
// PendingResponse
// ============================================================================

/// Handle to the eventual result of one command.
///
/// Awaiting it yields the raw `result` payload, the remote error as
/// [`Error::Remote`], [`Error::Cancelled`] after [`PendingResponse::cancel`]
/// or [`Transport::cancel`](crate::Transport::cancel), or
/// [`Error::TransportClosed`] / [`Error::ConnectionClosed`] if the
/// transport went away first.
///
/// Dropping the handle does not remove the command from the table; use
/// [`PendingResponse::cancel`] to abandon it.
#[must_use = "a command's result is only observable through its PendingResponse"]
#[derive(Debug)]
pub struct PendingResponse {
    id: CommandId,
    method: String,
    receiver: oneshot::Receiver<CommandResult>,
    table: Arc<CommandTable>,
}

impl PendingResponse {
    pub(crate) fn new(
        id: CommandId,
        method: String,
        receiver: oneshot::Receiver<CommandResult>,
        table: Arc<CommandTable>,
    ) -> Self {
        Self {
            id,
            method,
            receiver,
            table,
        }
    }

    /// Returns the id assigned to the command.
    #[inline]
    #[must_use]
    pub fn id(&self) -> CommandId {
        self.id
    }

    /// Returns the remote method name.
    #[inline]
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Abandons the command.
    ///
    /// Returns `true` if it was still pending.
    pub fn cancel(self) -> bool {
        self.table.cancel(self.id)
    }
}

impl Future for PendingResponse {
    type Output = CommandResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(Error::TransportClosed)))
    }
}

// ============================================================================
// Tests
// ============================================================================
