//! Connection state machine.
//!
//! ```text
//!   Connecting ──> Open ──> Closing ──> Closed
//!                   │                     ^
//!                   └─────────────────────┘
//!              peer close / idle timeout / dispose
//! ```
//!
//! `ConnectionCore` is the lock-protected part of a connection. Termination
//! is recorded here exactly once; the same call cascades the terminal error
//! into every stream and empties the accept queue, so nothing registered on
//! the connection can outlive it without a terminal error.

use std::sync::Arc;

use crate::classify::TerminalError;
use crate::config::ConnectionOptions;
use crate::stream::StreamShared;
use crate::transport::Side;

use super::accept_queue::AcceptQueue;
use super::stream_table::StreamTable;

/// Observable lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake in progress.
    Connecting,
    /// Established and usable.
    Open,
    /// A local close is being carried out.
    Closing,
    /// Terminated; every operation fails with the recorded error.
    Closed,
}

impl ConnectionState {
    /// Whether termination has begun.
    pub fn is_terminating(self) -> bool {
        matches!(self, ConnectionState::Closing | ConnectionState::Closed)
    }
}

/// Mutable state of one connection.
#[derive(Debug)]
pub(crate) struct ConnectionCore {
    pub(crate) state: ConnectionState,
    pub(crate) terminal: Option<TerminalError>,
    pub(crate) disposed: bool,
    /// Code we sent when closing, if we closed first.
    pub(crate) local_close_code: Option<u64>,
    /// Code the peer sent when it closed, if it did.
    pub(crate) remote_close_code: Option<u64>,
    pub(crate) streams: StreamTable,
    pub(crate) accept_queue: AcceptQueue,
}

impl ConnectionCore {
    pub(crate) fn new(local: Side, options: &ConnectionOptions) -> Self {
        Self {
            state: ConnectionState::Connecting,
            terminal: None,
            disposed: false,
            local_close_code: None,
            remote_close_code: None,
            streams: StreamTable::new(local),
            accept_queue: AcceptQueue::new(
                options.max_inbound_bidirectional_streams,
                options.max_inbound_unidirectional_streams,
            ),
        }
    }

    /// Record `terminal` and move to `next`.
    ///
    /// Returns the streams that were told about it (to be woken once the
    /// lock is released), or `None` if the connection had already terminated.
    /// A later call never replaces the first terminal error, but may still
    /// advance `Closing` to `Closed`.
    pub(crate) fn terminate(
        &mut self,
        terminal: TerminalError,
        next: ConnectionState,
    ) -> Option<Vec<Arc<StreamShared>>> {
        if next == ConnectionState::Closed {
            self.state = ConnectionState::Closed;
        }
        if self.terminal.is_some() {
            return None;
        }
        self.terminal = Some(terminal);
        if !self.state.is_terminating() {
            self.state = next;
        }

        let mut affected = self.streams.drain();
        affected.extend(self.accept_queue.drain());
        for stream in &affected {
            stream.lock().record_terminal(terminal);
        }
        Some(affected)
    }
}
