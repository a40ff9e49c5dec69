//! Stream state machine.
//!
//! `StreamCore` holds everything about one stream that can change: the
//! per-direction progress, the per-direction terminal error and the receive
//! buffer. It performs no I/O and never blocks; the async handle in the
//! parent module wraps it in a lock and a wakeup.
//!
//! ```text
//!            finish / close            peer FIN
//!   Open ──────────────> LocalClosed   Open ──────> PeerClosed
//!    │                        │          │               │
//!    │ abort / reset / cascade│          │               │
//!    v                        v          v               v
//!  Aborted ──────────────────────────> Closed <──────────┘
//!              (both directions done, nothing in flight)
//! ```
//!
//! A direction's terminal error is written at most once. Whatever ends a
//! direction first (local close, abort, peer reset, connection cascade)
//! fixes the kind and code returned to every later operation.

use bytes::{Buf, BytesMut};

use crate::classify::TerminalError;
use crate::constants::STREAM_RECV_BUF_CAPACITY;
use crate::error::{Error, Result};
use crate::transport::{Side, StreamDirection, StreamId, StreamKind};

/// Observable lifecycle state of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Both directions usable.
    Open,
    /// Our write side is finished; reads still possible.
    LocalClosed,
    /// The peer finished its writes; our writes still possible.
    PeerClosed,
    /// A direction ended with a terminal error while the other is still live.
    Aborted,
    /// Both directions are done and no operation is in flight.
    Closed,
}

/// Progress of one direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Half {
    Open,
    Finished,
}

/// Which operation holds the in-flight slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    Read,
    Write,
}

/// Mutable state of a single stream.
#[derive(Debug)]
pub(crate) struct StreamCore {
    id: StreamId,
    local: Side,
    send: Half,
    recv: Half,
    send_error: Option<TerminalError>,
    recv_error: Option<TerminalError>,
    recv_buf: BytesMut,
    read_in_flight: bool,
    write_in_flight: bool,
    disposed: bool,
}

impl StreamCore {
    /// Create the state for stream `id` as seen from `local`.
    ///
    /// A direction the stream does not have (the write side of an inbound
    /// unidirectional stream, the read side of an outbound one) starts
    /// finished.
    pub(crate) fn new(id: StreamId, local: Side) -> Self {
        let send = if id.can_send(local) { Half::Open } else { Half::Finished };
        let recv = if id.can_recv(local) { Half::Open } else { Half::Finished };
        let capacity = if recv == Half::Open {
            STREAM_RECV_BUF_CAPACITY
        } else {
            0
        };
        Self {
            id,
            local,
            send,
            recv,
            send_error: None,
            recv_error: None,
            recv_buf: BytesMut::with_capacity(capacity),
            read_in_flight: false,
            write_in_flight: false,
            disposed: false,
        }
    }

    pub(crate) fn kind(&self) -> StreamKind {
        self.id.kind()
    }

    pub(crate) fn direction(&self) -> StreamDirection {
        self.id.direction_for(self.local)
    }

    pub(crate) fn can_send(&self) -> bool {
        self.id.can_send(self.local)
    }

    pub(crate) fn can_recv(&self) -> bool {
        self.id.can_recv(self.local)
    }

    pub(crate) fn send_error(&self) -> Option<TerminalError> {
        self.send_error
    }

    #[cfg(test)]
    pub(crate) fn recv_error(&self) -> Option<TerminalError> {
        self.recv_error
    }

    #[cfg(test)]
    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub(crate) fn mark_disposed(&mut self) -> bool {
        !std::mem::replace(&mut self.disposed, true)
    }

    // =========================================================================
    // Terminal errors
    // =========================================================================

    /// Record a terminal error for the write side. Returns false if one was
    /// already recorded.
    pub(crate) fn record_send_error(&mut self, terminal: TerminalError) -> bool {
        if self.send_error.is_some() {
            return false;
        }
        self.send_error = Some(terminal);
        true
    }

    /// Record a terminal error for the read side. Returns false if one was
    /// already recorded. Unread data is discarded.
    pub(crate) fn record_recv_error(&mut self, terminal: TerminalError) -> bool {
        if self.recv_error.is_some() {
            return false;
        }
        self.recv_error = Some(terminal);
        self.recv_buf.clear();
        true
    }

    /// Record a terminal error for both directions (connection cascade,
    /// local close). Each direction keeps its first error.
    pub(crate) fn record_terminal(&mut self, terminal: TerminalError) -> bool {
        let send = self.record_send_error(terminal);
        let recv = self.record_recv_error(terminal);
        send || recv
    }

    // =========================================================================
    // Peer events
    // =========================================================================

    /// Buffer bytes from the peer. Returns false if the read side no longer
    /// accepts data.
    pub(crate) fn on_data(&mut self, data: &[u8], fin: bool) -> bool {
        if self.recv_error.is_some() || self.recv == Half::Finished {
            return false;
        }
        self.recv_buf.extend_from_slice(data);
        if fin {
            self.recv = Half::Finished;
        }
        true
    }

    // =========================================================================
    // Local operations
    // =========================================================================

    /// Claim the in-flight slot for `op`.
    pub(crate) fn begin(&mut self, op: Op) -> Result<()> {
        let slot = match op {
            Op::Read => &mut self.read_in_flight,
            Op::Write => &mut self.write_in_flight,
        };
        if *slot {
            let what = match op {
                Op::Read => "read",
                Op::Write => "write",
            };
            return Err(Error::configuration(format!(
                "a {what} is already in progress on stream {}",
                self.id
            )));
        }
        *slot = true;
        Ok(())
    }

    /// Release the in-flight slot for `op`.
    pub(crate) fn end(&mut self, op: Op) {
        match op {
            Op::Read => self.read_in_flight = false,
            Op::Write => self.write_in_flight = false,
        }
    }

    pub(crate) fn write_in_flight(&self) -> bool {
        self.write_in_flight
    }

    /// Try to satisfy a read. `None` means the caller has to wait.
    pub(crate) fn poll_read(&mut self, buf: &mut [u8]) -> Option<Result<usize>> {
        if let Some(terminal) = self.recv_error {
            return Some(Err(terminal.into()));
        }
        // Nothing fits, so there is nothing to wait for
        if buf.is_empty() {
            return Some(Ok(0));
        }
        if !self.recv_buf.is_empty() {
            let n = buf.len().min(self.recv_buf.len());
            buf[..n].copy_from_slice(&self.recv_buf[..n]);
            self.recv_buf.advance(n);
            return Some(Ok(n));
        }
        if self.recv == Half::Finished {
            return Some(Ok(0));
        }
        None
    }

    /// Check that a write may proceed.
    pub(crate) fn check_send(&self) -> Result<()> {
        if let Some(terminal) = self.send_error {
            return Err(terminal.into());
        }
        if self.send == Half::Finished {
            return Err(Error::configuration(format!(
                "write side of stream {} is already finished",
                self.id
            )));
        }
        Ok(())
    }

    /// Mark the write side finished. Returns true if a FIN has to be sent.
    pub(crate) fn finish_send(&mut self) -> bool {
        if self.send_error.is_some() || self.send == Half::Finished {
            return false;
        }
        self.send = Half::Finished;
        true
    }

    /// Whether the write side is still open and error free.
    pub(crate) fn send_live(&self) -> bool {
        self.send == Half::Open && self.send_error.is_none()
    }

    /// Whether the read side is still expecting data and error free.
    pub(crate) fn recv_live(&self) -> bool {
        self.recv == Half::Open && self.recv_error.is_none()
    }

    /// Derive the observable state.
    pub(crate) fn state(&self) -> StreamState {
        let send_done = self.send == Half::Finished || self.send_error.is_some();
        let recv_done = self.recv_error.is_some()
            || (self.recv == Half::Finished && self.recv_buf.is_empty());
        let idle = !self.read_in_flight && !self.write_in_flight;

        if send_done && recv_done && idle {
            StreamState::Closed
        } else if self.send_error.is_some() || self.recv_error.is_some() {
            StreamState::Aborted
        } else if self.send == Half::Finished && self.can_send() {
            StreamState::LocalClosed
        } else if self.recv == Half::Finished && self.can_recv() {
            StreamState::PeerClosed
        } else {
            StreamState::Open
        }
    }
}
