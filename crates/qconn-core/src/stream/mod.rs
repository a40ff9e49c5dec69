//! Streams multiplexed over a connection.
//!
//! A [`Stream`] is the caller's handle on one stream. The connection keeps
//! the shared half ([`StreamShared`]) in its stream table so the event
//! driver can feed it peer data and terminal errors; the handle only holds a
//! weak reference back to the connection.
//!
//! Every direction ends exactly once. The first terminal error recorded for
//! a direction is the one every later read or write on that direction sees.

mod proptest;
mod state;

pub use state::StreamState;

pub(crate) use state::StreamCore;

use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use bytes::Bytes;
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::classify::{Termination, TerminalError, classify};
use crate::connection::ConnectionInner;
use crate::error::{Error, Result};
use crate::transport::{
    Side, StreamDirection, StreamId, StreamKind, TransportAction, TransportConnection,
};
use state::Op;

/// Which direction(s) of a stream to abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortDirection {
    /// Stop reading; the peer is asked to stop sending.
    Read,
    /// Stop writing; the peer's reads fail.
    Write,
    /// Both of the above.
    Both,
}

impl AbortDirection {
    fn read(self) -> bool {
        matches!(self, AbortDirection::Read | AbortDirection::Both)
    }

    fn write(self) -> bool {
        matches!(self, AbortDirection::Write | AbortDirection::Both)
    }
}

// =============================================================================
// Shared State
// =============================================================================

/// State shared between a [`Stream`] handle and the connection driver.
#[derive(Debug)]
pub(crate) struct StreamShared {
    id: StreamId,
    core: Mutex<StreamCore>,
    notify: Notify,
}

impl StreamShared {
    pub(crate) fn new(id: StreamId, local: Side) -> Self {
        Self {
            id,
            core: Mutex::new(StreamCore::new(id, local)),
            notify: Notify::new(),
        }
    }

    pub(crate) fn id(&self) -> StreamId {
        self.id
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, StreamCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wake every task waiting on this stream.
    pub(crate) fn wake(&self) {
        self.notify.notify_waiters();
    }

    /// Apply `f` under the lock, then wake waiters.
    pub(crate) fn update<T>(&self, f: impl FnOnce(&mut StreamCore) -> T) -> T {
        let out = f(&mut self.lock());
        self.wake();
        out
    }

    /// Wait until the write side has a terminal error.
    async fn send_terminated(&self) -> TerminalError {
        loop {
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();
            if let Some(terminal) = self.lock().send_error() {
                return terminal;
            }
            notified.await;
        }
    }
}

/// Releases an operation's in-flight slot, including when its future is
/// dropped before completion.
struct InFlight<'a> {
    shared: &'a StreamShared,
    op: Op,
}

impl<'a> InFlight<'a> {
    fn begin(shared: &'a StreamShared, op: Op) -> Result<Self> {
        shared.lock().begin(op)?;
        Ok(Self { shared, op })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.shared.update(|core| core.end(self.op));
    }
}

// =============================================================================
// Stream Handle
// =============================================================================

/// A stream on a [`Connection`](crate::Connection).
///
/// Dropping the handle disposes the stream.
pub struct Stream {
    shared: Arc<StreamShared>,
    transport: Arc<dyn TransportConnection>,
    conn: Weak<ConnectionInner>,
    default_code: u64,
}

impl Stream {
    pub(crate) fn new(
        shared: Arc<StreamShared>,
        transport: Arc<dyn TransportConnection>,
        conn: Weak<ConnectionInner>,
        default_code: u64,
    ) -> Self {
        Self {
            shared,
            transport,
            conn,
            default_code,
        }
    }

    /// Get the stream ID.
    pub fn id(&self) -> StreamId {
        self.shared.id()
    }

    /// Bidirectional or unidirectional.
    pub fn kind(&self) -> StreamKind {
        self.shared.lock().kind()
    }

    /// Whether this stream was opened here or accepted from the peer.
    pub fn direction(&self) -> StreamDirection {
        self.shared.lock().direction()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StreamState {
        self.shared.lock().state()
    }

    /// Whether this side may write.
    pub fn can_write(&self) -> bool {
        self.shared.lock().can_send()
    }

    /// Whether this side may read.
    pub fn can_read(&self) -> bool {
        self.shared.lock().can_recv()
    }

    /// Read into `buf`.
    ///
    /// Returns the number of bytes read; `Ok(0)` means the peer finished its
    /// writes and everything has been consumed. Suspends until data, end of
    /// stream or a terminal error is available.
    ///
    /// An empty `buf` never suspends: it returns the recorded terminal error
    /// if there is one and `Ok(0)` otherwise, so `Ok(0)` only signals end of
    /// stream for a non-empty `buf`.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if !self.can_read() {
            return Err(Error::configuration("stream is send-only"));
        }
        let _in_flight = InFlight::begin(&self.shared, Op::Read)?;

        loop {
            let mut notified = pin!(self.shared.notify.notified());
            notified.as_mut().enable();

            let polled = self.shared.lock().poll_read(buf);
            if let Some(result) = polled {
                if let Ok(n) = result
                    && n > 0
                {
                    trace!(stream = %self.id(), bytes = n, "read");
                    self.with_stats(|conn| conn.record_recv(n));
                }
                return result;
            }
            notified.await;
        }
    }

    /// Read until the peer finishes, appending to `out`.
    pub async fn read_to_end(&self, out: &mut Vec<u8>) -> Result<usize> {
        let mut buf = [0u8; 4096];
        let mut total = 0;
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                return Ok(total);
            }
            out.extend_from_slice(&buf[..n]);
            total += n;
        }
    }

    /// Write `data`, suspending until the transport has accepted it.
    pub async fn write(&self, data: &[u8]) -> Result<()> {
        self.send(Bytes::copy_from_slice(data), false).await
    }

    /// Write `data` and finish the write side in one step.
    pub async fn write_and_finish(&self, data: &[u8]) -> Result<()> {
        self.send(Bytes::copy_from_slice(data), true).await
    }

    async fn send(&self, data: Bytes, fin: bool) -> Result<()> {
        if !self.can_write() {
            return Err(Error::configuration("stream is receive-only"));
        }
        let _in_flight = InFlight::begin(&self.shared, Op::Write)?;

        {
            let mut core = self.shared.lock();
            core.check_send()?;
            if fin {
                core.finish_send();
            }
        }

        let len = data.len();
        let id = self.id();
        tokio::select! {
            biased;
            terminal = self.shared.send_terminated() => Err(terminal.into()),
            result = self.transport.send(id, data, fin) => match result {
                Ok(()) => {
                    trace!(stream = %id, bytes = len, fin, "wrote");
                    self.with_stats(|conn| conn.record_send(len));
                    Ok(())
                }
                // A transport failure that raced a termination reports the
                // recorded terminal error instead.
                Err(err) => match self.shared.lock().send_error() {
                    Some(terminal) => Err(terminal.into()),
                    None => Err(err),
                },
            },
        }
    }

    /// Finish the write side gracefully. The peer reads end of stream once
    /// it has consumed everything written before.
    pub fn finish(&self) -> Result<()> {
        if !self.can_write() {
            return Err(Error::configuration("stream is receive-only"));
        }
        let send_fin = {
            let mut core = self.shared.lock();
            if core.write_in_flight() {
                return Err(Error::configuration(format!(
                    "cannot finish stream {} while a write is in progress",
                    self.id()
                )));
            }
            if let Some(terminal) = core.send_error() {
                return Err(terminal.into());
            }
            core.finish_send()
        };
        if send_fin {
            self.shared.wake();
            self.transport
                .submit(TransportAction::FinishStream { id: self.id() })?;
        }
        Ok(())
    }

    /// Close the stream with an application `code`.
    ///
    /// An open write side is finished gracefully and an open read side is
    /// stopped with `code`. Operations pending on either direction, and every
    /// later one, fail with `OperationAborted { code }`. Closing twice is a
    /// no-op; the first code stays.
    pub fn close(&self, code: u64) {
        let terminal = classify(&Termination::local_close(code));
        let (send_fin, stop_reading) = self.shared.update(|core| {
            let send_fin = core.finish_send();
            let stop_reading = core.recv_live();
            core.record_terminal(terminal);
            (send_fin, stop_reading)
        });

        let id = self.id();
        if send_fin {
            self.submit(TransportAction::FinishStream { id });
        }
        if stop_reading {
            self.submit(TransportAction::StopSending { id, code });
        }
        debug!(stream = %id, code, "stream closed");
    }

    /// Abort one or both directions with an application `code`.
    ///
    /// The peer sees `StreamAborted { code }` on the aborted direction. Local
    /// operations on it fail with `OperationAborted { code }`, unless the
    /// direction had already ended with another error.
    pub fn abort(&self, direction: AbortDirection, code: u64) {
        let terminal = classify(&Termination::local_abort(code));
        let (reset, stop) = self.shared.update(|core| {
            let reset = direction.write() && core.send_live();
            let stop = direction.read() && core.recv_live();
            if direction.write() && core.can_send() {
                core.record_send_error(terminal);
            }
            if direction.read() && core.can_recv() {
                core.record_recv_error(terminal);
            }
            (reset, stop)
        });

        let id = self.id();
        if reset {
            self.submit(TransportAction::ResetStream { id, code });
        }
        if stop {
            self.submit(TransportAction::StopSending { id, code });
        }
        debug!(stream = %id, code, ?direction, "stream aborted");
    }

    /// Release the stream: close it with the connection's default stream
    /// error code and remove it from the connection. Idempotent.
    pub fn dispose(&self) {
        if !self.shared.lock().mark_disposed() {
            return;
        }
        self.close(self.default_code);
        if let Some(conn) = self.conn.upgrade() {
            conn.release_stream(self.id());
        }
    }

    fn submit(&self, action: TransportAction) {
        // Failing here means the connection is already gone; the stream's
        // recorded error covers that.
        if let Err(e) = self.transport.submit(action) {
            trace!(stream = %self.id(), error = %e, "stream action dropped");
        }
    }

    fn with_stats(&self, f: impl FnOnce(&ConnectionInner)) {
        if let Some(conn) = self.conn.upgrade() {
            f(&conn);
        }
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.dispose();
    }
}
