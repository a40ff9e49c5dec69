//! Connection lifecycle.
//!
//! A [`Connection`] owns one transport connection and everything multiplexed
//! on it: the stream table, the accept queue and a driver task that applies
//! transport events. Termination is recorded once, whoever causes it, and
//! cascades into every stream:
//! - `close(code)`: pending and later operations fail with
//!   `OperationAborted { code }`; the peer sees `ConnectionAborted { code }`
//! - `dispose()`: like close with the configured default code, after which
//!   new operations fail with `AlreadyDisposed`
//! - peer close: every operation fails with `ConnectionAborted { code }`
//! - idle timeout: every operation fails with `ConnectionAborted` (no code)

mod accept_queue;
mod driver;
mod state;
mod stream_table;

pub use state::ConnectionState;

use std::net::SocketAddr;
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::classify::{Termination, TerminalError, classify};
use crate::config::{ClientConnectionOptions, ConnectionOptions, DisposeBehavior};
use crate::error::{Error, Result};
use crate::identity::PeerIdentity;
use crate::stats::ConnectionStats;
use crate::stream::{Stream, StreamShared};
use crate::transport::{
    ConnectParams, Side, StreamId, StreamKind, TransportAction, TransportBinding,
    TransportConnection,
};

use state::ConnectionCore;

// =============================================================================
// Shared State
// =============================================================================

/// State shared between the [`Connection`] handle, its streams and the
/// driver task.
pub(crate) struct ConnectionInner {
    side: Side,
    options: ConnectionOptions,
    transport: Arc<dyn TransportConnection>,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    alpn: Bytes,
    identity: Mutex<Option<PeerIdentity>>,
    core: Mutex<ConnectionCore>,
    /// Wakes accept waiters and close waiters.
    notify: Notify,
    stats: Mutex<ConnectionStats>,
    shutdown_tx: watch::Sender<bool>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionInner {
    fn lock(&self) -> MutexGuard<'_, ConnectionCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_stats(&self) -> MutexGuard<'_, ConnectionStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn record_send(&self, bytes: usize) {
        self.lock_stats().record_send(bytes);
    }

    pub(crate) fn record_recv(&self, bytes: usize) {
        self.lock_stats().record_recv(bytes);
    }

    /// Forget a disposed stream.
    pub(crate) fn release_stream(&self, id: StreamId) {
        if self.lock().streams.remove(id).is_some() {
            trace!(stream = %id, "Stream released");
        }
    }

    fn submit(&self, action: TransportAction) {
        if let Err(e) = self.transport.submit(action) {
            debug!(remote = %self.remote_addr, error = %e, "Transport action dropped");
        }
    }

    fn stop_driver(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Wake streams affected by a termination and everyone waiting on the
    /// connection.
    fn wake(&self, affected: Vec<Arc<StreamShared>>) {
        for stream in affected {
            stream.wake();
        }
        self.notify.notify_waiters();
    }

    /// Record a termination reported by the peer or the transport.
    ///
    /// Returns false if the connection had already terminated.
    fn terminate(&self, termination: Termination) -> bool {
        let terminal = classify(&termination);
        let affected = self.lock().terminate(terminal, ConnectionState::Closed);
        let first = affected.is_some();
        self.wake(affected.unwrap_or_default());
        self.lock_stats().mark_closed();
        if first {
            info!(remote = %self.remote_addr, ?terminal, "Connection terminated");
        }
        first
    }

    /// Begin a local termination. Returns false if the connection was already
    /// terminating.
    fn close_locally(&self, code: u64, termination: Termination, next: ConnectionState) -> bool {
        let terminal = classify(&termination);
        let affected = {
            let mut core = self.lock();
            if core.state.is_terminating() {
                return false;
            }
            core.local_close_code = Some(code);
            core.terminate(terminal, next)
        };
        self.wake(affected.unwrap_or_default());
        true
    }

    /// Complete a local close once the driver has stopped. Idempotent.
    pub(super) fn finish_closing(&self) {
        {
            let mut core = self.lock();
            if core.state != ConnectionState::Closing {
                return;
            }
            core.state = ConnectionState::Closed;
        }
        self.lock_stats().mark_closed();
        self.notify.notify_waiters();
        debug!(remote = %self.remote_addr, "Connection closed");
    }

    /// Wait until the connection reaches `Closed`.
    async fn closed(&self) {
        loop {
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();
            if self.lock().state == ConnectionState::Closed {
                return;
            }
            notified.await;
        }
    }

    fn dispose(&self) {
        {
            let mut core = self.lock();
            if core.disposed {
                return;
            }
            core.disposed = true;
        }

        let code = self.options.default_close_error_code;
        if self.close_locally(code, Termination::local_dispose(code), ConnectionState::Closed) {
            match self.options.dispose_behavior {
                DisposeBehavior::Graceful => self.submit(TransportAction::Close { code }),
                DisposeBehavior::Abortive => self.submit(TransportAction::Abort),
            }
        }
        self.stop_driver();
        self.lock().state = ConnectionState::Closed;
        self.lock_stats().mark_closed();

        let identity = self
            .identity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(identity);

        self.notify.notify_waiters();
        debug!(remote = %self.remote_addr, code, "Connection disposed");
    }
}

// =============================================================================
// Connection Handle
// =============================================================================

/// An established connection.
///
/// Dropping the handle disposes the connection.
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Connect to a listener through `binding`.
    ///
    /// Fails with `ConnectFailure` when the handshake is refused, cannot agree
    /// on an application protocol, or does not complete within the handshake
    /// timeout. Invalid options fail with a configuration error before
    /// anything is sent.
    pub async fn connect(
        binding: &dyn TransportBinding,
        options: ClientConnectionOptions,
    ) -> Result<Self> {
        options.validate()?;
        let params = ConnectParams {
            remote_addr: options.remote_addr,
            alpn: options.alpn.clone(),
            idle_timeout: options.connection.idle_timeout,
        };
        let timeout = options.connection.handshake_timeout;

        debug!(remote = %options.remote_addr, "Connecting");
        let transport = match tokio::time::timeout(timeout, binding.connect(params)).await {
            Ok(Ok(transport)) => transport,
            Ok(Err(e @ Error::ConnectFailure { .. })) => return Err(e),
            Ok(Err(e)) => {
                return Err(Error::ConnectFailure {
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(Error::ConnectFailure {
                    reason: format!("handshake timed out after {timeout:?}"),
                });
            }
        };

        Ok(Self::establish(transport, Side::Client, options.connection))
    }

    /// Wrap a handshaken transport connection and start its driver.
    pub(crate) fn establish(
        transport: Arc<dyn TransportConnection>,
        side: Side,
        options: ConnectionOptions,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let identity = transport.take_peer_identity();
        let mut core = ConnectionCore::new(side, &options);
        core.state = ConnectionState::Open;

        let inner = Arc::new(ConnectionInner {
            side,
            local_addr: transport.local_addr(),
            remote_addr: transport.remote_addr(),
            alpn: transport.negotiated_alpn(),
            options,
            transport,
            identity: Mutex::new(identity),
            core: Mutex::new(core),
            notify: Notify::new(),
            stats: Mutex::new(ConnectionStats::new()),
            shutdown_tx,
            driver: Mutex::new(None),
        });

        let handle = tokio::spawn(driver::run(Arc::clone(&inner), shutdown_rx));
        *inner.driver.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        info!(
            local = %inner.local_addr,
            remote = %inner.remote_addr,
            ?side,
            alpn = %String::from_utf8_lossy(&inner.alpn),
            "Connection established"
        );
        Self { inner }
    }

    /// Get the local address.
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Get the remote peer's address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.remote_addr
    }

    /// Get the application protocol agreed during the handshake.
    pub fn negotiated_alpn(&self) -> &[u8] {
        &self.inner.alpn
    }

    /// Which end of the connection this is.
    pub fn side(&self) -> Side {
        self.inner.side
    }

    /// Get the connection options.
    pub fn options(&self) -> &ConnectionOptions {
        &self.inner.options
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// The terminal error recorded for this connection, if it has ended.
    pub fn terminal_error(&self) -> Option<TerminalError> {
        self.inner.lock().terminal
    }

    /// Code this side closed with, if it closed first.
    pub fn local_close_code(&self) -> Option<u64> {
        self.inner.lock().local_close_code
    }

    /// Code the peer closed with, if it closed.
    pub fn remote_close_code(&self) -> Option<u64> {
        self.inner.lock().remote_close_code
    }

    /// Get the peer's verified identity.
    ///
    /// The returned handle is the caller's to drop; holding it keeps the
    /// identity alive after the connection is disposed.
    pub fn remote_identity(&self) -> Option<PeerIdentity> {
        self.inner
            .identity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Get a snapshot of the connection statistics.
    pub fn stats(&self) -> ConnectionStats {
        self.inner.lock_stats().clone()
    }

    /// Open a locally initiated stream.
    pub fn open_outbound_stream(&self, kind: StreamKind) -> Result<Stream> {
        let shared = {
            let mut core = self.inner.lock();
            if core.disposed {
                return Err(Error::AlreadyDisposed);
            }
            if let Some(terminal) = core.terminal {
                return Err(terminal.into());
            }
            let id = core.streams.allocate(kind);
            let shared = Arc::new(StreamShared::new(id, self.inner.side));
            core.streams.insert(Arc::clone(&shared));
            shared
        };

        let id = shared.id();
        if let Err(e) = self.inner.transport.submit(TransportAction::OpenStream { id }) {
            self.inner.release_stream(id);
            return Err(match self.terminal_error() {
                Some(terminal) => terminal.into(),
                None => e,
            });
        }

        self.inner.lock_stats().record_opened();
        debug!(stream = %id, ?kind, "Opened stream");
        Ok(self.stream_handle(shared))
    }

    /// Open a bidirectional stream.
    pub fn open_bidirectional_stream(&self) -> Result<Stream> {
        self.open_outbound_stream(StreamKind::Bidirectional)
    }

    /// Open a unidirectional (send-only) stream.
    pub fn open_unidirectional_stream(&self) -> Result<Stream> {
        self.open_outbound_stream(StreamKind::Unidirectional)
    }

    /// Accept the next stream opened by the peer, in arrival order.
    ///
    /// Fails immediately with a configuration error when the connection was
    /// configured to accept no inbound streams. Suspends until a stream
    /// arrives or the connection terminates.
    pub async fn accept_inbound_stream(&self) -> Result<Stream> {
        {
            let core = self.inner.lock();
            if core.disposed {
                return Err(Error::AlreadyDisposed);
            }
            if core.accept_queue.is_disabled() {
                return Err(Error::configuration(
                    "connection was configured to accept no inbound streams",
                ));
            }
        }

        loop {
            let mut notified = pin!(self.inner.notify.notified());
            notified.as_mut().enable();

            let ready = {
                let mut core = self.inner.lock();
                match core.terminal {
                    Some(terminal) => Err(Error::from(terminal)),
                    None => Ok(core.accept_queue.pop()),
                }
            };
            if let Some(shared) = ready? {
                self.inner.lock_stats().record_accepted();
                debug!(stream = %shared.id(), "Accepted stream");
                return Ok(self.stream_handle(shared));
            }
            notified.await;
        }
    }

    /// Close the connection with an application `code`.
    ///
    /// Operations pending on the connection or any of its streams fail with
    /// `OperationAborted { code }`, as does every later one. The peer sees
    /// `ConnectionAborted { code }`. Closing again, or after the peer closed,
    /// waits for termination to finish and keeps the first code.
    ///
    /// Dropping the returned future does not stall the close: the driver
    /// completes it when it stops.
    pub async fn close(&self, code: u64) -> Result<()> {
        if self.inner.lock().disposed {
            return Err(Error::AlreadyDisposed);
        }

        if self.inner.close_locally(code, Termination::local_close(code), ConnectionState::Closing) {
            info!(remote = %self.inner.remote_addr, code, "Closing connection");
            self.inner.submit(TransportAction::Close { code });
            self.inner.stop_driver();

            let driver = self
                .inner
                .driver
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(driver) = driver
                && let Err(e) = driver.await
            {
                debug!(error = %e, "Connection driver did not stop cleanly");
            }

            self.inner.finish_closing();
        } else {
            self.inner.closed().await;
        }
        Ok(())
    }

    /// Release the connection.
    ///
    /// Without a prior `close`, this terminates with the configured default
    /// close code: the peer is notified when the dispose behaviour is
    /// graceful, and finds out through its idle timeout when abortive.
    /// Operations already pending fail with `OperationAborted`; every later
    /// call fails with `AlreadyDisposed`. Idempotent.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    fn stream_handle(&self, shared: Arc<StreamShared>) -> Stream {
        Stream::new(
            shared,
            Arc::clone(&self.inner.transport),
            Arc::downgrade(&self.inner),
            self.inner.options.default_stream_error_code,
        )
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("side", &self.inner.side)
            .field("local_addr", &self.inner.local_addr)
            .field("remote_addr", &self.inner.remote_addr)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.inner.dispose();
    }
}
