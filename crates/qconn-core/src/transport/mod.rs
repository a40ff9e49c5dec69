//! Transport binding abstractions for qconn.
//!
//! The lifecycle layer sits above a transport that already provides
//! reliable, ordered, encrypted, multiplexed byte streams. This module is the
//! contract with that transport:
//! - [`TransportBinding`]: establishes outbound connections and listeners
//! - [`TransportListener`]: hands out inbound, handshaken connections
//! - [`TransportConnection`]: carries stream data and control actions out,
//!   and reports [`TransportEvent`]s in
//!
//! Stream IDs follow the QUIC convention:
//! - bit 0 is the initiator (0 = client, 1 = server)
//! - bit 1 is the directionality (0 = bidirectional, 1 = unidirectional)

mod stream_id;

pub use stream_id::{Side, StreamDirection, StreamId, StreamKind};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::identity::PeerIdentity;

// =============================================================================
// Actions and Events
// =============================================================================

/// Control action submitted to the transport. Never blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportAction {
    /// Announce a locally opened stream to the peer.
    OpenStream { id: StreamId },
    /// End our write side gracefully (FIN with no payload).
    FinishStream { id: StreamId },
    /// Abort our write side (RESET_STREAM).
    ResetStream { id: StreamId, code: u64 },
    /// Ask the peer to stop writing (STOP_SENDING).
    StopSending { id: StreamId, code: u64 },
    /// Close the connection gracefully with an application code.
    Close { code: u64 },
    /// Tear the connection down without notifying the peer.
    Abort,
}

/// Notification from the transport about the connection or one of its streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The peer opened a stream.
    StreamOpened { id: StreamId },
    /// Bytes arrived on a stream; `fin` marks the end of the peer's writes.
    StreamData { id: StreamId, data: Bytes, fin: bool },
    /// The peer aborted its write side of a stream.
    StreamReset { id: StreamId, code: u64 },
    /// The peer aborted its read side of a stream.
    StopSending { id: StreamId, code: u64 },
    /// The peer closed the connection with an application code.
    PeerClosed { code: u64 },
    /// Nothing was heard from the peer within the idle period.
    IdleTimeout,
    /// The transport detected malformed peer behaviour.
    ProtocolViolation { reason: String },
}

// =============================================================================
// Handshake Parameters
// =============================================================================

/// Parameters for an outbound handshake.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    /// Listener address.
    pub remote_addr: SocketAddr,
    /// Offered application protocols, in preference order.
    pub alpn: Vec<Bytes>,
    /// Idle timeout to negotiate.
    pub idle_timeout: Duration,
}

/// Parameters for a listener.
#[derive(Debug, Clone)]
pub struct ListenParams {
    /// Address to listen on.
    pub listen_addr: SocketAddr,
    /// Accepted application protocols.
    pub alpn: Vec<Bytes>,
    /// Established connections queued before handshakes are refused.
    pub backlog: usize,
    /// Idle timeout for accepted connections.
    pub idle_timeout: Duration,
}

// =============================================================================
// Binding Traits
// =============================================================================

/// Entry point into a concrete transport.
#[async_trait]
pub trait TransportBinding: Send + Sync {
    /// Perform an outbound handshake.
    ///
    /// Fails with `Error::ConnectFailure` when the handshake cannot complete.
    async fn connect(&self, params: ConnectParams) -> Result<Arc<dyn TransportConnection>>;

    /// Start listening for inbound connections.
    async fn listen(&self, params: ListenParams) -> Result<Arc<dyn TransportListener>>;
}

/// Source of inbound, handshaken connections.
#[async_trait]
pub trait TransportListener: Send + Sync {
    /// Get the bound address.
    fn local_addr(&self) -> SocketAddr;

    /// Wait for the next established connection.
    async fn accept(&self) -> Result<Arc<dyn TransportConnection>>;

    /// Stop listening. Pending and future `accept` calls fail.
    fn close(&self);
}

/// One established transport connection.
#[async_trait]
pub trait TransportConnection: Send + Sync {
    /// Get the local address.
    fn local_addr(&self) -> SocketAddr;

    /// Get the remote peer's address.
    fn remote_addr(&self) -> SocketAddr;

    /// Get the application protocol agreed during the handshake.
    fn negotiated_alpn(&self) -> Bytes;

    /// Hand over the verified peer identity. Returns it at most once.
    fn take_peer_identity(&self) -> Option<PeerIdentity>;

    /// Write bytes on a stream, suspending until the transport accepts them.
    async fn send(&self, id: StreamId, data: Bytes, fin: bool) -> Result<()>;

    /// Submit a control action.
    fn submit(&self, action: TransportAction) -> Result<()>;

    /// Wait for the next event. `None` once the transport has gone away.
    async fn next_event(&self) -> Option<TransportEvent>;
}
