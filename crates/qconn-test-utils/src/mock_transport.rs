//! Mock transport for testing without real network.
//!
//! [`MockNetwork`] implements the qconn binding traits with in-memory
//! channels. Each connection is a pair of [`MockLink`]s; whatever one side
//! submits shows up as the matching [`TransportEvent`] on the other:
//!
//! | submitted            | peer observes                      |
//! |----------------------|------------------------------------|
//! | `OpenStream`         | `StreamOpened`                     |
//! | `send(.., fin)`      | `StreamData`                       |
//! | `FinishStream`       | `StreamData { fin: true }`         |
//! | `ResetStream`        | `StreamReset`                      |
//! | `StopSending`        | `StopSending`                      |
//! | `Close { code }`     | `PeerClosed { code }`              |
//! | `Abort`              | `IdleTimeout` after its idle period |
//!
//! A side that goes away without `Close` (abort, or the link being dropped)
//! is only noticed by the peer's idle timer, as with a real QUIC peer.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

use qconn_core::error::{Error, Result};
use qconn_core::identity::{IdentityProbe, PeerIdentity};
use qconn_core::transport::{
    ConnectParams, ListenParams, StreamId, TransportAction, TransportBinding,
    TransportConnection, TransportEvent, TransportListener,
};

use crate::test_identities::TestIdentities;

/// First port handed out for ephemeral binds.
const EPHEMERAL_PORT_BASE: u16 = 49152;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Loopback address with the given port.
pub fn localhost(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

// =============================================================================
// Network
// =============================================================================

struct ListenerEntry {
    alpn: Vec<Bytes>,
    idle_timeout: Duration,
    backlog_tx: mpsc::Sender<Arc<MockLink>>,
}

struct NetworkInner {
    listeners: Mutex<HashMap<SocketAddr, ListenerEntry>>,
    next_port: AtomicU16,
    handshake_delay: Mutex<Option<Duration>>,
    writes_tx: Arc<watch::Sender<bool>>,
    issued: Mutex<Vec<IdentityProbe>>,
}

/// In-memory network of listeners and connections.
///
/// Cloning shares the network.
#[derive(Clone)]
pub struct MockNetwork {
    inner: Arc<NetworkInner>,
}

impl Default for MockNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MockNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        let (writes_tx, _) = watch::channel(true);
        Self {
            inner: Arc::new(NetworkInner {
                listeners: Mutex::new(HashMap::new()),
                next_port: AtomicU16::new(EPHEMERAL_PORT_BASE),
                handshake_delay: Mutex::new(None),
                writes_tx: Arc::new(writes_tx),
                issued: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Delay every subsequent handshake by `delay`.
    pub fn set_handshake_delay(&self, delay: Option<Duration>) {
        *lock(&self.inner.handshake_delay) = delay;
    }

    /// Hold every stream write until [`resume_writes`](Self::resume_writes).
    pub fn pause_writes(&self) {
        self.inner.writes_tx.send_replace(false);
    }

    /// Release held writes.
    pub fn resume_writes(&self) {
        self.inner.writes_tx.send_replace(true);
    }

    /// Probes for every identity handed to a connecting client, oldest first.
    pub fn issued_server_identities(&self) -> Vec<IdentityProbe> {
        lock(&self.inner.issued).clone()
    }

    /// Number of bound listeners.
    pub fn listener_count(&self) -> usize {
        lock(&self.inner.listeners).len()
    }

    fn allocate_port(&self) -> u16 {
        self.inner.next_port.fetch_add(1, Ordering::Relaxed)
    }
}

/// Pick the first client offer the server supports.
fn negotiate_alpn(offered: &[Bytes], supported: &[Bytes]) -> Option<Bytes> {
    offered.iter().find(|p| supported.contains(p)).cloned()
}

#[async_trait]
impl TransportBinding for MockNetwork {
    async fn connect(&self, params: ConnectParams) -> Result<Arc<dyn TransportConnection>> {
        let delay = *lock(&self.inner.handshake_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let (backlog_tx, alpn, idle_timeout) = {
            let listeners = lock(&self.inner.listeners);
            let entry = listeners
                .get(&params.remote_addr)
                .ok_or_else(|| Error::ConnectFailure {
                    reason: format!("connection refused by {}", params.remote_addr),
                })?;
            let alpn = negotiate_alpn(&params.alpn, &entry.alpn).ok_or_else(|| {
                Error::ConnectFailure {
                    reason: "no application protocol in common".to_string(),
                }
            })?;
            (
                entry.backlog_tx.clone(),
                alpn,
                params.idle_timeout.min(entry.idle_timeout),
            )
        };

        let client_addr = localhost(self.allocate_port());
        let server_identity = TestIdentities::server();
        lock(&self.inner.issued).push(server_identity.downgrade());

        let (client, server) = MockLink::pair(LinkPairParams {
            client_addr,
            server_addr: params.remote_addr,
            alpn,
            idle_timeout,
            client_identity: TestIdentities::client(),
            server_identity,
            writes_gate: Arc::clone(&self.inner.writes_tx),
        });

        backlog_tx.try_send(server).map_err(|e| Error::ConnectFailure {
            reason: match e {
                mpsc::error::TrySendError::Full(_) => "listener backlog full".to_string(),
                mpsc::error::TrySendError::Closed(_) => {
                    format!("connection refused by {}", params.remote_addr)
                }
            },
        })?;

        debug!(client = %client_addr, server = %params.remote_addr, "Mock handshake complete");
        Ok(client)
    }

    async fn listen(&self, params: ListenParams) -> Result<Arc<dyn TransportListener>> {
        let addr = if params.listen_addr.port() == 0 {
            SocketAddr::new(params.listen_addr.ip(), self.allocate_port())
        } else {
            params.listen_addr
        };

        let mut listeners = lock(&self.inner.listeners);
        if listeners.contains_key(&addr) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                format!("{addr} already in use"),
            )));
        }

        let (backlog_tx, backlog_rx) = mpsc::channel(params.backlog);
        listeners.insert(
            addr,
            ListenerEntry {
                alpn: params.alpn,
                idle_timeout: params.idle_timeout,
                backlog_tx,
            },
        );

        Ok(Arc::new(MockListener {
            addr,
            network: self.clone(),
            backlog_rx: tokio::sync::Mutex::new(backlog_rx),
        }))
    }
}

// =============================================================================
// Listener
// =============================================================================

/// A bound address on a [`MockNetwork`].
pub struct MockListener {
    addr: SocketAddr,
    network: MockNetwork,
    backlog_rx: tokio::sync::Mutex<mpsc::Receiver<Arc<MockLink>>>,
}

#[async_trait]
impl TransportListener for MockListener {
    fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    async fn accept(&self) -> Result<Arc<dyn TransportConnection>> {
        let mut rx = self.backlog_rx.lock().await;
        match rx.recv().await {
            Some(link) => Ok(link),
            None => Err(Error::Transport {
                message: format!("listener on {} closed", self.addr),
            }),
        }
    }

    fn close(&self) {
        // Dropping the registry entry drops the backlog sender; queued
        // connections are still drained before accept reports closure.
        lock(&self.network.inner.listeners).remove(&self.addr);
    }
}

impl Drop for MockListener {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// Link
// =============================================================================

struct LinkRx {
    events: mpsc::UnboundedReceiver<TransportEvent>,
    peer_closed: bool,
    done: bool,
}

struct LinkPairParams {
    client_addr: SocketAddr,
    server_addr: SocketAddr,
    alpn: Bytes,
    idle_timeout: Duration,
    client_identity: PeerIdentity,
    server_identity: PeerIdentity,
    writes_gate: Arc<watch::Sender<bool>>,
}

/// One endpoint of an in-memory connection.
pub struct MockLink {
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    alpn: Bytes,
    idle_timeout: Duration,
    peer_identity: Mutex<Option<PeerIdentity>>,
    tx: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    rx: tokio::sync::Mutex<LinkRx>,
    writes_gate: Arc<watch::Sender<bool>>,
}

impl MockLink {
    fn pair(params: LinkPairParams) -> (Arc<Self>, Arc<Self>) {
        let (to_server, server_events) = mpsc::unbounded_channel();
        let (to_client, client_events) = mpsc::unbounded_channel();

        let make = |local, remote, tx, events, identity| {
            Arc::new(Self {
                local_addr: local,
                remote_addr: remote,
                alpn: params.alpn.clone(),
                idle_timeout: params.idle_timeout,
                peer_identity: Mutex::new(Some(identity)),
                tx: Mutex::new(Some(tx)),
                rx: tokio::sync::Mutex::new(LinkRx {
                    events,
                    peer_closed: false,
                    done: false,
                }),
                writes_gate: Arc::clone(&params.writes_gate),
            })
        };

        let client = make(
            params.client_addr,
            params.server_addr,
            to_server,
            client_events,
            params.server_identity.clone(),
        );
        let server = make(
            params.server_addr,
            params.client_addr,
            to_client,
            server_events,
            params.client_identity.clone(),
        );
        (client, server)
    }

    fn deliver(&self, event: TransportEvent) -> Result<()> {
        let tx = lock(&self.tx);
        let Some(tx) = tx.as_ref() else {
            return Err(Error::Transport {
                message: "connection closed".to_string(),
            });
        };
        // The peer having gone away is not our error; its idle timer handles it.
        if tx.send(event).is_err() {
            trace!(local = %self.local_addr, "Peer no longer reading");
        }
        Ok(())
    }
}

#[async_trait]
impl TransportConnection for MockLink {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    fn negotiated_alpn(&self) -> Bytes {
        self.alpn.clone()
    }

    fn take_peer_identity(&self) -> Option<PeerIdentity> {
        lock(&self.peer_identity).take()
    }

    async fn send(&self, id: StreamId, data: Bytes, fin: bool) -> Result<()> {
        let mut writes_rx = self.writes_gate.subscribe();
        // The gate sender lives as long as this link, so this cannot fail.
        let _ = writes_rx.wait_for(|open| *open).await;
        self.deliver(TransportEvent::StreamData { id, data, fin })
    }

    fn submit(&self, action: TransportAction) -> Result<()> {
        trace!(local = %self.local_addr, ?action, "Mock submit");
        match action {
            TransportAction::OpenStream { id } => {
                self.deliver(TransportEvent::StreamOpened { id })
            }
            TransportAction::FinishStream { id } => self.deliver(TransportEvent::StreamData {
                id,
                data: Bytes::new(),
                fin: true,
            }),
            TransportAction::ResetStream { id, code } => {
                self.deliver(TransportEvent::StreamReset { id, code })
            }
            TransportAction::StopSending { id, code } => {
                self.deliver(TransportEvent::StopSending { id, code })
            }
            TransportAction::Close { code } => {
                self.deliver(TransportEvent::PeerClosed { code })?;
                lock(&self.tx).take();
                Ok(())
            }
            TransportAction::Abort => {
                lock(&self.tx).take();
                Ok(())
            }
        }
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        let mut rx = self.rx.lock().await;
        if rx.done {
            return None;
        }
        match rx.events.recv().await {
            Some(event) => {
                if matches!(event, TransportEvent::PeerClosed { .. }) {
                    rx.peer_closed = true;
                }
                Some(event)
            }
            None if rx.peer_closed => {
                rx.done = true;
                None
            }
            None => {
                // Peer vanished without a close; only the idle timer notices.
                tokio::time::sleep(self.idle_timeout).await;
                rx.done = true;
                Some(TransportEvent::IdleTimeout)
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
