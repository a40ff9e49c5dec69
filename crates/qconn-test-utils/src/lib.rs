//! qconn-test-utils: Test infrastructure for qconn.
//!
//! Provides:
//! - MockNetwork: In-memory transport binding for testing without network
//! - TestIdentities: Fixed peer identities for deterministic testing
//! - connect_pair: One-call client/server connection setup

mod mock_transport;
mod test_identities;

pub use mock_transport::{MockLink, MockListener, MockNetwork, localhost};
pub use test_identities::TestIdentities;

use qconn_core::{ClientConnectionOptions, Connection, ConnectionOptions, Listener, ListenerOptions};

/// A connected client/server pair on a fresh [`MockNetwork`].
pub struct ConnectedPair {
    pub network: MockNetwork,
    pub listener: Listener,
    pub client: Connection,
    pub server: Connection,
}

/// Bind a listener, connect a client to it and accept the server side.
///
/// Panics if any step fails; intended for test setup only.
pub async fn connect_pair(client: ConnectionOptions, server: ConnectionOptions) -> ConnectedPair {
    let network = MockNetwork::new();
    let listener = Listener::bind(
        &network,
        ListenerOptions::new(localhost(0)).with_connection(server),
    )
    .await
    .expect("bind listener");

    let client = Connection::connect(
        &network,
        ClientConnectionOptions::new(listener.local_addr()).with_connection(client),
    )
    .await
    .expect("connect client");
    let server = listener.accept_connection().await.expect("accept server");

    ConnectedPair {
        network,
        listener,
        client,
        server,
    }
}

/// [`connect_pair`] with default options on both sides.
pub async fn default_pair() -> ConnectedPair {
    connect_pair(ConnectionOptions::default(), ConnectionOptions::default()).await
}
