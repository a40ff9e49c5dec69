//! Integration tests for binding, connecting and accepting.

use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;

use qconn_core::{
    ClientConnectionOptions, Connection, ConnectionOptions, ConnectionState, Error, ErrorKind,
    Listener, ListenerOptions, Side,
};
use qconn_test_utils::{MockNetwork, default_pair, localhost};

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

async fn within<T>(fut: impl Future<Output = T>) -> T {
    timeout(TEST_TIMEOUT, fut).await.expect("operation hung")
}

#[tokio::test]
async fn addresses_and_sides_match() {
    let pair = default_pair().await;

    assert_eq!(pair.client.remote_addr(), pair.listener.local_addr());
    assert_eq!(pair.server.remote_addr(), pair.client.local_addr());
    assert_eq!(pair.server.local_addr(), pair.listener.local_addr());

    assert_eq!(pair.client.side(), Side::Client);
    assert_eq!(pair.server.side(), Side::Server);
    assert_eq!(pair.client.state(), ConnectionState::Open);
    assert_eq!(pair.server.state(), ConnectionState::Open);
}

#[tokio::test]
async fn negotiates_first_common_protocol() {
    let network = MockNetwork::new();
    let listener = Listener::bind(
        &network,
        ListenerOptions::new(localhost(0))
            .with_alpn(b"proto/2")
            .add_alpn(b"proto/1"),
    )
    .await
    .unwrap();

    let options = ClientConnectionOptions::new(listener.local_addr())
        .with_alpn(b"proto/1")
        .add_alpn(b"proto/2");
    let client = Connection::connect(&network, options).await.unwrap();
    let server = within(listener.accept_connection()).await.unwrap();

    assert_eq!(client.negotiated_alpn(), b"proto/1");
    assert_eq!(server.negotiated_alpn(), b"proto/1");
}

#[tokio::test]
async fn protocol_mismatch_is_connect_failure() {
    let network = MockNetwork::new();
    let listener = Listener::bind(
        &network,
        ListenerOptions::new(localhost(0)).with_alpn(b"proto/1"),
    )
    .await
    .unwrap();

    let options = ClientConnectionOptions::new(listener.local_addr()).with_alpn(b"other/1");
    let err = Connection::connect(&network, options).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectFailure);
    assert!(err.to_string().contains("application protocol"));
}

#[tokio::test]
async fn bind_twice_fails() {
    let network = MockNetwork::new();
    let _first = Listener::bind(&network, ListenerOptions::new(localhost(4433)))
        .await
        .unwrap();

    let err = Listener::bind(&network, ListenerOptions::new(localhost(4433)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[tokio::test]
async fn accepted_connections_use_listener_options() {
    let network = MockNetwork::new();
    let server_options = ConnectionOptions::new().with_default_close_error_code(77);
    let listener = Listener::bind(
        &network,
        ListenerOptions::new(localhost(0)).with_connection(server_options),
    )
    .await
    .unwrap();

    let _client = Connection::connect(
        &network,
        ClientConnectionOptions::new(listener.local_addr()),
    )
    .await
    .unwrap();
    let server = within(listener.accept_connection()).await.unwrap();

    assert_eq!(server.options().default_close_error_code, 77);
}

#[tokio::test]
async fn close_fails_pending_accept() {
    let network = MockNetwork::new();
    let server_options = ConnectionOptions::new().with_default_close_error_code(31);
    let listener = Listener::bind(
        &network,
        ListenerOptions::new(localhost(0)).with_connection(server_options),
    )
    .await
    .unwrap();
    let addr = listener.local_addr();

    let pending = listener.accept_connection();
    let close = async {
        tokio::task::yield_now().await;
        listener.close();
    };
    let (accepted, ()) = within(async { tokio::join!(pending, close) }).await;
    assert!(matches!(accepted, Err(Error::OperationAborted { code: 31 })));

    let err = listener.accept_connection().await.unwrap_err();
    assert!(matches!(err, Error::AlreadyDisposed));

    // Idempotent, and the address is free again
    listener.close();
    assert_eq!(network.listener_count(), 0);
    let err = Connection::connect(&network, ClientConnectionOptions::new(addr))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectFailure);
}

#[tokio::test]
async fn connections_outlive_their_listener() {
    let pair = default_pair().await;
    drop(pair.listener);

    let outbound = pair.client.open_bidirectional_stream().unwrap();
    outbound.write_and_finish(b"still here").await.unwrap();

    let inbound = within(pair.server.accept_inbound_stream()).await.unwrap();
    let mut data = Vec::new();
    within(inbound.read_to_end(&mut data)).await.unwrap();
    assert_eq!(data, b"still here");
}
