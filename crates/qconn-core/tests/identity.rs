//! Integration tests for peer identity ownership.

use qconn_test_utils::{TestIdentities, default_pair};

#[tokio::test]
async fn identity_is_exposed_after_handshake() {
    let pair = default_pair().await;

    let server_identity = pair.client.remote_identity().unwrap();
    assert_eq!(server_identity.subject(), TestIdentities::SERVER_SUBJECT);

    let client_identity = pair.server.remote_identity().unwrap();
    assert_eq!(client_identity.subject(), TestIdentities::CLIENT_SUBJECT);
}

#[tokio::test]
async fn dispose_releases_identity() {
    let pair = default_pair().await;
    let probe = pair.network.issued_server_identities().pop().unwrap();
    assert!(!probe.is_released());

    pair.client.dispose();

    assert!(probe.is_released());
    assert!(pair.client.remote_identity().is_none());
}

#[tokio::test]
async fn retained_identity_outlives_dispose() {
    let pair = default_pair().await;
    let probe = pair.network.issued_server_identities().pop().unwrap();

    let retained = pair.client.remote_identity().unwrap();
    pair.client.close(0).await.unwrap();
    pair.client.dispose();
    assert!(!probe.is_released());

    drop(retained);
    assert!(probe.is_released());
}

#[tokio::test]
async fn close_alone_keeps_identity() {
    let pair = default_pair().await;
    pair.client.close(0).await.unwrap();
    assert!(pair.client.remote_identity().is_some());
}
