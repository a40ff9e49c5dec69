//! Integration tests for stream I/O and per-direction termination.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout};

use qconn_core::{
    AbortDirection, ConnectionOptions, Error, ErrorKind, Side, Stream, StreamDirection, StreamKind,
    StreamState,
};
use qconn_test_utils::{connect_pair, default_pair};

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

async fn within<T>(fut: impl Future<Output = T>) -> T {
    timeout(TEST_TIMEOUT, fut).await.expect("operation hung")
}

/// Keep writing until the write side fails.
async fn write_until_error(stream: &Stream) -> Error {
    within(async {
        loop {
            if let Err(e) = stream.write(b"x").await {
                return e;
            }
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}

/// Keep reading until the read side fails.
async fn read_until_error(stream: &Stream) -> Error {
    let mut buf = [0u8; 64];
    within(async {
        loop {
            if let Err(e) = stream.read(&mut buf).await {
                return e;
            }
        }
    })
    .await
}

// =============================================================================
// Data transfer
// =============================================================================

#[tokio::test]
async fn bidirectional_echo() {
    let pair = default_pair().await;

    let outbound = pair.client.open_bidirectional_stream().unwrap();
    assert_eq!(outbound.direction(), StreamDirection::Outbound);
    assert_eq!(outbound.kind(), StreamKind::Bidirectional);
    assert_eq!(outbound.id().initiator(), Side::Client);
    outbound.write_and_finish(b"hello").await.unwrap();
    assert_eq!(outbound.state(), StreamState::LocalClosed);

    let inbound = within(pair.server.accept_inbound_stream()).await.unwrap();
    assert_eq!(inbound.id(), outbound.id());
    assert_eq!(inbound.direction(), StreamDirection::Inbound);

    let mut request = Vec::new();
    within(inbound.read_to_end(&mut request)).await.unwrap();
    assert_eq!(request, b"hello");
    assert_eq!(inbound.state(), StreamState::PeerClosed);

    inbound.write(b"wor").await.unwrap();
    inbound.write(b"ld").await.unwrap();
    inbound.finish().unwrap();
    assert_eq!(inbound.state(), StreamState::Closed);

    let mut response = Vec::new();
    within(outbound.read_to_end(&mut response)).await.unwrap();
    assert_eq!(response, b"world");
    assert_eq!(outbound.state(), StreamState::Closed);
}

#[tokio::test]
async fn server_opened_stream() {
    let pair = default_pair().await;

    let outbound = pair.server.open_unidirectional_stream().unwrap();
    assert_eq!(outbound.id().initiator(), Side::Server);
    outbound.write_and_finish(b"push").await.unwrap();

    let inbound = within(pair.client.accept_inbound_stream()).await.unwrap();
    let mut data = Vec::new();
    within(inbound.read_to_end(&mut data)).await.unwrap();
    assert_eq!(data, b"push");
}

#[tokio::test]
async fn unidirectional_permissions() {
    let pair = default_pair().await;

    let outbound = pair.client.open_unidirectional_stream().unwrap();
    assert!(outbound.can_write() && !outbound.can_read());
    let mut buf = [0u8; 8];
    let err = outbound.read(&mut buf).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigurationError);
    assert!(err.to_string().contains("send-only"));

    outbound.write(b"one-way").await.unwrap();

    let inbound = within(pair.server.accept_inbound_stream()).await.unwrap();
    assert_eq!(inbound.kind(), StreamKind::Unidirectional);
    assert!(inbound.can_read() && !inbound.can_write());
    let err = inbound.write(b"nope").await.unwrap_err();
    assert!(err.to_string().contains("receive-only"));
    assert!(matches!(
        inbound.finish(),
        Err(Error::Configuration { .. })
    ));
}

#[tokio::test]
async fn write_after_finish_is_configuration_error() {
    let pair = default_pair().await;

    let stream = pair.client.open_bidirectional_stream().unwrap();
    stream.finish().unwrap();
    // Finishing again is harmless
    stream.finish().unwrap();

    let err = stream.write(b"late").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigurationError);
}

#[tokio::test]
async fn second_concurrent_read_is_rejected() {
    let pair = default_pair().await;

    let outbound = pair.client.open_bidirectional_stream().unwrap();
    let inbound = within(pair.server.accept_inbound_stream()).await.unwrap();

    let mut first_buf = [0u8; 8];
    let mut second_buf = [0u8; 8];
    let first = inbound.read(&mut first_buf);
    let second = async {
        tokio::task::yield_now().await;
        inbound.read(&mut second_buf).await
    };
    let feed = async {
        sleep(Duration::from_millis(20)).await;
        outbound.write(b"x").await
    };

    let (first, second, fed) = within(async { tokio::join!(first, second, feed) }).await;
    fed.unwrap();
    assert_eq!(first.unwrap(), 1);
    assert_eq!(second.unwrap_err().kind(), ErrorKind::ConfigurationError);

    // The slot is free again
    outbound.write(b"y").await.unwrap();
    let n = within(inbound.read(&mut first_buf)).await.unwrap();
    assert_eq!(&first_buf[..n], b"y");
}

// =============================================================================
// Abort
// =============================================================================

#[tokio::test]
async fn peer_reset_is_stream_aborted() {
    let pair = default_pair().await;

    let outbound = pair.client.open_bidirectional_stream().unwrap();
    outbound.write(b"partial").await.unwrap();
    let inbound = within(pair.server.accept_inbound_stream()).await.unwrap();

    outbound.abort(AbortDirection::Write, 77);

    let err = read_until_error(&inbound).await;
    assert!(matches!(err, Error::StreamAborted { code: 77 }));
    assert!(err.is_peer_abort());

    // The aborting side sees its own abort
    let err = outbound.write(b"more").await.unwrap_err();
    assert!(matches!(err, Error::OperationAborted { code: 77 }));

    // The other direction still works
    inbound.write(b"reply").await.unwrap();
    let mut buf = [0u8; 8];
    let n = within(outbound.read(&mut buf)).await.unwrap();
    assert_eq!(&buf[..n], b"reply");
    assert_eq!(outbound.state(), StreamState::Aborted);
}

#[tokio::test]
async fn peer_stop_sending_fails_writes() {
    let pair = default_pair().await;

    let outbound = pair.client.open_bidirectional_stream().unwrap();
    let inbound = within(pair.server.accept_inbound_stream()).await.unwrap();

    inbound.abort(AbortDirection::Read, 88);
    let mut buf = [0u8; 4];
    let err = inbound.read(&mut buf).await.unwrap_err();
    assert!(matches!(err, Error::OperationAborted { code: 88 }));

    let err = write_until_error(&outbound).await;
    assert!(matches!(err, Error::StreamAborted { code: 88 }));
}

#[tokio::test]
async fn first_abort_wins() {
    let pair = default_pair().await;

    let outbound = pair.client.open_bidirectional_stream().unwrap();
    let inbound = within(pair.server.accept_inbound_stream()).await.unwrap();

    inbound.abort(AbortDirection::Both, 5);
    inbound.abort(AbortDirection::Both, 6);
    inbound.close(7);

    let mut buf = [0u8; 4];
    for _ in 0..3 {
        let err = inbound.read(&mut buf).await.unwrap_err();
        assert!(matches!(err, Error::OperationAborted { code: 5 }));
        let err = inbound.write(b"x").await.unwrap_err();
        assert!(matches!(err, Error::OperationAborted { code: 5 }));
    }

    let err = read_until_error(&outbound).await;
    assert!(matches!(err, Error::StreamAborted { code: 5 }));
}

// =============================================================================
// Close and dispose
// =============================================================================

#[tokio::test]
async fn stream_close_fails_pending_read() {
    let pair = default_pair().await;

    let outbound = pair.client.open_bidirectional_stream().unwrap();
    let inbound = within(pair.server.accept_inbound_stream()).await.unwrap();

    let mut buf = [0u8; 8];
    let pending = inbound.read(&mut buf);
    let close = async {
        tokio::task::yield_now().await;
        inbound.close(42);
    };
    let (read, ()) = within(async { tokio::join!(pending, close) }).await;
    assert!(matches!(read, Err(Error::OperationAborted { code: 42 })));

    let mut buf = [0u8; 8];
    let err = inbound.read(&mut buf).await.unwrap_err();
    assert!(matches!(err, Error::OperationAborted { code: 42 }));
    let err = inbound.write(b"x").await.unwrap_err();
    assert!(matches!(err, Error::OperationAborted { code: 42 }));

    // The peer reads a clean end of stream and may no longer write
    let mut data = Vec::new();
    within(outbound.read_to_end(&mut data)).await.unwrap();
    assert!(data.is_empty());
    let err = write_until_error(&outbound).await;
    assert!(matches!(err, Error::StreamAborted { code: 42 }));
}

#[tokio::test]
async fn stream_close_fails_pending_write() {
    let pair = default_pair().await;
    let stream = pair.client.open_bidirectional_stream().unwrap();

    pair.network.pause_writes();
    let pending = stream.write(b"stuck");
    let close = async {
        sleep(Duration::from_millis(10)).await;
        stream.close(3);
    };
    let (written, ()) = within(async { tokio::join!(pending, close) }).await;
    pair.network.resume_writes();

    assert!(matches!(written, Err(Error::OperationAborted { code: 3 })));
}

#[tokio::test]
async fn dropped_stream_uses_default_code() {
    let client_options = ConnectionOptions::new().with_default_stream_error_code(321);
    let pair = connect_pair(client_options, ConnectionOptions::default()).await;

    let outbound = pair.client.open_bidirectional_stream().unwrap();
    let inbound = within(pair.server.accept_inbound_stream()).await.unwrap();

    drop(outbound);

    let mut data = Vec::new();
    within(inbound.read_to_end(&mut data)).await.unwrap();
    let err = write_until_error(&inbound).await;
    assert!(matches!(err, Error::StreamAborted { code: 321 }));
}

#[tokio::test]
async fn dispose_is_idempotent() {
    let pair = default_pair().await;
    let stream = pair.client.open_bidirectional_stream().unwrap();

    stream.dispose();
    stream.dispose();
    stream.close(9);

    let err = stream.write(b"x").await.unwrap_err();
    assert!(matches!(err, Error::OperationAborted { code: 0 }));
    assert_eq!(stream.state(), StreamState::Closed);
}

// =============================================================================
// Connection cascade
// =============================================================================

#[tokio::test]
async fn connection_close_cascades_into_streams() {
    let pair = default_pair().await;

    let outbound = pair.client.open_bidirectional_stream().unwrap();
    let inbound = within(pair.server.accept_inbound_stream()).await.unwrap();

    let mut buf = [0u8; 8];
    let pending = outbound.read(&mut buf);
    let close = async {
        tokio::task::yield_now().await;
        pair.client.close(9).await
    };
    let (read, closed) = within(async { tokio::join!(pending, close) }).await;
    closed.unwrap();

    assert!(matches!(read, Err(Error::OperationAborted { code: 9 })));
    assert_eq!(outbound.state(), StreamState::Closed);

    let err = read_until_error(&inbound).await;
    assert!(matches!(err, Error::ConnectionAborted { code: Some(9) }));
    let err = inbound.write(b"x").await.unwrap_err();
    assert!(matches!(err, Error::ConnectionAborted { code: Some(9) }));
}

#[tokio::test]
async fn connection_dispose_aborts_pending_stream_ops() {
    let pair = default_pair().await;

    let outbound = pair.client.open_bidirectional_stream().unwrap();
    let mut buf = [0u8; 8];
    let pending = outbound.read(&mut buf);
    let dispose = async {
        tokio::task::yield_now().await;
        pair.client.dispose();
    };
    let (read, ()) = within(async { tokio::join!(pending, dispose) }).await;
    assert!(matches!(read, Err(Error::OperationAborted { code: 0 })));

    // Stream operations keep reporting the stream's own terminal error
    let err = outbound.write(b"x").await.unwrap_err();
    assert!(matches!(err, Error::OperationAborted { code: 0 }));
}

#[tokio::test]
async fn inbound_streams_over_capacity_are_refused() {
    let server_options = ConnectionOptions::new()
        .with_max_inbound_bidirectional_streams(1)
        .with_default_stream_error_code(555);
    let pair = connect_pair(ConnectionOptions::default(), server_options).await;

    let first = pair.client.open_bidirectional_stream().unwrap();
    let second = pair.client.open_bidirectional_stream().unwrap();

    let err = read_until_error(&second).await;
    assert!(matches!(err, Error::StreamAborted { code: 555 }));
    let err = write_until_error(&second).await;
    assert!(matches!(err, Error::StreamAborted { code: 555 }));
    assert_eq!(pair.server.stats().streams_refused, 1);

    let accepted = within(pair.server.accept_inbound_stream()).await.unwrap();
    assert_eq!(accepted.id(), first.id());
}
