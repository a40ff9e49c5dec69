//! Protocol and configuration constants for qconn.

use std::time::Duration;

// =============================================================================
// Protocol Constants
// =============================================================================

/// Default ALPN identifier offered when none is configured.
pub const DEFAULT_ALPN: &[u8] = b"qconn/1";

/// Application error code used by a bare `dispose()` on a connection.
pub const DEFAULT_CLOSE_ERROR_CODE: u64 = 0;

/// Application error code used by a bare `dispose()` on a stream and when
/// refusing inbound streams over capacity.
pub const DEFAULT_STREAM_ERROR_CODE: u64 = 0;

// =============================================================================
// Timing Constants
// =============================================================================

/// Connection idle timeout.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum time allowed for the transport handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Limits
// =============================================================================

/// Default number of unclaimed inbound bidirectional streams.
pub const DEFAULT_MAX_INBOUND_BIDI_STREAMS: u32 = 100;

/// Default number of unclaimed inbound unidirectional streams.
pub const DEFAULT_MAX_INBOUND_UNI_STREAMS: u32 = 10;

/// Default number of established connections a listener queues before
/// refusing new handshakes.
pub const DEFAULT_LISTEN_BACKLOG: usize = 512;

/// Initial capacity of a stream's receive buffer.
pub const STREAM_RECV_BUF_CAPACITY: usize = 8192;
