//! Connection and listener configuration.
//!
//! Options are plain builder structs: start from `default()` (or `new()`),
//! chain `with_*` calls, and hand the result to [`Connection::connect`] or
//! [`Listener::bind`]. [`ConnectionOptions`] also derives serde so it can be
//! loaded from a configuration document; durations are in milliseconds.
//!
//! # Example
//!
//! ```ignore
//! use qconn_core::config::{ClientConnectionOptions, ConnectionOptions};
//!
//! let options = ClientConnectionOptions::new(server_addr)
//!     .with_alpn(b"echo/1")
//!     .with_connection(
//!         ConnectionOptions::new()
//!             .with_idle_timeout(Duration::from_secs(5))
//!             .with_default_close_error_code(456),
//!     );
//! let conn = Connection::connect(&binding, options).await?;
//! ```
//!
//! [`Connection::connect`]: crate::Connection::connect
//! [`Listener::bind`]: crate::Listener::bind

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_ALPN, DEFAULT_CLOSE_ERROR_CODE, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_IDLE_TIMEOUT,
    DEFAULT_LISTEN_BACKLOG, DEFAULT_MAX_INBOUND_BIDI_STREAMS, DEFAULT_MAX_INBOUND_UNI_STREAMS,
    DEFAULT_STREAM_ERROR_CODE,
};
use crate::error::{Error, Result};

/// What `dispose()` does to the transport when the connection was not closed
/// explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisposeBehavior {
    /// Close with the default close error code; the peer is notified.
    #[default]
    Graceful,
    /// Tear the transport down silently; the peer only finds out through its
    /// idle timeout.
    Abortive,
}

/// Settings shared by outbound and accepted connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionOptions {
    /// Idle period after which a silent peer is considered gone.
    #[serde(with = "duration_millis")]
    pub idle_timeout: Duration,
    /// Maximum time allowed for the handshake.
    #[serde(with = "duration_millis")]
    pub handshake_timeout: Duration,
    /// Unclaimed inbound bidirectional streams the accept queue holds.
    pub max_inbound_bidirectional_streams: u32,
    /// Unclaimed inbound unidirectional streams the accept queue holds.
    pub max_inbound_unidirectional_streams: u32,
    /// Code sent to the peer when the connection is disposed without close.
    pub default_close_error_code: u64,
    /// Code used when a stream is disposed without close, and when refusing
    /// inbound streams over capacity.
    pub default_stream_error_code: u64,
    /// Transport behaviour of `dispose()`.
    pub dispose_behavior: DisposeBehavior,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            max_inbound_bidirectional_streams: DEFAULT_MAX_INBOUND_BIDI_STREAMS,
            max_inbound_unidirectional_streams: DEFAULT_MAX_INBOUND_UNI_STREAMS,
            default_close_error_code: DEFAULT_CLOSE_ERROR_CODE,
            default_stream_error_code: DEFAULT_STREAM_ERROR_CODE,
            dispose_behavior: DisposeBehavior::Graceful,
        }
    }
}

impl ConnectionOptions {
    /// Create connection options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the idle timeout.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the handshake timeout.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the inbound bidirectional stream capacity.
    pub fn with_max_inbound_bidirectional_streams(mut self, max: u32) -> Self {
        self.max_inbound_bidirectional_streams = max;
        self
    }

    /// Set the inbound unidirectional stream capacity.
    pub fn with_max_inbound_unidirectional_streams(mut self, max: u32) -> Self {
        self.max_inbound_unidirectional_streams = max;
        self
    }

    /// Disable accepting inbound streams entirely.
    pub fn without_inbound_streams(self) -> Self {
        self.with_max_inbound_bidirectional_streams(0)
            .with_max_inbound_unidirectional_streams(0)
    }

    /// Set the code used when disposing without close.
    pub fn with_default_close_error_code(mut self, code: u64) -> Self {
        self.default_close_error_code = code;
        self
    }

    /// Set the code used when disposing a stream without close.
    pub fn with_default_stream_error_code(mut self, code: u64) -> Self {
        self.default_stream_error_code = code;
        self
    }

    /// Set the dispose behaviour.
    pub fn with_dispose_behavior(mut self, behavior: DisposeBehavior) -> Self {
        self.dispose_behavior = behavior;
        self
    }

    /// Check the options for values the lifecycle layer cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.idle_timeout.is_zero() {
            return Err(Error::configuration("idle timeout must be non-zero"));
        }
        if self.handshake_timeout.is_zero() {
            return Err(Error::configuration("handshake timeout must be non-zero"));
        }
        Ok(())
    }
}

/// Options for an outbound connection.
#[derive(Debug, Clone)]
pub struct ClientConnectionOptions {
    /// Address of the listener to connect to.
    pub remote_addr: SocketAddr,
    /// Application protocols offered, in preference order.
    pub alpn: Vec<Bytes>,
    /// Connection settings.
    pub connection: ConnectionOptions,
}

impl ClientConnectionOptions {
    /// Create client options targeting `remote_addr` with the default ALPN.
    pub fn new(remote_addr: SocketAddr) -> Self {
        Self {
            remote_addr,
            alpn: vec![Bytes::from_static(DEFAULT_ALPN)],
            connection: ConnectionOptions::default(),
        }
    }

    /// Set the ALPN protocols.
    pub fn with_alpn(mut self, alpn: &[u8]) -> Self {
        self.alpn = vec![Bytes::copy_from_slice(alpn)];
        self
    }

    /// Add an ALPN protocol.
    pub fn add_alpn(mut self, alpn: &[u8]) -> Self {
        self.alpn.push(Bytes::copy_from_slice(alpn));
        self
    }

    /// Set the connection settings.
    pub fn with_connection(mut self, connection: ConnectionOptions) -> Self {
        self.connection = connection;
        self
    }

    /// Validate the options.
    pub fn validate(&self) -> Result<()> {
        if self.alpn.is_empty() || self.alpn.iter().any(|p| p.is_empty()) {
            return Err(Error::configuration(
                "at least one non-empty application protocol is required",
            ));
        }
        self.connection.validate()
    }
}

/// Options for a listener and the connections it accepts.
#[derive(Debug, Clone)]
pub struct ListenerOptions {
    /// Address to listen on (port 0 lets the binding pick).
    pub listen_addr: SocketAddr,
    /// Application protocols accepted.
    pub alpn: Vec<Bytes>,
    /// Established connections queued before new handshakes are refused.
    pub backlog: usize,
    /// Settings applied to every accepted connection.
    pub connection: ConnectionOptions,
}

impl ListenerOptions {
    /// Create listener options on `listen_addr` with the default ALPN.
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            alpn: vec![Bytes::from_static(DEFAULT_ALPN)],
            backlog: DEFAULT_LISTEN_BACKLOG,
            connection: ConnectionOptions::default(),
        }
    }

    /// Set the ALPN protocols.
    pub fn with_alpn(mut self, alpn: &[u8]) -> Self {
        self.alpn = vec![Bytes::copy_from_slice(alpn)];
        self
    }

    /// Add an ALPN protocol.
    pub fn add_alpn(mut self, alpn: &[u8]) -> Self {
        self.alpn.push(Bytes::copy_from_slice(alpn));
        self
    }

    /// Set the backlog.
    pub fn with_backlog(mut self, backlog: usize) -> Self {
        self.backlog = backlog;
        self
    }

    /// Set the settings for accepted connections.
    pub fn with_connection(mut self, connection: ConnectionOptions) -> Self {
        self.connection = connection;
        self
    }

    /// Validate the options.
    pub fn validate(&self) -> Result<()> {
        if self.alpn.is_empty() || self.alpn.iter().any(|p| p.is_empty()) {
            return Err(Error::configuration(
                "at least one non-empty application protocol is required",
            ));
        }
        if self.backlog == 0 {
            return Err(Error::configuration("listen backlog must be non-zero"));
        }
        self.connection.validate()
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
