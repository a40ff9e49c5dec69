//! qconn-core: connection and stream lifecycle over a multiplexed transport.
//!
//! This crate provides:
//! - `Connection`: outbound connect, stream open/accept, close and dispose
//! - `Stream`: read, write, finish, close and abort per direction
//! - `Listener`: inbound connections from a transport binding
//! - Termination classification into a single replayed error per object
//! - Transport binding traits for plugging in a QUIC implementation
//! - Configuration, statistics and logging

pub mod classify;
pub mod config;
pub mod constants;
pub mod error;
pub mod identity;
pub mod logging;
pub mod stats;
pub mod transport;

mod connection;
mod listener;
mod stream;

pub use classify::{TerminalError, Termination, classify};
pub use config::{ClientConnectionOptions, ConnectionOptions, DisposeBehavior, ListenerOptions};
pub use connection::{Connection, ConnectionState};
pub use error::{Error, ErrorKind, Result};
pub use identity::{IdentityProbe, PeerIdentity};
pub use listener::Listener;
pub use logging::{LogFormat, init_logging};
pub use stats::ConnectionStats;
pub use stream::{AbortDirection, Stream, StreamState};
pub use transport::{Side, StreamDirection, StreamId, StreamKind};
