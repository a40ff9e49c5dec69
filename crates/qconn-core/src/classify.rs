//! Termination classification.
//!
//! Every way a connection or stream can end is described by a [`Termination`]
//! (who initiated it, why, and which application code came with it). The
//! [`classify`] function maps it onto the single [`TerminalError`] that gets
//! stored and replayed to every operation on the affected object.
//!
//! | initiator   | cause               | result                          |
//! |-------------|---------------------|---------------------------------|
//! | Local       | Close/Dispose/Abort | `OperationAborted { code }`     |
//! | Peer        | Close               | `ConnectionAborted { Some(c) }` |
//! | Peer        | Abort               | `StreamAborted { code }`        |
//! | Transport   | IdleTimeout/Lost    | `ConnectionAborted { None }`    |
//! | any         | ProtocolViolation   | `ProtocolError`                 |
//! | any         | HandshakeFailed     | `ConnectFailure`                |

use crate::error::{Error, ErrorKind};

/// Who initiated a termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Initiator {
    /// This endpoint's application.
    Local,
    /// The remote endpoint's application.
    Peer,
    /// The transport itself (timers, path loss, protocol checks).
    Transport,
}

/// Why a connection or stream terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cause {
    /// Explicit close with an application code.
    Close,
    /// Disposal without explicit close (default code applies).
    Dispose,
    /// Abort of one or both stream directions.
    Abort,
    /// No response from the peer within the idle period.
    IdleTimeout,
    /// The transport went away without a close notification.
    TransportLost,
    /// The handshake did not complete.
    HandshakeFailed,
    /// The peer misbehaved.
    ProtocolViolation,
}

/// Description of a termination event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Termination {
    /// Who initiated it.
    pub initiator: Initiator,
    /// Why it happened.
    pub cause: Cause,
    /// Application error code, when one was carried.
    pub code: Option<u64>,
}

impl Termination {
    /// Local explicit close with `code`.
    pub fn local_close(code: u64) -> Self {
        Self {
            initiator: Initiator::Local,
            cause: Cause::Close,
            code: Some(code),
        }
    }

    /// Local disposal; `default_code` is the configured default.
    pub fn local_dispose(default_code: u64) -> Self {
        Self {
            initiator: Initiator::Local,
            cause: Cause::Dispose,
            code: Some(default_code),
        }
    }

    /// Local abort of a stream direction with `code`.
    pub fn local_abort(code: u64) -> Self {
        Self {
            initiator: Initiator::Local,
            cause: Cause::Abort,
            code: Some(code),
        }
    }

    /// Peer closed the connection with `code`.
    pub fn peer_close(code: u64) -> Self {
        Self {
            initiator: Initiator::Peer,
            cause: Cause::Close,
            code: Some(code),
        }
    }

    /// Peer aborted a stream direction with `code`.
    pub fn peer_abort(code: u64) -> Self {
        Self {
            initiator: Initiator::Peer,
            cause: Cause::Abort,
            code: Some(code),
        }
    }

    /// The transport reported an idle timeout.
    pub fn idle_timeout() -> Self {
        Self {
            initiator: Initiator::Transport,
            cause: Cause::IdleTimeout,
            code: None,
        }
    }

    /// The transport's event stream ended without a close.
    pub fn transport_lost() -> Self {
        Self {
            initiator: Initiator::Transport,
            cause: Cause::TransportLost,
            code: None,
        }
    }

    /// The peer violated the protocol.
    pub fn protocol_violation() -> Self {
        Self {
            initiator: Initiator::Transport,
            cause: Cause::ProtocolViolation,
            code: None,
        }
    }
}

/// A recorded terminal error: kind plus application code.
///
/// This is the value stored on connections and streams. It is `Copy`, so
/// each observer gets an identical [`Error`] built from the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalError {
    /// Handshake failed.
    ConnectFailure,
    /// Terminated by this side.
    OperationAborted { code: u64 },
    /// Terminated by the peer or lost to idle timeout.
    ConnectionAborted { code: Option<u64> },
    /// Stream direction aborted by the peer.
    StreamAborted { code: u64 },
    /// Peer protocol violation.
    ProtocolError,
}

impl TerminalError {
    /// Get the error category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TerminalError::ConnectFailure => ErrorKind::ConnectFailure,
            TerminalError::OperationAborted { .. } => ErrorKind::OperationAborted,
            TerminalError::ConnectionAborted { .. } => ErrorKind::ConnectionAborted,
            TerminalError::StreamAborted { .. } => ErrorKind::StreamAborted,
            TerminalError::ProtocolError => ErrorKind::ProtocolError,
        }
    }

    /// Get the application error code, if any.
    pub fn application_code(&self) -> Option<u64> {
        match self {
            TerminalError::OperationAborted { code } | TerminalError::StreamAborted { code } => {
                Some(*code)
            }
            TerminalError::ConnectionAborted { code } => *code,
            TerminalError::ConnectFailure | TerminalError::ProtocolError => None,
        }
    }
}

impl From<TerminalError> for Error {
    fn from(terminal: TerminalError) -> Self {
        match terminal {
            TerminalError::ConnectFailure => Error::ConnectFailure {
                reason: "handshake failed".to_string(),
            },
            TerminalError::OperationAborted { code } => Error::OperationAborted { code },
            TerminalError::ConnectionAborted { code } => Error::ConnectionAborted { code },
            TerminalError::StreamAborted { code } => Error::StreamAborted { code },
            TerminalError::ProtocolError => Error::Protocol {
                message: "peer violated the protocol".to_string(),
            },
        }
    }
}

/// Map a termination onto the terminal error it produces.
///
/// Pure and deterministic: the same termination always yields the same value.
pub fn classify(termination: &Termination) -> TerminalError {
    let code = termination.code.unwrap_or(0);
    match (termination.initiator, termination.cause) {
        (_, Cause::HandshakeFailed) => TerminalError::ConnectFailure,
        (_, Cause::ProtocolViolation) => TerminalError::ProtocolError,
        (Initiator::Local, _) => TerminalError::OperationAborted { code },
        (Initiator::Peer, Cause::Abort) => TerminalError::StreamAborted { code },
        (Initiator::Peer, _) => TerminalError::ConnectionAborted {
            code: termination.code,
        },
        // Nothing was received from the peer, so there is no code to report.
        (Initiator::Transport, _) => TerminalError::ConnectionAborted { code: None },
    }
}
