//! Error types for qconn-core.

use thiserror::Error;

/// Category of an [`Error`], independent of the carried application code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The handshake failed or timed out.
    ConnectFailure,
    /// This side terminated the connection or stream.
    OperationAborted,
    /// The peer closed the connection, or it was lost to idle timeout.
    ConnectionAborted,
    /// The peer aborted one direction of a stream.
    StreamAborted,
    /// The object was used after `dispose()`.
    AlreadyDisposed,
    /// The caller asked for something the configuration or object does not allow.
    ConfigurationError,
    /// The peer violated the protocol.
    ProtocolError,
    /// The transport binding failed outside of a classified termination.
    Transport,
    /// I/O error from the host system.
    Io,
}

/// Main error type for qconn operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The handshake could not be completed.
    #[error("connect failed: {reason}")]
    ConnectFailure { reason: String },

    /// The operation was aborted because this side closed or disposed the
    /// connection or stream.
    #[error("operation aborted (application error {code})")]
    OperationAborted { code: u64 },

    /// The connection was closed by the peer (with its application code) or
    /// lost without a close frame (no code).
    #[error("connection aborted{}", fmt_code(.code))]
    ConnectionAborted { code: Option<u64> },

    /// The peer aborted this direction of the stream.
    #[error("stream aborted by peer (application error {code})")]
    StreamAborted { code: u64 },

    /// The connection or stream was used after it was disposed.
    #[error("object already disposed")]
    AlreadyDisposed,

    /// Invalid use of an object given its configuration or current mode.
    #[error("invalid operation: {message}")]
    Configuration { message: String },

    /// Malformed or illegal behaviour from the peer.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Transport binding error.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// I/O error from underlying system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn fmt_code(code: &Option<u64>) -> String {
    match code {
        Some(code) => format!(" (application error {code})"),
        None => String::new(),
    }
}

impl Error {
    /// Shorthand for a configuration error.
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    /// Get the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ConnectFailure { .. } => ErrorKind::ConnectFailure,
            Error::OperationAborted { .. } => ErrorKind::OperationAborted,
            Error::ConnectionAborted { .. } => ErrorKind::ConnectionAborted,
            Error::StreamAborted { .. } => ErrorKind::StreamAborted,
            Error::AlreadyDisposed => ErrorKind::AlreadyDisposed,
            Error::Configuration { .. } => ErrorKind::ConfigurationError,
            Error::Protocol { .. } => ErrorKind::ProtocolError,
            Error::Transport { .. } => ErrorKind::Transport,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    /// Get the application error code carried by this error, if any.
    pub fn application_code(&self) -> Option<u64> {
        match self {
            Error::OperationAborted { code } | Error::StreamAborted { code } => Some(*code),
            Error::ConnectionAborted { code } => *code,
            _ => None,
        }
    }

    /// Returns true if this side caused the failure.
    pub fn is_local_abort(&self) -> bool {
        matches!(self, Error::OperationAborted { .. })
    }

    /// Returns true if the peer (or the path to it) caused the failure.
    ///
    /// Recovery is the caller's job: reconnect or reopen the stream.
    pub fn is_peer_abort(&self) -> bool {
        matches!(
            self,
            Error::ConnectionAborted { .. } | Error::StreamAborted { .. }
        )
    }

    /// Returns true if the error comes from misuse by the caller rather than
    /// from the transport.
    pub fn is_usage_error(&self) -> bool {
        matches!(self, Error::AlreadyDisposed | Error::Configuration { .. })
    }
}

/// Convenience result type for qconn operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_operation_aborted() {
        let err = Error::OperationAborted { code: 1234 };
        assert_eq!(err.to_string(), "operation aborted (application error 1234)");
    }

    #[test]
    fn error_display_connection_aborted() {
        let err = Error::ConnectionAborted { code: Some(7) };
        assert_eq!(err.to_string(), "connection aborted (application error 7)");

        let err = Error::ConnectionAborted { code: None };
        assert_eq!(err.to_string(), "connection aborted");
    }

    #[test]
    fn error_display_configuration() {
        let err = Error::configuration("no inbound stream capacity");
        assert_eq!(
            err.to_string(),
            "invalid operation: no inbound stream capacity"
        );
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn application_codes() {
        assert_eq!(Error::OperationAborted { code: 5 }.application_code(), Some(5));
        assert_eq!(Error::StreamAborted { code: 9 }.application_code(), Some(9));
        assert_eq!(
            Error::ConnectionAborted { code: Some(3) }.application_code(),
            Some(3)
        );
        assert_eq!(Error::ConnectionAborted { code: None }.application_code(), None);
        assert_eq!(Error::AlreadyDisposed.application_code(), None);
    }

    #[test]
    fn local_and_peer_aborts() {
        assert!(Error::OperationAborted { code: 1 }.is_local_abort());
        assert!(!Error::OperationAborted { code: 1 }.is_peer_abort());

        assert!(Error::ConnectionAborted { code: None }.is_peer_abort());
        assert!(Error::StreamAborted { code: 2 }.is_peer_abort());
        assert!(!Error::StreamAborted { code: 2 }.is_local_abort());
    }

    #[test]
    fn usage_errors() {
        assert!(Error::AlreadyDisposed.is_usage_error());
        assert!(Error::configuration("x").is_usage_error());

        // Disposal and abort are deliberately different categories
        assert_ne!(
            Error::AlreadyDisposed.kind(),
            Error::OperationAborted { code: 0 }.kind()
        );
        assert!(!Error::OperationAborted { code: 0 }.is_usage_error());
    }
}
