//! Tracing integration for structured logging.
//!
//! Connection and stream lifecycle transitions are emitted as `tracing`
//! events carrying `remote`, `stream` and `code` fields. Terminations log at
//! info, per-stream transitions at debug, and data movement at trace.
//! [`init_logging`] installs a subscriber for processes that want to see them.

use std::fs::{File, OpenOptions};
use std::path::Path;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::error::{Error, Result};

/// Crates whose events the default filter lets through.
const LOG_TARGETS: &[&str] = &["qconn_core", "qconn_test_utils"];

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// Structured JSON output, one object per event.
    Json,
}

fn level_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    }
}

/// Filter directives for `verbosity` when `RUST_LOG` is unset.
fn default_directives(verbosity: u8) -> String {
    let level = level_for(verbosity);
    LOG_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn open_log_file(path: &Path) -> Result<File> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

fn output_layer(format: LogFormat, file: Option<File>, detailed: bool) -> BoxedLayer {
    match (format, file) {
        (LogFormat::Text, None) => fmt::layer()
            .with_target(true)
            .with_file(detailed)
            .with_line_number(detailed)
            .boxed(),
        (LogFormat::Text, Some(file)) => fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_file(detailed)
            .with_line_number(detailed)
            .boxed(),
        (LogFormat::Json, None) => fmt::layer().json().boxed(),
        (LogFormat::Json, Some(file)) => fmt::layer().json().with_writer(file).boxed(),
    }
}

/// Install the global subscriber.
///
/// `verbosity` maps 0..=4 onto error, warn, info, debug and trace; at debug
/// and above, text output includes source locations. `RUST_LOG` overrides the
/// level. Logs go to stderr unless `log_file` is given, in which case they
/// are appended to it.
///
/// Fails if the file cannot be opened or a subscriber is already installed.
///
/// ```ignore
/// use qconn_core::logging::{init_logging, LogFormat};
///
/// init_logging(3, Some(Path::new("/tmp/qconn.log")), LogFormat::Json)?;
/// ```
pub fn init_logging(verbosity: u8, log_file: Option<&Path>, format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbosity)));
    let file = log_file.map(open_log_file).transpose()?;
    let layer = output_layer(format, file, verbosity >= 3);

    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .map_err(|e| Error::Io(std::io::Error::other(e)))
}

/// Info-level text logging for tests. Ignores an already installed
/// subscriber.
pub fn init_test_logging() {
    let _ = init_logging(2, None, LogFormat::Text);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_is_default_format() {
        assert_eq!(LogFormat::default(), LogFormat::Text);
    }

    #[test]
    fn directives_cover_every_target() {
        assert_eq!(
            default_directives(0),
            "qconn_core=error,qconn_test_utils=error"
        );
        assert_eq!(
            default_directives(3),
            "qconn_core=debug,qconn_test_utils=debug"
        );
        assert_eq!(level_for(9), "trace");
    }

    #[test]
    fn unwritable_log_file_is_io_error() {
        let err = open_log_file(Path::new("/nonexistent-dir/qconn.log")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn second_init_is_reported_not_panicking() {
        init_test_logging();
        assert!(init_logging(2, None, LogFormat::Text).is_err());
    }
}
