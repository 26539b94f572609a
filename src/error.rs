//! Error types for the lattica training engine.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for lattica operations.
///
/// Every variant maps to one of the fatal failure classes of the training
/// core (I/O, input format, resource, programmer-invariant) except
/// [`LatticaError::Plugin`], which callers are expected to soft-disable.
#[derive(Error, Debug)]
pub enum LatticaError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Data-set file not found.
    #[error("dataset not found: {0}")]
    DatasetNotFound(PathBuf),

    /// Malformed input data.
    #[error("format error in {path} (line {line}): {reason}")]
    Format {
        /// The offending file.
        path: PathBuf,
        /// 1-based line number; 0 when the error is not tied to a line.
        line: usize,
        /// What was wrong with it.
        reason: String,
    },

    /// Allocation or buffer-capacity failure.
    #[error("resource error: {0}")]
    Resource(String),

    /// A per-epoch callback could not be resolved.
    ///
    /// Non-fatal by policy: the embedder reports it once and trains on
    /// without a callback.
    #[error("epoch callback error: {0}")]
    Plugin(String),

    /// A precondition of the parallel protocol or of a container shape
    /// was violated. These indicate a caller bug, not bad input.
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// Invalid training settings.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for lattica operations.
pub type Result<T> = std::result::Result<T, LatticaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_error_display() {
        let err = LatticaError::Format {
            path: PathBuf::from("data.txt"),
            line: 3,
            reason: "expected 4 fields, found 2".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("data.txt"));
        assert!(msg.contains("line 3"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let err: LatticaError = io.into();
        assert!(matches!(err, LatticaError::Io(_)));
    }
}
