//! Error types for the download module.

use std::path::PathBuf;

use thiserror::Error;

/// Terminal outcome of a failed transfer.
///
/// Cancellation is a distinguished variant rather than a special error code:
/// the engine branches on [`TransferError::Cancelled`] explicitly and resolves
/// it to `Fault` without surfacing anything to the user.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The transfer was cancelled by the user. Never reported as a failure.
    #[error("transfer cancelled")]
    Cancelled,

    /// Network-level error (DNS resolution, connection refused, TLS, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// File system error while writing the temporary file.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl TransferError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates an IO error for a path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true for the distinguished cancellation condition.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Errors escaping the engine boundary.
///
/// Transfer and cancellation errors are absorbed into state transitions and
/// never appear here; only finalization filesystem failures propagate.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Remove/move failure while finalizing a completed download. Fatal to
    /// the attempt; the entity is left in its transient state.
    #[error("IO error finalizing download at {path}: {source}")]
    Io {
        /// The path involved in the failing operation.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_distinguished() {
        assert!(TransferError::Cancelled.is_cancellation());
        assert!(!TransferError::http_status("https://example.com/b", 503).is_cancellation());
    }

    #[test]
    fn test_error_display_includes_context() {
        let err = TransferError::http_status("https://example.com/book.epub", 404);
        let msg = err.to_string();
        assert!(msg.contains("404"));
        assert!(msg.contains("book.epub"));
    }
}
