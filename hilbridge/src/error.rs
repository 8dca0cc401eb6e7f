//! Error types for hilbridge.

use std::io;
use thiserror::Error;

/// Result type for hilbridge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for hilbridge operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (socket, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed user input rejected before encoding.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Instrument refused or unreachable after exhausting retries.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// No response within the deadline.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Response present but not in any expected shape.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A single response line could not be classified.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The operation was cancelled by the caller or superseded.
    #[error("Cancelled")]
    Cancelled,

    /// Missing or inconsistent configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error belongs to the transport layer (as opposed to
    /// input validation or response classification).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::ConnectionFailed(_) | Self::Timeout(_) | Self::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Validation("invalid value: 0xzz".into());
        assert_eq!(err.to_string(), "Validation error: invalid value: 0xzz");
        assert_eq!(Error::Cancelled.to_string(), "Cancelled");
    }

    #[test]
    fn test_is_transport() {
        assert!(Error::Timeout("no data".into()).is_transport());
        assert!(Error::ConnectionFailed("refused".into()).is_transport());
        assert!(!Error::Parse("bad line".into()).is_transport());
        assert!(!Error::Config("no base".into()).is_transport());
    }
}
