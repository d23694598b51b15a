//! Error types for iso8583-connector.

use thiserror::Error;

/// Failure reported by a [`MessageFactory`](crate::iso::MessageFactory)
/// when a frame body cannot be turned into a message.
///
/// The text is kept verbatim because it is echoed back to the peer in the
/// administrative reject message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ParseError {
    message: String,
}

impl ParseError {
    /// Create a parse error with the given detail text.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Detail text of the failure.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Main error type for all connector operations.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while loading configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Decoded frame length exceeds the configured maximum.
    #[error("Frame length {length} exceeds maximum {max}")]
    FrameTooLarge { length: u64, max: usize },

    /// Length header could not be interpreted (non-digit text, negative
    /// adjusted length).
    #[error("Invalid frame length: {0}")]
    InvalidFrameLength(String),

    /// Body length does not fit into the configured header width.
    #[error("Frame length {value} does not fit into a {width}-byte header")]
    HeaderOverflow { value: i64, width: usize },

    /// Message body could not be parsed.
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Message could not be serialized by the message factory.
    #[error("Encode error: {0}")]
    Encode(String),

    /// A message listener failed while the chain runs in fail-fast mode.
    #[error("Listener error: {0}")]
    Listener(String),

    /// No connection is established.
    #[error("Not connected")]
    NotConnected,

    /// The outbound queue is full.
    #[error("Channel is not writable")]
    NotWritable,

    /// Connection closed before the operation completed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Bounded wait elapsed.
    #[error("Operation timed out")]
    Timeout,

    /// Configuration rejected by validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Connector used before `init()`.
    #[error("Connector is not initialized")]
    NotInitialized,
}

impl ConnectorError {
    /// Build a listener error from any displayable cause.
    pub fn listener(cause: impl std::fmt::Display) -> Self {
        ConnectorError::Listener(cause.to_string())
    }

    /// Whether this error must close the connection it occurred on.
    ///
    /// Parse failures are recoverable; everything else raised on the read
    /// path is connection-fatal.
    pub fn is_connection_fatal(&self) -> bool {
        !matches!(self, ConnectorError::Parse(_))
    }
}

/// Result type alias using ConnectorError.
pub type Result<T> = std::result::Result<T, ConnectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_keeps_message() {
        let err = ParseError::new("Invalid bitmap at position 4");
        assert_eq!(err.message(), "Invalid bitmap at position 4");
        assert_eq!(err.to_string(), "Invalid bitmap at position 4");
    }

    #[test]
    fn test_parse_error_is_not_fatal() {
        let err: ConnectorError = ParseError::new("bad").into();
        assert!(!err.is_connection_fatal());
        assert!(ConnectorError::FrameTooLarge { length: 9000, max: 8192 }.is_connection_fatal());
        assert!(ConnectorError::listener("boom").is_connection_fatal());
    }

    #[test]
    fn test_display() {
        let err = ConnectorError::FrameTooLarge {
            length: 9000,
            max: 8192,
        };
        assert_eq!(err.to_string(), "Frame length 9000 exceeds maximum 8192");

        let err = ConnectorError::HeaderOverflow {
            value: 10000,
            width: 4,
        };
        assert!(err.to_string().contains("4-byte header"));
    }
}
