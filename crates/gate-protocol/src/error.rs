//! Error types for the gate protocol.

use thiserror::Error;

/// Errors that can occur when working with the gate protocol.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    /// A `KEY:VALUE` token inside an otherwise valid message could not be decoded.
    #[error("malformed field '{token}': {reason}")]
    MalformedField { token: String, reason: String },

    /// Invalid host command format.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// A partial line grew past the framer limit without a terminator.
    #[error("buffer overflow: max {max} bytes, got {actual}")]
    BufferOverflow { max: usize, actual: usize },
}

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
