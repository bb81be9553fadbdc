//! Error types for the gate session runtime.

use std::io;

use gate_core::CoreError;
use thiserror::Error;

/// Errors surfaced by the session and its transports.
#[derive(Debug, Error)]
pub enum GateError {
    /// No channel to the device could be opened. Retry or pick another port.
    #[error("transport unavailable ({target}): {reason}")]
    TransportUnavailable { target: String, reason: String },

    /// A read or write failed mid-session, or the device stopped accepting
    /// commands. The session fell back to simulation.
    #[error("transport failure: {0}")]
    TransportFailure(#[source] io::Error),

    /// The session task has stopped.
    #[error("gate session is closed")]
    SessionClosed,

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for runtime operations.
pub type GateResult<T> = Result<T, GateError>;
