//! Error types for gate state handling.

use thiserror::Error;

/// Errors that can occur when configuring or driving the gate core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Auto-close timeout must be a positive number of seconds.
    #[error("invalid auto-close timeout: {0}s (must be at least 1s)")]
    InvalidTimeout(u32),
}

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
