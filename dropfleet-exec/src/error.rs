//! Execution layer error types.

use thiserror::Error;

use crate::ports::TransportError;

/// Errors that can occur during execution operations.
#[derive(Debug, Error)]
pub enum ExecError {
    /// License authority could not be consulted
    #[error("License authority error: {0}")]
    License(String),

    /// Session could not be acquired from account cookies
    #[error("Session acquisition failed: {0}")]
    Session(String),

    /// Notification could not be delivered
    #[error("Notification failed: {0}")]
    Notification(String),

    /// Transport error talking to an upstream
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Domain error
    #[error("Domain error: {0}")]
    Domain(#[from] dropfleet_domain::DomainError),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type for execution operations.
pub type ExecResult<T> = Result<T, ExecError>;
