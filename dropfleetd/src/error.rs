//! Daemon error types.

use dropfleet_domain::{AccountKey, DomainError};
use dropfleet_exec::ExecError;
use dropfleet_store::StoreError;
use thiserror::Error;

/// Daemon-level errors.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Domain error
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Execution error
    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Account is not in the pool
    #[error("Account doesn't exist: {0}")]
    AccountNotFound(AccountKey),

    /// Account is already in the pool
    #[error("Attempted to add duplicate account: {0}")]
    DuplicateAccount(AccountKey),

    /// Subscription edit for an account not in the pool
    #[error("Attempted to edit unknown account: {0}")]
    UnknownAccount(AccountKey),

    /// Event bus error
    #[error("Event bus error: {0}")]
    EventBus(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Shutdown requested
    #[error("Shutdown requested")]
    Shutdown,
}

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;
