//! Failure taxonomy.
//!
//! Every failure a worker can hit maps to one `ErrorKind`. The kind alone
//! decides whether the worker is evicted and whether its owner is told.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Upstream statuses that indicate gateway trouble rather than an account problem.
pub const GATEWAY_STATUSES: [u16; 2] = [502, 503];

/// Classified failure kinds.
///
/// The `Display` text is the operator-facing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum ErrorKind {
    /// Session rejected by the purchase API (403)
    #[error("Expired Cookies")]
    Unauthorized,

    /// Account lacks the one-click settings needed to check out
    #[error("Invalid OneClick Settings")]
    IneligibleConfiguration,

    /// License missing or over its tier limits
    #[error("Key Invalid")]
    InvalidLicense,

    /// Unexpected status from the initiate call
    #[error("Unknown Initiate Error")]
    UnknownAcquireError,

    /// Unexpected status from the finalize call
    #[error("Unknown Place Error")]
    UnknownFinalizeError,

    /// Transport failure other than a timeout or reset
    #[error("{0}")]
    UnknownTransportError(String),
}

impl ErrorKind {
    /// Whether this kind removes the worker from the pool and storage.
    pub fn evicts(&self) -> bool {
        matches!(
            self,
            ErrorKind::Unauthorized | ErrorKind::IneligibleConfiguration | ErrorKind::InvalidLicense
        )
    }

    /// Whether the owner's own channel is notified.
    pub fn notifies_owner(&self) -> bool {
        self.evicts()
    }
}

/// A classified failure with the upstream context that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    /// Failure kind
    pub kind: ErrorKind,
    /// Upstream HTTP status, when the failure came from a response
    pub status: Option<u16>,
    /// Upstream body, when the failure came from a response
    pub body: Option<Value>,
    /// Whether collaborators hear about it (false for gateway statuses)
    pub report: bool,
}

impl Failure {
    /// Failure derived from an upstream response.
    pub fn from_response(kind: ErrorKind, status: u16, body: &Value) -> Self {
        Self {
            kind,
            status: Some(status),
            body: (!body.is_null()).then(|| body.clone()),
            report: !GATEWAY_STATUSES.contains(&status),
        }
    }

    /// Failure not tied to any upstream response.
    pub fn local(kind: ErrorKind) -> Self {
        Self {
            kind,
            status: None,
            body: None,
            report: true,
        }
    }

    /// Transport failure with its error text.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::local(ErrorKind::UnknownTransportError(message.into()))
    }

    /// Whether the worker must be evicted.
    pub fn evicts(&self) -> bool {
        self.kind.evicts()
    }

    /// Whether the owner must be notified.
    pub fn notifies_owner(&self) -> bool {
        self.kind.notifies_owner()
    }
}
