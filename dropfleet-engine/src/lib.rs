//! Dropfleet Engine Layer
//!
//! Pure decision logic, deterministic, no I/O.
//! Takes a purchase API response → returns a verdict for the executor.

#![warn(clippy::all)]

pub mod classify;
pub mod extract;
pub mod taxonomy;

pub use classify::{
    classify_finalize, classify_initiate, classify_probe, FinalizeVerdict, HealthVerdict,
    InitiateVerdict, Outcome, RetryReason,
};
pub use extract::IntentDraft;
pub use taxonomy::{ErrorKind, Failure, GATEWAY_STATUSES};
