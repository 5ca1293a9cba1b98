//! Response classification for the checkout state machine.
//!
//! Pure functions of (endpoint, status, body). The executor decides what to
//! do with each verdict; nothing here performs I/O.

use serde_json::Value;

use dropfleet_domain::PurchaseIntent;

use crate::extract::IntentDraft;
use crate::taxonomy::{ErrorKind, Failure};

/// Purchase states that mean the account cannot one-click check out.
pub const INELIGIBLE_PURCHASE_STATES: [&str; 3] =
    ["DESTINATION_NOT_SET", "PAYMENT_PLAN_NOT_SET", "BILLING_ADDRESS_NOT_SET"];

/// Purchase state that is retried without reporting.
pub const SHIPPING_OPTION_NOT_SET: &str = "SHIPPING_OPTION_NOT_SET";

/// Restriction reason that removes the product from the subscription list.
pub const EXCEEDED_PERMITTED_QUANTITY: &str = "EXCEEDED_PERMITTED_QUANTITY";

// =============================================================================
// Verdicts
// =============================================================================

/// Classification of an initiate response.
#[derive(Debug, Clone, PartialEq)]
pub enum InitiateVerdict {
    /// Intent obtained; proceed to finalize
    Created(IntentDraft),
    /// Shipping option missing; retry silently
    ShippingOptionNotSet,
    /// Account already bought the permitted quantity
    QuantityExceeded,
    /// Product not purchasable right now (422)
    OutOfStock,
    /// Failure path
    Fatal(Failure),
}

/// Classification of a finalize response.
#[derive(Debug, Clone, PartialEq)]
pub enum FinalizeVerdict {
    /// Order placed (200)
    Committed,
    /// Possibly placed; treated as a retryable failure (422)
    Ambiguous,
    /// Rejected; intent is kept for another attempt (403)
    Rejected,
    /// Unexpected status; intent is kept and the failure path runs
    Failed(Failure),
}

/// Classification of a health probe (initiate against the test product).
#[derive(Debug, Clone, PartialEq)]
pub enum HealthVerdict {
    /// Worker can check out
    Healthy,
    /// Worker must go through the failure path and counts as unhealthy
    Unhealthy(Failure),
    /// Failure is reported but the worker still counts as healthy
    Degraded(Failure),
}

/// Why an attempt ended without success or failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// 422 on initiate
    OutOfStock,
    /// `SHIPPING_OPTION_NOT_SET`
    ShippingOptionNotSet,
    /// Product removed after `EXCEEDED_PERMITTED_QUANTITY`
    QuantityExceeded,
    /// 422 on finalize
    FinalizeAmbiguous,
    /// 403 on finalize
    FinalizeRejected,
    /// Timeout or connection reset
    TransportInterrupted,
}

/// Result of one checkout attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Order placed
    Success(PurchaseIntent),
    /// Try again
    Retryable(RetryReason),
    /// Failure path ran (the worker may have been evicted)
    Fatal(Failure),
}

impl Outcome {
    /// Whether the attempt placed an order.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }
}

// =============================================================================
// Classifiers
// =============================================================================

/// Classify an initiate response.
pub fn classify_initiate(status: u16, body: &Value) -> InitiateVerdict {
    match status {
        201 => classify_created(status, body),
        422 => InitiateVerdict::OutOfStock,
        403 => InitiateVerdict::Fatal(Failure::from_response(ErrorKind::Unauthorized, status, body)),
        _ => InitiateVerdict::Fatal(Failure::from_response(
            ErrorKind::UnknownAcquireError,
            status,
            body,
        )),
    }
}

fn classify_created(status: u16, body: &Value) -> InitiateVerdict {
    let entity = body.get("entity").unwrap_or(&Value::Null);

    if INELIGIBLE_PURCHASE_STATES.iter().any(|s| has_purchase_state(entity, s)) {
        return InitiateVerdict::Fatal(Failure::from_response(
            ErrorKind::IneligibleConfiguration,
            status,
            body,
        ));
    }
    if has_purchase_state(entity, SHIPPING_OPTION_NOT_SET) {
        return InitiateVerdict::ShippingOptionNotSet;
    }
    if has_restriction(entity, EXCEEDED_PERMITTED_QUANTITY) {
        return InitiateVerdict::QuantityExceeded;
    }

    match IntentDraft::from_body(body) {
        Some(draft) => InitiateVerdict::Created(draft),
        None => InitiateVerdict::Fatal(Failure::from_response(
            ErrorKind::UnknownAcquireError,
            status,
            body,
        )),
    }
}

/// Classify a finalize response.
pub fn classify_finalize(status: u16, body: &Value) -> FinalizeVerdict {
    match status {
        200 => FinalizeVerdict::Committed,
        422 => FinalizeVerdict::Ambiguous,
        403 => FinalizeVerdict::Rejected,
        _ => FinalizeVerdict::Failed(Failure::from_response(
            ErrorKind::UnknownFinalizeError,
            status,
            body,
        )),
    }
}

/// Classify a health probe.
///
/// Same as [`classify_initiate`] except that 422 and any non-fatal 201 pass,
/// and unexpected statuses are reported without failing the worker.
pub fn classify_probe(status: u16, body: &Value) -> HealthVerdict {
    match classify_initiate(status, body) {
        InitiateVerdict::Fatal(failure) if failure.evicts() => HealthVerdict::Unhealthy(failure),
        InitiateVerdict::Fatal(_) if status == 201 => HealthVerdict::Healthy,
        InitiateVerdict::Fatal(failure) => HealthVerdict::Degraded(failure),
        _ => HealthVerdict::Healthy,
    }
}

/// `purchaseState` is a list upstream; a bare string is matched by substring.
fn has_purchase_state(entity: &Value, state: &str) -> bool {
    match entity.get("purchaseState") {
        Some(Value::Array(states)) => states.iter().any(|s| s.as_str() == Some(state)),
        Some(Value::String(s)) => s.contains(state),
        _ => false,
    }
}

fn has_restriction(entity: &Value, reason: &str) -> bool {
    entity
        .get("purchaseRestrictions")
        .and_then(Value::as_array)
        .map(|restrictions| {
            restrictions
                .iter()
                .any(|r| r.get("reason").and_then(Value::as_str) == Some(reason))
        })
        .unwrap_or(false)
}

// =============================================================================
// Tests
// =============================================================================
