//! Execution layer port definitions.
//!
//! Ports define the interfaces for external services (purchase API, license
//! authority, session acquisition, notification) and for the pool the
//! workers report back to. Adapters implement these ports for specific
//! services (REST clients, stubs, the daemon's pool).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use dropfleet_domain::{
    AccountKey, EgressPoint, Entitlement, Marketplace, OwnerId, Product, ProductId,
    PurchaseIntent, Session,
};
use dropfleet_engine::Failure;

use crate::error::ExecResult;
use crate::worker::Worker;

// =============================================================================
// Purchase API Port
// =============================================================================

/// Everything a single purchase API request needs besides its payload.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Marketplace the request targets
    pub marketplace: Marketplace,
    /// Purchase API hostname
    pub hostname: String,
    /// Egress point to route through (direct when `None`)
    pub egress: Option<EgressPoint>,
    /// Session material for auth headers
    pub session: Session,
    /// Fresh per-request correlation id
    pub correlation_id: String,
}

/// A purchase API response. Any status is a response, never a transport error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    /// HTTP status
    pub status: u16,
    /// Parsed JSON body (`Null` when the body was empty or not JSON)
    pub body: Value,
    /// Upstream request id header, when present
    pub request_id: Option<String>,
}

impl ApiResponse {
    /// Response with a status and body.
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body, request_id: None }
    }
}

/// Failure to obtain any response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Request exceeded its timeout
    #[error("Request timed out")]
    Timeout,

    /// Connection was reset or aborted
    #[error("Connection reset: {0}")]
    ConnectionReset(String),

    /// Any other transport failure
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Timeouts and resets are retried immediately after rotating identity.
    pub fn is_interruption(&self) -> bool {
        matches!(self, TransportError::Timeout | TransportError::ConnectionReset(_))
    }
}

/// Port for the two purchase API calls.
///
/// Implementations:
/// - `ScriptedPurchaseApi` - For testing (queued responses)
/// - `PurchaseRestClient` - Real HTTP client
#[async_trait]
pub trait PurchaseApi: Send + Sync {
    /// Initiate a checkout, obtaining a purchase intent.
    async fn initiate(
        &self,
        ctx: &RequestContext,
        product: &Product,
    ) -> Result<ApiResponse, TransportError>;

    /// Finalize (sign) a previously obtained purchase intent.
    async fn finalize(
        &self,
        ctx: &RequestContext,
        intent_id: &str,
    ) -> Result<ApiResponse, TransportError>;
}

// =============================================================================
// License / Session / Notification Ports
// =============================================================================

/// Port for license key lookups.
#[async_trait]
pub trait LicenseAuthority: Send + Sync {
    /// Entitlement of a license key, or `None` when the key is unknown.
    async fn entitlement(&self, license_key: &str) -> ExecResult<Option<Entitlement>>;
}

/// Port for turning account cookies into a purchase API session.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Acquire a session. Only called when an account is provisioned.
    async fn acquire(&self, cookies: &str, marketplace: Marketplace) -> ExecResult<Session>;
}

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    /// Order placed
    Success,
    /// Failure reported by a worker
    Error,
}

/// A notification for operators and, when applicable, the account owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Success or error
    pub kind: NotificationKind,
    /// Worker identity
    pub worker: AccountKey,
    /// Owner of the worker
    pub owner: OwnerId,
    /// Owner webhook; only set when the owner should hear about it
    pub owner_webhook: Option<String>,
    /// Product involved, if any
    pub product: Option<Product>,
    /// Placed intent (success only)
    pub intent: Option<PurchaseIntent>,
    /// Operator message
    pub message: String,
    /// Whether the worker was removed
    pub removed: bool,
    /// Upstream status
    pub status: Option<u16>,
    /// Upstream body
    pub body: Option<Value>,
}

/// Port for outbound notifications. Delivery and formatting live behind it.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a notification.
    async fn notify(&self, notification: &Notification) -> ExecResult<()>;
}

// =============================================================================
// Outcome Sink
// =============================================================================

/// Reporting capability a worker holds a weak reference to.
///
/// Implementations swallow their own errors; a worker never waits on a retry.
#[async_trait]
pub trait OutcomeSink: Send + Sync {
    /// The worker's subscription list changed and must be mirrored to storage.
    async fn subscriptions_changed(&self, worker: &Worker, subscriptions: &[ProductId]);

    /// The worker placed an order.
    async fn checkout_succeeded(&self, worker: &Worker, intent: &PurchaseIntent);

    /// The worker hit a reported failure. Evicting failures arrive after the
    /// worker cancelled itself.
    async fn checkout_failed(&self, worker: &Worker, failure: &Failure);
}

// =============================================================================
// Tests
// =============================================================================
