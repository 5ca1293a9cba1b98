//! Stub implementations for testing.
//!
//! These implementations simulate the purchase API, license authority,
//! session acquisition and notification delivery without making real calls.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use dropfleet_domain::{Entitlement, Marketplace, Product, ProductId, PurchaseIntent, Session};
use dropfleet_engine::{ErrorKind, Failure};

use crate::error::{ExecError, ExecResult};
use crate::ports::{
    ApiResponse, LicenseAuthority, Notification, Notifier, OutcomeSink, PurchaseApi,
    RequestContext, SessionProvider, TransportError,
};
use crate::worker::Worker;

// =============================================================================
// Scripted Purchase API
// =============================================================================

/// Purchase API that replays queued responses.
///
/// Once a queue is drained, initiate answers `422` (out of stock) and
/// finalize answers `403` (rejected).
#[derive(Default)]
pub struct ScriptedPurchaseApi {
    initiate: Mutex<VecDeque<Result<ApiResponse, TransportError>>>,
    finalize: Mutex<VecDeque<Result<ApiResponse, TransportError>>>,
    initiate_calls: AtomicUsize,
    finalized: Mutex<Vec<String>>,
    contexts: Mutex<Vec<RequestContext>>,
}

impl ScriptedPurchaseApi {
    /// Create an API with empty queues.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next initiate result.
    pub fn push_initiate(&self, result: Result<ApiResponse, TransportError>) {
        self.initiate.lock().push_back(result);
    }

    /// Queue the next finalize result.
    pub fn push_finalize(&self, result: Result<ApiResponse, TransportError>) {
        self.finalize.lock().push_back(result);
    }

    /// Number of initiate calls served.
    pub fn initiate_calls(&self) -> usize {
        self.initiate_calls.load(Ordering::SeqCst)
    }

    /// Number of finalize calls served.
    pub fn finalize_calls(&self) -> usize {
        self.finalized.lock().len()
    }

    /// Intent ids passed to finalize, in call order.
    pub fn finalized_intents(&self) -> Vec<String> {
        self.finalized.lock().clone()
    }

    /// Request contexts of every call, in call order.
    pub fn contexts(&self) -> Vec<RequestContext> {
        self.contexts.lock().clone()
    }
}

#[async_trait]
impl PurchaseApi for ScriptedPurchaseApi {
    async fn initiate(
        &self,
        ctx: &RequestContext,
        _product: &Product,
    ) -> Result<ApiResponse, TransportError> {
        self.initiate_calls.fetch_add(1, Ordering::SeqCst);
        self.contexts.lock().push(ctx.clone());
        let next = self.initiate.lock().pop_front();
        next.unwrap_or_else(|| Ok(ApiResponse::new(422, json!({}))))
    }

    async fn finalize(
        &self,
        ctx: &RequestContext,
        intent_id: &str,
    ) -> Result<ApiResponse, TransportError> {
        self.finalized.lock().push(intent_id.to_string());
        self.contexts.lock().push(ctx.clone());
        let next = self.finalize.lock().pop_front();
        next.unwrap_or_else(|| Ok(ApiResponse::new(403, json!({}))))
    }
}

// =============================================================================
// Static License Authority
// =============================================================================

/// License authority backed by a fixed table.
#[derive(Default)]
pub struct StaticLicenseAuthority {
    licenses: Mutex<HashMap<String, Entitlement>>,
    fail: Mutex<bool>,
}

impl StaticLicenseAuthority {
    /// Create an authority with no licenses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a license.
    pub fn insert(&self, license_key: &str, entitlement: Entitlement) {
        self.licenses.lock().insert(license_key.to_string(), entitlement);
    }

    /// Make lookups fail with a transport-style error.
    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock() = fail;
    }
}

#[async_trait]
impl LicenseAuthority for StaticLicenseAuthority {
    async fn entitlement(&self, license_key: &str) -> ExecResult<Option<Entitlement>> {
        if *self.fail.lock() {
            return Err(ExecError::License("Simulated authority failure".to_string()));
        }
        Ok(self.licenses.lock().get(license_key).copied())
    }
}

// =============================================================================
// Stub Session Provider
// =============================================================================

/// Session provider that hands out a token derived from the cookie blob.
///
/// An empty cookie blob is rejected.
#[derive(Default)]
pub struct StubSessionProvider;

#[async_trait]
impl SessionProvider for StubSessionProvider {
    async fn acquire(&self, cookies: &str, marketplace: Marketplace) -> ExecResult<Session> {
        if cookies.trim().is_empty() {
            return Err(ExecError::Session("No cookies".to_string()));
        }
        Ok(Session::new(Some(format!("Atna|stub-{}", marketplace.code())), cookies))
    }
}

// =============================================================================
// Recording Notifier / Sink
// =============================================================================

/// Notifier that keeps every notification in memory.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    /// Create an empty notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications delivered so far.
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> ExecResult<()> {
        self.sent.lock().push(notification.clone());
        Ok(())
    }
}

/// Event observed by [`RecordingSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    /// New subscription list
    SubscriptionsChanged(Vec<ProductId>),
    /// Intent id that was placed
    Succeeded(String),
    /// Kind of a reported failure
    Failed(ErrorKind),
}

/// Outcome sink that records what workers report.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events observed so far.
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl OutcomeSink for RecordingSink {
    async fn subscriptions_changed(&self, _worker: &Worker, subscriptions: &[ProductId]) {
        self.events.lock().push(SinkEvent::SubscriptionsChanged(subscriptions.to_vec()));
    }

    async fn checkout_succeeded(&self, _worker: &Worker, intent: &PurchaseIntent) {
        self.events.lock().push(SinkEvent::Succeeded(intent.intent_id.clone()));
    }

    async fn checkout_failed(&self, _worker: &Worker, failure: &Failure) {
        self.events.lock().push(SinkEvent::Failed(failure.kind.clone()));
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use dropfleet_domain::{Marketplace, Product};

    fn ctx() -> RequestContext {
        RequestContext {
            marketplace: Marketplace::Us,
            hostname: "purchase.example".to_string(),
            egress: None,
            session: Session::anonymous(),
            correlation_id: "ABC".to_string(),
        }
    }

    #[tokio::test]
    async fn test_scripted_api_replays_then_defaults() {
        let api = ScriptedPurchaseApi::new();
        api.push_initiate(Err(TransportError::Timeout));
        let product = Product::test_product(Marketplace::Us);

        assert_eq!(api.initiate(&ctx(), &product).await, Err(TransportError::Timeout));
        assert_eq!(api.initiate(&ctx(), &product).await.unwrap().status, 422);
        assert_eq!(api.finalize(&ctx(), "pid").await.unwrap().status, 403);
        assert_eq!(api.initiate_calls(), 2);
        assert_eq!(api.finalized_intents(), vec!["pid".to_string()]);
    }

    #[tokio::test]
    async fn test_static_license_authority() {
        let authority = StaticLicenseAuthority::new();
        authority.insert("LIC-1", Entitlement::from_allowances(Some(2), None));

        assert_eq!(authority.entitlement("LIC-1").await.unwrap().unwrap().tier_a_limit, 2);
        assert!(authority.entitlement("LIC-2").await.unwrap().is_none());

        authority.set_failing(true);
        assert!(authority.entitlement("LIC-1").await.is_err());
    }

    #[tokio::test]
    async fn test_stub_session_provider() {
        let provider = StubSessionProvider;
        assert!(provider.acquire("", Marketplace::Us).await.is_err());
        assert!(provider.acquire("session-id=1", Marketplace::Uk).await.unwrap().has_token());
    }
}
