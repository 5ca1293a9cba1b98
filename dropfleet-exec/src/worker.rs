//! Worker: one account racing for stock.
//!
//! A worker owns one session, a subscription list and an intent cache. When
//! the pool dispatches it for a product it runs acquire-then-finalize
//! attempts until the deadline passes, it is cancelled, or the product leaves
//! its subscription list.
//!
//! # Flow
//!
//! ```text
//! Idle → Running(product) → attempt × N → Idle
//!          attempt: cached intent? → finalize
//!                   else initiate → classify → finalize | retry | failure path
//! ```

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use dropfleet_domain::{
    AccountKey, EgressPoint, Marketplace, OwnerId, Product, ProductId, PurchaseIntent, Session,
};
use dropfleet_engine::{
    classify_finalize, classify_initiate, classify_probe, Failure, FinalizeVerdict,
    HealthVerdict, InitiateVerdict, Outcome, RetryReason,
};

use crate::cache::IntentCache;
use crate::ports::{OutcomeSink, PurchaseApi, RequestContext, TransportError};
use crate::rotator::Rotators;

/// Wall-clock budget of one checkout loop.
pub const CHECKOUT_DEADLINE_SECS: u64 = 60;

/// Backoff bounds after a failure (milliseconds).
pub const BACKOFF_MIN_MS: u64 = 100;
/// Upper bound, inclusive.
pub const BACKOFF_MAX_MS: u64 = 200;

// =============================================================================
// Configuration / State
// =============================================================================

/// Timing knobs of the checkout loop.
#[derive(Debug, Clone, Copy)]
pub struct CheckoutConfig {
    /// Loop deadline
    pub loop_deadline: Duration,
    /// Minimum post-failure sleep
    pub backoff_min: Duration,
    /// Maximum post-failure sleep
    pub backoff_max: Duration,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            loop_deadline: Duration::from_secs(CHECKOUT_DEADLINE_SECS),
            backoff_min: Duration::from_millis(BACKOFF_MIN_MS),
            backoff_max: Duration::from_millis(BACKOFF_MAX_MS),
        }
    }
}

/// Lifecycle of a worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerState {
    /// Available for dispatch
    Idle,
    /// Racing for a product
    Running(Product),
    /// Evicted or removed; never runs again
    Cancelled,
}

/// Result of an operator-triggered test checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestCheckout {
    /// Worker is racing for a product
    Busy,
    /// The test product was ordered
    Passed,
    /// The attempt did not place an order
    Failed,
}

/// Identity and account data a worker is built from.
#[derive(Debug, Clone)]
pub struct WorkerProfile {
    /// Account identity
    pub key: AccountKey,
    /// Owner of the account
    pub owner: OwnerId,
    /// License key the owner registered with
    pub license_key: String,
    /// Subscribed products
    pub subscriptions: Vec<ProductId>,
    /// Session material
    pub session: Session,
}

#[derive(Debug, Clone)]
struct Binding {
    egress: Option<EgressPoint>,
    hostname: String,
}

// =============================================================================
// Worker
// =============================================================================

/// One account handler.
pub struct Worker {
    key: AccountKey,
    owner: OwnerId,
    license_key: String,
    session: Session,
    subscriptions: RwLock<Vec<ProductId>>,
    state: Mutex<WorkerState>,
    binding: Mutex<Binding>,
    cache: IntentCache,
    api: Arc<dyn PurchaseApi>,
    rotators: Arc<Rotators>,
    sink: Weak<dyn OutcomeSink>,
    config: CheckoutConfig,
}

impl Worker {
    /// Create an idle worker.
    pub fn new(
        profile: WorkerProfile,
        api: Arc<dyn PurchaseApi>,
        rotators: Arc<Rotators>,
        sink: Weak<dyn OutcomeSink>,
        config: CheckoutConfig,
    ) -> Self {
        let hostname = rotators.next_host(profile.key.marketplace).unwrap_or_default();

        Self {
            cache: IntentCache::new(profile.key.to_string()),
            key: profile.key,
            owner: profile.owner,
            license_key: profile.license_key,
            session: profile.session,
            subscriptions: RwLock::new(profile.subscriptions),
            state: Mutex::new(WorkerState::Idle),
            binding: Mutex::new(Binding { egress: None, hostname }),
            api,
            rotators,
            sink,
            config,
        }
    }

    /// Account identity.
    pub fn key(&self) -> &AccountKey {
        &self.key
    }

    /// Marketplace the worker checks out on.
    pub fn marketplace(&self) -> Marketplace {
        self.key.marketplace
    }

    /// Owner id.
    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    /// License key.
    pub fn license_key(&self) -> &str {
        &self.license_key
    }

    /// Intent cache.
    pub fn cache(&self) -> &IntentCache {
        &self.cache
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    /// Snapshot of the subscription list.
    pub fn subscriptions(&self) -> Vec<ProductId> {
        self.subscriptions.read().clone()
    }

    /// Whether the worker is subscribed to a product.
    pub fn is_subscribed(&self, product_id: &ProductId) -> bool {
        self.subscriptions.read().contains(product_id)
    }

    /// Replace the subscription list (in memory only).
    pub fn set_subscriptions(&self, subscriptions: Vec<ProductId>) {
        *self.subscriptions.write() = subscriptions;
    }

    /// Remove a product and mirror the new list through the sink.
    async fn drop_subscription(&self, product_id: &ProductId) {
        let remaining = {
            let mut subscriptions = self.subscriptions.write();
            subscriptions.retain(|p| p != product_id);
            subscriptions.clone()
        };

        if let Some(sink) = self.sink.upgrade() {
            sink.subscriptions_changed(self, &remaining).await;
        }
    }

    // -------------------------------------------------------------------------
    // State
    // -------------------------------------------------------------------------

    /// Current state.
    pub fn state(&self) -> WorkerState {
        self.state.lock().clone()
    }

    /// Whether the worker can be dispatched.
    pub fn is_idle(&self) -> bool {
        matches!(*self.state.lock(), WorkerState::Idle)
    }

    /// Whether the worker was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(*self.state.lock(), WorkerState::Cancelled)
    }

    /// Whether the worker is racing for `product_id` on `marketplace`.
    pub fn is_working_on(&self, product_id: &ProductId, marketplace: Marketplace) -> bool {
        self.key.marketplace == marketplace
            && matches!(&*self.state.lock(), WorkerState::Running(p) if &p.id == product_id)
    }

    /// Product currently raced for.
    pub fn current_product(&self) -> Option<ProductId> {
        match &*self.state.lock() {
            WorkerState::Running(product) => Some(product.id.clone()),
            _ => None,
        }
    }

    /// `Idle → Running(product)`. The only way a loop can start.
    pub fn try_claim(&self, product: &Product) -> bool {
        let mut state = self.state.lock();
        if *state != WorkerState::Idle {
            return false;
        }
        *state = WorkerState::Running(product.clone());
        true
    }

    /// `Running → Idle`; a cancelled worker stays cancelled.
    fn release(&self) {
        let mut state = self.state.lock();
        if matches!(*state, WorkerState::Running(_)) {
            *state = WorkerState::Idle;
        }
    }

    /// Stop the worker for good. In-flight calls complete.
    pub fn cancel(&self) {
        *self.state.lock() = WorkerState::Cancelled;
    }

    // -------------------------------------------------------------------------
    // Transport identity
    // -------------------------------------------------------------------------

    /// Re-roll egress point and hostname.
    pub fn rotate_identity(&self) {
        let egress = self.rotators.checkout.next();
        let hostname = self.rotators.next_host(self.key.marketplace);

        let mut binding = self.binding.lock();
        binding.egress = egress;
        if let Some(hostname) = hostname {
            binding.hostname = hostname;
        }
    }

    fn request_context(&self) -> RequestContext {
        let binding = self.binding.lock().clone();
        RequestContext {
            marketplace: self.key.marketplace,
            hostname: binding.hostname,
            egress: binding.egress,
            session: self.session.clone(),
            correlation_id: correlation_id(),
        }
    }

    // -------------------------------------------------------------------------
    // Checkout loop
    // -------------------------------------------------------------------------

    /// Claim the worker and spawn its checkout loop.
    ///
    /// Returns `None` when the worker was not idle.
    pub fn start_checkout_loop(self: &Arc<Self>, product: Product) -> Option<JoinHandle<()>> {
        if !self.try_claim(&product) {
            return None;
        }

        let worker = Arc::clone(self);
        Some(tokio::spawn(async move { worker.run_checkout_loop(product).await }))
    }

    async fn run_checkout_loop(&self, product: Product) {
        self.rotate_identity();
        let deadline = Instant::now() + self.config.loop_deadline;

        {
            let binding = self.binding.lock();
            info!(
                worker = %self.key,
                product = %product.id,
                since_found_ms = (Utc::now() - product.discovered_at).num_milliseconds(),
                egress = ?binding.egress.as_ref().map(ToString::to_string),
                hostname = %binding.hostname,
                "Starting checkout loop"
            );
        }

        loop {
            match self.attempt(&product).await {
                Ok(outcome) => debug!(worker = %self.key, product = %product.id, ?outcome, "Attempt finished"),
                Err(e) if e.is_interruption() => {
                    warn!(worker = %self.key, product = %product.id, error = %e, "Rotating identity after interruption");
                    self.rotate_identity();
                },
                Err(e) => {
                    error!(worker = %self.key, product = %product.id, error = %e, "Checkout attempt failed");
                    self.fail(&Failure::transport(e.to_string())).await;
                },
            }

            if Instant::now() >= deadline || self.is_cancelled() || !self.is_subscribed(&product.id) {
                break;
            }
        }

        info!(worker = %self.key, product = %product.id, "Stopping checkout loop");
        self.release();
    }

    /// One acquire-then-finalize attempt.
    pub async fn attempt(&self, product: &Product) -> Result<Outcome, TransportError> {
        if let Some(intent) = self.cache.get(&product.id) {
            return self.finalize(intent).await;
        }

        let response = self.api.initiate(&self.request_context(), product).await?;

        match classify_initiate(response.status, &response.body) {
            InitiateVerdict::Created(draft) => {
                let intent = draft.into_intent(product.clone(), Utc::now());
                info!(
                    worker = %self.key,
                    product = %product.id,
                    intent_id = %intent.intent_id,
                    total = %intent.total,
                    "Intent created"
                );
                self.finalize(intent).await
            },
            InitiateVerdict::ShippingOptionNotSet => {
                Ok(Outcome::Retryable(RetryReason::ShippingOptionNotSet))
            },
            InitiateVerdict::QuantityExceeded => {
                info!(worker = %self.key, product = %product.id, "Permitted quantity exceeded, unsubscribing");
                self.drop_subscription(&product.id).await;
                Ok(Outcome::Retryable(RetryReason::QuantityExceeded))
            },
            InitiateVerdict::OutOfStock => Ok(Outcome::Retryable(RetryReason::OutOfStock)),
            InitiateVerdict::Fatal(failure) => {
                self.fail(&failure).await;
                Ok(Outcome::Fatal(failure))
            },
        }
    }

    async fn finalize(&self, intent: PurchaseIntent) -> Result<Outcome, TransportError> {
        let response = self.api.finalize(&self.request_context(), &intent.intent_id).await?;

        match classify_finalize(response.status, &response.body) {
            FinalizeVerdict::Committed => {
                self.cache.delete(&intent.intent_id);
                self.drop_subscription(intent.product_id()).await;
                if let Some(sink) = self.sink.upgrade() {
                    sink.checkout_succeeded(self, &intent).await;
                }
                info!(
                    worker = %self.key,
                    product = %intent.product_id(),
                    intent_id = %intent.intent_id,
                    "Checkout succeeded"
                );
                Ok(Outcome::Success(intent))
            },
            FinalizeVerdict::Ambiguous => {
                warn!(
                    worker = %self.key,
                    product = %intent.product_id(),
                    intent_id = %intent.intent_id,
                    status = response.status,
                    "Possible success with 422"
                );
                Ok(Outcome::Retryable(RetryReason::FinalizeAmbiguous))
            },
            FinalizeVerdict::Rejected => {
                self.cache.put(intent);
                Ok(Outcome::Retryable(RetryReason::FinalizeRejected))
            },
            FinalizeVerdict::Failed(failure) => {
                self.cache.put(intent);
                self.fail(&failure).await;
                Ok(Outcome::Fatal(failure))
            },
        }
    }

    /// Failure path shared by live checkouts and health checks.
    pub async fn fail(&self, failure: &Failure) {
        error!(
            worker = %self.key,
            kind = ?failure.kind,
            message = %failure.kind,
            status = ?failure.status,
            body = ?failure.body.as_ref().filter(|_| failure.status != Some(503)),
            "Worker failure"
        );

        self.rotate_identity();

        if failure.report && !self.is_cancelled() {
            if failure.evicts() {
                self.cancel();
            }
            if let Some(sink) = self.sink.upgrade() {
                sink.checkout_failed(self, failure).await;
            }
        }

        let backoff = self.backoff();
        debug!(worker = %self.key, backoff_ms = backoff.as_millis() as u64, "Backing off after failure");
        tokio::time::sleep(backoff).await;
    }

    fn backoff(&self) -> Duration {
        let min = self.config.backoff_min.as_millis() as u64;
        let max = (self.config.backoff_max.as_millis() as u64).max(min);
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    // -------------------------------------------------------------------------
    // Health / test checkout
    // -------------------------------------------------------------------------

    /// Probe the purchase API with the marketplace's test product through an
    /// auxiliary egress point. Failures run the failure path.
    ///
    /// Returns whether the worker is healthy.
    pub async fn check_health(&self) -> Result<bool, TransportError> {
        let product = Product::test_product(self.key.marketplace);
        let mut ctx = self.request_context();
        ctx.egress = self.rotators.auxiliary.next();

        let response = self.api.initiate(&ctx, &product).await?;

        match classify_probe(response.status, &response.body) {
            HealthVerdict::Healthy => {
                info!(worker = %self.key, status = response.status, "Health check passed");
                Ok(true)
            },
            HealthVerdict::Unhealthy(failure) => {
                self.fail(&failure).await;
                Ok(false)
            },
            HealthVerdict::Degraded(failure) => {
                self.fail(&failure).await;
                Ok(true)
            },
        }
    }

    /// One attempt against the marketplace's test product.
    pub async fn test_checkout(&self) -> TestCheckout {
        if matches!(*self.state.lock(), WorkerState::Running(_)) {
            return TestCheckout::Busy;
        }

        {
            let mut binding = self.binding.lock();
            if binding.egress.is_none() {
                binding.egress = self.rotators.checkout.next();
            }
        }

        match self.attempt(&Product::test_product(self.key.marketplace)).await {
            Ok(outcome) if outcome.is_success() => TestCheckout::Passed,
            Ok(_) => TestCheckout::Failed,
            Err(e) => {
                warn!(worker = %self.key, error = %e, "Test checkout failed");
                TestCheckout::Failed
            },
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("key", &self.key)
            .field("owner", &self.owner)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// 20 uppercase hex characters from 10 random bytes.
pub fn correlation_id() -> String {
    hex::encode_upper(rand::random::<[u8; 10]>())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::{RecordingSink, ScriptedPurchaseApi, SinkEvent};
    use crate::ports::ApiResponse;
    use dropfleet_engine::ErrorKind;
    use serde_json::json;

    fn product(id: &str) -> Product {
        let mut product = Product::test_product(Marketplace::Us);
        product.id = ProductId::new(id).unwrap();
        product
    }

    fn created_body(intent_id: &str) -> serde_json::Value {
        json!({ "entity": { "purchaseId": intent_id, "purchaseState": [] } })
    }

    fn fast_config() -> CheckoutConfig {
        CheckoutConfig {
            loop_deadline: Duration::from_millis(200),
            backoff_min: Duration::from_millis(1),
            backoff_max: Duration::from_millis(2),
        }
    }

    fn create_worker(
        api: Arc<ScriptedPurchaseApi>,
        sink: &Arc<RecordingSink>,
        subscriptions: &[&str],
    ) -> Arc<Worker> {
        let profile = WorkerProfile {
            key: AccountKey::new("buyer@example.com", Marketplace::Us).unwrap(),
            owner: 7,
            license_key: "LIC-1".to_string(),
            subscriptions: subscriptions.iter().map(|s| ProductId::new(*s).unwrap()).collect(),
            session: Session::new(Some("token".to_string()), "cookie=1"),
        };
        let sink: Arc<dyn OutcomeSink> = sink.clone();
        Arc::new(Worker::new(
            profile,
            api,
            Arc::new(Rotators::default()),
            Arc::downgrade(&sink),
            fast_config(),
        ))
    }

    #[test]
    fn test_correlation_id_format() {
        let id = correlation_id();
        assert_eq!(id.len(), 20);
        assert!(id.chars().all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let api = Arc::new(ScriptedPurchaseApi::new());
        let sink = Arc::new(RecordingSink::new());
        let worker = create_worker(api, &sink, &["X123456789"]);
        let target = product("X123456789");

        assert!(worker.try_claim(&target));
        assert!(!worker.try_claim(&target));
        assert!(worker.start_checkout_loop(target.clone()).is_none());
        assert!(worker.is_working_on(&target.id, Marketplace::Us));
        assert!(!worker.is_working_on(&target.id, Marketplace::Uk));
    }

    #[tokio::test]
    async fn test_successful_finalize_unsubscribes_and_clears_cache() {
        let api = Arc::new(ScriptedPurchaseApi::new());
        api.push_initiate(Ok(ApiResponse::new(201, created_body("pid-1"))));
        api.push_finalize(Ok(ApiResponse::new(200, json!({}))));
        let sink = Arc::new(RecordingSink::new());
        let worker = create_worker(api.clone(), &sink, &["X123456789"]);
        let target = product("X123456789");

        let outcome = worker.attempt(&target).await.unwrap();

        assert!(outcome.is_success());
        assert!(worker.subscriptions().is_empty());
        assert!(worker.cache().is_empty());
        assert_eq!(api.finalized_intents(), vec!["pid-1".to_string()]);

        let events = sink.events();
        assert!(events.contains(&SinkEvent::SubscriptionsChanged(vec![])));
        assert!(events.contains(&SinkEvent::Succeeded("pid-1".to_string())));
    }

    #[tokio::test]
    async fn test_rejected_finalize_caches_intent_for_next_attempt() {
        let api = Arc::new(ScriptedPurchaseApi::new());
        api.push_initiate(Ok(ApiResponse::new(201, created_body("pid-9"))));
        api.push_finalize(Ok(ApiResponse::new(403, json!({}))));
        api.push_finalize(Ok(ApiResponse::new(200, json!({}))));
        let sink = Arc::new(RecordingSink::new());
        let worker = create_worker(api.clone(), &sink, &["X123456789"]);
        let target = product("X123456789");

        let first = worker.attempt(&target).await.unwrap();
        assert_eq!(first, Outcome::Retryable(RetryReason::FinalizeRejected));
        assert!(worker.cache().contains(&target.id));

        let second = worker.attempt(&target).await.unwrap();
        assert!(second.is_success());
        assert_eq!(api.initiate_calls(), 1);
        assert_eq!(api.finalized_intents(), vec!["pid-9".to_string(), "pid-9".to_string()]);
    }

    #[tokio::test]
    async fn test_ambiguous_finalize_is_not_cached() {
        let api = Arc::new(ScriptedPurchaseApi::new());
        api.push_initiate(Ok(ApiResponse::new(201, created_body("pid-2"))));
        api.push_finalize(Ok(ApiResponse::new(422, json!({}))));
        let sink = Arc::new(RecordingSink::new());
        let worker = create_worker(api, &sink, &["X123456789"]);

        let outcome = worker.attempt(&product("X123456789")).await.unwrap();

        assert_eq!(outcome, Outcome::Retryable(RetryReason::FinalizeAmbiguous));
        assert!(worker.cache().is_empty());
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_quantity_exceeded_unsubscribes() {
        let api = Arc::new(ScriptedPurchaseApi::new());
        api.push_initiate(Ok(ApiResponse::new(
            201,
            json!({ "entity": {
                "purchaseId": "pid-3",
                "purchaseState": [],
                "purchaseRestrictions": [{ "reason": "EXCEEDED_PERMITTED_QUANTITY" }]
            } }),
        )));
        let sink = Arc::new(RecordingSink::new());
        let worker = create_worker(api.clone(), &sink, &["X123456789", "B08FC6MR62"]);

        let outcome = worker.attempt(&product("X123456789")).await.unwrap();

        assert_eq!(outcome, Outcome::Retryable(RetryReason::QuantityExceeded));
        assert_eq!(worker.subscriptions(), vec![ProductId::new("B08FC6MR62").unwrap()]);
        assert_eq!(api.finalize_calls(), 0);
    }

    #[tokio::test]
    async fn test_unauthorized_cancels_and_reports() {
        let api = Arc::new(ScriptedPurchaseApi::new());
        api.push_initiate(Ok(ApiResponse::new(403, json!({}))));
        let sink = Arc::new(RecordingSink::new());
        let worker = create_worker(api, &sink, &["X123456789"]);

        let outcome = worker.attempt(&product("X123456789")).await.unwrap();

        assert!(matches!(outcome, Outcome::Fatal(ref f) if f.kind == ErrorKind::Unauthorized));
        assert!(worker.is_cancelled());
        assert_eq!(sink.events(), vec![SinkEvent::Failed(ErrorKind::Unauthorized)]);
    }

    #[tokio::test]
    async fn test_gateway_failure_is_not_reported() {
        let api = Arc::new(ScriptedPurchaseApi::new());
        api.push_initiate(Ok(ApiResponse::new(503, json!({}))));
        let sink = Arc::new(RecordingSink::new());
        let worker = create_worker(api, &sink, &["X123456789"]);

        let outcome = worker.attempt(&product("X123456789")).await.unwrap();

        assert!(matches!(outcome, Outcome::Fatal(_)));
        assert!(!worker.is_cancelled());
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_loop_stops_when_product_unsubscribed() {
        let api = Arc::new(ScriptedPurchaseApi::new());
        api.push_initiate(Ok(ApiResponse::new(201, created_body("pid-4"))));
        api.push_finalize(Ok(ApiResponse::new(200, json!({}))));
        let sink = Arc::new(RecordingSink::new());
        let worker = create_worker(api.clone(), &sink, &["X123456789"]);

        let handle = worker.start_checkout_loop(product("X123456789")).unwrap();
        handle.await.unwrap();

        assert!(worker.is_idle());
        assert_eq!(api.initiate_calls(), 1);
    }

    #[tokio::test]
    async fn test_loop_retries_until_deadline_and_returns_idle() {
        let api = Arc::new(ScriptedPurchaseApi::new());
        api.push_initiate(Err(TransportError::Timeout));
        let sink = Arc::new(RecordingSink::new());
        let worker = create_worker(api.clone(), &sink, &["X123456789"]);

        let handle = worker.start_checkout_loop(product("X123456789")).unwrap();
        handle.await.unwrap();

        assert!(worker.is_idle());
        assert!(api.initiate_calls() > 1);
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_loop_reports_other_transport_errors_and_continues() {
        let api = Arc::new(ScriptedPurchaseApi::new());
        api.push_initiate(Err(TransportError::Other("connection refused".to_string())));
        api.push_initiate(Ok(ApiResponse::new(422, json!({}))));
        let sink = Arc::new(RecordingSink::new());
        let worker = create_worker(api.clone(), &sink, &["X123456789"]);

        let handle = worker.start_checkout_loop(product("X123456789")).unwrap();
        handle.await.unwrap();

        assert!(worker.is_idle());
        assert!(!worker.is_cancelled());
        assert!(api.initiate_calls() > 1);
        assert_eq!(
            sink.events(),
            vec![SinkEvent::Failed(ErrorKind::UnknownTransportError("connection refused".to_string()))]
        );
    }

    #[tokio::test]
    async fn test_unknown_finalize_status_caches_and_reports() {
        let api = Arc::new(ScriptedPurchaseApi::new());
        api.push_initiate(Ok(ApiResponse::new(201, created_body("pid-5"))));
        api.push_finalize(Ok(ApiResponse::new(500, json!({ "message": "internal" }))));
        let sink = Arc::new(RecordingSink::new());
        let worker = create_worker(api, &sink, &["X123456789"]);
        let target = product("X123456789");

        let outcome = worker.attempt(&target).await.unwrap();

        assert!(matches!(outcome, Outcome::Fatal(ref f) if f.kind == ErrorKind::UnknownFinalizeError));
        assert!(worker.cache().contains(&target.id));
        assert_eq!(worker.cache().get(&target.id).unwrap().intent_id, "pid-5");
        assert!(!worker.is_cancelled());
        assert_eq!(sink.events(), vec![SinkEvent::Failed(ErrorKind::UnknownFinalizeError)]);
    }

    #[tokio::test]
    async fn test_cancelled_worker_stays_cancelled_after_loop() {
        let api = Arc::new(ScriptedPurchaseApi::new());
        api.push_initiate(Ok(ApiResponse::new(403, json!({}))));
        let sink = Arc::new(RecordingSink::new());
        let worker = create_worker(api.clone(), &sink, &["X123456789"]);

        let handle = worker.start_checkout_loop(product("X123456789")).unwrap();
        handle.await.unwrap();

        assert!(worker.is_cancelled());
        assert_eq!(api.initiate_calls(), 1);
    }

    #[tokio::test]
    async fn test_test_checkout_busy_while_running() {
        let api = Arc::new(ScriptedPurchaseApi::new());
        let sink = Arc::new(RecordingSink::new());
        let worker = create_worker(api, &sink, &["X123456789"]);

        worker.try_claim(&product("X123456789"));

        assert_eq!(worker.test_checkout().await, TestCheckout::Busy);
    }

    #[tokio::test]
    async fn test_health_check_passes_on_out_of_stock() {
        let api = Arc::new(ScriptedPurchaseApi::new());
        api.push_initiate(Ok(ApiResponse::new(422, json!({}))));
        let sink = Arc::new(RecordingSink::new());
        let worker = create_worker(api, &sink, &[]);

        assert!(worker.check_health().await.unwrap());
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_health_check_fails_on_ineligible_state() {
        let api = Arc::new(ScriptedPurchaseApi::new());
        api.push_initiate(Ok(ApiResponse::new(
            201,
            json!({ "entity": { "purchaseId": "p", "purchaseState": ["BILLING_ADDRESS_NOT_SET"] } }),
        )));
        let sink = Arc::new(RecordingSink::new());
        let worker = create_worker(api, &sink, &[]);

        assert!(!worker.check_health().await.unwrap());
        assert!(worker.is_cancelled());
        assert_eq!(sink.events(), vec![SinkEvent::Failed(ErrorKind::IneligibleConfiguration)]);
    }
}
