//! Worker pool: membership, dispatch and outcome reporting.
//!
//! The pool owns every `Worker` (`Arc`), hands each one a `Weak` back
//! reference to itself as its `OutcomeSink`, and mirrors membership and
//! subscription changes into the account registry.
//!
//! # Dispatch
//!
//! ```text
//! stock event → guard → room = capacity - working
//!             → idle subscribers (shuffled), cached-intent holders first
//!             → start_checkout_loop × room
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use tracing::{debug, error, info, warn};

use dropfleet_domain::{
    AccountKey, Marketplace, OwnerId, Product, ProductId, PurchaseIntent, Session,
};
use dropfleet_engine::Failure;
use dropfleet_exec::{
    CheckoutConfig, Notification, NotificationKind, Notifier, OutcomeSink, PurchaseApi,
    Rotators, SessionProvider, TestCheckout, Worker, WorkerProfile,
};
use dropfleet_store::{AccountRecord, AccountRepository, Owner};

use crate::error::{DaemonError, DaemonResult};

/// Default concurrent workers allowed on one product.
pub const DEFAULT_MAX_WORKERS_PER_PRODUCT: usize = 600;

// =============================================================================
// Construction
// =============================================================================

/// Collaborators the pool talks to.
pub struct PoolDeps {
    /// Purchase API shared by every worker
    pub api: Arc<dyn PurchaseApi>,
    /// Egress / hostname rotators shared by every worker
    pub rotators: Arc<Rotators>,
    /// Session acquisition for records without a token
    pub sessions: Arc<dyn SessionProvider>,
    /// Account registry
    pub store: Arc<dyn AccountRepository>,
    /// Outbound notifications
    pub notifier: Arc<dyn Notifier>,
}

/// Pool limits.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Concurrent workers allowed on one product
    pub max_workers_per_product: usize,
    /// Worker checkout loop timing
    pub checkout: CheckoutConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers_per_product: DEFAULT_MAX_WORKERS_PER_PRODUCT,
            checkout: CheckoutConfig::default(),
        }
    }
}

/// Counts of one dispatch round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Workers already racing for the product
    pub already_working: usize,
    /// Loops started for workers holding a cached intent
    pub with_cache: usize,
    /// Loops started for workers without one
    pub without_cache: usize,
    /// Event dropped because another dispatch was in flight
    pub dropped: bool,
}

impl DispatchReport {
    /// Total loops started.
    pub fn started(&self) -> usize {
        self.with_cache + self.without_cache
    }
}

// =============================================================================
// Worker Pool
// =============================================================================

/// The worker pool.
pub struct WorkerPool {
    workers: RwLock<Vec<Arc<Worker>>>,
    dispatching: AtomicBool,
    deps: PoolDeps,
    config: PoolConfig,
    self_ref: Weak<WorkerPool>,
}

impl WorkerPool {
    /// Create an empty pool.
    pub fn new(deps: PoolDeps, config: PoolConfig) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            workers: RwLock::new(Vec::new()),
            dispatching: AtomicBool::new(false),
            deps,
            config,
            self_ref: self_ref.clone(),
        })
    }

    // -------------------------------------------------------------------------
    // Membership
    // -------------------------------------------------------------------------

    /// Load every stored record into the pool. Records that fail to register
    /// are logged and skipped. Returns how many were registered.
    pub async fn restore(&self) -> DaemonResult<usize> {
        let records = self.deps.store.find_all().await?;
        let total = records.len();
        let mut registered = 0;

        for record in records {
            let key = record.key.clone();
            match self.register(record).await {
                Ok(_) => registered += 1,
                Err(e) => warn!(account = %key, error = %e, "Failed to restore account"),
            }
        }

        info!(registered, total, "Restored accounts from registry");
        Ok(registered)
    }

    /// Register an account. Acquires a session when the record has no token.
    ///
    /// # Errors
    /// `DuplicateAccount` if the identity is already in the pool; session
    /// acquisition errors are passed through.
    pub async fn register(&self, record: AccountRecord) -> DaemonResult<Arc<Worker>> {
        if self.exists(&record.key) {
            return Err(DaemonError::DuplicateAccount(record.key));
        }

        let session = match record.access_token {
            Some(token) => Session::new(Some(token), record.cookies),
            None => {
                self.deps.sessions.acquire(&record.cookies, record.key.marketplace).await?
            },
        };

        let sink: Weak<dyn OutcomeSink> = self.self_ref.clone();
        let worker = Arc::new(Worker::new(
            WorkerProfile {
                key: record.key,
                owner: record.owner,
                license_key: record.license_key,
                subscriptions: record.subscriptions,
                session,
            },
            Arc::clone(&self.deps.api),
            Arc::clone(&self.deps.rotators),
            sink,
            self.config.checkout,
        ));

        {
            let mut workers = self.workers.write();
            if workers.iter().any(|w| w.key() == worker.key()) {
                return Err(DaemonError::DuplicateAccount(worker.key().clone()));
            }
            workers.push(Arc::clone(&worker));
        }

        info!(account = %worker.key(), owner = worker.owner(), "Account registered");
        Ok(worker)
    }

    /// Remove an account and cancel its worker.
    ///
    /// # Errors
    /// `AccountNotFound` if the identity is not in the pool.
    pub async fn remove(&self, key: &AccountKey, remove_from_store: bool) -> DaemonResult<()> {
        let worker = {
            let mut workers = self.workers.write();
            let index = workers
                .iter()
                .position(|w| w.key() == key)
                .ok_or_else(|| DaemonError::AccountNotFound(key.clone()))?;
            workers.remove(index)
        };

        worker.cancel();
        info!(account = %key, remove_from_store, "Account removed");

        if remove_from_store {
            self.deps.store.delete(key).await?;
        }
        Ok(())
    }

    /// Look up a worker.
    pub fn get(&self, key: &AccountKey) -> Option<Arc<Worker>> {
        self.workers.read().iter().find(|w| w.key() == key).cloned()
    }

    /// Whether an identity is in the pool.
    pub fn exists(&self, key: &AccountKey) -> bool {
        self.workers.read().iter().any(|w| w.key() == key)
    }

    /// Number of workers.
    pub fn len(&self) -> usize {
        self.workers.read().len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.workers.read().is_empty()
    }

    /// Snapshot of every worker.
    pub fn snapshot(&self) -> Vec<Arc<Worker>> {
        self.workers.read().clone()
    }

    /// Workers belonging to an owner.
    pub fn workers_for_owner(&self, owner: OwnerId) -> Vec<Arc<Worker>> {
        self.workers.read().iter().filter(|w| w.owner() == owner).cloned().collect()
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    /// Replace an account's subscriptions and mirror them to storage.
    ///
    /// # Errors
    /// `UnknownAccount` if the identity is not in the pool.
    pub async fn update_subscriptions(
        &self,
        key: &AccountKey,
        subscriptions: Vec<ProductId>,
    ) -> DaemonResult<()> {
        let worker = self.get(key).ok_or_else(|| DaemonError::UnknownAccount(key.clone()))?;
        worker.set_subscriptions(subscriptions.clone());
        self.deps.store.update_subscriptions(key, &subscriptions).await?;
        Ok(())
    }

    /// Replace the subscriptions of every worker an owner has on one
    /// marketplace. In memory only.
    pub fn update_owner_subscriptions(
        &self,
        owner: OwnerId,
        marketplace: Marketplace,
        subscriptions: Vec<ProductId>,
    ) -> usize {
        let workers = self.workers_for_owner(owner);
        let mut updated = 0;
        for worker in workers.iter().filter(|w| w.marketplace() == marketplace) {
            worker.set_subscriptions(subscriptions.clone());
            updated += 1;
        }
        debug!(owner, %marketplace, updated, "Owner subscriptions replaced");
        updated
    }

    // -------------------------------------------------------------------------
    // Test checkout
    // -------------------------------------------------------------------------

    /// Run one attempt against the marketplace's test product.
    pub async fn test_checkout(&self, key: &AccountKey) -> DaemonResult<TestCheckout> {
        let worker = self.get(key).ok_or_else(|| DaemonError::AccountNotFound(key.clone()))?;
        Ok(worker.test_checkout().await)
    }

    // -------------------------------------------------------------------------
    // Dispatch
    // -------------------------------------------------------------------------

    /// Workers currently racing for a product on a marketplace.
    pub fn working_count(&self, product_id: &ProductId, marketplace: Marketplace) -> usize {
        self.workers
            .read()
            .iter()
            .filter(|w| w.is_working_on(product_id, marketplace))
            .count()
    }

    /// Running workers grouped by product.
    pub fn running_by_product(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for worker in self.workers.read().iter() {
            if let Some(product) = worker.current_product() {
                *counts.entry(format!("{}@{}", product, worker.marketplace())).or_insert(0) += 1;
            }
        }
        counts
    }

    fn idle_subscribers(&self, product_id: &ProductId, marketplace: Marketplace) -> Vec<Arc<Worker>> {
        self.workers
            .read()
            .iter()
            .filter(|w| w.marketplace() == marketplace && w.is_idle() && w.is_subscribed(product_id))
            .cloned()
            .collect()
    }

    /// Start checkout loops for a stock event, bounded by per-product capacity.
    ///
    /// Events arriving while another dispatch is running are dropped.
    pub fn on_stock_event(&self, product: &Product) -> DispatchReport {
        if self
            .dispatching
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(product = %product.id, "Dispatch in flight, dropping stock event");
            return DispatchReport { dropped: true, ..DispatchReport::default() };
        }

        let report = self.dispatch(product);
        self.dispatching.store(false, Ordering::Release);

        if report.started() > 0 {
            info!(
                product = %product.id,
                marketplace = %product.marketplace,
                started = report.started(),
                already_working = report.already_working,
                with_cache = report.with_cache,
                without_cache = report.without_cache,
                "Dispatched workers"
            );
        }
        report
    }

    fn dispatch(&self, product: &Product) -> DispatchReport {
        let capacity = self.config.max_workers_per_product;
        let current = self.working_count(&product.id, product.marketplace);
        let mut report = DispatchReport { already_working: current, ..DispatchReport::default() };

        if current >= capacity {
            debug!(product = %product.id, current, capacity, "Product at capacity");
            return report;
        }
        let room = capacity - current;

        let mut candidates = self.idle_subscribers(&product.id, product.marketplace);
        candidates.shuffle(&mut rand::thread_rng());

        let (cached, uncached): (Vec<_>, Vec<_>) =
            candidates.into_iter().partition(|w| w.cache().contains(&product.id));

        for worker in cached.iter().take(room) {
            if worker.start_checkout_loop(product.clone()).is_some() {
                report.with_cache += 1;
            }
        }

        let remaining = room - report.with_cache;
        for worker in uncached.iter().take(remaining) {
            if worker.start_checkout_loop(product.clone()).is_some() {
                report.without_cache += 1;
            }
        }

        report
    }

    // -------------------------------------------------------------------------
    // Notifications
    // -------------------------------------------------------------------------

    async fn owner_of(&self, worker: &Worker) -> Option<Owner> {
        match self.deps.store.find_owner(worker.owner()).await {
            Ok(owner) => owner,
            Err(e) => {
                warn!(account = %worker.key(), error = %e, "Owner lookup failed");
                None
            },
        }
    }

    async fn send(&self, notification: Notification) {
        if let Err(e) = self.deps.notifier.notify(&notification).await {
            error!(account = %notification.worker, error = %e, "Failed to send notification");
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Outcome Sink
// =============================================================================

#[async_trait]
impl OutcomeSink for WorkerPool {
    async fn subscriptions_changed(&self, worker: &Worker, subscriptions: &[ProductId]) {
        if let Err(e) = self.deps.store.update_subscriptions(worker.key(), subscriptions).await {
            error!(account = %worker.key(), error = %e, "Failed to persist subscriptions");
        }
    }

    async fn checkout_succeeded(&self, worker: &Worker, intent: &PurchaseIntent) {
        let owner = self.owner_of(worker).await;

        self.send(Notification {
            kind: NotificationKind::Success,
            worker: worker.key().clone(),
            owner: worker.owner(),
            owner_webhook: owner.and_then(|o| o.webhook_url),
            product: Some(intent.product.clone()),
            intent: Some(intent.clone()),
            message: format!("Checked out {}", intent.product_id()),
            removed: false,
            status: None,
            body: None,
        })
        .await;
    }

    async fn checkout_failed(&self, worker: &Worker, failure: &Failure) {
        let removed = failure.evicts();
        if removed {
            if let Err(e) = self.remove(worker.key(), true).await {
                error!(account = %worker.key(), error = %e, "Error removing account after fatal error");
            }
        }

        let owner_webhook = if failure.notifies_owner() {
            self.owner_of(worker).await.and_then(|o| o.webhook_url)
        } else {
            None
        };

        self.send(Notification {
            kind: NotificationKind::Error,
            worker: worker.key().clone(),
            owner: worker.owner(),
            owner_webhook,
            product: None,
            intent: None,
            message: failure.kind.to_string(),
            removed,
            status: failure.status,
            body: failure.body.clone(),
        })
        .await;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use dropfleet_engine::ErrorKind;
    use dropfleet_exec::{RecordingNotifier, ScriptedPurchaseApi, StubSessionProvider};
    use dropfleet_store::MemoryStore;

    struct Harness {
        pool: Arc<WorkerPool>,
        store: Arc<MemoryStore>,
        notifier: Arc<RecordingNotifier>,
    }

    fn create_pool() -> Harness {
        create_pool_with(PoolConfig::default())
    }

    fn create_pool_with(config: PoolConfig) -> Harness {
        let store = Arc::new(MemoryStore::new());
        store.insert_owner(Owner {
            id: 1,
            webhook_url: Some("https://hooks.example/1".to_string()),
            contact: None,
        });
        let notifier = Arc::new(RecordingNotifier::new());
        let pool = WorkerPool::new(
            PoolDeps {
                api: Arc::new(ScriptedPurchaseApi::new()),
                rotators: Arc::new(Rotators::default()),
                sessions: Arc::new(StubSessionProvider),
                store: store.clone(),
                notifier: notifier.clone(),
            },
            config,
        );
        Harness { pool, store, notifier }
    }

    fn record(email: &str) -> AccountRecord {
        AccountRecord {
            key: AccountKey::new(email, Marketplace::Us).unwrap(),
            owner: 1,
            license_key: "LIC".to_string(),
            subscriptions: vec![ProductId::new("X123456789").unwrap()],
            access_token: Some("Atna|t".to_string()),
            cookies: "c=1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_register_rejects_duplicate() {
        let h = create_pool();
        h.pool.register(record("a@x")).await.unwrap();

        let result = h.pool.register(record("a@x")).await;
        assert!(matches!(result, Err(DaemonError::DuplicateAccount(_))));
        assert_eq!(h.pool.len(), 1);
    }

    #[tokio::test]
    async fn test_register_acquires_session_without_token() {
        let h = create_pool();
        let mut no_token = record("a@x");
        no_token.access_token = None;
        h.pool.register(no_token).await.unwrap();

        let mut no_cookies = record("b@x");
        no_cookies.access_token = None;
        no_cookies.cookies = String::new();
        assert!(matches!(h.pool.register(no_cookies).await, Err(DaemonError::Exec(_))));
        assert_eq!(h.pool.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_cancels_and_deletes() {
        let h = create_pool();
        let rec = record("a@x");
        h.store.save(&rec).await.unwrap();
        let worker = h.pool.register(rec.clone()).await.unwrap();

        h.pool.remove(&rec.key, true).await.unwrap();

        assert!(worker.is_cancelled());
        assert!(!h.pool.exists(&rec.key));
        assert_eq!(h.store.account_count(), 0);
        assert!(matches!(
            h.pool.remove(&rec.key, true).await,
            Err(DaemonError::AccountNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_subscriptions_mirrors_to_store() {
        let h = create_pool();
        let rec = record("a@x");
        h.store.save(&rec).await.unwrap();
        h.pool.register(rec.clone()).await.unwrap();

        let list = vec![ProductId::new("B08FC6MR62").unwrap()];
        h.pool.update_subscriptions(&rec.key, list.clone()).await.unwrap();

        assert_eq!(h.pool.get(&rec.key).unwrap().subscriptions(), list);
        assert_eq!(h.store.account(&rec.key).unwrap().subscriptions, list);

        let ghost = AccountKey::new("ghost@x", Marketplace::Us).unwrap();
        assert!(matches!(
            h.pool.update_subscriptions(&ghost, vec![]).await,
            Err(DaemonError::UnknownAccount(_))
        ));
    }

    #[tokio::test]
    async fn test_update_owner_subscriptions_scopes_marketplace() {
        let h = create_pool();
        h.pool.register(record("a@x")).await.unwrap();
        let mut uk = record("a@x");
        uk.key = AccountKey::new("a@x", Marketplace::Uk).unwrap();
        h.pool.register(uk.clone()).await.unwrap();

        let updated = h.pool.update_owner_subscriptions(1, Marketplace::Us, vec![]);

        assert_eq!(updated, 1);
        assert_eq!(h.pool.get(&uk.key).unwrap().subscriptions().len(), 1);
        assert_eq!(h.pool.workers_for_owner(1).len(), 2);
    }

    #[tokio::test]
    async fn test_evicting_failure_removes_and_notifies_owner() {
        let h = create_pool();
        let rec = record("a@x");
        h.store.save(&rec).await.unwrap();
        let worker = h.pool.register(rec.clone()).await.unwrap();

        h.pool.checkout_failed(&worker, &Failure::local(ErrorKind::InvalidLicense)).await;

        assert!(!h.pool.exists(&rec.key));
        assert_eq!(h.store.account_count(), 0);

        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, NotificationKind::Error);
        assert!(sent[0].removed);
        assert_eq!(sent[0].owner_webhook.as_deref(), Some("https://hooks.example/1"));
        assert_eq!(sent[0].message, "Key Invalid");
    }

    #[tokio::test]
    async fn test_non_evicting_failure_keeps_worker_and_skips_owner() {
        let h = create_pool();
        let worker = h.pool.register(record("a@x")).await.unwrap();

        h.pool.checkout_failed(&worker, &Failure::local(ErrorKind::UnknownAcquireError)).await;

        assert_eq!(h.pool.len(), 1);
        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert!(!sent[0].removed);
        assert!(sent[0].owner_webhook.is_none());
    }

    #[tokio::test]
    async fn test_capacity_reached_starts_nothing() {
        let h = create_pool_with(PoolConfig { max_workers_per_product: 5, ..PoolConfig::default() });
        let product = Product {
            id: ProductId::new("X123456789").unwrap(),
            ..Product::test_product(Marketplace::Us)
        };
        for i in 0..7 {
            let worker = h.pool.register(record(&format!("w{}@x", i))).await.unwrap();
            if i < 5 {
                assert!(worker.try_claim(&product));
            }
        }

        let report = h.pool.on_stock_event(&product);
        assert_eq!(report.already_working, 5);
        assert_eq!(report.started(), 0);
        assert_eq!(h.pool.working_count(&product.id, Marketplace::Us), 5);
    }

    #[tokio::test]
    async fn test_event_dropped_while_dispatch_in_flight() {
        let h = create_pool();
        let worker = h.pool.register(record("a@x")).await.unwrap();
        let product = Product {
            id: ProductId::new("X123456789").unwrap(),
            ..Product::test_product(Marketplace::Us)
        };

        h.pool.dispatching.store(true, Ordering::SeqCst);
        let report = h.pool.on_stock_event(&product);

        assert!(report.dropped);
        assert_eq!(report.started(), 0);
        assert!(worker.is_idle());

        h.pool.dispatching.store(false, Ordering::SeqCst);
        let report = h.pool.on_stock_event(&product);

        assert!(!report.dropped);
        assert_eq!(report.started(), 1);
        assert!(worker.is_working_on(&product.id, Marketplace::Us));
        worker.cancel();
    }

    #[tokio::test]
    async fn test_running_by_product() {
        let h = create_pool();
        let worker = h.pool.register(record("a@x")).await.unwrap();
        let product = Product {
            id: ProductId::new("X123456789").unwrap(),
            ..Product::test_product(Marketplace::Us)
        };
        assert!(worker.try_claim(&product));

        let running = h.pool.running_by_product();
        assert_eq!(running.get("X123456789@US"), Some(&1));
    }
}
