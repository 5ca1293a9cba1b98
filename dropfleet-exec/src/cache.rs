//! Purchase intent cache.
//!
//! Each worker keeps the intents it obtained but could not finalize, so a
//! later attempt can skip the initiate call. Entries expire after
//! `INTENT_LIFESPAN_SECS`; expiry is checked lazily on lookup, never swept.
//!
//! # Flow
//!
//! 1. Finalize rejected → `put` the intent
//! 2. Next attempt → `get` returns it (or evicts it when stale)
//! 3. Finalize committed → `delete` it

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info};

use dropfleet_domain::{ProductId, PurchaseIntent};

/// Per-worker cache of purchase intents.
#[derive(Debug, Default)]
pub struct IntentCache {
    /// Worker label used in log lines
    owner: String,
    entries: Mutex<Vec<PurchaseIntent>>,
}

impl IntentCache {
    /// Create an empty cache labelled with its worker's identity.
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Live intent for a product, evicting stale ones.
    pub fn get(&self, product_id: &ProductId) -> Option<PurchaseIntent> {
        self.get_at(product_id, Utc::now())
    }

    /// Same as [`IntentCache::get`] with an explicit clock.
    pub fn get_at(&self, product_id: &ProductId, now: DateTime<Utc>) -> Option<PurchaseIntent> {
        let mut entries = self.entries.lock();

        entries.retain(|intent| {
            let stale = intent.product_id() == product_id && intent.is_stale_at(now);
            if stale {
                info!(
                    worker = %self.owner,
                    product = %product_id,
                    intent_id = %intent.intent_id,
                    "Removed stale intent"
                );
            }
            !stale
        });

        entries.iter().find(|intent| intent.product_id() == product_id).cloned()
    }

    /// Store an intent. No-op when the intent id is already cached.
    pub fn put(&self, intent: PurchaseIntent) {
        let mut entries = self.entries.lock();
        if entries.iter().any(|i| i.intent_id == intent.intent_id) {
            return;
        }

        info!(
            worker = %self.owner,
            product = %intent.product_id(),
            intent_id = %intent.intent_id,
            "Cached intent"
        );
        entries.push(intent);
    }

    /// Remove an intent by id.
    pub fn delete(&self, intent_id: &str) {
        self.entries.lock().retain(|i| i.intent_id != intent_id);
        debug!(worker = %self.owner, intent_id, "Deleted cached intent");
    }

    /// Whether a live intent exists for a product.
    pub fn contains(&self, product_id: &ProductId) -> bool {
        self.get(product_id).is_some()
    }

    /// Number of cached entries (stale ones included).
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
