//! In-memory store implementation
//!
//! Used for testing and development without an external registry.
//! Thread-safe using RwLock for concurrent access.

use crate::error::{StoreError, StoreResult};
use crate::repository::{AccountRecord, AccountRepository, Owner};
use async_trait::async_trait;
use dropfleet_domain::{AccountKey, OwnerId, ProductId};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// Seed file layout.
#[derive(Debug, Default, Deserialize)]
struct Seed {
    #[serde(default)]
    owners: Vec<Owner>,
    #[serde(default)]
    accounts: Vec<AccountRecord>,
}

/// In-memory account registry
pub struct MemoryStore {
    accounts: RwLock<HashMap<AccountKey, AccountRecord>>,
    owners: RwLock<HashMap<OwnerId, Owner>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            owners: RwLock::new(HashMap::new()),
        }
    }

    /// Build a store from a JSON document `{ "owners": [...], "accounts": [...] }`.
    ///
    /// # Errors
    /// `StoreError::Deserialization` on malformed JSON, `StoreError::Duplicate`
    /// when an account identity appears twice.
    pub fn from_json_str(json: &str) -> StoreResult<Self> {
        let seed: Seed = serde_json::from_str(json)?;
        let store = Self::new();

        for owner in seed.owners {
            store.insert_owner(owner);
        }
        {
            let mut accounts = store.accounts.write();
            for record in seed.accounts {
                if accounts.contains_key(&record.key) {
                    return Err(StoreError::duplicate("account", record.key.to_string()));
                }
                accounts.insert(record.key.clone(), record);
            }
        }

        Ok(store)
    }

    /// Build a store from a JSON seed file.
    pub fn from_json_file(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let store = Self::from_json_str(&json)?;

        info!(
            path = %path.display(),
            accounts = store.account_count(),
            owners = store.owners.read().len(),
            "Loaded account registry"
        );
        Ok(store)
    }

    /// Insert or replace an owner
    pub fn insert_owner(&self, owner: Owner) {
        self.owners.write().insert(owner.id, owner);
    }

    /// Get the number of accounts
    pub fn account_count(&self) -> usize {
        self.accounts.read().len()
    }

    /// Get a single account record
    pub fn account(&self, key: &AccountKey) -> Option<AccountRecord> {
        self.accounts.read().get(key).cloned()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountRepository for MemoryStore {
    async fn find_all(&self) -> StoreResult<Vec<AccountRecord>> {
        Ok(self.accounts.read().values().cloned().collect())
    }

    async fn save(&self, record: &AccountRecord) -> StoreResult<()> {
        self.accounts.write().insert(record.key.clone(), record.clone());
        Ok(())
    }

    async fn update_subscriptions(
        &self,
        key: &AccountKey,
        subscriptions: &[ProductId],
    ) -> StoreResult<()> {
        let mut accounts = self.accounts.write();
        let record = accounts
            .get_mut(key)
            .ok_or_else(|| StoreError::not_found("account", key.to_string()))?;
        record.subscriptions = subscriptions.to_vec();
        Ok(())
    }

    async fn delete(&self, key: &AccountKey) -> StoreResult<bool> {
        Ok(self.accounts.write().remove(key).is_some())
    }

    async fn find_owner(&self, id: OwnerId) -> StoreResult<Option<Owner>> {
        Ok(self.owners.read().get(&id).cloned())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use dropfleet_domain::Marketplace;

    const SEED: &str = r#"{
        "owners": [
            { "id": 7, "webhook_url": "https://hooks.example/7", "contact": "owner7" }
        ],
        "accounts": [
            {
                "email": "a@example.com",
                "marketplace": "US",
                "owner": 7,
                "license_key": "KEY-1",
                "subscriptions": ["B08FC6MR62"],
                "cookies": "session-id=1"
            },
            {
                "email": "a@example.com",
                "marketplace": "A1F83G8C2ARO7P",
                "owner": 7,
                "license_key": "KEY-1",
                "access_token": "Atna|x"
            }
        ]
    }"#;

    fn create_test_record(email: &str) -> AccountRecord {
        AccountRecord {
            key: AccountKey::new(email, Marketplace::Us).unwrap(),
            owner: 1,
            license_key: "KEY".to_string(),
            subscriptions: vec![ProductId::new("B08FC6MR62").unwrap()],
            access_token: None,
            cookies: "c=1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_seed_from_json() {
        let store = MemoryStore::from_json_str(SEED).unwrap();
        assert_eq!(store.account_count(), 2);

        let uk = AccountKey::new("a@example.com", Marketplace::Uk).unwrap();
        let record = store.account(&uk).unwrap();
        assert_eq!(record.access_token.as_deref(), Some("Atna|x"));
        assert!(record.subscriptions.is_empty());

        let owner = store.find_owner(7).await.unwrap().unwrap();
        assert_eq!(owner.webhook_url.as_deref(), Some("https://hooks.example/7"));
        assert!(store.find_owner(8).await.unwrap().is_none());
    }

    #[test]
    fn test_seed_rejects_duplicate_identity() {
        let json = r#"{ "accounts": [
            { "email": "a@x", "marketplace": "US", "owner": 1, "license_key": "K" },
            { "email": "a@x", "marketplace": "ATVPDKIKX0DER", "owner": 1, "license_key": "K" }
        ] }"#;

        let result = MemoryStore::from_json_str(json);
        assert!(matches!(result, Err(StoreError::Duplicate { .. })));
    }

    #[test]
    fn test_seed_rejects_invalid_product() {
        let json = r#"{ "accounts": [
            { "email": "a@x", "marketplace": "US", "owner": 1, "license_key": "K", "subscriptions": ["nope"] }
        ] }"#;

        assert!(MemoryStore::from_json_str(json).is_err());
    }

    #[test]
    fn test_missing_seed_file() {
        let result = MemoryStore::from_json_file("/nonexistent/accounts.json");
        assert!(matches!(result, Err(StoreError::Io(_))));
    }

    #[tokio::test]
    async fn test_save_and_find_all() {
        let store = MemoryStore::new();
        store.save(&create_test_record("a@x")).await.unwrap();
        store.save(&create_test_record("b@x")).await.unwrap();
        store.save(&create_test_record("a@x")).await.unwrap();

        assert_eq!(store.find_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_update_subscriptions() {
        let store = MemoryStore::new();
        let record = create_test_record("a@x");
        store.save(&record).await.unwrap();

        store.update_subscriptions(&record.key, &[]).await.unwrap();
        assert!(store.account(&record.key).unwrap().subscriptions.is_empty());
    }

    #[tokio::test]
    async fn test_update_subscriptions_unknown_account() {
        let store = MemoryStore::new();
        let key = AccountKey::new("ghost@x", Marketplace::Us).unwrap();

        let result = store.update_subscriptions(&key, &[]).await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryStore::new();
        let record = create_test_record("a@x");
        store.save(&record).await.unwrap();

        assert!(store.delete(&record.key).await.unwrap());
        assert!(!store.delete(&record.key).await.unwrap());
        assert_eq!(store.account_count(), 0);
    }

    #[test]
    fn test_record_debug_redacts_token() {
        let mut record = create_test_record("a@x");
        record.access_token = Some("Atna|secret".to_string());

        let debug = format!("{:?}", record);
        assert!(!debug.contains("secret"));
        assert!(!debug.contains("c=1"));
    }
}
