//! Repository trait definitions (Ports)
//!
//! The account registry the pool mirrors its membership into.
//! Implementations can be a key-value store, in-memory, or mock for testing.

use crate::error::StoreResult;
use async_trait::async_trait;
use dropfleet_domain::{AccountKey, OwnerId, ProductId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Persisted account record, keyed by its identity pair.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    /// Identity pair (email, marketplace)
    #[serde(flatten)]
    pub key: AccountKey,
    /// Owner the account belongs to
    pub owner: OwnerId,
    /// License key the owner registered with
    pub license_key: String,
    /// Subscribed product ids
    #[serde(default)]
    pub subscriptions: Vec<ProductId>,
    /// Bearer token, when already provisioned
    #[serde(default)]
    pub access_token: Option<String>,
    /// Website cookie string the session is derived from
    #[serde(default)]
    pub cookies: String,
}

impl fmt::Debug for AccountRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountRecord")
            .field("key", &self.key)
            .field("owner", &self.owner)
            .field("subscriptions", &self.subscriptions)
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Owner (user) of one or more accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    /// Owner id
    pub id: OwnerId,
    /// Owner's notification webhook
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Contact handle used to mention the owner
    #[serde(default)]
    pub contact: Option<String>,
}

/// Repository for account records and their owners
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Load every account record
    async fn find_all(&self) -> StoreResult<Vec<AccountRecord>>;

    /// Save an account record (insert or update)
    async fn save(&self, record: &AccountRecord) -> StoreResult<()>;

    /// Replace an account's subscriptions
    ///
    /// # Errors
    /// `StoreError::NotFound` if the account is unknown
    async fn update_subscriptions(
        &self,
        key: &AccountKey,
        subscriptions: &[ProductId],
    ) -> StoreResult<()>;

    /// Delete an account record. Returns whether a record was removed.
    async fn delete(&self, key: &AccountKey) -> StoreResult<bool>;

    /// Find an owner by id
    async fn find_owner(&self, id: OwnerId) -> StoreResult<Option<Owner>>;
}
