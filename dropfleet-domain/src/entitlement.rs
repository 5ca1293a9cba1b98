//! License entitlement and subscription tiers.
//!
//! A worker whose subscriptions all fall inside the restricted allow-list is
//! Tier B; anything else is Tier A. The license authority caps how many
//! workers of each tier one owner may run.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::value_objects::ProductId;

/// Tier B limits are the purchased extra allowance plus this base.
pub const TIER_B_BASE_ALLOWANCE: u32 = 10;

/// Products that qualify a worker for Tier B when used exclusively.
pub const DEFAULT_TIER_B_PRODUCTS: &[&str] = &[
    "B08FC6MR62",
    "B08FC5L3RG",
    "B09DP86ZDH",
    "B09DFHJTF5",
    "B09DFCB66S",
    "B08H75RTZ8",
    "B0981BNN9M",
    "B0981CTCKS",
    "B09V1T5G3M",
    "B09V1QWJLB",
    "B09V1S84TK",
    "B09V1T7W2G",
    "B09SZJF44D",
    "B09V1RFGYD",
    "B0B16656Z2",
    "B0B167VTXQ",
    "B08H97NYGP",
    "B08H95Y452",
];

/// Capacity classification of a worker's subscription set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// Unrestricted subscriptions
    A,
    /// Subscriptions restricted to the allow-list
    B,
}

/// Decides the tier of a subscription list.
#[derive(Debug, Clone)]
pub struct TierPolicy {
    allow_list: HashSet<ProductId>,
}

impl TierPolicy {
    /// Create a policy over an explicit allow-list.
    pub fn new(allow_list: impl IntoIterator<Item = ProductId>) -> Self {
        Self {
            allow_list: allow_list.into_iter().collect(),
        }
    }

    /// Classify a subscription list.
    ///
    /// An empty list is vacuously Tier B.
    pub fn tier_of(&self, subscriptions: &[ProductId]) -> Tier {
        if subscriptions.iter().all(|p| self.allow_list.contains(p)) {
            Tier::B
        } else {
            Tier::A
        }
    }
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_TIER_B_PRODUCTS
                .iter()
                .filter_map(|id| ProductId::new(*id).ok()),
        )
    }
}

/// Per-tier worker limits granted by a license.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
    /// Maximum Tier A workers
    pub tier_a_limit: u32,
    /// Maximum Tier B workers
    pub tier_b_limit: u32,
}

impl Entitlement {
    /// Build limits from the authority's raw allowances.
    ///
    /// A missing or zero Tier A allowance grants one worker; the Tier B
    /// allowance is added to `TIER_B_BASE_ALLOWANCE`.
    pub fn from_allowances(tier_a: Option<u32>, tier_b_extra: Option<u32>) -> Self {
        Self {
            tier_a_limit: tier_a.filter(|n| *n > 0).unwrap_or(1),
            tier_b_limit: tier_b_extra.unwrap_or(0).saturating_add(TIER_B_BASE_ALLOWANCE),
        }
    }

    /// Limit for a tier.
    pub fn limit(&self, tier: Tier) -> u32 {
        match tier {
            Tier::A => self.tier_a_limit,
            Tier::B => self.tier_b_limit,
        }
    }

    /// Whether `count` same-tier workers exceed this entitlement.
    pub fn is_exceeded(&self, tier: Tier, count: usize) -> bool {
        count > self.limit(tier) as usize
    }
}
