//! Domain Entities for Dropfleet
//!
//! Products announced by the stock monitor and the purchase intents
//! workers obtain for them.

use crate::value_objects::{Marketplace, ProductId};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Lifespan of a cached purchase intent (12 hours).
pub const INTENT_LIFESPAN_SECS: i64 = 12 * 60 * 60;

// =============================================================================
// Product
// =============================================================================

/// A product that became available for purchase.
///
/// Immutable once received from the stock monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Catalog identifier
    pub id: ProductId,
    /// Marketplace the availability applies to
    pub marketplace: Marketplace,
    /// Availability flag reported by the monitor
    pub in_stock: bool,
    /// When the monitor discovered the availability
    pub discovered_at: DateTime<Utc>,
    /// Marketplace-specific purchase parameters
    pub params: PurchaseParams,
}

/// Marketplace-specific parameters needed to initiate a purchase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseParams {
    /// Offer reference passed to the initiate call
    pub offer: String,
    /// Settlement currency
    pub currency: String,
    /// Listed price
    pub price: Decimal,
    /// Human readable product title
    pub title: String,
    /// Seller display name
    pub seller: String,
}

impl Product {
    /// Create a new product record.
    pub fn new(
        id: ProductId,
        marketplace: Marketplace,
        discovered_at: DateTime<Utc>,
        params: PurchaseParams,
    ) -> Self {
        Self {
            id,
            marketplace,
            in_stock: true,
            discovered_at,
            params,
        }
    }

    /// Fixed low-risk product used to probe a worker's ability to check out.
    pub fn test_product(marketplace: Marketplace) -> Self {
        let (id, title, price, offer) = match marketplace {
            Marketplace::Us => (
                "B01C3LW5JC",
                "Carhartt Men's Knit Cuffed Beanie",
                Decimal::new(1699, 2),
                "Aweg8kHVQz3F9Zo%2FvQprIWf7YDM6Ohrgqa7pJ7G9vmjCKrx3Y3V4tvLiVgSzvz5cBOC51koNq5IvvVM0d6mFpRRiRyCn4y%2Fsw3c4SHVHgz6RT0z04L6L8TWqpe3zZ5m4BXmvkP%2BktCfHnMIwUvn0%2Bw%3D%3D",
            ),
            Marketplace::Uk => (
                "B07PJV3JPR",
                "Echo Dot (3rd Gen) - Charcoal Fabric",
                Decimal::new(3999, 2),
                "ff9%2BNp%2FnHDt%2FfXBWsyly0O3K9Vh6K%2B3EDAsX12MmajTWz%2BJHE6ghX4a3CcT%2FWw6K9xZLlXVK2CsI2wOIVHXsuCTfKner0mF7DGo4GHKmyFXG%2FdLqA%2FPYJ32eVVTZbDqI",
            ),
        };

        Self {
            id: ProductId(id.to_string()),
            marketplace,
            in_stock: true,
            discovered_at: Utc.timestamp_millis_opt(1_619_758_696_478).single().unwrap_or_default(),
            params: PurchaseParams {
                offer: offer.to_string(),
                currency: marketplace.currency().to_string(),
                price,
                title: title.to_string(),
                seller: "Amazon".to_string(),
            },
        }
    }
}

// =============================================================================
// Purchase Intent
// =============================================================================

/// A reservation returned by the initiate step, committed by the finalize step.
///
/// # Invariants
/// - At most one live intent per (worker, product) pair
/// - Stale after `INTENT_LIFESPAN_SECS`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseIntent {
    /// The product this intent reserves
    pub product: Product,
    /// Purchase API intent identifier
    pub intent_id: String,
    /// Offer listing the reservation was made against
    pub offer_id: String,
    /// Item price to pay
    pub price: Decimal,
    /// Seller display name
    pub seller: String,
    /// Order total
    pub total: Decimal,
    /// Delivery promise text
    pub delivery_estimate: String,
    /// When the intent was obtained
    pub created_at: DateTime<Utc>,
}

impl PurchaseIntent {
    /// Product identifier this intent belongs to.
    pub fn product_id(&self) -> &ProductId {
        &self.product.id
    }

    /// Whether the intent has outlived its lifespan at `now`.
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.created_at) > Duration::seconds(INTENT_LIFESPAN_SECS)
    }
}

// =============================================================================
// Tests
// =============================================================================
