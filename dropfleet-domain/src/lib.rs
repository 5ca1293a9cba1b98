//! Dropfleet Domain Layer
//!
//! Pure domain logic with zero I/O dependencies.
//! Contains products, purchase intents, account identities and license tiers.

#![warn(missing_docs)]
#![warn(clippy::all)]

// Public modules
pub mod egress;
pub mod entities;
pub mod entitlement;
pub mod session;
pub mod value_objects;

// Re-export commonly used types
pub use egress::EgressPoint;
pub use entities::{Product, PurchaseIntent, PurchaseParams, INTENT_LIFESPAN_SECS};
pub use entitlement::{Entitlement, Tier, TierPolicy, DEFAULT_TIER_B_PRODUCTS, TIER_B_BASE_ALLOWANCE};
pub use session::Session;
pub use value_objects::{AccountKey, DomainError, Marketplace, OwnerId, ProductId};
