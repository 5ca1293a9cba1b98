//! Value Objects for the Dropfleet Domain
//!
//! Immutable, validated domain primitives.
//! All value objects enforce invariants at construction time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Domain errors for value object validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// Product identifier must be 10 uppercase alphanumerics
    #[error("Invalid product id: {0}")]
    InvalidProductId(String),

    /// Marketplace is not one we can check out on
    #[error("Unknown marketplace: {0}")]
    UnknownMarketplace(String),

    /// Account email must be non-empty
    #[error("Invalid account: {0}")]
    InvalidAccount(String),

    /// Egress inventory line could not be parsed
    #[error("Invalid egress point: {0}")]
    InvalidEgressPoint(String),

    /// Monetary field could not be parsed
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
}

// =============================================================================
// Marketplace
// =============================================================================

/// A storefront the purchase API serves.
///
/// Serialized as the upstream marketplace identifier; parsing also accepts
/// the short country code (`US`, `UK`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum Marketplace {
    /// United States storefront
    Us,
    /// United Kingdom storefront
    Uk,
}

impl Marketplace {
    /// All supported marketplaces.
    pub const ALL: [Marketplace; 2] = [Marketplace::Us, Marketplace::Uk];

    /// Upstream marketplace identifier (used in purchase API paths).
    pub fn id(&self) -> &'static str {
        match self {
            Marketplace::Us => "ATVPDKIKX0DER",
            Marketplace::Uk => "A1F83G8C2ARO7P",
        }
    }

    /// Short country code.
    pub fn code(&self) -> &'static str {
        match self {
            Marketplace::Us => "US",
            Marketplace::Uk => "UK",
        }
    }

    /// Top-level storefront domain suffix.
    pub fn domain(&self) -> &'static str {
        match self {
            Marketplace::Us => "com",
            Marketplace::Uk => "co.uk",
        }
    }

    /// Settlement currency.
    pub fn currency(&self) -> &'static str {
        match self {
            Marketplace::Us => "USD",
            Marketplace::Uk => "GBP",
        }
    }
}

impl FromStr for Marketplace {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Marketplace::ALL
            .into_iter()
            .find(|m| m.id() == s || m.code().eq_ignore_ascii_case(s))
            .ok_or_else(|| DomainError::UnknownMarketplace(s.to_string()))
    }
}

impl TryFrom<String> for Marketplace {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Marketplace> for &'static str {
    fn from(value: Marketplace) -> Self {
        value.id()
    }
}

impl fmt::Display for Marketplace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// =============================================================================
// ProductId
// =============================================================================

/// Catalog identifier of a product.
///
/// # Invariants
/// - Exactly 10 characters, each `A-Z` or `0-9`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProductId(pub(crate) String);

impl ProductId {
    /// Create a validated product id
    ///
    /// # Errors
    /// Returns `DomainError::InvalidProductId` if the format is wrong
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        let valid = value.len() == 10
            && value.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit());
        if !valid {
            return Err(DomainError::InvalidProductId(value));
        }
        Ok(Self(value))
    }

    /// Borrow the raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ProductId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ProductId> for String {
    fn from(value: ProductId) -> Self {
        value.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// AccountKey
// =============================================================================

/// Unique identifier for an owner (the user an account belongs to)
pub type OwnerId = i64;

/// Identity pair of a worker: one account on one marketplace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountKey {
    /// Account email
    pub email: String,
    /// Marketplace the account checks out on
    pub marketplace: Marketplace,
}

impl AccountKey {
    /// Create a new account key
    ///
    /// # Errors
    /// Returns `DomainError::InvalidAccount` if the email is blank
    pub fn new(email: impl Into<String>, marketplace: Marketplace) -> Result<Self, DomainError> {
        let email = email.into();
        if email.trim().is_empty() {
            return Err(DomainError::InvalidAccount("email must be non-empty".to_string()));
        }
        Ok(Self { email, marketplace })
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.email, self.marketplace)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marketplace_parses_id_and_code() {
        assert_eq!("ATVPDKIKX0DER".parse::<Marketplace>().unwrap(), Marketplace::Us);
        assert_eq!("uk".parse::<Marketplace>().unwrap(), Marketplace::Uk);
        assert!("DE".parse::<Marketplace>().is_err());
    }

    #[test]
    fn test_marketplace_serializes_as_upstream_id() {
        let json = serde_json::to_string(&Marketplace::Uk).unwrap();
        assert_eq!(json, "\"A1F83G8C2ARO7P\"");

        let parsed: Marketplace = serde_json::from_str("\"US\"").unwrap();
        assert_eq!(parsed, Marketplace::Us);
    }

    #[test]
    fn test_product_id_validation() {
        assert!(ProductId::new("X123456789").is_ok());
        assert!(ProductId::new("B08FC6MR62").is_ok());
        assert!(ProductId::new("b08fc6mr62").is_err());
        assert!(ProductId::new("B08FC6MR6").is_err());
        assert!(ProductId::new("B08FC6MR62X").is_err());
        assert!(ProductId::new("B08FC6-R62").is_err());
    }

    #[test]
    fn test_product_id_deserialize_rejects_bad_format() {
        assert!(serde_json::from_str::<ProductId>("\"short\"").is_err());
    }

    #[test]
    fn test_account_key_display() {
        let key = AccountKey::new("a@b.c", Marketplace::Us).unwrap();
        assert_eq!(key.to_string(), "a@b.c@US");
        assert!(AccountKey::new("  ", Marketplace::Us).is_err());
    }
}
