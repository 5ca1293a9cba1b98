//! Purchase intent extraction from the initiate response body.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

use dropfleet_domain::{Product, PurchaseIntent};

/// Placeholder used for absent text fields.
pub const MISSING_TEXT: &str = "None";

const INTENT_ID: &str = "/entity/purchaseId";
const PRICE: &str = "/entity/lineItems/entity/lineItems/0/price/priceToPay/amount";
const OFFER_ID: &str = "/entity/lineItems/entity/lineItems/0/offerListingId";
const SELLER: &str =
    "/entity/lineItems/entity/lineItems/0/itemSeller/entity/displayStringForSeller/fragments/1/text";
const TOTAL: &str = "/entity/purchaseTotals/entity/purchaseTotal/amount/amount";
const DELIVERY: &str = "/entity/deliveryGroups/entity/deliveryGroups/0/lineItemGroups/0/scheduledDeliveryPromise/promiseString";

/// Intent fields read from a `201` initiate body, before it is bound to a product.
#[derive(Debug, Clone, PartialEq)]
pub struct IntentDraft {
    /// Purchase API intent identifier
    pub intent_id: String,
    /// Offer listing id (`"None"` when absent)
    pub offer_id: String,
    /// Price to pay (zero when absent)
    pub price: Decimal,
    /// Seller display text (`"None"` when absent)
    pub seller: String,
    /// Order total (zero when absent)
    pub total: Decimal,
    /// Delivery promise (`"None"` when absent)
    pub delivery_estimate: String,
}

impl IntentDraft {
    /// Read a draft from an initiate body.
    ///
    /// Returns `None` when the body carries no intent identifier.
    pub fn from_body(body: &Value) -> Option<Self> {
        let intent_id = body.pointer(INTENT_ID)?.as_str()?.to_string();

        Some(Self {
            intent_id,
            offer_id: text_at(body, OFFER_ID),
            price: amount_at(body, PRICE),
            seller: text_at(body, SELLER),
            total: amount_at(body, TOTAL),
            delivery_estimate: text_at(body, DELIVERY),
        })
    }

    /// Bind the draft to the product it was obtained for.
    pub fn into_intent(self, product: Product, created_at: DateTime<Utc>) -> PurchaseIntent {
        PurchaseIntent {
            product,
            intent_id: self.intent_id,
            offer_id: self.offer_id,
            price: self.price,
            seller: self.seller,
            total: self.total,
            delivery_estimate: self.delivery_estimate,
            created_at,
        }
    }
}

fn text_at(body: &Value, pointer: &str) -> String {
    body.pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or(MISSING_TEXT)
        .to_string()
}

/// Monetary values arrive as decimal strings; numbers are tolerated.
fn amount_at(body: &Value, pointer: &str) -> Decimal {
    match body.pointer(pointer) {
        Some(Value::String(s)) => Decimal::from_str(s.trim()).unwrap_or(Decimal::ZERO),
        Some(Value::Number(n)) => Decimal::from_str(&n.to_string()).unwrap_or(Decimal::ZERO),
        _ => Decimal::ZERO,
    }
}
