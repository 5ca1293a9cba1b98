//! Dropfleet Connectors
//!
//! Adapters for the purchase API, license authority (REST) and the stock
//! monitor (WebSocket). Normalizes upstream types to domain types.

#![warn(clippy::all)]

// Public modules
pub mod license_rest;
pub mod monitor_ws;
pub mod purchase_rest;

// Re-exports
pub use license_rest::{LicenseRecord, LicenseRestClient, LicenseRestError, DEFAULT_LICENSE_API_URL};
pub use monitor_ws::{decode_frame, MonitorClient, MonitorFrame, MonitorProduct, MonitorWsError};
pub use purchase_rest::{
    finalize_url, initiate_body, initiate_url, PurchaseRestClient, PurchaseRestError,
    REQUEST_TIMEOUT_SECS,
};
