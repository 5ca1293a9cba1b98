//! Dropfleet Execution Layer
//!
//! Workers, their checkout state machine and the ports they talk through.
//!
//! # Architecture
//!
//! ```text
//! Dispatch → Worker loop → PurchaseApi → Engine verdict → (IntentCache | OutcomeSink)
//! ```
//!
//! # Components
//!
//! - **Ports**: Traits for the purchase API, license authority, session
//!   acquisition, notification and outcome reporting
//! - **Rotators**: Cyclic egress point / hostname selection
//! - **Intent Cache**: Per-worker TTL cache of purchase intents
//! - **Worker**: Checkout state machine and loop
//! - **Stub**: Test implementations for development
//!
//! # Example
//!
//! ```rust,ignore
//! use dropfleet_exec::{Rotators, ScriptedPurchaseApi, Worker, WorkerProfile};
//! use std::sync::Arc;
//!
//! let api = Arc::new(ScriptedPurchaseApi::new());
//! let worker = Arc::new(Worker::new(profile, api, Arc::new(Rotators::default()), sink, config));
//!
//! // Claim the worker and race for the product
//! let handle = worker.start_checkout_loop(product);
//! ```

#![warn(clippy::all)]

pub mod cache;
pub mod error;
pub mod ports;
pub mod rotator;
pub mod stub;
pub mod worker;

// Re-exports for convenience
pub use cache::IntentCache;
pub use error::{ExecError, ExecResult};
pub use ports::{
    ApiResponse, LicenseAuthority, Notification, NotificationKind, Notifier, OutcomeSink,
    PurchaseApi, RequestContext, SessionProvider, TransportError,
};
pub use rotator::{Rotator, Rotators};
pub use stub::{
    RecordingNotifier, RecordingSink, ScriptedPurchaseApi, SinkEvent, StaticLicenseAuthority,
    StubSessionProvider,
};
pub use worker::{
    correlation_id, CheckoutConfig, TestCheckout, Worker, WorkerProfile, WorkerState,
    CHECKOUT_DEADLINE_SECS,
};
