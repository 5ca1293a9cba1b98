//! Dropfleet Daemon Library
//!
//! Runtime orchestrator for the Dropfleet checkout fleet.
//!
//! # Architecture
//!
//! ```text
//! Stock Monitor (WS) → Ingress → Event Bus → Worker Pool → Workers → Purchase API
//!                                                 ↑
//!                                          Health Verifier → License Authority
//! ```
//!
//! # Components
//!
//! - **Daemon**: Main runtime orchestrator
//! - **Worker Pool**: Account registry, stock dispatcher and outcome sink
//! - **Health Verifier**: Round-robin license and session probes
//! - **Event Bus**: Internal communication (ingress → dispatcher)
//! - **API**: HTTP health and status endpoints
//! - **Config**: Environment-based configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use dropfleetd::{Config, Daemon};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("Failed to load config");
//!     let daemon = Daemon::from_config(config).expect("Failed to wire daemon");
//!     daemon.run().await.expect("Daemon error");
//! }
//! ```

#![warn(clippy::all)]

pub mod api;
pub mod config;
pub mod daemon;
pub mod error;
pub mod event_bus;
pub mod health;
pub mod ingress;
pub mod notifier;
pub mod pool;

// Re-exports for convenience
pub use config::{
    ApiConfig, CheckoutSettings, Config, Environment, HealthConfig, InventoryConfig,
    LicenseConfig, MonitorConfig,
};
pub use daemon::Daemon;
pub use error::{DaemonError, DaemonResult};
pub use event_bus::{DaemonEvent, EventBus, EventReceiver};
pub use health::{HealthOutcome, HealthVerifier};
pub use ingress::{forward_products, spawn_ingress};
pub use notifier::LogNotifier;
pub use pool::{DispatchReport, PoolConfig, PoolDeps, WorkerPool, DEFAULT_MAX_WORKERS_PER_PRODUCT};
