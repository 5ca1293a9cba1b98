//! Dropfleet Storage Layer
//!
//! Provides persistence for account records and their owners.
//!
//! # Architecture
//!
//! - **Repository traits**: Define the storage interface (ports)
//! - **In-memory store**: Implementation seeded from a JSON file
//!
//! # Usage
//!
//! ```rust
//! use dropfleet_store::{AccountRepository, MemoryStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = MemoryStore::from_json_str(r#"{ "accounts": [] }"#).unwrap();
//!
//!     let accounts = store.find_all().await.unwrap();
//!     println!("Accounts: {}", accounts.len());
//! }
//! ```

#![warn(clippy::all)]

// Modules
mod error;
mod memory;
mod repository;

// Re-exports
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use repository::{AccountRecord, AccountRepository, Owner};
