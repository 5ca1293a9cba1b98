//! Dropfleet Daemon
//!
//! Runs the checkout fleet: stock ingress, dispatcher, health verifier and
//! the HTTP status API.
//!
//! # Usage
//!
//! ```bash
//! # Start with default configuration
//! cargo run -p dropfleetd
//!
//! # Start with custom environment
//! DROPFLEET_ENV=production DROPFLEET_ACCOUNTS_FILE=accounts.json cargo run -p dropfleetd
//! ```
//!
//! # Environment Variables
//!
//! - `DROPFLEET_ENV`: Environment (test, development, production)
//! - `DROPFLEET_API_HOST` / `DROPFLEET_API_PORT`: API bind (default: 0.0.0.0:8080)
//! - `DROPFLEET_MONITOR_URL` / `DROPFLEET_MONITOR_SECRET`: Stock monitor socket
//! - `DROPFLEET_LICENSE_API_URL` / `DROPFLEET_LICENSE_API_KEY`: License authority
//! - `DROPFLEET_HOSTS_US` / `DROPFLEET_HOSTS_UK`: Purchase hostnames
//! - `DROPFLEET_ACCOUNTS_FILE`: Account registry seed
//!
//! In the `test` environment the daemon runs against stub collaborators.

use dropfleetd::{Config, Daemon, Environment};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("dropfleetd=info".parse()?))
        .init();

    // Load configuration
    let config = Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        api_host = %config.api.host,
        api_port = config.api.port,
        "Dropfleet Daemon"
    );

    // Create and run daemon
    let daemon = match config.environment {
        Environment::Test => Daemon::new_stub(config),
        _ => Daemon::from_config(config)?,
    };
    daemon.run().await?;

    Ok(())
}
