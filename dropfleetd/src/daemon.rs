//! Daemon: Main runtime orchestrator.
//!
//! The Daemon ties together all components:
//! - Worker Pool (registry, dispatcher, outcome sink)
//! - Health Verifier (periodic license/session probes)
//! - Event Bus (ingress → dispatcher)
//! - Ingress (stock monitor WebSocket)
//! - API Server (HTTP endpoints)
//!
//! # Lifecycle
//!
//! 1. Load configuration
//! 2. Initialize components
//! 3. Restore accounts from the registry
//! 4. Start API server, health verifier and ingress
//! 5. Main event loop (dispatch stock updates)
//! 6. Graceful shutdown on SIGINT or a shutdown event

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use dropfleet_connectors::{LicenseRestClient, MonitorClient, PurchaseRestClient};
use dropfleet_domain::{Marketplace, Session, TierPolicy};
use dropfleet_exec::{
    CheckoutConfig, ExecError, ExecResult, LicenseAuthority, Rotators, ScriptedPurchaseApi,
    SessionProvider, StaticLicenseAuthority, StubSessionProvider,
};
use dropfleet_store::MemoryStore;

use crate::api::{create_router, ApiState};
use crate::config::{load_egress, Config};
use crate::error::{DaemonError, DaemonResult};
use crate::event_bus::{DaemonEvent, EventBus, EventReceiver};
use crate::health::HealthVerifier;
use crate::ingress::spawn_ingress;
use crate::notifier::LogNotifier;
use crate::pool::{PoolConfig, PoolDeps, WorkerPool};

/// Event bus capacity.
const EVENT_BUS_CAPACITY: usize = 1000;

// =============================================================================
// Session provider
// =============================================================================

/// Session provider for deployments without cookie login. Accounts must be
/// provisioned with an access token.
struct TokenOnlySessions;

#[async_trait]
impl SessionProvider for TokenOnlySessions {
    async fn acquire(&self, _cookies: &str, marketplace: Marketplace) -> ExecResult<Session> {
        Err(ExecError::Session(format!(
            "Session acquisition is not configured for {}",
            marketplace
        )))
    }
}

// =============================================================================
// Daemon
// =============================================================================

/// The main Dropfleet daemon.
pub struct Daemon {
    /// Configuration
    config: Config,
    /// Worker pool
    pool: Arc<WorkerPool>,
    /// License authority used by the health verifier
    license: Arc<dyn LicenseAuthority>,
    /// Producer side of the event bus
    event_bus: EventBus,
    /// Consumer side of the event bus
    event_receiver: EventReceiver,
    /// Stock monitor; absent in stub mode
    monitor: Option<MonitorClient>,
    /// Stops background tasks
    shutdown_token: CancellationToken,
}

impl Daemon {
    /// Create a new daemon with stub components (for testing/development).
    pub fn new_stub(config: Config) -> Self {
        let deps = PoolDeps {
            api: Arc::new(ScriptedPurchaseApi::new()),
            rotators: Arc::new(Rotators::new(
                Vec::new(),
                Vec::new(),
                config.inventory.hosts.clone(),
            )),
            sessions: Arc::new(StubSessionProvider),
            store: Arc::new(MemoryStore::new()),
            notifier: Arc::new(LogNotifier),
        };

        Self::new(config, deps, Arc::new(StaticLicenseAuthority::new()), None)
    }

    /// Create a daemon wired to the real purchase API, license authority,
    /// stock monitor and the account file registry.
    pub fn from_config(config: Config) -> DaemonResult<Self> {
        let checkout = load_egress(config.inventory.checkout_proxies_file.as_deref())?;
        let auxiliary = load_egress(config.inventory.aux_proxies_file.as_deref())?;
        info!(
            checkout_proxies = checkout.len(),
            aux_proxies = auxiliary.len(),
            "Loaded egress inventories"
        );

        let store = match &config.inventory.accounts_file {
            Some(path) => MemoryStore::from_json_file(path)?,
            None => {
                warn!("No accounts file configured, starting with an empty registry");
                MemoryStore::new()
            },
        };

        let deps = PoolDeps {
            api: Arc::new(PurchaseRestClient::new(config.request_timeout())),
            rotators: Arc::new(Rotators::new(checkout, auxiliary, config.inventory.hosts.clone())),
            sessions: Arc::new(TokenOnlySessions),
            store: Arc::new(store),
            notifier: Arc::new(LogNotifier),
        };
        let license = Arc::new(LicenseRestClient::new(
            config.license.api_url.clone(),
            config.license.api_key.clone(),
        ));
        let monitor = MonitorClient::new(config.monitor.url.clone(), config.monitor.secret.clone());

        Ok(Self::new(config, deps, license, Some(monitor)))
    }

    /// Create a new daemon with provided components.
    pub fn new(
        config: Config,
        deps: PoolDeps,
        license: Arc<dyn LicenseAuthority>,
        monitor: Option<MonitorClient>,
    ) -> Self {
        let pool = WorkerPool::new(
            deps,
            PoolConfig {
                max_workers_per_product: config.checkout.max_workers_per_product,
                checkout: CheckoutConfig {
                    loop_deadline: config.checkout_deadline(),
                    ..CheckoutConfig::default()
                },
            },
        );
        let (event_bus, event_receiver) = EventBus::new(EVENT_BUS_CAPACITY);

        Self {
            config,
            pool,
            license,
            event_bus,
            event_receiver,
            monitor,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// The worker pool.
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// A producer handle on the daemon's event bus.
    pub fn event_bus(&self) -> EventBus {
        self.event_bus.clone()
    }

    /// Run the daemon.
    ///
    /// This method blocks until shutdown is requested (SIGINT or
    /// `DaemonEvent::Shutdown`).
    pub async fn run(mut self) -> DaemonResult<()> {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            environment = %self.config.environment,
            "Starting Dropfleet daemon"
        );

        // 1. Restore accounts
        self.pool.restore().await?;

        // 2. Start API server
        let api_addr = self.start_api_server().await?;
        info!(%api_addr, "API server started");

        // 3. Background tasks
        let health = self.start_health_verifier();
        let ingress = self.monitor.take().map(|monitor| {
            spawn_ingress(monitor, self.event_bus.clone(), self.shutdown_token.child_token())
        });

        // 4. Main event loop
        info!("Entering main event loop");
        loop {
            tokio::select! {
                event = self.event_receiver.recv() => {
                    let Some(event) = event else {
                        warn!("Event bus closed");
                        break;
                    };
                    match self.handle_event(event) {
                        Ok(()) => {},
                        Err(DaemonError::Shutdown) => break,
                        Err(e) => error!(error = %e, "Error handling event"),
                    }
                }

                // Handle shutdown signals
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        // 5. Graceful shutdown
        self.shutdown(health, ingress).await;

        Ok(())
    }

    /// Start the API server.
    async fn start_api_server(&self) -> DaemonResult<SocketAddr> {
        let state = Arc::new(ApiState::new(self.pool.clone(), self.config.environment));

        let router = create_router(state);
        let addr = format!("{}:{}", self.config.api.host, self.config.api.port);

        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            DaemonError::Config(format!("Failed to bind to {}: {}", addr, e))
        })?;

        let local_addr = listener.local_addr().map_err(|e| {
            DaemonError::Config(format!("Failed to get local address: {}", e))
        })?;

        let shutdown = self.shutdown_token.child_token();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
            {
                error!(error = %e, "API server error");
            }
        });

        Ok(local_addr)
    }

    fn start_health_verifier(&self) -> JoinHandle<()> {
        let verifier = Arc::new(HealthVerifier::new(
            self.pool.clone(),
            self.license.clone(),
            TierPolicy::new(self.config.inventory.tier_b_products.iter().cloned()),
            self.config.health_interval(),
        ));

        let token = verifier.shutdown_token();
        let parent = self.shutdown_token.clone();
        tokio::spawn(async move {
            parent.cancelled().await;
            token.cancel();
        });

        verifier.start()
    }

    /// Handle an event from the event bus.
    fn handle_event(&self, event: DaemonEvent) -> DaemonResult<()> {
        match event {
            DaemonEvent::StockUpdate(product) => {
                info!(
                    product = %product.id,
                    marketplace = %product.marketplace,
                    in_stock = product.in_stock,
                    "Received stock update"
                );
                let report = self.pool.on_stock_event(&product);
                if report.dropped {
                    warn!(product = %product.id, "Stock update dropped, dispatch in flight");
                }
            },

            DaemonEvent::Shutdown => {
                info!("Shutdown event received");
                return Err(DaemonError::Shutdown);
            },
        }

        Ok(())
    }

    /// Graceful shutdown.
    async fn shutdown(&self, health: JoinHandle<()>, ingress: Option<JoinHandle<()>>) {
        info!("Initiating graceful shutdown");

        self.shutdown_token.cancel();

        if let Err(e) = health.await {
            warn!(error = %e, "Health verifier task failed");
        }
        if let Some(ingress) = ingress {
            if let Err(e) = ingress.await {
                warn!(error = %e, "Ingress task failed");
            }
        }

        let workers = self.pool.snapshot();
        for worker in &workers {
            worker.cancel();
        }

        info!(accounts = workers.len(), "Shutdown complete");
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use dropfleet_domain::{AccountKey, Product};
    use dropfleet_store::AccountRecord;

    #[tokio::test]
    async fn test_daemon_stub_creation() {
        let daemon = Daemon::new_stub(Config::test());

        assert!(daemon.pool().is_empty());
        assert!(daemon.monitor.is_none());
    }

    #[tokio::test]
    async fn test_daemon_api_server_start() {
        let daemon = Daemon::new_stub(Config::test());

        let addr = daemon.start_api_server().await.unwrap();

        // Server should be running on a port
        assert!(addr.port() > 0);

        let client = reqwest::Client::new();
        let response = client
            .get(format!("http://{}/health", addr))
            .send()
            .await
            .unwrap();

        assert!(response.status().is_success());
    }

    #[tokio::test]
    async fn test_daemon_runs_until_shutdown_event() {
        let daemon = Daemon::new_stub(Config::test());
        let bus = daemon.event_bus();

        bus.send(DaemonEvent::StockUpdate(Product::test_product(Marketplace::Us)))
            .await
            .unwrap();
        bus.send(DaemonEvent::Shutdown).await.unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), daemon.run())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_handle_shutdown_event() {
        let daemon = Daemon::new_stub(Config::test());

        assert!(matches!(daemon.handle_event(DaemonEvent::Shutdown), Err(DaemonError::Shutdown)));
        assert!(daemon
            .handle_event(DaemonEvent::StockUpdate(Product::test_product(Marketplace::Uk)))
            .is_ok());
    }

    #[tokio::test]
    async fn test_token_only_sessions_reject_cookie_login() {
        let sessions = TokenOnlySessions;
        let err = sessions.acquire("session-id=1", Marketplace::Us).await.unwrap_err();

        assert!(matches!(err, ExecError::Session(_)));
    }

    #[tokio::test]
    async fn test_from_config_without_files() {
        let daemon = Daemon::from_config(Config::test()).unwrap();

        assert!(daemon.monitor.is_some());
        assert!(daemon.pool().is_empty());

        // Without cookie login, records must carry a token.
        let err = daemon
            .pool()
            .register(AccountRecord {
                key: AccountKey::new("a@x", Marketplace::Us).unwrap(),
                owner: 1,
                license_key: "LIC".to_string(),
                subscriptions: Vec::new(),
                access_token: None,
                cookies: "session-id=1".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DaemonError::Exec(ExecError::Session(_))));
    }
}
