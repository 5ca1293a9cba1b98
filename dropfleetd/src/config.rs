//! Daemon configuration.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::error::{DaemonError, DaemonResult};
use dropfleet_connectors::DEFAULT_LICENSE_API_URL;
use dropfleet_domain::{EgressPoint, Marketplace, ProductId, DEFAULT_TIER_B_PRODUCTS};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

// =============================================================================
// Configuration
// =============================================================================

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// API server configuration
    pub api: ApiConfig,

    /// Stock monitor connection
    pub monitor: MonitorConfig,

    /// License authority connection
    pub license: LicenseConfig,

    /// Dispatch and checkout limits
    pub checkout: CheckoutSettings,

    /// Health verifier configuration
    pub health: HealthConfig,

    /// Egress, hostname and account inventories
    pub inventory: InventoryConfig,

    /// Environment (test, development, production)
    pub environment: Environment,
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
}

/// Stock monitor configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// WebSocket URL
    pub url: String,
    /// Shared secret sent on connect
    pub secret: String,
}

/// License authority configuration.
#[derive(Debug, Clone)]
pub struct LicenseConfig {
    /// API base URL
    pub api_url: String,
    /// Bearer API key
    pub api_key: String,
}

/// Dispatch and checkout limits.
#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    /// Concurrent workers allowed on one product
    pub max_workers_per_product: usize,
    /// Checkout loop deadline (seconds)
    pub deadline_secs: u64,
    /// Outbound request timeout (seconds)
    pub request_timeout_secs: u64,
}

/// Health verifier configuration.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Seconds between two worker probes
    pub interval_secs: u64,
}

/// Inventories loaded at startup.
#[derive(Debug, Clone, Default)]
pub struct InventoryConfig {
    /// Checkout proxy list (`host:port:user:pass` per line); direct when unset
    pub checkout_proxies_file: Option<PathBuf>,
    /// Auxiliary (health probe) proxy list
    pub aux_proxies_file: Option<PathBuf>,
    /// Purchase API hostnames per marketplace
    pub hosts: HashMap<Marketplace, Vec<String>>,
    /// Products whose subscribers count against the Tier B allowance
    pub tier_b_products: Vec<ProductId>,
    /// JSON account registry seed
    pub accounts_file: Option<PathBuf>,
}

/// Environment type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Test environment (uses stubs)
    Test,
    /// Development environment
    Development,
    /// Production environment
    Production,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> DaemonResult<Self> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        let environment = Self::load_environment()?;
        let api = Self::load_api_config()?;
        let checkout = Self::load_checkout_settings()?;
        let inventory = Self::load_inventory_config()?;

        Ok(Self {
            api,
            monitor: MonitorConfig {
                url: env::var("DROPFLEET_MONITOR_URL")
                    .unwrap_or_else(|_| MonitorConfig::default().url),
                secret: env::var("DROPFLEET_MONITOR_SECRET").unwrap_or_default(),
            },
            license: LicenseConfig {
                api_url: env::var("DROPFLEET_LICENSE_API_URL")
                    .unwrap_or_else(|_| DEFAULT_LICENSE_API_URL.to_string()),
                api_key: env::var("DROPFLEET_LICENSE_API_KEY").unwrap_or_default(),
            },
            checkout,
            health: HealthConfig {
                interval_secs: Self::load_u64_env("DROPFLEET_HEALTH_INTERVAL_SECS", 3)?,
            },
            inventory,
            environment,
        })
    }

    /// Create test configuration.
    pub fn test() -> Self {
        Self {
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
            },
            monitor: MonitorConfig {
                url: "ws://127.0.0.1:1/stock".to_string(),
                secret: "test-secret".to_string(),
            },
            license: LicenseConfig {
                api_url: "http://127.0.0.1:1".to_string(),
                api_key: String::new(),
            },
            checkout: CheckoutSettings {
                max_workers_per_product: 5,
                deadline_secs: 1,
                request_timeout_secs: 1,
            },
            health: HealthConfig { interval_secs: 1 },
            inventory: InventoryConfig {
                hosts: Marketplace::ALL
                    .into_iter()
                    .map(|m| (m, vec![format!("checkout.{}.test", m.code().to_lowercase())]))
                    .collect(),
                tier_b_products: default_tier_b_products(),
                ..InventoryConfig::default()
            },
            environment: Environment::Test,
        }
    }

    /// Checkout loop deadline.
    pub fn checkout_deadline(&self) -> Duration {
        Duration::from_secs(self.checkout.deadline_secs)
    }

    /// Outbound request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.checkout.request_timeout_secs)
    }

    /// Interval between health probes.
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health.interval_secs)
    }

    fn load_environment() -> DaemonResult<Environment> {
        let env_str = env::var("DROPFLEET_ENV").unwrap_or_else(|_| "development".to_string());

        match env_str.to_lowercase().as_str() {
            "test" => Ok(Environment::Test),
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(DaemonError::Config(format!(
                "Invalid DROPFLEET_ENV: {}. Expected: test, development, production",
                other
            ))),
        }
    }

    fn load_api_config() -> DaemonResult<ApiConfig> {
        let host = env::var("DROPFLEET_API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port_str = env::var("DROPFLEET_API_PORT").unwrap_or_else(|_| "8080".to_string());

        let port = port_str.parse::<u16>().map_err(|_| {
            DaemonError::Config(format!("Invalid DROPFLEET_API_PORT: {}", port_str))
        })?;

        Ok(ApiConfig { host, port })
    }

    fn load_checkout_settings() -> DaemonResult<CheckoutSettings> {
        let max_workers = Self::load_u64_env("DROPFLEET_MAX_WORKERS_PER_PRODUCT", 600)?;

        Ok(CheckoutSettings {
            max_workers_per_product: usize::try_from(max_workers).map_err(|_| {
                DaemonError::Config(format!(
                    "Invalid DROPFLEET_MAX_WORKERS_PER_PRODUCT value: {}",
                    max_workers
                ))
            })?,
            deadline_secs: Self::load_u64_env("DROPFLEET_CHECKOUT_DEADLINE_SECS", 60)?,
            request_timeout_secs: Self::load_u64_env("DROPFLEET_REQUEST_TIMEOUT_SECS", 10)?,
        })
    }

    fn load_inventory_config() -> DaemonResult<InventoryConfig> {
        let mut hosts = HashMap::new();
        for marketplace in Marketplace::ALL {
            let key = format!("DROPFLEET_HOSTS_{}", marketplace.code());
            let list = parse_list(&env::var(&key).unwrap_or_default());
            if list.is_empty() {
                warn!(%marketplace, variable = %key, "No purchase hostnames configured");
            }
            hosts.insert(marketplace, list);
        }

        let tier_b_products = match env::var("DROPFLEET_TIER_B_PRODUCTS") {
            Ok(val) => parse_list(&val)
                .into_iter()
                .map(ProductId::new)
                .collect::<Result<Vec<_>, _>>()?,
            Err(_) => default_tier_b_products(),
        };

        Ok(InventoryConfig {
            checkout_proxies_file: env::var("DROPFLEET_CHECKOUT_PROXIES_FILE").ok().map(PathBuf::from),
            aux_proxies_file: env::var("DROPFLEET_AUX_PROXIES_FILE").ok().map(PathBuf::from),
            hosts,
            tier_b_products,
            accounts_file: env::var("DROPFLEET_ACCOUNTS_FILE").ok().map(PathBuf::from),
        })
    }

    fn load_u64_env(key: &str, default: u64) -> DaemonResult<u64> {
        match env::var(key) {
            Ok(val) => val
                .trim()
                .parse::<u64>()
                .map_err(|_| DaemonError::Config(format!("Invalid {} value: {}", key, val))),
            Err(_) => Ok(default),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            monitor: MonitorConfig::default(),
            license: LicenseConfig {
                api_url: DEFAULT_LICENSE_API_URL.to_string(),
                api_key: String::new(),
            },
            checkout: CheckoutSettings {
                max_workers_per_product: 600,
                deadline_secs: 60,
                request_timeout_secs: 10,
            },
            health: HealthConfig { interval_secs: 3 },
            inventory: InventoryConfig {
                tier_b_products: default_tier_b_products(),
                ..InventoryConfig::default()
            },
            environment: Environment::Development,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            url: "wss://monitor.invalid/stock".to_string(),
            secret: String::new(),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Test => write!(f, "test"),
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

// =============================================================================
// Inventory helpers
// =============================================================================

/// Load an egress inventory; `None` means direct connections.
pub fn load_egress(path: Option<&Path>) -> DaemonResult<Vec<EgressPoint>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };

    let text = std::fs::read_to_string(path).map_err(|e| {
        DaemonError::Config(format!("Failed to read proxy list {}: {}", path.display(), e))
    })?;
    let points = EgressPoint::parse_list("http", &text);

    if points.is_empty() {
        warn!(path = %path.display(), "Proxy list has no usable entries");
    }
    Ok(points)
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn default_tier_b_products() -> Vec<ProductId> {
    DEFAULT_TIER_B_PRODUCTS.iter().filter_map(|id| ProductId::new(*id).ok()).collect()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.api.port, 8080);
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.checkout.max_workers_per_product, 600);
        assert_eq!(config.checkout_deadline(), Duration::from_secs(60));
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.health_interval(), Duration::from_secs(3));
        assert_eq!(config.license.api_url, "https://api.whop.com/api/v1");
    }

    #[test]
    fn test_test_config() {
        let config = Config::test();

        assert_eq!(config.api.port, 0);
        assert_eq!(config.environment, Environment::Test);
        assert_eq!(config.inventory.hosts[&Marketplace::Us], vec!["checkout.us.test"]);
    }

    #[test]
    fn test_default_tier_b_products_are_valid() {
        assert_eq!(default_tier_b_products().len(), DEFAULT_TIER_B_PRODUCTS.len());
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list(" a.example, b.example ,,"), vec!["a.example", "b.example"]);
        assert!(parse_list("").is_empty());
    }

    #[test]
    fn test_load_egress_unset_is_direct() {
        assert!(load_egress(None).unwrap().is_empty());
    }

    #[test]
    fn test_load_egress_missing_file() {
        let result = load_egress(Some(Path::new("/nonexistent/proxies.txt")));
        assert!(matches!(result, Err(DaemonError::Config(_))));
    }

    #[test]
    fn test_environment_display() {
        assert_eq!(Environment::Test.to_string(), "test");
        assert_eq!(Environment::Development.to_string(), "development");
        assert_eq!(Environment::Production.to_string(), "production");
    }
}
