//! License authority REST client.
//!
//! `GET {base}/licenses/{key}` with a bearer API key. A `200` carries the
//! license record; any other status means the key is unknown.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;

use dropfleet_domain::Entitlement;
use dropfleet_exec::{ExecError, ExecResult, LicenseAuthority};

/// Default license API base URL
pub const DEFAULT_LICENSE_API_URL: &str = "https://api.whop.com/api/v1";

/// Request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Errors that can occur in the license REST client.
#[derive(Debug, Clone, Error)]
pub enum LicenseRestError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Request timed out
    #[error("Request timed out")]
    Timeout,
}

impl From<LicenseRestError> for ExecError {
    fn from(e: LicenseRestError) -> Self {
        ExecError::License(e.to_string())
    }
}

/// License record as returned by the authority (only the fields we read).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LicenseRecord {
    /// Free-form metadata; allowances may be strings or numbers
    #[serde(default)]
    pub metadata: LicenseMetadata,
}

/// Allowance metadata of a license.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LicenseMetadata {
    /// Tier A allowance
    #[serde(default)]
    pub max_cloud_accounts: Value,
    /// Extra Tier B allowance
    #[serde(default)]
    pub max_cloud_accounts_extra: Value,
}

impl LicenseRecord {
    /// Per-tier limits granted by this license.
    pub fn entitlement(&self) -> Entitlement {
        Entitlement::from_allowances(
            parse_allowance(&self.metadata.max_cloud_accounts),
            parse_allowance(&self.metadata.max_cloud_accounts_extra),
        )
    }
}

/// Leading-integer parse of an allowance value (`"3 seats"` → 3).
fn parse_allowance(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => {
            let digits: String = s.trim().chars().take_while(char::is_ascii_digit).collect();
            digits.parse().ok()
        },
        _ => None,
    }
}

/// REST client for the license authority.
pub struct LicenseRestClient {
    /// HTTP client
    client: Client,
    /// API base URL
    base_url: String,
    /// Bearer API key
    api_key: String,
}

impl LicenseRestClient {
    /// Create a new license client.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Fetch a license record; `None` when the authority does not answer 200.
    pub async fn fetch(&self, license_key: &str) -> Result<Option<LicenseRecord>, LicenseRestError> {
        let url = format!("{}/licenses/{}", self.base_url.trim_end_matches('/'), license_key);

        let response = timeout(
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
            self.client.get(&url).bearer_auth(&self.api_key).send(),
        )
        .await
        .map_err(|_| LicenseRestError::Timeout)?
        .map_err(|e| LicenseRestError::RequestFailed(e.to_string()))?;

        if response.status() != StatusCode::OK {
            debug!(status = response.status().as_u16(), "License not found");
            return Ok(None);
        }

        let body = response.text().await.map_err(|e| LicenseRestError::ParseError(e.to_string()))?;
        let record = serde_json::from_str(&body).map_err(|e| LicenseRestError::ParseError(e.to_string()))?;

        Ok(Some(record))
    }
}

#[async_trait]
impl LicenseAuthority for LicenseRestClient {
    async fn entitlement(&self, license_key: &str) -> ExecResult<Option<Entitlement>> {
        Ok(self.fetch(license_key).await?.map(|record| record.entitlement()))
    }
}
