//! Purchase API REST Client
//!
//! Provides the two calls of the checkout state machine:
//! - Initiate: obtain a purchase intent for one item
//! - Finalize: sign a purchase intent
//!
//! # Transport
//!
//! Every request routes through the egress point in its context and carries
//! a fresh correlation id. Responses of any status are returned as-is; only
//! failures to obtain a response become `TransportError`s.

use std::collections::HashMap;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, Proxy, RequestBuilder};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;

use dropfleet_domain::{EgressPoint, Marketplace, Product};
use dropfleet_exec::{ApiResponse, PurchaseApi, RequestContext, TransportError};

// =============================================================================
// Constants
// =============================================================================

/// Default request timeout in seconds
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// User agent of the set-top-box client the API expects
const USER_AGENT: &str =
    "AMZN(SetTopBox/Amazon Fire TV Mantis/AKPGW064GI9HE,Android/7.1.2,ShopTV3P/release/2.0)";

const REQUEST_ID_HEADER: &str = "x-amzn-requestid";
const ACCESS_TOKEN_HEADER: &str = "x-amz-access-token";
const PURCHASE_ID_HEADER: &str = "purchase-id";
const UPSTREAM_RID_HEADER: &str = "x-amz-rid";

// =============================================================================
// Errors
// =============================================================================

/// Errors that can occur building the REST client.
#[derive(Debug, Clone, Error)]
pub enum PurchaseRestError {
    /// Egress point could not be turned into a proxy
    #[error("Invalid proxy {0}: {1}")]
    InvalidProxy(String, String),

    /// HTTP client could not be built
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),
}

impl From<PurchaseRestError> for TransportError {
    fn from(e: PurchaseRestError) -> Self {
        TransportError::Other(e.to_string())
    }
}

// =============================================================================
// URLs / Payloads
// =============================================================================

/// Initiate endpoint.
pub fn initiate_url(hostname: &str, marketplace: Marketplace) -> String {
    format!("https://{}/marketplaces/{}/checkout/", hostname, marketplace.id())
}

/// Finalize endpoint. The intent id travels in a header.
pub fn finalize_url(hostname: &str, marketplace: Marketplace) -> String {
    format!("https://{}/marketplaces/{}/purchases/", hostname, marketplace.id())
}

/// Initiate payload: one unit of the product at its offer.
pub fn initiate_body(product: &Product) -> Value {
    json!({
        "items": [{
            "asin": product.id.as_str(),
            "offerId": product.params.offer,
            "quantity": 1,
        }]
    })
}

// =============================================================================
// Purchase REST Client
// =============================================================================

/// reqwest-backed purchase API client.
///
/// Keeps one pooled `Client` per egress point.
pub struct PurchaseRestClient {
    /// Clients keyed by egress point (`None` = direct)
    clients: Mutex<HashMap<Option<EgressPoint>, Client>>,
    /// Per-request timeout
    request_timeout: Duration,
}

impl PurchaseRestClient {
    /// Create a client with the given request timeout.
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            request_timeout,
        }
    }

    /// HTTP client routed through `egress`, built on first use.
    fn client_for(&self, egress: Option<&EgressPoint>) -> Result<Client, PurchaseRestError> {
        let key = egress.cloned();
        if let Some(client) = self.clients.lock().get(&key) {
            return Ok(client.clone());
        }

        let mut builder = Client::builder().user_agent(USER_AGENT);
        if let Some(point) = egress {
            let mut proxy = Proxy::all(point.url())
                .map_err(|e| PurchaseRestError::InvalidProxy(point.to_string(), e.to_string()))?;
            if let (Some(user), Some(pass)) = (&point.username, &point.password) {
                proxy = proxy.basic_auth(user, pass);
            }
            builder = builder.proxy(proxy);
        } else {
            builder = builder.no_proxy();
        }
        let client = builder.build().map_err(|e| PurchaseRestError::ClientBuild(e.to_string()))?;

        self.clients.lock().insert(key, client.clone());
        Ok(client)
    }

    /// Attach headers every purchase call carries.
    fn with_common_headers(builder: RequestBuilder, ctx: &RequestContext) -> RequestBuilder {
        let builder = builder
            .header(REQUEST_ID_HEADER, &ctx.correlation_id)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        match ctx.session.token() {
            Some(token) => builder.header(ACCESS_TOKEN_HEADER, token),
            None => builder,
        }
    }

    /// Send a request and read its body within the timeout.
    async fn send(&self, builder: RequestBuilder) -> Result<ApiResponse, TransportError> {
        let exchange = async {
            let response = builder.send().await.map_err(map_reqwest_error)?;
            let status = response.status().as_u16();
            let request_id = response
                .headers()
                .get(UPSTREAM_RID_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let text = response.text().await.map_err(map_reqwest_error)?;
            let body = serde_json::from_str(&text).unwrap_or(Value::Null);

            Ok(ApiResponse { status, body, request_id })
        };

        timeout(self.request_timeout, exchange)
            .await
            .map_err(|_| TransportError::Timeout)?
    }
}

impl Default for PurchaseRestClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }
}

#[async_trait]
impl PurchaseApi for PurchaseRestClient {
    async fn initiate(
        &self,
        ctx: &RequestContext,
        product: &Product,
    ) -> Result<ApiResponse, TransportError> {
        let client = self.client_for(ctx.egress.as_ref())?;
        let url = initiate_url(&ctx.hostname, ctx.marketplace);

        debug!(%url, product = %product.id, correlation_id = %ctx.correlation_id, "Initiating checkout");

        let builder = client.post(&url).json(&initiate_body(product));
        self.send(Self::with_common_headers(builder, ctx)).await
    }

    async fn finalize(
        &self,
        ctx: &RequestContext,
        intent_id: &str,
    ) -> Result<ApiResponse, TransportError> {
        let client = self.client_for(ctx.egress.as_ref())?;
        let url = finalize_url(&ctx.hostname, ctx.marketplace);

        debug!(%url, intent_id, correlation_id = %ctx.correlation_id, "Finalizing checkout");

        let builder = client.post(&url).header(PURCHASE_ID_HEADER, intent_id).body("{}");
        self.send(Self::with_common_headers(builder, ctx)).await
    }
}

/// Timeouts and reset or aborted connections are interruptions; the rest is
/// opaque, including refused connections and DNS failures.
fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        return TransportError::Timeout;
    }
    if is_broken_connection(&e) {
        return TransportError::ConnectionReset(e.to_string());
    }
    TransportError::Other(e.to_string())
}

/// Whether an `io::Error` in the source chain reports a reset or aborted
/// connection.
fn is_broken_connection(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<io::Error>() {
            if matches!(io.kind(), io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted) {
                return true;
            }
        }
        current = e.source();
    }
    false
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use dropfleet_domain::Session;

    #[test]
    fn test_urls() {
        assert_eq!(
            initiate_url("api.example", Marketplace::Us),
            "https://api.example/marketplaces/ATVPDKIKX0DER/checkout/"
        );
        assert_eq!(
            finalize_url("api.example", Marketplace::Uk),
            "https://api.example/marketplaces/A1F83G8C2ARO7P/purchases/"
        );
    }

    #[test]
    fn test_initiate_body() {
        let product = Product::test_product(Marketplace::Us);
        let body = initiate_body(&product);

        assert_eq!(body["items"][0]["asin"], "B01C3LW5JC");
        assert_eq!(body["items"][0]["quantity"], 1);
        assert_eq!(body["items"][0]["offerId"], product.params.offer.as_str());
    }

    #[test]
    fn test_clients_are_cached_per_egress() {
        let client = PurchaseRestClient::default();
        let point = EgressPoint::parse_line("http", "127.0.0.1:3128:user:pass").unwrap();

        client.client_for(None).unwrap();
        client.client_for(Some(&point)).unwrap();
        client.client_for(Some(&point)).unwrap();

        assert_eq!(client.clients.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_refused_connection_is_not_an_interruption() {
        // Grab a free port, then close it so the connect is refused.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = PurchaseRestClient::new(Duration::from_secs(5));
        let http = client.client_for(None).unwrap();
        let result = client.send(http.post(format!("http://127.0.0.1:{}/", port))).await;

        let err = result.unwrap_err();
        assert!(matches!(err, TransportError::Other(_)), "unexpected error: {:?}", err);
        assert!(!err.is_interruption());
    }

    #[derive(Debug, thiserror::Error)]
    #[error("request failed")]
    struct Wrapped(#[source] io::Error);

    #[test]
    fn test_broken_connection_found_in_source_chain() {
        let reset = Wrapped(io::Error::from(io::ErrorKind::ConnectionReset));
        let aborted = io::Error::from(io::ErrorKind::ConnectionAborted);
        let refused = Wrapped(io::Error::from(io::ErrorKind::ConnectionRefused));
        let plain = Wrapped(io::Error::new(io::ErrorKind::Other, "connection reset by peer"));

        assert!(is_broken_connection(&reset));
        assert!(is_broken_connection(&aborted));
        assert!(!is_broken_connection(&refused));
        assert!(!is_broken_connection(&plain));
    }

    #[test]
    fn test_context_headers_include_token() {
        let ctx = RequestContext {
            marketplace: Marketplace::Us,
            hostname: "api.example".to_string(),
            egress: None,
            session: Session::new(Some("Atna|abc".to_string()), ""),
            correlation_id: "0123456789ABCDEF0123".to_string(),
        };
        let request = PurchaseRestClient::with_common_headers(Client::new().post("http://h/"), &ctx)
            .build()
            .unwrap();

        assert_eq!(request.headers()[ACCESS_TOKEN_HEADER], "Atna|abc");
        assert_eq!(request.headers()[REQUEST_ID_HEADER], "0123456789ABCDEF0123");
    }
}
