//! HTTP API for the Dropfleet daemon.
//!
//! Provides REST endpoints for:
//! - Health check
//! - Status (registered workers, running checkouts per product)

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::config::Environment;
use crate::pool::WorkerPool;

// =============================================================================
// API State
// =============================================================================

/// Shared state for API handlers.
pub struct ApiState {
    pub pool: Arc<WorkerPool>,
    pub started_at: Instant,
    pub environment: Environment,
}

impl ApiState {
    /// State for a daemon started now.
    pub fn new(pool: Arc<WorkerPool>, environment: Environment) -> Self {
        Self { pool, started_at: Instant::now(), environment }
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub environment: String,
}

/// Status response.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Registered workers
    pub workers: usize,
    /// Workers currently inside a checkout loop
    pub running: usize,
    /// Running workers keyed by `PRODUCT@MARKETPLACE`
    pub products: BTreeMap<String, usize>,
}

// =============================================================================
// Router
// =============================================================================

/// Create the API router.
pub fn create_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        environment: state.environment.to_string(),
    })
}

async fn status_handler(State(state): State<Arc<ApiState>>) -> Json<StatusResponse> {
    let products = state.pool.running_by_product();

    Json(StatusResponse {
        workers: state.pool.len(),
        running: products.values().sum(),
        products,
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{PoolConfig, PoolDeps};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use dropfleet_domain::{AccountKey, Marketplace};
    use dropfleet_exec::{
        RecordingNotifier, Rotators, ScriptedPurchaseApi, StubSessionProvider,
    };
    use dropfleet_store::{AccountRecord, MemoryStore};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn create_test_pool() -> Arc<WorkerPool> {
        WorkerPool::new(
            PoolDeps {
                api: Arc::new(ScriptedPurchaseApi::new()),
                rotators: Arc::new(Rotators::default()),
                sessions: Arc::new(StubSessionProvider),
                store: Arc::new(MemoryStore::new()),
                notifier: Arc::new(RecordingNotifier::new()),
            },
            PoolConfig::default(),
        )
    }

    fn create_test_app(pool: Arc<WorkerPool>) -> Router {
        create_router(Arc::new(ApiState::new(pool, Environment::Test)))
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = create_test_app(create_test_pool());

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let health: HealthResponse = serde_json::from_slice(&body).unwrap();

        assert_eq!(health.status, "healthy");
        assert_eq!(health.environment, "test");
        assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let pool = create_test_pool();
        pool.register(AccountRecord {
            key: AccountKey::new("a@x", Marketplace::Us).unwrap(),
            owner: 1,
            license_key: "LIC".to_string(),
            subscriptions: Default::default(),
            access_token: Some("Atna|t".to_string()),
            cookies: String::new(),
        })
        .await
        .unwrap();
        let app = create_test_app(pool);

        let response = app
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let status: StatusResponse = serde_json::from_slice(&body).unwrap();

        assert_eq!(status.workers, 1);
        assert_eq!(status.running, 0);
        assert!(status.products.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let app = create_test_app(create_test_pool());

        let response = app
            .oneshot(Request::builder().uri("/accounts").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
