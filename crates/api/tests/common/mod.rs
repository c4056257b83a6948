use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use rvb_api::config::ServerConfig;
use rvb_api::registry::CoordinatorRegistry;
use rvb_api::router::build_app_router;
use rvb_api::state::AppState;
use rvb_api::ws::WsManager;
use rvb_matchmaker::PgMatchStore;
use sqlx::PgPool;
use tower::ServiceExt;

/// Build a test `ServerConfig` with safe defaults and aggressive
/// matchmaking timings so pairing tests converge quickly.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        poll_interval_ms: 50,
        redirect_delay_ms: 50,
        watchdog_interval_ms: 50,
        watchdog_grace_ms: 100,
        sweep_interval_secs: 30,
        sweep_grace_secs: 60,
    }
}

/// Build the full application router with all middleware layers, using the
/// given database pool.
///
/// Mirrors the construction in `main.rs` so integration tests exercise the
/// same middleware stack (CORS, request ID, timeout, tracing, panic
/// recovery) that production uses.
pub fn build_test_app(pool: PgPool) -> Router {
    let config = test_config();

    let state = AppState {
        pool: pool.clone(),
        config: Arc::new(config.clone()),
        store: Arc::new(PgMatchStore::new(pool)),
        registry: Arc::new(CoordinatorRegistry::new()),
        ws_manager: Arc::new(WsManager::new()),
        event_bus: Arc::new(rvb_events::EventBus::default()),
    };

    build_app_router(state, &config)
}

/// Issue a GET request against the app.
pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

/// Issue a POST request with a JSON body against the app.
pub async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

/// Issue a DELETE request against the app.
pub async fn delete(app: &Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::DELETE)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

/// Read a response body as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Issue a request and assert the expected status, returning the JSON body.
pub async fn expect_json(response: Response<Body>, status: StatusCode) -> serde_json::Value {
    assert_eq!(response.status(), status);
    body_json(response).await
}
