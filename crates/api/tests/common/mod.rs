#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use sqlx::PgPool;
use tower::ServiceExt;

use atrium_api::config::ServerConfig;
use atrium_api::router::build_router;
use atrium_api::state::AppState;
use atrium_events::EventBus;
use atrium_worker::config::WorkerPoolConfig;
use atrium_worker::WorkerPool;

/// Server settings for tests: one allowed origin, generous timeouts.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout: Duration::from_secs(30),
        shutdown_timeout: Duration::from_secs(5),
    }
}

/// Shared state with an inline worker pool and no running dispatcher, so
/// submitted jobs stay `pending` unless a test moves them.
pub fn test_state(pool: PgPool) -> AppState {
    let config = WorkerPoolConfig::inline(2, Duration::from_secs(10), std::env::temp_dir());
    let (workers, _events) = WorkerPool::from_config(&config, &pool);

    AppState::new(pool, Arc::new(workers), Arc::new(EventBus::default()))
}

/// The production router around [`test_state`].
pub fn build_test_app(pool: PgPool) -> Router {
    build_router(test_state(pool), &test_config())
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri, Body::empty()).await
}

pub async fn post(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::POST, uri, Body::empty()).await
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

async fn send(app: Router, method: Method, uri: &str, body: Body) -> Response<Body> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(body)
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
