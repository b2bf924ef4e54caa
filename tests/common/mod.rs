// Shared fixtures for the server and lifecycle integration tests.
#![allow(dead_code)]

use axum::{Router, extract::State, routing::get};
use std::{sync::Arc, time::Duration};
use student_service::config::ServerConfig;
use tokio::sync::Notify;

/// Router with `/fast` and `/slow/{millis}`; `/slow` signals `entered`
/// before sleeping so tests know a request is in flight.
pub fn test_router(entered: Arc<Notify>) -> Router {
    Router::new()
        .route("/fast", get(|| async { "fast" }))
        .route("/slow/{millis}", get(slow))
        .with_state(entered)
}

async fn slow(
    State(entered): State<Arc<Notify>>,
    axum::extract::Path(millis): axum::extract::Path<u64>,
) -> &'static str {
    entered.notify_one();
    tokio::time::sleep(Duration::from_millis(millis)).await;
    "slow"
}

pub fn loopback() -> ServerConfig {
    ServerConfig {
        binding: "127.0.0.1".to_string(),
        port: 0,
        ..ServerConfig::default()
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .build()
        .expect("http client")
}
