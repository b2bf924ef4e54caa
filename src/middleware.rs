use axum::Router;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer, timeout::RequestBodyTimeoutLayer, trace::TraceLayer,
};

use crate::config::ServerConfig;

pub fn apply_axum_middleware(router: Router, config: &ServerConfig) -> Router {
    router
        .layer(RequestBodyTimeoutLayer::new(Duration::from_secs(
            config.request_timeout_secs,
        )))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
}
