pub mod health;

use axum::{routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

use crate::common::AppState;

async fn banner() -> &'static str {
    concat!("bicicla-ingest ", env!("CARGO_PKG_VERSION"))
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(banner))
        .route("/healthz", get(health::healthz))
        .route("/status", get(health::status))
        .layer(RequestBodyLimitLayer::new(16 * 1024))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
