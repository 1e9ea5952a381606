//! HTTP server
//!
//! ```text
//! /health        - liveness probe, plain "OK"
//! /api/v1/...    - REST API (see `api::routes`)
//! ```

use axum::{extract::DefaultBodyLimit, routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::routes::api_router;
use crate::api::ApiState;

/// Largest accepted request body (proof uploads included)
pub const MAX_BODY_BYTES: usize = 20 * 1024 * 1024;

pub async fn health_check() -> &'static str {
    "OK"
}

pub fn build_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_router())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

// ============================================================================
// SERVER STARTUP
// ============================================================================

pub async fn run_server(state: Arc<ApiState>, host: &str, port: u16) -> anyhow::Result<()> {
    let app = build_router(state);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("╔══════════════════════════════════════════════════════════════╗");
    info!("║                 Challenge Tracker - API Server               ║");
    info!("╠══════════════════════════════════════════════════════════════╣");
    info!("║  Listening on: {:44} ║", addr);
    info!("╠══════════════════════════════════════════════════════════════╣");
    info!("║  Endpoints:                                                  ║");
    info!("║    GET  /health            - Health check                    ║");
    info!("║    POST /api/v1/auth       - Login                           ║");
    info!("║    *    /api/v1/challenges - Challenges, proofs and votes    ║");
    info!("║    *    /api/v1/self       - Own profile and recents         ║");
    info!("║    GET  /api/v1/users      - User search and profiles        ║");
    info!("║    GET  /api/v1/walls      - Global and contact walls        ║");
    info!("╚══════════════════════════════════════════════════════════════╝");

    axum::serve(listener, app).await?;

    Ok(())
}
