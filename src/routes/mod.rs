//! Router assembly: HTTP endpoints, WebSocket upgrade, static files, CORS, and HTTP tracing.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod http;
pub mod ws;

/// Build the application router with:
/// - WebSocket at `/ws` (the chat command surface)
/// - REST-ish API under `/api/v1/...`
/// - Payment webhook at `/api/v1/payments/webhook` (verified upstream)
/// - Static SPA from `./static` with index fallback
/// - CORS (allow any origin/method/headers) – adjust for production if needed
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: AppState) -> Router {
    // Static files with SPA fallback
    let static_service = ServeDir::new("./static")
        .append_index_html_on_directories(true)
        .not_found_service(ServeFile::new("./static/index.html"));

    Router::new()
        // WebSocket
        .route("/ws", get(ws::ws_upgrade))
        // HTTP API
        .route("/api/v1/health", get(http::http_health))
        .route("/api/v1/register", post(http::http_post_register))
        .route("/api/v1/player", get(http::http_get_player))
        .route("/api/v1/riddle", get(http::http_get_riddle))
        .route("/api/v1/answer", post(http::http_post_answer))
        .route("/api/v1/hint", post(http::http_post_hint))
        .route("/api/v1/daily_bonus", post(http::http_post_daily_bonus))
        .route("/api/v1/leaderboard", get(http::http_get_leaderboard))
        .route("/api/v1/export/winners", get(http::http_get_export_winners))
        .route(
            "/api/v1/admin/payouts",
            get(http::http_get_payouts).post(http::http_post_payout),
        )
        .route("/api/v1/payments/webhook", post(http::http_post_payment_webhook))
        // State + CORS + HTTP tracing
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        // Frontend fallback
        .fallback_service(static_service)
}
