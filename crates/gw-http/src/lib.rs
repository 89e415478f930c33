// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The HTTP surface: the two protocol facades, the dashboard/stats/health
//! endpoints, and the middleware stack (CORS, security headers, rate
//! limiting, API-key auth, panic recovery) wrapped around them.

pub mod dashboard;
pub mod error;
pub mod facades;
pub mod health;
pub mod http;
pub mod models;
pub mod panic_recovery;
pub mod stats;
pub mod state;

use axum::{
    http::HeaderValue,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

pub use state::{AppState, AppStateInner, TRANSLATE_CACHE_TTL};

/// Build the CORS layer from `CORS_ALLOW_ORIGIN`. `"*"` (the default) gets
/// the permissive, credential-less form; any other value is treated as a
/// single explicit origin.
fn cors_layer(allow_origin: &str) -> CorsLayer {
    if allow_origin == "*" {
        return CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    }
    let origin = match HeaderValue::from_str(allow_origin) {
        Ok(v) => v,
        Err(_) => return CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };
    CorsLayer::new().allow_origin(AllowOrigin::exact(origin)).allow_methods(Any).allow_headers(Any)
}

/// Wire every route and middleware layer into a single router. Layer order
/// (innermost to outermost): panic recovery, security headers, CORS — so a
/// panic still gets security headers and CORS treatment on its way out.
/// `/v1/*` and `/api/stats` additionally sit behind rate limiting and
/// API-key auth; `/` and `/health` are unauthenticated.
pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_allow_origin);
    let metrics = state.metrics.clone();

    let protected = Router::new()
        .route("/v1/models", get(models::list_models))
        .route("/v1/chat/completions", post(facades::openai::chat_completions))
        .route("/v1/messages", post(facades::anthropic::messages))
        .route("/api/stats", get(stats::stats))
        .route_layer(middleware::from_fn_with_state(state.clone(), http::auth::require_api_key))
        .route_layer(middleware::from_fn_with_state(state.clone(), http::auth::rate_limit));

    let public = Router::new().route("/", get(dashboard::dashboard)).route("/health", get(health::health));

    Router::new()
        .merge(protected)
        .merge(public)
        .with_state(state)
        .layer(panic_recovery::layer(metrics))
        .layer(middleware::from_fn(http::security::security_headers))
        .layer(cors)
}
