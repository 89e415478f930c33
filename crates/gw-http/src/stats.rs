// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! `GET /api/stats` — the dashboard's data feed. Bearer-authenticated like
//! every other `/api/*` and `/v1/*` route.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

pub async fn stats(State(state): State<AppState>) -> Json<Value> {
    let periods: Value = state
        .metrics
        .period_stats()
        .into_iter()
        .map(|(label, p)| {
            (
                label.to_string(),
                json!({
                    "requests": p.requests,
                    "successful": p.successful,
                    "success_rate": p.success_rate,
                    "mean_latency_millis": p.mean_latency_millis,
                    "qps": p.qps,
                }),
            )
        })
        .collect::<serde_json::Map<_, _>>()
        .into();

    Json(json!({
        "total_requests": state.metrics.total(),
        "successful_requests": state.metrics.successful(),
        "failed_requests": state.metrics.failed(),
        "qps": state.metrics.qps(),
        "periods": periods,
        "accounts": state.pool.size(),
    }))
}
