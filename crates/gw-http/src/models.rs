// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! `GET /v1/models` — lists the gateway's public model ids. Only the ids
//! configured in `models.json` are exposed; the upstream profile string
//! each one maps to never leaves this handler.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// A fixed creation timestamp: the gateway does not track per-model
/// creation dates, and clients generally only care that the field exists.
const PLACEHOLDER_CREATED: i64 = 1_700_000_000;

pub async fn list_models(State(state): State<AppState>) -> Json<Value> {
    let data: Vec<Value> = state
        .models
        .public_ids()
        .map(|id| {
            json!({
                "id": id,
                "object": "model",
                "created": PLACEHOLDER_CREATED,
                "owned_by": "jetbrains-ai",
            })
        })
        .collect();

    Json(json!({ "object": "list", "data": data }))
}
