// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! `GET /` — a minimal static dashboard page. It polls `/api/stats` on its
//! own; the markup itself is opaque to the gateway core, same as any other
//! bundled static asset.

use axum::response::Html;

const PAGE: &str = include_str!("dashboard.html");

pub async fn dashboard() -> Html<&'static str> {
    Html(PAGE)
}
