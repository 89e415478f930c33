// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Panic recovery for facade handlers. A panic part-way through translating
//! a request or streaming a response must not take the whole server down;
//! it is caught, logged, recorded as a failed request, and turned into a
//! plain 500.

use std::any::Any;
use std::sync::Arc;

use axum::{
    body::Bytes,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use gw_metrics::MetricsRing;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::error;

/// Build a `CatchPanicLayer` that records the panic as a failed request
/// against `metrics` before rendering the generic 500 body.
pub fn layer(metrics: Arc<MetricsRing>) -> CatchPanicLayer<impl Fn(Box<dyn Any + Send>) -> Response + Clone> {
    CatchPanicLayer::custom(move |panic: Box<dyn Any + Send>| {
        let detail = panic_message(&panic);
        error!(panic = %detail, "request handler panicked");
        metrics.record(false, 0, "unknown", "unknown");
        (StatusCode::INTERNAL_SERVER_ERROR, Bytes::from_static(b"Internal Server Error")).into_response()
    })
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
