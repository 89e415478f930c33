// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Shared application state threaded through every axum handler and
//! middleware via `State<AppState>`.

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use gw_account::AccountPool;
use gw_cache::Cache;
use gw_config::{Config, ModelMap};
use gw_metrics::MetricsRing;
use gw_translate::{ToolDefinition, UpstreamMessage};
use gw_upstream::UpstreamClient;

use crate::http::auth::AuthState;

/// How long a translated-message or sanitized-tool cache entry stays valid.
/// Generous since the inputs (message/tool JSON) are immutable once hashed.
pub const TRANSLATE_CACHE_TTL: Duration = Duration::from_secs(10 * 60);

pub struct AppStateInner {
    pub config: Config,
    pub models: ModelMap,
    pub pool: AccountPool,
    pub upstream: UpstreamClient,
    pub metrics: Arc<MetricsRing>,
    pub translate_cache: Arc<Cache<Vec<UpstreamMessage>>>,
    pub tools_cache: Arc<Cache<Vec<ToolDefinition>>>,
    pub auth: AuthState,
}

/// Cheap to clone: one `Arc` around everything, the same shape as axum's
/// `State` extractor expects.
#[derive(Clone)]
pub struct AppState(Arc<AppStateInner>);

impl AppState {
    pub fn new(inner: AppStateInner) -> Self {
        Self(Arc::new(inner))
    }
}

impl Deref for AppState {
    type Target = AppStateInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
