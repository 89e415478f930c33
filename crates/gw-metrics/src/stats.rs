// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The persisted request-stats record and its two storage backends.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const REDIS_STATS_KEY: &str = "jetbrainsai2api:stats";

/// One entry of the persisted request history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub response_time: u64,
    pub model: String,
    pub account: String,
}

/// The full persisted snapshot: counters plus trimmed history.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RequestStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub total_response_time: u64,
    pub last_request_time: Option<DateTime<Utc>>,
    pub request_history: Vec<HistoryEntry>,
}

/// A swappable persistence backend for [`RequestStats`], selected at
/// startup by whether `REDIS_URL` is configured.
#[async_trait]
pub trait StatsStore: Send + Sync {
    async fn load(&self) -> anyhow::Result<RequestStats>;
    async fn save(&self, stats: &RequestStats) -> anyhow::Result<()>;
}

/// File-backed store: writes to a temp file in the same directory, then
/// renames over the target, so a reader never observes a partial write.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl StatsStore for JsonFileStore {
    async fn load(&self) -> anyhow::Result<RequestStats> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no stats file yet; starting fresh");
                Ok(RequestStats::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, stats: &RequestStats) -> anyhow::Result<()> {
        let body = serde_json::to_vec_pretty(stats)?;
        let dir = self.path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        use std::io::Write;
        tmp.write_all(&body)?;
        tmp.flush()?;
        tmp.persist(&self.path)?;
        Ok(())
    }
}

/// Redis-backed store, selected when `REDIS_URL` is configured.
pub struct RedisStore {
    client: redis::Client,
}

impl RedisStore {
    pub fn new(redis_url: &str) -> anyhow::Result<Self> {
        Ok(Self { client: redis::Client::open(redis_url)? })
    }
}

#[async_trait]
impl StatsStore for RedisStore {
    async fn load(&self) -> anyhow::Result<RequestStats> {
        use redis::AsyncCommands;
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: Option<String> = conn.get(REDIS_STATS_KEY).await?;
        match raw {
            Some(s) => Ok(serde_json::from_str(&s)?),
            None => Ok(RequestStats::default()),
        }
    }

    async fn save(&self, stats: &RequestStats) -> anyhow::Result<()> {
        use redis::AsyncCommands;
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let body = serde_json::to_string(stats)?;
        let _: () = conn.set(REDIS_STATS_KEY, body).await?;
        Ok(())
    }
}
