// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Request metrics: atomic hot-path counters, a batched bounded history
//! ring, sliding QPS, period-window statistics, and pluggable JSON-file or
//! Redis persistence.

pub mod ring;
pub mod stats;

pub use ring::{spawn_flush_ticker, MetricsRing, PeriodStats};
pub use stats::{HistoryEntry, JsonFileStore, RedisStore, RequestStats, StatsStore, REDIS_STATS_KEY};

/// Build the appropriate [`StatsStore`] for the given configuration:
/// Redis when `redis_url` is set, otherwise the JSON file at `stats_path`.
pub fn build_store(
    redis_url: Option<&str>,
    stats_path: impl Into<std::path::PathBuf>,
) -> anyhow::Result<std::sync::Arc<dyn StatsStore>> {
    match redis_url {
        Some(url) => Ok(std::sync::Arc::new(RedisStore::new(url)?)),
        None => Ok(std::sync::Arc::new(JsonFileStore::new(stats_path))),
    }
}
