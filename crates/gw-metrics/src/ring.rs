// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The metrics ring: atomic hot-path counters plus a batched, capped
//! history buffer with debounced persistence.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::warn;

use crate::stats::{HistoryEntry, RequestStats, StatsStore};

/// Flush the buffer into history once it reaches this many entries,
/// independent of the ticker.
const FLUSH_BATCH_SIZE: usize = 100;
/// Ticker period for the time-based flush.
const FLUSH_INTERVAL: Duration = Duration::from_millis(100);
/// Persistence is attempted at most this often.
const SAVE_DEBOUNCE: Duration = Duration::from_secs(5);
/// Window for the sliding QPS computation.
const QPS_WINDOW_SECONDS: i64 = 60;

struct HistoryRecord {
    timestamp: chrono::DateTime<Utc>,
    success: bool,
    response_time_millis: u64,
    model: String,
    account: String,
}

impl HistoryRecord {
    fn to_entry(&self) -> HistoryEntry {
        HistoryEntry {
            timestamp: self.timestamp,
            success: self.success,
            response_time: self.response_time_millis,
            model: self.model.clone(),
            account: self.account.clone(),
        }
    }
}

/// Summary of one hour-window slice of history.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodStats {
    pub requests: u64,
    pub successful: u64,
    pub success_rate: f64,
    pub mean_latency_millis: f64,
    pub qps: f64,
}

/// Request counters, batched history, and the debounced persistence
/// pipeline. Cheap to clone (wraps an `Arc` internally via its own
/// construction pattern); callers typically hold it behind an `Arc`.
pub struct MetricsRing {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    total_response_time_millis: AtomicU64,
    buffer: Mutex<Vec<HistoryRecord>>,
    history: Mutex<Vec<HistoryRecord>>,
    capacity: usize,
    store: Arc<dyn StatsStore>,
    last_save: Mutex<Option<Instant>>,
}

impl MetricsRing {
    /// Build an empty ring, optionally pre-seeded from a loaded snapshot
    /// (used at startup to restore counters across restarts).
    pub fn new(capacity: usize, store: Arc<dyn StatsStore>, seed: Option<RequestStats>) -> Self {
        let seed = seed.unwrap_or_default();
        let history = seed
            .request_history
            .into_iter()
            .map(|e| HistoryRecord {
                timestamp: e.timestamp,
                success: e.success,
                response_time_millis: e.response_time,
                model: e.model,
                account: e.account,
            })
            .collect();
        Self {
            total: AtomicU64::new(seed.total_requests),
            successful: AtomicU64::new(seed.successful_requests),
            failed: AtomicU64::new(seed.failed_requests),
            total_response_time_millis: AtomicU64::new(seed.total_response_time),
            buffer: Mutex::new(Vec::new()),
            history: Mutex::new(history),
            capacity,
            store,
            last_save: Mutex::new(None),
        }
    }

    /// Load the last-persisted snapshot from `store` and construct a ring
    /// seeded from it.
    pub async fn load(capacity: usize, store: Arc<dyn StatsStore>) -> anyhow::Result<Self> {
        let seed = store.load().await?;
        Ok(Self::new(capacity, store, Some(seed)))
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
    pub fn successful(&self) -> u64 {
        self.successful.load(Ordering::Relaxed)
    }
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Record the outcome of one request. The hot path only touches
    /// atomics and a brief buffer-lock critical section; persistence is
    /// handed off to a background task.
    pub fn record(
        &self,
        success: bool,
        response_time_millis: u64,
        model: impl Into<String>,
        account: impl Into<String>,
    ) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.total_response_time_millis.fetch_add(response_time_millis, Ordering::Relaxed);

        let should_flush = {
            let mut buf = self.buffer.lock().unwrap();
            buf.push(HistoryRecord {
                timestamp: Utc::now(),
                success,
                response_time_millis,
                model: model.into(),
                account: account.into(),
            });
            buf.len() >= FLUSH_BATCH_SIZE
        };
        if should_flush {
            self.flush_buffer();
        }
    }

    /// Drain the buffer into history, trim to capacity, and (debounced)
    /// kick off a background persistence save.
    pub fn flush_buffer(&self) {
        {
            let mut history = self.history.lock().unwrap();
            let mut buf = self.buffer.lock().unwrap();
            if buf.is_empty() {
                return;
            }
            history.extend(buf.drain(..));
            let over = history.len().saturating_sub(self.capacity);
            if over > 0 {
                history.drain(0..over);
            }
        }
        self.maybe_persist();
    }

    fn maybe_persist(&self) {
        let should_save = {
            let mut last = self.last_save.lock().unwrap();
            let now = Instant::now();
            match *last {
                Some(t) if now.duration_since(t) < SAVE_DEBOUNCE => false,
                _ => {
                    *last = Some(now);
                    true
                }
            }
        };
        if !should_save {
            return;
        }
        self.spawn_save();
    }

    fn spawn_save(&self) {
        let snapshot = self.snapshot();
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(e) = store.save(&snapshot).await {
                warn!(error = %e, "failed to persist request stats");
            }
        });
    }

    fn snapshot(&self) -> RequestStats {
        let history = self.history.lock().unwrap();
        RequestStats {
            total_requests: self.total(),
            successful_requests: self.successful(),
            failed_requests: self.failed(),
            total_response_time: self.total_response_time_millis.load(Ordering::Relaxed),
            last_request_time: history.last().map(|r| r.timestamp),
            request_history: history.iter().map(HistoryRecord::to_entry).collect(),
        }
    }

    /// Sliding 60-second mean QPS, recomputed on read.
    pub fn qps(&self) -> f64 {
        let history = self.history.lock().unwrap();
        let cutoff = Utc::now() - chrono::Duration::seconds(QPS_WINDOW_SECONDS);
        let mut timestamps: Vec<i64> = history
            .iter()
            .filter(|r| r.timestamp > cutoff)
            .map(|r| r.timestamp.timestamp_millis())
            .collect();
        timestamps.sort_unstable();
        timestamps.dedup();
        timestamps.len() as f64 / QPS_WINDOW_SECONDS as f64
    }

    /// 24h/168h/720h period statistics, computed in one scan over history.
    pub fn period_stats(&self) -> Vec<(&'static str, PeriodStats)> {
        const WINDOWS: [(&str, i64); 3] = [("24h", 24), ("168h", 168), ("720h", 720)];
        let history = self.history.lock().unwrap();
        let now = Utc::now();
        let mut acc = [(0u64, 0u64, 0u64); 3];
        for r in history.iter() {
            let age_hours = (now - r.timestamp).num_seconds() as f64 / 3600.0;
            for (i, (_, hours)) in WINDOWS.iter().enumerate() {
                if age_hours <= *hours as f64 {
                    acc[i].0 += 1;
                    if r.success {
                        acc[i].1 += 1;
                    }
                    acc[i].2 += r.response_time_millis;
                }
            }
        }
        WINDOWS
            .iter()
            .zip(acc.iter())
            .map(|((name, hours), (requests, successful, total_time))| {
                let success_rate = if *requests > 0 { *successful as f64 / *requests as f64 } else { 0.0 };
                let mean_latency = if *requests > 0 { *total_time as f64 / *requests as f64 } else { 0.0 };
                let qps = *requests as f64 / (*hours as f64 * 3600.0);
                (
                    *name,
                    PeriodStats {
                        requests: *requests,
                        successful: *successful,
                        success_rate,
                        mean_latency_millis: mean_latency,
                        qps,
                    },
                )
            })
            .collect()
    }

    /// Flush the buffer and force a final persistence save. Idempotent —
    /// safe to call more than once (e.g. once from shutdown and once from
    /// a panic handler).
    pub async fn close(&self) {
        self.flush_buffer();
        let snapshot = self.snapshot();
        if let Err(e) = self.store.save(&snapshot).await {
            warn!(error = %e, "failed to persist request stats on close");
        }
    }
}

/// Spawn the 100ms flush ticker. Returns the task handle so callers can
/// abort it on shutdown (after a final `close()`).
pub fn spawn_flush_ticker(ring: Arc<MetricsRing>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(FLUSH_INTERVAL);
        loop {
            interval.tick().await;
            ring.flush_buffer();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::JsonFileStore;

    fn ring_with_temp_store() -> (MetricsRing, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFileStore::new(dir.path().join("stats.json")));
        (MetricsRing::new(1000, store, None), dir)
    }

    #[test]
    fn record_updates_atomic_counters() {
        let (ring, _dir) = ring_with_temp_store();
        ring.record(true, 120, "gpt-x", "acct-1");
        ring.record(false, 50, "gpt-x", "acct-1");
        assert_eq!(ring.total(), 2);
        assert_eq!(ring.successful(), 1);
        assert_eq!(ring.failed(), 1);
    }

    #[test]
    fn buffer_flushes_automatically_at_batch_size() {
        let (ring, _dir) = ring_with_temp_store();
        for _ in 0..FLUSH_BATCH_SIZE {
            ring.record(true, 10, "m", "a");
        }
        // The batch-size flush should have moved everything into history
        // without needing the ticker.
        assert_eq!(ring.history.lock().unwrap().len(), FLUSH_BATCH_SIZE);
        assert!(ring.buffer.lock().unwrap().is_empty());
    }

    #[test]
    fn history_is_capped_at_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFileStore::new(dir.path().join("stats.json")));
        let ring = MetricsRing::new(5, store, None);
        for _ in 0..20 {
            ring.record(true, 1, "m", "a");
        }
        ring.flush_buffer();
        assert_eq!(ring.history.lock().unwrap().len(), 5);
    }

    #[test]
    fn period_stats_computes_success_rate() {
        let (ring, _dir) = ring_with_temp_store();
        ring.record(true, 100, "m", "a");
        ring.record(true, 200, "m", "a");
        ring.record(false, 300, "m", "a");
        ring.flush_buffer();
        let windows = ring.period_stats();
        let day = windows.iter().find(|(name, _)| *name == "24h").unwrap();
        assert_eq!(day.1.requests, 3);
        assert_eq!(day.1.successful, 2);
        assert!((day.1.success_rate - (2.0 / 3.0)).abs() < 1e-9);
        assert!((day.1.mean_latency_millis - 200.0).abs() < 1e-9);
    }

    #[test]
    fn qps_counts_recent_requests_only() {
        let (ring, _dir) = ring_with_temp_store();
        ring.record(true, 1, "m", "a");
        ring.record(true, 1, "m", "a");
        ring.flush_buffer();
        assert!(ring.qps() > 0.0);
    }

    #[tokio::test]
    async fn close_persists_a_snapshot_that_load_can_recover() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        let store: Arc<dyn StatsStore> = Arc::new(JsonFileStore::new(&path));
        let ring = MetricsRing::new(100, store.clone(), None);
        ring.record(true, 42, "gpt-x", "acct-1");
        ring.close().await;

        let reloaded = MetricsRing::load(100, store).await.unwrap();
        assert_eq!(reloaded.total(), 1);
        assert_eq!(reloaded.successful(), 1);
    }
}
