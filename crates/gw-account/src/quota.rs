// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Quota snapshotting: a gated network check plus the cached disposition
//! the pool consults on every acquisition.

use chrono::Utc;
use thiserror::Error;
use tracing::debug;

use crate::Account;

/// Cached quota checks are considered current for this long before a fresh
/// network call is made.
const QUOTA_CACHE_TTL: chrono::Duration = chrono::Duration::hours(1);

#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("quota request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("quota response had an unexpected shape")]
    BadResponse,
}

#[derive(serde::Deserialize)]
struct QuotaResponse {
    current: QuotaCurrent,
}

#[derive(serde::Deserialize)]
struct QuotaCurrent {
    current: QuotaAmount,
    maximum: QuotaAmount,
}

#[derive(serde::Deserialize)]
struct QuotaAmount {
    amount: serde_json::Value,
}

/// Parse `{current:{current:{amount},maximum:{amount}}}` into `(used,
/// total)`, treating a zero `maximum` as 1 to avoid division by zero (and
/// because upstream never actually issues a zero quota; it is a signal that
/// the quota computation is undefined, not that nothing is allowed).
fn parse_amounts(body: &QuotaResponse) -> Result<(f64, f64), QuotaError> {
    let used = amount_as_f64(&body.current.current.amount).ok_or(QuotaError::BadResponse)?;
    let mut total = amount_as_f64(&body.current.maximum.amount).ok_or(QuotaError::BadResponse)?;
    if total == 0.0 {
        total = 1.0;
    }
    Ok((used, total))
}

fn amount_as_f64(v: &serde_json::Value) -> Option<f64> {
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

/// Re-check quota over the network if the cached disposition is older than
/// [`QUOTA_CACHE_TTL`]; otherwise this is a no-op and the cached `has_quota`
/// stands. On network/parse failure, the cached disposition and timestamp
/// are left untouched so a transient outage cannot poison the pool.
pub async fn refresh_if_stale(
    client: &reqwest::Client,
    endpoint: &str,
    account: &Account,
) -> Result<(), QuotaError> {
    let snap = account.snapshot().await;
    if let Some(last) = snap.last_quota_check_at {
        if Utc::now() - last < QUOTA_CACHE_TTL {
            return Ok(());
        }
    }

    let jwt = snap.jwt;
    let resp = client
        .post(endpoint)
        .header("grazie-authenticate-jwt", &jwt)
        .send()
        .await?;

    if !resp.status().is_success() {
        return Err(QuotaError::BadResponse);
    }

    let body: QuotaResponse = resp.json().await?;
    let (used, total) = parse_amounts(&body)?;
    let has_quota = used < total;

    let mut state = account.lock().await;
    state.has_quota = has_quota;
    state.last_quota_check_at = Some(Utc::now());
    debug!(used, total, has_quota, "quota snapshot refreshed");
    Ok(())
}
