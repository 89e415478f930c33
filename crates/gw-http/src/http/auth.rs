// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! API key authentication and per-IP rate limiting.
//!
//! # API key authentication
//!
//! Every `/v1/*` and `/api/*` request must carry one of the configured
//! allowlisted keys, either as
//! ```text
//! Authorization: Bearer <key>
//! ```
//! or
//! ```text
//! x-api-key: <key>
//! ```
//! The raw key is never retained past startup; only its SHA-256 digest is
//! held in memory, and comparison is against that digest with
//! [`subtle::ConstantTimeEq`], never `==`, so a timing side channel can't be
//! used to guess a valid key one byte at a time.
//!
//! # Rate limiting
//!
//! A separate `governor` (GCRA) limiter caps the request volume from any
//! one IP to `RATE_LIMIT` requests per minute, independent of whether
//! those requests authenticate successfully.

use std::{
    net::{IpAddr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{clock::DefaultClock, state::keyed::DashMapStateStore, Quota, RateLimiter};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::state::AppState;

type IpLimiter = RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock>;

fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// The SHA-256 digest of one allowlisted API key. The raw key is hashed
/// once at startup and discarded; only the digest is kept.
struct StoredKey([u8; 32]);

impl StoredKey {
    fn hash(raw: &str) -> Self {
        StoredKey(sha256(raw.as_bytes()))
    }

    /// Verify a request-presented key's digest in constant time.
    fn verify(&self, presented_digest: &[u8; 32]) -> bool {
        bool::from(self.0.ct_eq(presented_digest))
    }
}

/// Shared auth state: the hashed key allowlist plus the per-IP request
/// limiter.
#[derive(Clone)]
pub struct AuthState {
    keys: Arc<Vec<StoredKey>>,
    limiter: Arc<IpLimiter>,
}

impl AuthState {
    /// `per_minute` is the `RATE_LIMIT` env var value; zero is treated as 1
    /// (a limiter quota must be non-zero). Each raw key is hashed here and
    /// never stored in its plaintext form.
    pub fn new(keys: Vec<String>, per_minute: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(per_minute.max(1)).expect("max(1) is never zero"));
        Self {
            keys: Arc::new(keys.into_iter().filter(|k| !k.is_empty()).map(|k| StoredKey::hash(&k)).collect()),
            limiter: Arc::new(RateLimiter::keyed(quota)),
        }
    }

    fn allows(&self, presented: &str) -> bool {
        let digest = sha256(presented.as_bytes());
        self.keys.iter().any(|k| k.verify(&digest))
    }
}

// ── Middleware ────────────────────────────────────────────────────────────────

/// Reject any request whose `Authorization: Bearer` or `x-api-key` value is
/// not in the configured allowlist.
pub async fn require_api_key(State(state): State<AppState>, req: Request, next: Next) -> Response {
    match extract_key(req.headers()) {
        Some(key) if state.auth.allows(key) => next.run(req).await,
        _ => {
            warn!("authentication failed: missing or unrecognized API key");
            (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
        }
    }
}

/// Cap requests per IP to `RATE_LIMIT` per minute, applied before auth so a
/// flood of bad keys is also throttled.
pub async fn rate_limit(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Response {
    let ip = client_ip(req.headers(), addr.ip());
    if state.auth.limiter.check_key(&ip).is_err() {
        warn!(%ip, "rate limit exceeded");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [(axum::http::header::RETRY_AFTER, "60")],
            "Too Many Requests",
        )
            .into_response();
    }
    next.run(req).await
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn extract_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(v) = headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(token) = v.strip_prefix("Bearer ") {
            return Some(token);
        }
    }
    headers.get("x-api-key").and_then(|v| v.to_str().ok())
}

/// Prefer `X-Forwarded-For`'s first hop (the gateway typically sits behind a
/// reverse proxy); fall back to the socket's peer address.
fn client_ip(headers: &HeaderMap, fallback: IpAddr) -> IpAddr {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(fallback)
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_key_from_bearer_header() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Bearer sk-abc".parse().unwrap());
        assert_eq!(extract_key(&headers), Some("sk-abc"));
    }

    #[test]
    fn extract_key_from_x_api_key_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "sk-abc".parse().unwrap());
        assert_eq!(extract_key(&headers), Some("sk-abc"));
    }

    #[test]
    fn bearer_takes_priority_over_x_api_key() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Bearer first".parse().unwrap());
        headers.insert("x-api-key", "second".parse().unwrap());
        assert_eq!(extract_key(&headers), Some("first"));
    }

    #[test]
    fn extract_key_missing_both_headers() {
        assert_eq!(extract_key(&HeaderMap::new()), None);
    }

    #[test]
    fn extract_key_rejects_non_bearer_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Basic dXNlcjpwYXNz".parse().unwrap());
        assert_eq!(extract_key(&headers), None);
    }

    #[test]
    fn auth_state_accepts_configured_key() {
        let auth = AuthState::new(vec!["sk-one".into(), "sk-two".into()], 120);
        assert!(auth.allows("sk-two"));
    }

    #[test]
    fn auth_state_rejects_unknown_key() {
        let auth = AuthState::new(vec!["sk-one".into()], 120);
        assert!(!auth.allows("sk-unknown"));
    }

    #[test]
    fn auth_state_ignores_empty_allowlist_entries() {
        let auth = AuthState::new(vec!["".into(), "sk-real".into()], 120);
        assert!(!auth.allows(""));
        assert!(auth.allows("sk-real"));
    }

    #[test]
    fn client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        let fallback: IpAddr = "127.0.0.1".parse().unwrap();
        assert_eq!(client_ip(&headers, fallback), "203.0.113.9".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn client_ip_falls_back_without_header() {
        let fallback: IpAddr = "192.168.1.1".parse().unwrap();
        assert_eq!(client_ip(&HeaderMap::new(), fallback), fallback);
    }

    #[test]
    fn rate_limiter_blocks_after_quota_exhausted() {
        let auth = AuthState::new(vec!["k".into()], 1);
        let ip: IpAddr = "10.0.0.5".parse().unwrap();
        assert!(auth.limiter.check_key(&ip).is_ok());
        assert!(auth.limiter.check_key(&ip).is_err());
    }
}
