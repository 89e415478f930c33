// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! JWT expiry parsing and license-based refresh.
//!
//! The JWT is treated as opaque except for its expiry: we split on `.`,
//! base64-decode the payload segment, and read `exp`. No signature
//! verification is performed — this gateway is a client of the token, not a
//! verifier of it.

use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use crate::Account;

/// Re-freshed 12h before actual expiry so in-flight requests never race a
/// mid-flight token expiry.
const REFRESH_WINDOW: chrono::Duration = chrono::Duration::hours(12);

#[derive(Debug, Error, PartialEq)]
pub enum JwtParseError {
    #[error("JWT does not have three dot-separated segments")]
    WrongSegmentCount,
    #[error("JWT payload segment is not valid base64url")]
    BadBase64,
    #[error("JWT payload segment is not valid JSON")]
    BadJson,
    #[error("JWT payload is missing a numeric `exp` claim")]
    MissingExp,
}

/// Parse the `exp` claim out of a JWT's payload segment.
pub fn parse_expiry(jwt: &str) -> Result<DateTime<Utc>, JwtParseError> {
    let segments: Vec<&str> = jwt.split('.').collect();
    if segments.len() != 3 {
        return Err(JwtParseError::WrongSegmentCount);
    }

    use base64::Engine;
    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(segments[1])
        .map_err(|_| JwtParseError::BadBase64)?;

    let payload: serde_json::Value =
        serde_json::from_slice(&decoded).map_err(|_| JwtParseError::BadJson)?;

    let exp = payload
        .get("exp")
        .and_then(serde_json::Value::as_i64)
        .ok_or(JwtParseError::MissingExp)?;

    Utc.timestamp_opt(exp, 0)
        .single()
        .ok_or(JwtParseError::MissingExp)
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("account has no license id; cannot refresh a static JWT")]
    NoLicense,
    #[error("refresh request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("license is not in PAID state or returned no token")]
    NotPaid,
    #[error("refreshed token has an unparsable expiry: {0}")]
    BadExpiry(#[from] JwtParseError),
}

#[derive(serde::Deserialize)]
struct RefreshResponse {
    state: String,
    token: String,
}

/// `POST {licenseId}` to the JWT refresh endpoint, authenticating with the
/// account's license `authorization`. Success requires HTTP 200, a body
/// `state == "PAID"`, and a non-empty token.
pub async fn refresh(
    client: &reqwest::Client,
    endpoint: &str,
    account: &Account,
) -> Result<(), RefreshError> {
    if account.license_id.is_empty() {
        return Err(RefreshError::NoLicense);
    }

    let resp = client
        .post(endpoint)
        .bearer_auth(&account.authorization)
        .json(&serde_json::json!(account.license_id))
        .send()
        .await?;

    if !resp.status().is_success() {
        warn!(status = %resp.status(), license_id = %account.license_id, "JWT refresh rejected");
        return Err(RefreshError::NotPaid);
    }

    let body: RefreshResponse = resp.json().await?;
    if body.state != "PAID" || body.token.is_empty() {
        return Err(RefreshError::NotPaid);
    }

    let expiry = parse_expiry(&body.token)?;
    let mut state = account.lock().await;
    state.jwt = body.token;
    state.expiry_time = Some(expiry);
    debug!(license_id = %account.license_id, %expiry, "refreshed JWT");
    Ok(())
}

/// True iff the account's JWT is empty or within [`REFRESH_WINDOW`] of
/// expiry (or already expired).
pub async fn needs_refresh(account: &Account) -> bool {
    let snap = account.snapshot().await;
    if snap.jwt.is_empty() {
        return true;
    }
    match snap.expiry_time {
        None => true,
        Some(exp) => Utc::now() >= exp - REFRESH_WINDOW,
    }
}

/// Refresh the account's JWT if [`needs_refresh`] says it is due. No-op for
/// static-JWT accounts (there is nothing to refresh from) or accounts that
/// are not yet due.
pub async fn ensure_fresh(
    client: &reqwest::Client,
    endpoint: &str,
    account: &Account,
) -> Result<(), RefreshError> {
    if !needs_refresh(account).await {
        return Ok(());
    }
    if account.is_static() {
        // Static JWTs cannot auto-refresh; the account simply becomes
        // ineligible for acquisition once its window closes.
        return Err(RefreshError::NoLicense);
    }
    refresh(client, endpoint, account).await
}
