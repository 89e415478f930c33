// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The [`Account`] credential record: one upstream license/JWT pair plus its
//! quota disposition. All mutable state lives behind a single per-account
//! mutex so JWT refresh and quota checks are serialized with respect to each
//! other without the caller having to reason about partial writes.

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

/// One upstream credential. `license_id` and `authorization` are set once at
/// construction and never change; everything else is mutated under `state`.
pub struct Account {
    /// Stable identifier for the credential. Empty in static-JWT mode, where
    /// there is no license to refresh from.
    pub license_id: String,
    /// License bearer token used to mint a fresh JWT. Opaque to everything
    /// except [`crate::jwt::refresh`].
    pub authorization: String,
    state: Mutex<AccountState>,
}

pub(crate) struct AccountState {
    pub jwt: String,
    pub expiry_time: Option<DateTime<Utc>>,
    pub has_quota: bool,
    pub last_quota_check_at: Option<DateTime<Utc>>,
}

/// A point-in-time, immutable copy of an account's mutable fields. Safe to
/// hand to callers without exposing the lock.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountSnapshot {
    pub jwt: String,
    pub expiry_time: Option<DateTime<Utc>>,
    pub has_quota: bool,
    pub last_quota_check_at: Option<DateTime<Utc>>,
}

impl Account {
    /// Construct an account with a refreshable license (JWT starts empty and
    /// is populated by the first [`crate::jwt::ensure_fresh`] call).
    pub fn from_license(license_id: impl Into<String>, authorization: impl Into<String>) -> Self {
        Self {
            license_id: license_id.into(),
            authorization: authorization.into(),
            state: Mutex::new(AccountState {
                jwt: String::new(),
                expiry_time: None,
                has_quota: true,
                last_quota_check_at: None,
            }),
        }
    }

    /// Construct an account from a static, pre-issued JWT. `license_id` is
    /// empty so this account is never a candidate for JWT refresh; if the
    /// static JWT expires, the account simply starts failing `needs_refresh`
    /// checks and is excluded from rotation.
    pub fn from_static_jwt(jwt: impl Into<String>) -> Self {
        let jwt = jwt.into();
        let expiry_time = crate::jwt::parse_expiry(&jwt).ok();
        Self {
            license_id: String::new(),
            authorization: String::new(),
            state: Mutex::new(AccountState {
                jwt,
                expiry_time,
                has_quota: true,
                last_quota_check_at: None,
            }),
        }
    }

    pub fn is_static(&self) -> bool {
        self.license_id.is_empty()
    }

    pub(crate) async fn lock(&self) -> tokio::sync::MutexGuard<'_, AccountState> {
        self.state.lock().await
    }

    pub async fn snapshot(&self) -> AccountSnapshot {
        let s = self.state.lock().await;
        AccountSnapshot {
            jwt: s.jwt.clone(),
            expiry_time: s.expiry_time,
            has_quota: s.has_quota,
            last_quota_check_at: s.last_quota_check_at,
        }
    }

    pub async fn current_jwt(&self) -> String {
        self.state.lock().await.jwt.clone()
    }

    pub async fn has_quota(&self) -> bool {
        self.state.lock().await.has_quota
    }

    /// Mark the account out of quota immediately. Called on an upstream 477.
    pub async fn mark_no_quota(&self) {
        self.state.lock().await.has_quota = false;
    }

    /// Cache key for the quota snapshot (see `gw_cache::keys::quota_key`).
    pub async fn cache_key(&self) -> String {
        let jwt = self.current_jwt().await;
        gw_cache::quota_key(&self.license_id, &jwt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn from_license_starts_with_empty_jwt_and_quota() {
        let a = Account::from_license("lic-1", "auth-1");
        assert!(a.current_jwt().await.is_empty());
        assert!(a.has_quota().await);
        assert!(!a.is_static());
    }

    #[tokio::test]
    async fn from_static_jwt_is_static_mode() {
        // A syntactically-invalid static JWT is tolerated here; parse_expiry
        // failures just leave expiry_time unset.
        let a = Account::from_static_jwt("not-a-jwt");
        assert!(a.is_static());
    }

    #[tokio::test]
    async fn mark_no_quota_flips_disposition() {
        let a = Account::from_license("lic-1", "auth-1");
        assert!(a.has_quota().await);
        a.mark_no_quota().await;
        assert!(!a.has_quota().await);
    }

    #[tokio::test]
    async fn cache_key_prefers_license_id() {
        let a = Account::from_license("lic-42", "auth");
        assert_eq!(a.cache_key().await, "quota:v1:lic-42");
    }
}
