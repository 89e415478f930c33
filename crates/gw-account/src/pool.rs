// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The account pool: a bounded handoff of credentials with validate-on-
//! acquire semantics.
//!
//! Every account starts in the channel. `acquire` pulls one out, makes sure
//! its JWT and quota are current, and either hands it to the caller or puts
//! it back and tries another. The channel's own capacity (equal to the
//! account count) is the only synchronization needed — there is no separate
//! pool-wide mutex.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{account::Account, jwt, quota};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(60);
const SLOW_ACQUIRE_THRESHOLD: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("no account became available within the acquire timeout")]
    Timeout,
    #[error("all accounts are unavailable (stale credentials or exhausted quota)")]
    AllUnavailable,
    #[error("acquisition was cancelled")]
    Cancelled,
}

/// Endpoints the pool needs to validate a credential before handing it out.
#[derive(Clone)]
pub struct UpstreamEndpoints {
    pub jwt_refresh: String,
    pub quota: String,
}

/// A bounded multiset of accounts currently "free". Acquired accounts are
/// held by the caller until `release` returns them.
pub struct AccountPool {
    tx: mpsc::Sender<Arc<Account>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Arc<Account>>>,
    client: reqwest::Client,
    endpoints: UpstreamEndpoints,
    size: usize,
}

impl AccountPool {
    pub fn new(accounts: Vec<Arc<Account>>, client: reqwest::Client, endpoints: UpstreamEndpoints) -> Self {
        let size = accounts.len();
        let (tx, rx) = mpsc::channel(size.max(1));
        for a in accounts {
            // Capacity exactly matches `size`, so this can never block.
            tx.try_send(a).expect("pool channel sized to account count");
        }
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            client,
            endpoints,
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Acquire a validated, in-quota account. Blocks until one is available,
    /// the 60s timeout elapses, or `cancel` resolves first.
    pub async fn acquire(&self, cancel: impl std::future::Future<Output = ()>) -> Result<Arc<Account>, AcquireError> {
        let started = Instant::now();
        let deadline = started + ACQUIRE_TIMEOUT;
        tokio::pin!(cancel);

        // Visit counts per account, keyed by Arc pointer identity.
        let mut visited: HashMap<usize, u8> = HashMap::new();

        let result = loop {
            let mut rx = self.rx.lock().await;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break Err(AcquireError::Timeout);
            }

            let account = tokio::select! {
                biased;
                _ = &mut cancel => break Err(AcquireError::Cancelled),
                res = tokio::time::timeout(remaining, rx.recv()) => {
                    match res {
                        Ok(Some(a)) => a,
                        Ok(None) => break Err(AcquireError::AllUnavailable),
                        Err(_) => break Err(AcquireError::Timeout),
                    }
                }
            };
            drop(rx);

            let id = Arc::as_ptr(&account) as usize;
            let count = visited.entry(id).or_insert(0);
            *count += 1;

            match self.validate(&account).await {
                Ok(()) => break Ok(account),
                Err(reason) => {
                    debug!(reason, "account failed validation on acquire; returning to pool");
                    self.release(account);
                    let all_visited_once = visited.len() >= self.size;
                    let any_visited_twice = visited.values().any(|&c| c >= 2);
                    if all_visited_once || any_visited_twice {
                        break Err(AcquireError::AllUnavailable);
                    }
                }
            }
        };

        let waited = started.elapsed();
        if waited > SLOW_ACQUIRE_THRESHOLD {
            debug!(?waited, "account acquire took longer than expected");
        }
        result
    }

    /// Refresh the JWT (if due) and the quota snapshot (if stale), rejecting
    /// the account if either leaves it unusable.
    async fn validate(&self, account: &Account) -> Result<(), &'static str> {
        if jwt::needs_refresh(account).await {
            jwt::ensure_fresh(&self.client, &self.endpoints.jwt_refresh, account)
                .await
                .map_err(|_| "jwt refresh failed")?;
        }
        if quota::refresh_if_stale(&self.client, &self.endpoints.quota, account)
            .await
            .is_err()
        {
            // A transient quota-check failure does not disqualify the
            // account — we fall through to the cached disposition.
            warn!("quota check failed; using cached disposition");
        }
        if !account.has_quota().await {
            return Err("account is out of quota");
        }
        Ok(())
    }

    /// Return an account to the pool. A full channel indicates a double-
    /// release or a leaked handle elsewhere and is logged rather than
    /// allowed to block.
    pub fn release(&self, account: Arc<Account>) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.tx.try_send(account) {
            warn!("account pool release found a full channel — possible leak");
        }
    }
}
