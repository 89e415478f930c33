// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Account credential lifecycle: JWT refresh, quota snapshotting, and the
//! pool that hands validated credentials out to the upstream client.

mod account;
mod jwt;
mod pool;
mod quota;

pub use account::{Account, AccountSnapshot};
pub use jwt::{ensure_fresh, needs_refresh, refresh, JwtParseError, RefreshError};
pub use pool::{AcquireError, AccountPool, UpstreamEndpoints};
pub use quota::{refresh_if_stale, QuotaError};

/// Re-check (and refresh if necessary) an account's JWT, then its quota
/// snapshot. Exposed at the crate root so callers outside `pool` (e.g. a
/// startup warmup pass) can validate a single account without going through
/// acquire/release.
pub async fn validate(
    client: &reqwest::Client,
    endpoints: &UpstreamEndpoints,
    account: &Account,
) -> anyhow::Result<()> {
    jwt::ensure_fresh(client, &endpoints.jwt_refresh, account).await?;
    quota::refresh_if_stale(client, &endpoints.quota, account).await?;
    Ok(())
}
