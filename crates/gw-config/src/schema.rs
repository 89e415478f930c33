// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The §6 environment variable surface. A thin `clap::Parser` struct —
//! parsing and defaulting only, no business logic.

use clap::Parser;

/// One configured upstream credential. Either `license_id`+`authorization`
/// (refreshable) or a bare `jwt` (static, never auto-refreshes).
#[derive(Debug, Clone, PartialEq)]
pub enum AccountConfig {
    License { license_id: String, authorization: String },
    StaticJwt { jwt: String },
}

#[derive(Debug, Parser, Clone)]
#[command(name = "jbgw", about = "JetBrains AI protocol-translating gateway")]
pub struct Config {
    /// TCP port the HTTP server listens on.
    #[arg(long, env = "PORT", default_value_t = 7860)]
    pub port: u16,

    /// `release|debug|test` — mirrors the upstream Go project's Gin mode
    /// and only affects log verbosity defaults, not routing.
    #[arg(long, env = "GIN_MODE", default_value = "release")]
    pub gin_mode: String,

    /// CORS `Access-Control-Allow-Origin` value.
    #[arg(long, env = "CORS_ALLOW_ORIGIN", default_value = "*")]
    pub cors_allow_origin: String,

    /// Per-IP requests-per-minute cap enforced on every request.
    #[arg(long, env = "RATE_LIMIT", default_value_t = 120)]
    pub rate_limit: u32,

    /// Comma-separated allowlist of client API keys.
    #[arg(long, env = "CLIENT_API_KEYS", value_delimiter = ',', default_value = "")]
    pub client_api_keys: Vec<String>,

    /// Comma-separated license ids, paired positionally with
    /// `JETBRAINS_AUTHORIZATIONS`.
    #[arg(long, env = "JETBRAINS_LICENSE_IDS", value_delimiter = ',', default_value = "")]
    pub jetbrains_license_ids: Vec<String>,

    /// Comma-separated license bearer tokens, paired positionally with
    /// `JETBRAINS_LICENSE_IDS`.
    #[arg(long, env = "JETBRAINS_AUTHORIZATIONS", value_delimiter = ',', default_value = "")]
    pub jetbrains_authorizations: Vec<String>,

    /// Comma-separated static, pre-issued JWTs (cannot auto-refresh).
    #[arg(long, env = "JETBRAINS_JWTS", value_delimiter = ',', default_value = "")]
    pub jetbrains_jwts: Vec<String>,

    /// Redis connection string. When absent, stats persist to a JSON file.
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Path to a log file. Rejected at startup if it contains `..` or
    /// exceeds 260 characters.
    #[arg(long, env = "DEBUG_FILE")]
    pub debug_file: Option<String>,

    /// Path to the models-mapping file (§6 `models.json`).
    #[arg(long, env = "MODELS_FILE", default_value = "models.json")]
    pub models_file: String,

    /// Path to the JSON stats file, used when `redis_url` is unset.
    #[arg(long, env = "STATS_FILE", default_value = "stats.json")]
    pub stats_file: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("JETBRAINS_LICENSE_IDS and JETBRAINS_AUTHORIZATIONS must have the same number of entries (got {licenses} and {authorizations})")]
    MismatchedLicensePairs { licenses: usize, authorizations: usize },
    #[error("no upstream accounts configured: set JETBRAINS_LICENSE_IDS+JETBRAINS_AUTHORIZATIONS and/or JETBRAINS_JWTS")]
    NoAccountsConfigured,
    #[error("DEBUG_FILE must not contain `..` path traversal: {0}")]
    DebugFileTraversal(String),
    #[error("DEBUG_FILE path exceeds 260 characters: {0}")]
    DebugFileTooLong(String),
}

impl Config {
    /// Parse accounts out of the paired license/authorization lists plus
    /// any static JWTs. Empty strings from an unset, comma-delimited env
    /// var are filtered out before pairing.
    pub fn accounts(&self) -> Result<Vec<AccountConfig>, ConfigError> {
        let license_ids: Vec<&String> = self.jetbrains_license_ids.iter().filter(|s| !s.is_empty()).collect();
        let authorizations: Vec<&String> =
            self.jetbrains_authorizations.iter().filter(|s| !s.is_empty()).collect();
        if license_ids.len() != authorizations.len() {
            return Err(ConfigError::MismatchedLicensePairs {
                licenses: license_ids.len(),
                authorizations: authorizations.len(),
            });
        }

        let mut accounts: Vec<AccountConfig> = license_ids
            .into_iter()
            .zip(authorizations)
            .map(|(license_id, authorization)| AccountConfig::License {
                license_id: license_id.clone(),
                authorization: authorization.clone(),
            })
            .collect();

        accounts.extend(
            self.jetbrains_jwts
                .iter()
                .filter(|s| !s.is_empty())
                .map(|jwt| AccountConfig::StaticJwt { jwt: jwt.clone() }),
        );

        if accounts.is_empty() {
            return Err(ConfigError::NoAccountsConfigured);
        }
        Ok(accounts)
    }

    /// Validate `DEBUG_FILE` against the `..`/260-char constraints. A `None`
    /// value (logging to stdout) is always valid.
    pub fn validate_debug_file(&self) -> Result<(), ConfigError> {
        let Some(path) = &self.debug_file else {
            return Ok(());
        };
        if path.contains("..") {
            return Err(ConfigError::DebugFileTraversal(path.clone()));
        }
        if path.len() > 260 {
            return Err(ConfigError::DebugFileTooLong(path.clone()));
        }
        Ok(())
    }
}
