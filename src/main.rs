// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Process entry point: parse the §6 environment surface, build the
//! account pool, caches, metrics ring, and shared HTTP state, then serve
//! the gateway until a shutdown signal arrives.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use gw_account::{Account, AccountPool, UpstreamEndpoints};
use gw_cache::Cache;
use gw_config::{
    AccountConfig, Config, JETBRAINS_CHAT_ENDPOINT, JETBRAINS_JWT_ENDPOINT, JETBRAINS_QUOTA_ENDPOINT,
};
use gw_http::http::auth::AuthState;
use gw_http::state::{AppState, AppStateInner};
use gw_metrics::{build_store, spawn_flush_ticker, MetricsRing};
use gw_upstream::UpstreamClient;

/// Capacity of the two translation-result caches (§4.1). Generous relative
/// to any single deployment's distinct message/tool-list count.
const TRANSLATE_CACHE_CAPACITY: usize = 4096;
const TOOLS_CACHE_CAPACITY: usize = 4096;
/// Default bound on persisted request history (§4.9).
const METRICS_HISTORY_CAPACITY: usize = 1000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_logging(&config);
    config.validate_debug_file().context("invalid DEBUG_FILE")?;

    let accounts = build_accounts(&config)?;
    info!(count = accounts.len(), "configured upstream accounts");

    let pool = AccountPool::new(
        accounts,
        reqwest::Client::new(),
        UpstreamEndpoints {
            jwt_refresh: JETBRAINS_JWT_ENDPOINT.to_string(),
            quota: JETBRAINS_QUOTA_ENDPOINT.to_string(),
        },
    );
    let upstream = UpstreamClient::new(JETBRAINS_CHAT_ENDPOINT, JETBRAINS_JWT_ENDPOINT)
        .context("failed to build upstream HTTP client")?;

    let models = gw_config::load_models(&config.models_file)
        .await
        .with_context(|| format!("failed to load {}", config.models_file))?;

    let store = build_store(config.redis_url.as_deref(), config.stats_file.as_str())
        .context("failed to construct stats store")?;
    let metrics = Arc::new(
        MetricsRing::load(METRICS_HISTORY_CAPACITY, store)
            .await
            .context("failed to load persisted request stats")?,
    );
    let _flush_ticker = spawn_flush_ticker(metrics.clone());

    let translate_cache = Arc::new(Cache::new(TRANSLATE_CACHE_CAPACITY));
    let tools_cache = Arc::new(Cache::new(TOOLS_CACHE_CAPACITY));
    let _translate_sweeper = gw_cache::spawn_sweeper(translate_cache.clone());
    let _tools_sweeper = gw_cache::spawn_sweeper(tools_cache.clone());

    let auth = AuthState::new(config.client_api_keys.clone(), config.rate_limit);
    let port = config.port;

    let state = AppState::new(AppStateInner {
        config,
        models,
        pool,
        upstream,
        metrics: metrics.clone(),
        translate_cache,
        tools_cache,
        auth,
    });

    let app = gw_http::router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await.with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "jbgw listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shutting down; flushing metrics");
    metrics.close().await;
    Ok(())
}

/// Turn the paired license/authorization lists plus any static JWTs into
/// live [`Account`]s. Fails fast (before the pool is constructed) on a
/// misconfigured or empty account set.
fn build_accounts(config: &Config) -> anyhow::Result<Vec<Arc<Account>>> {
    let accounts = config.accounts().context("invalid account configuration")?;
    Ok(accounts
        .into_iter()
        .map(|a| match a {
            AccountConfig::License { license_id, authorization } => {
                Arc::new(Account::from_license(license_id, authorization))
            }
            AccountConfig::StaticJwt { jwt } => Arc::new(Account::from_static_jwt(jwt)),
        })
        .collect())
}

/// Initialize tracing per §6's `GIN_MODE`/`DEBUG_FILE` options: `release`
/// defaults to `info`, anything else to `debug`; `RUST_LOG` always takes
/// priority when set. `DEBUG_FILE` redirects output to that file instead
/// of stderr (already validated for path-traversal/length by the caller).
fn init_logging(config: &Config) {
    let default_level = if config.gin_mode == "release" { "info" } else { "debug" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if let Some(path) = &config.debug_file {
        if let Ok(file) = std::fs::OpenOptions::new().create(true).append(true).open(path) {
            let _ = tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_ansi(false).with_writer(std::sync::Mutex::new(file)))
                .with(filter)
                .try_init();
            return;
        }
    }

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

/// Resolves on either Ctrl-C or (on Unix) SIGTERM, whichever fires first.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
