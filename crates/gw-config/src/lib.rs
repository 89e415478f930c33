// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The §6 environment variable surface, `models.json` loading, and the
//! account-pair/`DEBUG_FILE` validation that goes with it. Deliberately a
//! thin shape-only crate: process bootstrapping lives in the `jbgw` binary.

mod loader;
mod schema;

pub use loader::{load_models, ModelMap};
pub use schema::{AccountConfig, Config, ConfigError};

/// §6 upstream endpoints. Fixed by the JetBrains AI API itself, not
/// operator-configurable — unlike everything else in this crate, these are
/// constants rather than env-backed fields.
pub const JETBRAINS_JWT_ENDPOINT: &str = "https://api.jetbrains.ai/auth/jetbrains-jwt/provide-access/license/v2";
pub const JETBRAINS_QUOTA_ENDPOINT: &str = "https://api.jetbrains.ai/user/v5/quota/get";
pub const JETBRAINS_CHAT_ENDPOINT: &str = "https://api.jetbrains.ai/user/v5/llm/chat/stream/v8";
