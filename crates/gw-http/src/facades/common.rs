// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Shared plumbing between the OpenAI and Anthropic facades: request
//! validation, account acquisition with the 477 retry loop, translate-cache
//! lookups, and the account-release/metrics-recording guards.

use std::sync::Arc;
use std::time::Instant;

use gw_account::{Account, AcquireError};
use gw_translate::{ToolDefinition, UpstreamMessage, UpstreamPayload};
use gw_upstream::ChatError;
use serde_json::Value;

use crate::error::GatewayError;
use crate::state::{AppState, TRANSLATE_CACHE_TTL};

/// At most this many distinct accounts are tried before giving up on a
/// request that keeps hitting out-of-quota accounts.
const MAX_QUOTA_RETRIES: usize = 3;

/// Resolve a client-supplied model id to its upstream profile, or a
/// `NotFound` error if it isn't in `models.json`.
pub fn resolve_profile<'a>(state: &'a AppState, model: &str) -> Result<&'a str, GatewayError> {
    state
        .models
        .upstream_profile(model)
        .ok_or_else(|| GatewayError::NotFound(format!("unknown model: {model}")))
}

/// Translate-then-cache: messages and tools are hashed and looked up
/// independently, since the same tool list is often reused across many
/// requests with different message histories. `translate` is only called
/// when at least one of the two is a cache miss.
pub async fn cached_translate(
    state: &AppState,
    marshaled_messages: Vec<String>,
    marshaled_tools: Vec<String>,
    translate: impl FnOnce() -> (Vec<UpstreamMessage>, Vec<ToolDefinition>),
) -> (Vec<UpstreamMessage>, Vec<ToolDefinition>) {
    let messages_key = gw_cache::messages_key(&marshaled_messages);
    let tools_key = (!marshaled_tools.is_empty()).then(|| gw_cache::tools_key(&marshaled_tools));

    let cached_messages = state.translate_cache.get(&messages_key).await;
    let cached_tools = match &tools_key {
        Some(k) => state.tools_cache.get(k).await,
        None => Some(Vec::new()),
    };

    if let (Some(m), Some(t)) = (&cached_messages, &cached_tools) {
        return (m.clone(), t.clone());
    }

    let (messages, tools) = translate();
    if cached_messages.is_none() {
        state.translate_cache.set(messages_key, messages.clone(), TRANSLATE_CACHE_TTL).await;
    }
    if cached_tools.is_none() {
        if let Some(k) = tools_key {
            state.tools_cache.set(k, tools.clone(), TRANSLATE_CACHE_TTL).await;
        }
    }
    (messages, tools)
}

/// Marshal each message/tool to its canonical JSON string, the form the
/// cache keys are hashed over.
pub fn marshal_all(values: &[Value]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn account_label(account: &Account) -> String {
    if account.license_id.is_empty() {
        "static".to_string()
    } else {
        account.license_id.clone()
    }
}

/// Releases its account back to the pool when dropped — on early return,
/// panic, or normal completion alike.
pub struct AccountGuard {
    state: AppState,
    account: Option<Arc<Account>>,
}

impl AccountGuard {
    pub fn account(&self) -> &Account {
        self.account.as_deref().expect("account taken before guard dropped")
    }
}

impl Drop for AccountGuard {
    fn drop(&mut self) {
        if let Some(account) = self.account.take() {
            self.state.pool.release(account);
        }
    }
}

/// POST the payload upstream, rotating to a different account on 477 (out
/// of quota) up to `min(pool size, 3)` attempts. The returned guard holds
/// the account that produced the response and releases it on drop.
pub async fn send_with_retry(
    state: &AppState,
    payload: &UpstreamPayload,
) -> Result<(AccountGuard, reqwest::Response), GatewayError> {
    let attempts = state.pool.size().min(MAX_QUOTA_RETRIES).max(1);
    let mut last_capacity = false;

    for _ in 0..attempts {
        let account = state.pool.acquire(std::future::pending::<()>()).await.map_err(|e| match e {
            AcquireError::Timeout => GatewayError::Capacity,
            AcquireError::AllUnavailable => GatewayError::Capacity,
            AcquireError::Cancelled => GatewayError::Internal("account acquisition cancelled".into()),
        })?;

        match state.upstream.send_chat(&account, payload).await {
            Ok(resp) => {
                let guard = AccountGuard { state: state.clone(), account: Some(account) };
                return Ok((guard, resp));
            }
            Err(ChatError::NoQuota) => {
                state.pool.release(account);
                last_capacity = true;
                continue;
            }
            Err(e) => {
                state.pool.release(account);
                return Err(translate_chat_error(e));
            }
        }
    }

    let _ = last_capacity;
    Err(GatewayError::Capacity)
}

fn translate_chat_error(err: ChatError) -> GatewayError {
    match err {
        ChatError::NoQuota => GatewayError::Capacity,
        ChatError::Upstream { status, body } => GatewayError::Upstream { status, body },
        ChatError::Request(e) => GatewayError::Internal(format!("upstream request failed: {e}")),
        ChatError::Refresh(e) => GatewayError::Internal(format!("JWT refresh failed: {e}")),
    }
}

/// Records one request outcome against the metrics ring on drop. Used for
/// both streaming (where "success" depends on whether any bytes reached
/// the client) and non-streaming (where it is known up front) paths.
pub struct MetricsRecorder {
    state: AppState,
    model: String,
    account: String,
    started: Instant,
    success: bool,
}

impl MetricsRecorder {
    pub fn start(state: AppState, model: impl Into<String>, account: &Account) -> Self {
        Self {
            state,
            model: model.into(),
            account: account_label(account),
            started: Instant::now(),
            success: false,
        }
    }

    pub fn mark_success(&mut self) {
        self.success = true;
    }
}

impl Drop for MetricsRecorder {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed().as_millis() as u64;
        self.state.metrics.record(self.success, elapsed, self.model.clone(), self.account.clone());
    }
}

/// Validation shared by both facades: a known model and a non-empty
/// message list. `max_tokens`, when present, must be positive.
pub fn validate_common(model: &str, messages_len: usize, max_tokens: Option<i64>) -> Result<(), GatewayError> {
    if model.trim().is_empty() {
        return Err(GatewayError::Validation("\"model\" is required".into()));
    }
    if messages_len == 0 {
        return Err(GatewayError::Validation("\"messages\" must not be empty".into()));
    }
    if let Some(max_tokens) = max_tokens {
        if max_tokens <= 0 {
            return Err(GatewayError::Validation("\"max_tokens\" must be positive".into()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_common_rejects_empty_model() {
        assert!(validate_common("", 1, None).is_err());
    }

    #[test]
    fn validate_common_rejects_empty_messages() {
        assert!(validate_common("gpt-x", 0, None).is_err());
    }

    #[test]
    fn validate_common_rejects_non_positive_max_tokens() {
        assert!(validate_common("gpt-x", 1, Some(0)).is_err());
        assert!(validate_common("gpt-x", 1, Some(-1)).is_err());
    }

    #[test]
    fn validate_common_accepts_well_formed_request() {
        assert!(validate_common("gpt-x", 1, Some(256)).is_ok());
    }

    #[test]
    fn marshal_all_produces_canonical_json_strings() {
        let values = vec![serde_json::json!({"a": 1})];
        assert_eq!(marshal_all(&values), vec!["{\"a\":1}".to_string()]);
    }
}
