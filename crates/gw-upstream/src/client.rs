// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The upstream HTTP client: builds the fixed header set, POSTs the
//! translated payload, and handles the two upstream-specific status codes
//! (401 refresh-and-retry-once, 477 quota exhaustion).

use std::time::Duration;

use futures::StreamExt;
use gw_account::Account;
use gw_translate::UpstreamPayload;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use thiserror::Error;
use tracing::debug;

/// Generous ceiling for an entire streaming turn. reqwest has no separate
/// response-header-only timeout knob, so this single overall timeout also
/// stands in for the header-wait budget.
const CHAT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
/// Cap on how much of a non-200 body we read for diagnostics.
const DIAGNOSTIC_BODY_CAP: usize = 10 * 1024 * 1024;

const GRAZIE_AGENT: &str = r#"{"name":"aia:pycharm","version":"251.26094.80.13:251.26094.141"}"#;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("upstream request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("upstream marked this account out of quota (477)")]
    NoQuota,
    #[error("upstream returned {status}: {body}")]
    Upstream { status: StatusCode, body: String },
    #[error("JWT refresh failed: {0}")]
    Refresh(#[from] gw_account::RefreshError),
}

/// Thin wrapper around a [`reqwest::Client`] configured per §4.7: HTTP/2,
/// an idle connection pool, and separate header/overall timeouts.
pub struct UpstreamClient {
    http: reqwest::Client,
    chat_endpoint: String,
    jwt_refresh_endpoint: String,
}

impl UpstreamClient {
    pub fn new(
        chat_endpoint: impl Into<String>,
        jwt_refresh_endpoint: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .connect_timeout(Duration::from_secs(10))
            .timeout(CHAT_REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            chat_endpoint: chat_endpoint.into(),
            jwt_refresh_endpoint: jwt_refresh_endpoint.into(),
        })
    }

    fn headers(jwt: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert("Accept", HeaderValue::from_static("text/event-stream"));
        h.insert("Content-Type", HeaderValue::from_static("application/json"));
        h.insert("Cache-Control", HeaderValue::from_static("no-cache"));
        h.insert("User-Agent", HeaderValue::from_static("ktor-client"));
        h.insert("Accept-Charset", HeaderValue::from_static("UTF-8"));
        h.insert("grazie-agent", HeaderValue::from_static(GRAZIE_AGENT));
        h.insert(
            "grazie-authenticate-jwt",
            HeaderValue::from_str(jwt).unwrap_or_else(|_| HeaderValue::from_static("")),
        );
        h
    }

    /// POST the payload, automatically refreshing and retrying once on a
    /// 401. Returns the raw response on success (still an SSE body stream)
    /// so callers can feed it straight into [`crate::transcoder`].
    pub async fn send_chat(
        &self,
        account: &Account,
        payload: &UpstreamPayload,
    ) -> Result<reqwest::Response, ChatError> {
        let body = payload.to_json();
        let jwt = account.current_jwt().await;
        let resp = self
            .http
            .post(&self.chat_endpoint)
            .headers(Self::headers(&jwt))
            .json(&body)
            .send()
            .await?;

        if resp.status() == StatusCode::UNAUTHORIZED && !account.is_static() {
            // Drain the body before retrying so the connection is returned
            // to the pool cleanly.
            let _ = resp.bytes().await;
            debug!(license_id = %account.license_id, "upstream 401; refreshing JWT and retrying once");
            gw_account::refresh(&self.http, &self.jwt_refresh_endpoint, account).await?;
            let jwt = account.current_jwt().await;
            let resp = self
                .http
                .post(&self.chat_endpoint)
                .headers(Self::headers(&jwt))
                .json(&body)
                .send()
                .await?;
            return self.finish(account, resp).await;
        }

        self.finish(account, resp).await
    }

    async fn finish(&self, account: &Account, resp: reqwest::Response) -> Result<reqwest::Response, ChatError> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        if resp.status().as_u16() == 477 {
            account.mark_no_quota().await;
            return Err(ChatError::NoQuota);
        }
        Err(Self::diagnostic_error(resp).await)
    }

    async fn diagnostic_error(resp: reqwest::Response) -> ChatError {
        let status = resp.status();
        let mut body = Vec::new();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => {
                    body.extend_from_slice(&bytes);
                    if body.len() >= DIAGNOSTIC_BODY_CAP {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        ChatError::Upstream { status, body: String::from_utf8_lossy(&body).into_owned() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_carry_the_exact_fixed_set() {
        let h = UpstreamClient::headers("abc.def.ghi");
        assert_eq!(h.get("Accept").unwrap(), "text/event-stream");
        assert_eq!(h.get("User-Agent").unwrap(), "ktor-client");
        assert_eq!(h.get("grazie-authenticate-jwt").unwrap(), "abc.def.ghi");
        assert!(h.get("grazie-agent").unwrap().to_str().unwrap().contains("aia:pycharm"));
    }

    #[test]
    fn headers_tolerate_jwt_with_invalid_header_bytes() {
        // A JWT should never contain a raw newline, but the header builder
        // must not panic if one somehow does.
        let h = UpstreamClient::headers("has\nnewline");
        assert_eq!(h.get("grazie-authenticate-jwt").unwrap(), "");
    }
}
