// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The error taxonomy every façade maps its failures into, and the two
//! dialect-specific JSON renderings (OpenAI, Anthropic) of that taxonomy.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Protocol dialect a response body should be shaped for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    OpenAi,
    Anthropic,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("no account currently has quota")]
    Capacity,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("upstream error ({status}): {body}")]
    Upstream { status: StatusCode, body: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    fn status(&self) -> StatusCode {
        match self {
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::Capacity => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Upstream { status, .. } => {
                if status.is_client_error() {
                    *status
                } else {
                    StatusCode::BAD_GATEWAY
                }
            }
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            GatewayError::Validation(m) => m.clone(),
            GatewayError::Capacity => "all configured accounts are out of quota".to_string(),
            GatewayError::NotFound(m) => m.clone(),
            GatewayError::Upstream { body, .. } => body.clone(),
            GatewayError::Internal(_) => "internal server error".to_string(),
        }
    }

    /// Anthropic's error-type tag (§7), distinct from the HTTP status.
    fn anthropic_type(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) => "invalid_request_error",
            GatewayError::Capacity => "rate_limit_error",
            GatewayError::NotFound(_) => "model_not_found_error",
            GatewayError::Upstream { status, .. } if status.is_client_error() => {
                "invalid_request_error"
            }
            GatewayError::Upstream { .. } | GatewayError::Internal(_) => "api_error",
        }
    }

    /// Render this error as an OpenAI-shaped error body.
    pub fn into_openai_response(self) -> Response {
        let status = self.status();
        let body = json!({ "error": { "message": self.message(), "type": self.anthropic_type() } });
        (status, axum::Json(body)).into_response()
    }

    /// Render this error as an Anthropic-shaped error body.
    pub fn into_anthropic_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "type": "error",
            "error": { "type": self.anthropic_type(), "message": self.message() },
        });
        (status, axum::Json(body)).into_response()
    }

    pub fn into_dialect_response(self, dialect: Dialect) -> Response {
        match dialect {
            Dialect::OpenAi => self.into_openai_response(),
            Dialect::Anthropic => self.into_anthropic_response(),
        }
    }
}

/// Default axum rendering (used by handlers with no dialect context, e.g.
/// `/v1/models`). Shaped like the OpenAI surface since that is this
/// gateway's oldest and most widely consumed facade.
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        self.into_openai_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_400() {
        let err = GatewayError::Validation("missing model".into());
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn capacity_maps_to_429() {
        assert_eq!(GatewayError::Capacity.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(GatewayError::Capacity.anthropic_type(), "rate_limit_error");
    }

    #[test]
    fn not_found_maps_to_404() {
        let err = GatewayError::NotFound("model".into());
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.anthropic_type(), "model_not_found_error");
    }

    #[test]
    fn upstream_client_error_passes_through_status() {
        let err = GatewayError::Upstream { status: StatusCode::FORBIDDEN, body: "nope".into() };
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn upstream_server_error_becomes_bad_gateway() {
        let err = GatewayError::Upstream { status: StatusCode::INTERNAL_SERVER_ERROR, body: "boom".into() };
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn internal_hides_message_detail() {
        let err = GatewayError::Internal("leaked secret".into());
        assert_eq!(err.message(), "internal server error");
    }
}
