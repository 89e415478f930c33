// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Security headers middleware.
//!
//! # Headers applied to every response
//!
//! | Header                         | Value                             |
//! |--------------------------------|-----------------------------------|
//! | `Strict-Transport-Security`    | `max-age=31536000; includeSubDomains` |
//! | `X-Content-Type-Options`       | `nosniff`                         |
//! | `X-Frame-Options`              | `DENY`                            |
//! | `Referrer-Policy`              | `no-referrer`                     |
//! | `Permissions-Policy`           | camera/mic/geolocation disabled   |
//! | `Content-Security-Policy`      | strict, no inline scripts         |
//!
//! HSTS is set even though the gateway is commonly deployed behind a plain-HTTP
//! reverse proxy. If the operator terminates TLS in front of it the header
//! will already be there; if they don't, the header is simply unused.
//!
//! There is no CSRF guard here: every credential this gateway accepts
//! (`Authorization: Bearer`, `x-api-key`) is an explicit header a browser
//! never attaches automatically, so there is no ambient authority for a
//! cross-site request to ride on.

use axum::{
    http::HeaderValue,
    middleware::Next,
    extract::Request,
    response::Response,
};

// ── Constant header values ────────────────────────────────────────────────────

static HSTS: HeaderValue = HeaderValue::from_static("max-age=31536000; includeSubDomains");
static NO_SNIFF: HeaderValue = HeaderValue::from_static("nosniff");
static DENY_FRAME: HeaderValue = HeaderValue::from_static("DENY");
static NO_REFERRER: HeaderValue = HeaderValue::from_static("no-referrer");
static PERMISSIONS: HeaderValue =
    HeaderValue::from_static("camera=(), microphone=(), geolocation=()");
static CSP: HeaderValue = HeaderValue::from_static(
    "default-src 'self'; \
     script-src 'self'; \
     style-src 'self' 'unsafe-inline'; \
     img-src 'self' data:; \
     connect-src 'self'; \
     frame-ancestors 'none'; \
     base-uri 'none'; \
     object-src 'none'",
);

// ── Middleware ────────────────────────────────────────────────────────────────

/// Append security headers to every outgoing response.
pub async fn security_headers(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    apply(resp.headers_mut());
    resp
}

fn apply(h: &mut axum::http::HeaderMap) {
    h.insert(axum::http::header::STRICT_TRANSPORT_SECURITY, HSTS.clone());
    h.insert(axum::http::header::X_CONTENT_TYPE_OPTIONS, NO_SNIFF.clone());
    h.insert(axum::http::header::X_FRAME_OPTIONS, DENY_FRAME.clone());
    h.insert(axum::http::header::REFERRER_POLICY, NO_REFERRER.clone());
    h.insert("permissions-policy", PERMISSIONS.clone());
    h.insert(axum::http::header::CONTENT_SECURITY_POLICY, CSP.clone());
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;

    #[test]
    fn security_headers_are_applied() {
        let mut h = HeaderMap::new();
        apply(&mut h);
        assert_eq!(h.get(axum::http::header::X_CONTENT_TYPE_OPTIONS).unwrap(), "nosniff");
        assert_eq!(h.get(axum::http::header::X_FRAME_OPTIONS).unwrap(), "DENY");
        assert_eq!(h.get(axum::http::header::REFERRER_POLICY).unwrap(), "no-referrer");
        assert!(h.get(axum::http::header::CONTENT_SECURITY_POLICY).is_some());
        assert!(h.get(axum::http::header::STRICT_TRANSPORT_SECURITY).is_some());
        assert!(h.get("permissions-policy").is_some());
    }

    #[test]
    fn csp_has_no_websocket_directives() {
        let csp = CSP.to_str().unwrap();
        assert!(!csp.contains("ws:"));
        assert!(!csp.contains("wss:"));
    }
}
