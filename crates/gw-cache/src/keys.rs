// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Deterministic, version-prefixed cache key derivation.
//!
//! Keys are versioned (`v1`) so a future change to the hashed shape can
//! invalidate old entries just by bumping the prefix, without touching the
//! cache implementation itself.

use sha1::{Digest, Sha1};

fn sha1_hex(parts: &[&str]) -> String {
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Key for a memoized message-translation result: `msg:v1:<sha1>`, where
/// the hash input is each message's canonical JSON marshal, concatenated.
pub fn messages_key(marshaled_messages: &[String]) -> String {
    let refs: Vec<&str> = marshaled_messages.iter().map(String::as_str).collect();
    format!("msg:v1:{}", sha1_hex(&refs))
}

/// Key for a memoized tool-schema validation result: `tools:v1:<sha1>`.
pub fn tools_key(marshaled_tools: &[String]) -> String {
    let refs: Vec<&str> = marshaled_tools.iter().map(String::as_str).collect();
    format!("tools:v1:{}", sha1_hex(&refs))
}

/// Key for a quota snapshot: `quota:v1:<licenseID>` or, in static-JWT mode
/// (no license id), `quota:v1:<first 8 chars of the JWT>`.
pub fn quota_key(license_id: &str, jwt: &str) -> String {
    if !license_id.is_empty() {
        format!("quota:v1:{license_id}")
    } else {
        let prefix: String = jwt.chars().take(8).collect();
        format!("quota:v1:{prefix}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_key_is_deterministic() {
        let a = messages_key(&["{\"role\":\"user\"}".to_string()]);
        let b = messages_key(&["{\"role\":\"user\"}".to_string()]);
        assert_eq!(a, b);
        assert!(a.starts_with("msg:v1:"));
    }

    #[test]
    fn messages_key_differs_on_content() {
        let a = messages_key(&["one".to_string()]);
        let b = messages_key(&["two".to_string()]);
        assert_ne!(a, b);
    }

    #[test]
    fn quota_key_prefers_license_id() {
        assert_eq!(quota_key("lic-123", "jwt-ignored"), "quota:v1:lic-123");
    }

    #[test]
    fn quota_key_falls_back_to_jwt_prefix() {
        assert_eq!(quota_key("", "abcdefghijklmnop"), "quota:v1:abcdefgh");
    }

    #[test]
    fn quota_key_handles_short_jwt() {
        assert_eq!(quota_key("", "ab"), "quota:v1:ab");
    }
}
