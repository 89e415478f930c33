// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Image-part validation for `data:` URLs embedded in user messages.
//!
//! Only a handful of mime types are accepted and decoded size is capped;
//! anything else is dropped silently rather than failing the request, so a
//! single bad attachment never takes down an otherwise-valid message.

use base64::Engine;

const MAX_DECODED_BYTES: usize = 10 * 1024 * 1024;
const ACCEPTED_MIME_TYPES: &[&str] = &["image/png", "image/jpeg", "image/gif", "image/webp"];

/// Parse and validate a `data:<mime>;base64,<data>` URL. Returns
/// `(mime_type, base64_data)` on success. Rejects unsupported mime types
/// and oversized payloads; the base64 length is checked before decoding
/// (`len * 3 / 4` is a tight over-estimate of decoded size) so a hostile
/// payload cannot force a large allocation just to be rejected anyway.
pub fn validate_data_url_image(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (meta, b64) = rest.split_once(',')?;
    let mime = meta.strip_suffix(";base64")?;
    if !ACCEPTED_MIME_TYPES.contains(&mime) {
        return None;
    }

    let estimated_decoded = b64.len() * 3 / 4;
    if estimated_decoded > MAX_DECODED_BYTES {
        return None;
    }

    let decoded = base64::engine::general_purpose::STANDARD.decode(b64).ok()?;
    if decoded.len() > MAX_DECODED_BYTES {
        return None;
    }

    Some((mime.to_string(), b64.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_png_data_url() -> &'static str {
        "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNk+A8AAQUBAScY42YAAAAASUVORK5CYII="
    }

    #[test]
    fn accepts_valid_png() {
        let (mime, data) = validate_data_url_image(tiny_png_data_url()).expect("should validate");
        assert_eq!(mime, "image/png");
        assert!(!data.is_empty());
    }

    #[test]
    fn rejects_unsupported_mime_type() {
        let url = "data:application/pdf;base64,JVBERi0xLjQK";
        assert!(validate_data_url_image(url).is_none());
    }

    #[test]
    fn rejects_non_data_url() {
        assert!(validate_data_url_image("https://example.com/a.png").is_none());
    }

    #[test]
    fn rejects_malformed_data_url_missing_comma() {
        assert!(validate_data_url_image("data:image/png;base64").is_none());
    }

    #[test]
    fn rejects_oversized_payload_by_length_precheck() {
        let huge_b64 = "A".repeat(20 * 1024 * 1024);
        let url = format!("data:image/png;base64,{huge_b64}");
        assert!(validate_data_url_image(&url).is_none());
    }

    #[test]
    fn rejects_invalid_base64() {
        let url = "data:image/png;base64,not-valid-base64!!!";
        assert!(validate_data_url_image(url).is_none());
    }
}
