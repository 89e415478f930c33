// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! `models.json` loading: the public-model-id → upstream-profile mapping
//! consulted by the `/v1/models` façade endpoint.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;

/// `{id -> upstream profile string}`. Built from either the `{models:
/// {...}}` object form or a flat array (identity map: each array entry
/// maps to itself).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelMap(BTreeMap<String, String>);

impl ModelMap {
    pub fn upstream_profile(&self, public_id: &str) -> Option<&str> {
        self.0.get(public_id).map(String::as_str)
    }

    pub fn public_ids(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn from_value(v: Value) -> anyhow::Result<Self> {
        match v {
            Value::Object(obj) => {
                let models = obj
                    .get("models")
                    .ok_or_else(|| anyhow::anyhow!("models.json object form must have a top-level `models` key"))?;
                let Value::Object(map) = models else {
                    anyhow::bail!("models.json `models` value must be an object");
                };
                let mut out = BTreeMap::new();
                for (id, profile) in map {
                    let profile = profile
                        .as_str()
                        .ok_or_else(|| anyhow::anyhow!("models.json entry `{id}` must map to a string profile"))?;
                    out.insert(id.clone(), profile.to_string());
                }
                Ok(Self(out))
            }
            Value::Array(ids) => {
                let mut out = BTreeMap::new();
                for id in ids {
                    let id = id.as_str().ok_or_else(|| anyhow::anyhow!("models.json array entries must be strings"))?;
                    out.insert(id.to_string(), id.to_string());
                }
                Ok(Self(out))
            }
            _ => anyhow::bail!("models.json must be either an object or an array"),
        }
    }
}

/// Load and parse `models.json` from `path`. A missing file is not an
/// error — it yields an empty map, since the gateway can still run with
/// no configured model aliases (`/v1/models` just returns an empty list).
pub async fn load_models(path: impl AsRef<Path>) -> anyhow::Result<ModelMap> {
    let path = path.as_ref();
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let v: Value = serde_json::from_slice(&bytes)?;
            ModelMap::from_value(v)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ModelMap::default()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_object_form() {
        let map = ModelMap::from_value(json!({"models": {"gpt-4": "openai-gpt-4-profile"}})).unwrap();
        assert_eq!(map.upstream_profile("gpt-4"), Some("openai-gpt-4-profile"));
    }

    #[test]
    fn parses_flat_array_as_identity_map() {
        let map = ModelMap::from_value(json!(["gpt-4", "claude-3"])).unwrap();
        assert_eq!(map.upstream_profile("gpt-4"), Some("gpt-4"));
        assert_eq!(map.upstream_profile("claude-3"), Some("claude-3"));
    }

    #[test]
    fn rejects_object_form_missing_models_key() {
        assert!(ModelMap::from_value(json!({"other": {}})).is_err());
    }

    #[test]
    fn rejects_non_string_profile_values() {
        assert!(ModelMap::from_value(json!({"models": {"gpt-4": 4}})).is_err());
    }

    #[tokio::test]
    async fn missing_file_yields_empty_map() {
        let map = load_models("/nonexistent/path/models.json").await.unwrap();
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models.json");
        tokio::fs::write(&path, r#"{"models":{"a":"b"}}"#).await.unwrap();
        let map = load_models(&path).await.unwrap();
        assert_eq!(map.upstream_profile("a"), Some("b"));
    }
}
