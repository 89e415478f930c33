// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Tool-schema validation and simplification.
//!
//! Upstream only accepts a restricted JSON-Schema subset: flat objects, a
//! bounded property count, bounded nesting, no union types. [`sanitize_tools`]
//! rewrites or collapses whatever the client sent into that subset, always
//! producing something upstream accepts rather than failing the request.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Map, Value};

use crate::types::ToolDefinition;

const MAX_PROPERTIES: usize = 15;
const MAX_DEPTH: usize = 5;
const PRESERVED_ON_COLLAPSE: usize = 5;

fn name_re() -> &'static Regex {
    static NAME_RE: OnceLock<Regex> = OnceLock::new();
    NAME_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.\-]{1,64}$").unwrap())
}

const ALLOWED_FORMATS: &[&str] = &["email", "uri", "date", "date-time"];
const COPIED_KEYWORDS: &[&str] = &[
    "description", "enum", "pattern", "minimum", "maximum",
    "minLength", "maxLength", "minItems", "maxItems", "format",
];

/// One raw tool as submitted by a client: `(name, description, parameters)`.
pub struct RawTool {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Sanitize a batch of tools. Tools whose name fails the naming regex are
/// dropped entirely; every surviving tool's `parameters`
/// schema is rewritten in place to the upstream-acceptable subset.
pub fn sanitize_tools(tools: Vec<RawTool>) -> Vec<ToolDefinition> {
    tools
        .into_iter()
        .filter(|t| name_re().is_match(&t.name))
        .map(|t| ToolDefinition {
            name: t.name,
            description: t.description,
            parameters: sanitize_schema_root(&t.parameters),
        })
        .collect()
}

/// Top-level schema rewrite: forces `type:"object"`, `additionalProperties:
/// false`, collapses an oversized property set, and recurses into the rest.
fn sanitize_schema_root(schema: &Value) -> Value {
    let empty = Map::new();
    let props = schema.get("properties").and_then(Value::as_object).unwrap_or(&empty);

    if props.len() > MAX_PROPERTIES {
        return collapse_oversized(props, schema.get("required"));
    }

    let mut sanitized_props = Map::new();
    let mut renames: Vec<(String, String)> = Vec::new();
    for (name, sub) in props {
        let safe_name = sanitize_property_name(name);
        sanitized_props.insert(safe_name.clone(), sanitize_node(sub, 1));
        if safe_name != *name {
            renames.push((name.clone(), safe_name));
        }
    }

    let required = filter_required(schema.get("required"), &sanitized_props, &renames);

    json!({
        "type": "object",
        "properties": sanitized_props,
        "additionalProperties": false,
        "required": required,
    })
}

/// A `data: {type:"string"}` catch-all plus up to 5
/// lexicographically-first original properties, preserved as-is (just
/// re-sanitized) for documentation value.
fn collapse_oversized(props: &Map<String, Value>, required: Option<&Value>) -> Value {
    let total = props.len();
    let mut names: Vec<&String> = props.keys().collect();
    names.sort();

    let mut sanitized_props = Map::new();
    sanitized_props.insert(
        "data".to_string(),
        json!({
            "type": "string",
            "description": format!("Provide all {total} required fields as a single JSON string"),
        }),
    );

    let mut renames = Vec::new();
    for name in names.into_iter().take(PRESERVED_ON_COLLAPSE) {
        let safe_name = sanitize_property_name(name);
        sanitized_props.insert(safe_name.clone(), sanitize_node(&props[name], 1));
        if safe_name != *name {
            renames.push((name.clone(), safe_name));
        }
    }

    let required = filter_required(required, &sanitized_props, &renames);

    json!({
        "type": "object",
        "properties": sanitized_props,
        "additionalProperties": false,
        "required": required,
    })
}

/// Recurse into one property's schema node. `depth` counts nesting below
/// the tool's top-level object (the top level itself is depth 0).
fn sanitize_node(node: &Value, depth: usize) -> Value {
    let Some(obj) = node.as_object() else {
        return json!({ "type": "string" });
    };

    if obj.contains_key("anyOf") || obj.contains_key("oneOf") || obj.contains_key("allOf") {
        return json!({
            "type": "string",
            "description": "union schema collapsed — provide as JSON string",
        });
    }

    if depth > MAX_DEPTH {
        return json!({
            "type": "string",
            "description": "nested object — provide as JSON string",
        });
    }

    let node_type = obj.get("type").and_then(Value::as_str).unwrap_or("string");

    match node_type {
        "object" => {
            let empty = Map::new();
            let props = obj.get("properties").and_then(Value::as_object).unwrap_or(&empty);
            let mut sanitized_props = Map::new();
            let mut renames = Vec::new();
            for (name, sub) in props {
                let safe_name = sanitize_property_name(name);
                sanitized_props.insert(safe_name.clone(), sanitize_node(sub, depth + 1));
                if safe_name != *name {
                    renames.push((name.clone(), safe_name));
                }
            }
            let required = filter_required(obj.get("required"), &sanitized_props, &renames);
            let mut out = Map::new();
            out.insert("type".into(), json!("object"));
            out.insert("properties".into(), Value::Object(sanitized_props));
            out.insert("additionalProperties".into(), json!(false));
            out.insert("required".into(), required);
            copy_whitelisted(obj, &mut out);
            Value::Object(out)
        }
        "array" => {
            let item_type = obj
                .get("items")
                .and_then(|i| i.get("type"))
                .and_then(Value::as_str)
                .unwrap_or("string");
            let mut out = Map::new();
            out.insert("type".into(), json!("array"));
            out.insert("items".into(), json!({ "type": item_type }));
            copy_whitelisted(obj, &mut out);
            Value::Object(out)
        }
        primitive => {
            let mut out = Map::new();
            out.insert("type".into(), json!(primitive));
            copy_whitelisted(obj, &mut out);
            Value::Object(out)
        }
    }
}

fn copy_whitelisted(src: &Map<String, Value>, dst: &mut Map<String, Value>) {
    for key in COPIED_KEYWORDS {
        if let Some(v) = src.get(*key) {
            if *key == "format" {
                if let Some(fmt) = v.as_str() {
                    if !ALLOWED_FORMATS.contains(&fmt) {
                        continue;
                    }
                }
            }
            dst.insert((*key).to_string(), v.clone());
        }
    }
}

/// Names failing the regex are stripped of disallowed
/// characters and truncated to 64; an empty result becomes `"param"`.
fn sanitize_property_name(name: &str) -> String {
    if name_re().is_match(name) {
        return name.to_string();
    }
    let filtered: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '.' || *c == '-')
        .take(64)
        .collect();
    if filtered.is_empty() {
        "param".to_string()
    } else {
        filtered
    }
}

/// `required` is filtered to names that survived renaming and
/// still exist in the (possibly collapsed) `properties` map.
fn filter_required(required: Option<&Value>, properties: &Map<String, Value>, renames: &[(String, String)]) -> Value {
    let Some(required) = required.and_then(Value::as_array) else {
        return json!([]);
    };
    let mut out = Vec::new();
    for r in required {
        let Some(name) = r.as_str() else { continue };
        let resolved = renames
            .iter()
            .find(|(orig, _)| orig == name)
            .map(|(_, renamed)| renamed.as_str())
            .unwrap_or(name);
        if properties.contains_key(resolved) && !out.contains(&json!(resolved)) {
            out.push(json!(resolved));
        }
    }
    Value::Array(out)
}

/// Validates a tool-call returned by upstream: the
/// id and function name must be non-empty, and if arguments are present
/// they must parse as JSON.
pub fn validate_tool_call(id: &str, name: &str, arguments: Option<&str>) -> Result<(), String> {
    if id.is_empty() {
        return Err("tool call id is empty".to_string());
    }
    if name.is_empty() {
        return Err("tool call function name is empty".to_string());
    }
    if let Some(args) = arguments {
        if !args.is_empty() {
            serde_json::from_str::<Value>(args).map_err(|e| format!("tool call arguments are not valid JSON: {e}"))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(name: &str, params: Value) -> RawTool {
        RawTool { name: name.to_string(), description: "d".to_string(), parameters: params }
    }

    #[test]
    fn rejects_invalid_tool_name() {
        let tools = sanitize_tools(vec![raw("bad name!", json!({"type": "object", "properties": {}}))]);
        assert!(tools.is_empty());
    }

    #[test]
    fn keeps_valid_tool_name() {
        let tools = sanitize_tools(vec![raw("get_weather", json!({"type": "object", "properties": {}}))]);
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "get_weather");
    }

    #[test]
    fn forces_object_type_and_additional_properties_false() {
        let tools = sanitize_tools(vec![raw("f", json!({"properties": {"a": {"type": "string"}}}))]);
        assert_eq!(tools[0].parameters["type"], "object");
        assert_eq!(tools[0].parameters["additionalProperties"], false);
    }

    #[test]
    fn collapses_when_over_fifteen_properties() {
        let mut props = Map::new();
        for i in 0..20 {
            props.insert(format!("field{i:02}"), json!({"type": "string"}));
        }
        let tools = sanitize_tools(vec![raw("f", json!({"type": "object", "properties": props}))]);
        let sanitized_props = tools[0].parameters["properties"].as_object().unwrap();
        // 1 "data" catch-all + 5 preserved
        assert_eq!(sanitized_props.len(), 6);
        assert!(sanitized_props.contains_key("data"));
        assert_eq!(
            sanitized_props["data"]["description"],
            "Provide all 20 required fields as a single JSON string"
        );
        // lexicographically first 5 of field00..field19
        assert!(sanitized_props.contains_key("field00"));
        assert!(sanitized_props.contains_key("field04"));
        assert!(!sanitized_props.contains_key("field05"));
    }

    #[test]
    fn collapses_deep_nesting_beyond_max_depth() {
        let mut node = json!({"type": "string"});
        for _ in 0..8 {
            node = json!({"type": "object", "properties": {"x": node}});
        }
        let params = json!({"type": "object", "properties": {"root": node}});
        let tools = sanitize_tools(vec![raw("f", params)]);
        // Walk down until we hit the collapsed placeholder.
        let mut cur = &tools[0].parameters["properties"]["root"];
        loop {
            if cur["type"] == "string" && cur.get("description").is_some() {
                break;
            }
            cur = &cur["properties"]["x"];
        }
        assert_eq!(cur["description"], "nested object — provide as JSON string");
    }

    #[test]
    fn collapses_union_schemas() {
        let params = json!({
            "type": "object",
            "properties": {
                "choice": {"anyOf": [{"type": "string"}, {"type": "number"}]}
            }
        });
        let tools = sanitize_tools(vec![raw("f", params)]);
        assert_eq!(tools[0].parameters["properties"]["choice"]["type"], "string");
    }

    #[test]
    fn flattens_array_items_and_defaults_to_string() {
        let params = json!({
            "type": "object",
            "properties": {
                "tags": {"type": "array"},
                "nums": {"type": "array", "items": {"type": "number"}}
            }
        });
        let tools = sanitize_tools(vec![raw("f", params)]);
        assert_eq!(tools[0].parameters["properties"]["tags"]["items"]["type"], "string");
        assert_eq!(tools[0].parameters["properties"]["nums"]["items"]["type"], "number");
    }

    #[test]
    fn rewrites_invalid_property_names() {
        let params = json!({
            "type": "object",
            "properties": { "bad name!!": {"type": "string"} },
            "required": ["bad name!!"]
        });
        let tools = sanitize_tools(vec![raw("f", params)]);
        let props = tools[0].parameters["properties"].as_object().unwrap();
        assert!(props.contains_key("badname"));
        assert_eq!(tools[0].parameters["required"], json!(["badname"]));
    }

    #[test]
    fn drops_required_entries_that_no_longer_exist() {
        let params = json!({
            "type": "object",
            "properties": { "a": {"type": "string"} },
            "required": ["a", "ghost"]
        });
        let tools = sanitize_tools(vec![raw("f", params)]);
        assert_eq!(tools[0].parameters["required"], json!(["a"]));
    }

    #[test]
    fn only_whitelisted_keywords_survive_on_primitives() {
        let params = json!({
            "type": "object",
            "properties": {
                "code": {"type": "string", "description": "desc", "pattern": "^[a-z]+$", "not_whitelisted": true}
            }
        });
        let tools = sanitize_tools(vec![raw("f", params)]);
        let field = &tools[0].parameters["properties"]["code"];
        assert_eq!(field["description"], "desc");
        assert_eq!(field["pattern"], "^[a-z]+$");
        assert!(field.get("not_whitelisted").is_none());
    }

    #[test]
    fn rejects_disallowed_format_values() {
        let params = json!({
            "type": "object",
            "properties": { "x": {"type": "string", "format": "uuid"} }
        });
        let tools = sanitize_tools(vec![raw("f", params)]);
        assert!(tools[0].parameters["properties"]["x"].get("format").is_none());
    }

    #[test]
    fn allows_whitelisted_format_values() {
        let params = json!({
            "type": "object",
            "properties": { "x": {"type": "string", "format": "email"} }
        });
        let tools = sanitize_tools(vec![raw("f", params)]);
        assert_eq!(tools[0].parameters["properties"]["x"]["format"], "email");
    }

    #[test]
    fn validate_tool_call_rejects_empty_id() {
        assert!(validate_tool_call("", "f", None).is_err());
    }

    #[test]
    fn validate_tool_call_rejects_malformed_json_arguments() {
        assert!(validate_tool_call("id1", "f", Some("{not json")).is_err());
    }

    #[test]
    fn validate_tool_call_accepts_well_formed_call() {
        assert!(validate_tool_call("id1", "f", Some("{\"a\":1}")).is_ok());
    }
}
