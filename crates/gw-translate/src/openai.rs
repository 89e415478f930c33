// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! OpenAI Chat Completions ↔ upstream translation.
//!
//! `to_upstream` consumes a parsed `/v1/chat/completions` request body and
//! produces the ordered [`UpstreamMessage`] list plus sanitized tool
//! definitions that [`crate::types::UpstreamPayload`] wraps for dispatch.

use std::collections::HashMap;

use serde_json::Value;

use crate::image::validate_data_url_image;
use crate::sanitize::{sanitize_tools, RawTool};
use crate::types::UpstreamMessage;

/// Translate an OpenAI `messages` array plus an optional `tools` array into
/// the upstream wire form. `messages` and `tools` are the raw
/// `serde_json::Value`s taken straight off the request body so that unknown
/// or best-effort fields are handled without a strict intermediate struct.
pub fn to_upstream(messages: &[Value], tools: &[Value]) -> (Vec<UpstreamMessage>, Vec<crate::types::ToolDefinition>) {
    let id_to_name = build_tool_name_lookup(messages);

    let mut out = Vec::new();
    for msg in messages {
        let role = msg.get("role").and_then(Value::as_str).unwrap_or("user");
        match role {
            "system" => {
                if let Some(text) = extract_text(msg.get("content")) {
                    if !text.is_empty() {
                        out.push(UpstreamMessage::System { content: text });
                    }
                }
            }
            "user" => translate_user_message(msg, &mut out),
            "assistant" => translate_assistant_message(msg, &mut out),
            "tool" => translate_tool_message(msg, &id_to_name, &mut out),
            _ => {
                if let Some(text) = extract_text(msg.get("content")) {
                    out.push(UpstreamMessage::UserText { content: text });
                }
            }
        }
    }

    let sanitized = sanitize_tools(parse_tool_defs(tools));
    (out, sanitized)
}

/// First pass over the transcript: every `assistant.tool_calls[].id` maps
/// to its function name so a later `tool` role message can look up the
/// name it is responding to.
fn build_tool_name_lookup(messages: &[Value]) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for msg in messages {
        if msg.get("role").and_then(Value::as_str) != Some("assistant") {
            continue;
        }
        let Some(calls) = msg.get("tool_calls").and_then(Value::as_array) else { continue };
        for call in calls {
            let id = call.get("id").and_then(Value::as_str);
            let name = call.get("function").and_then(|f| f.get("name")).and_then(Value::as_str);
            if let (Some(id), Some(name)) = (id, name) {
                map.insert(id.to_string(), name.to_string());
            }
        }
    }
    map
}

fn translate_user_message(msg: &Value, out: &mut Vec<UpstreamMessage>) {
    match msg.get("content") {
        Some(Value::Array(parts)) => {
            let has_image = parts.iter().any(|p| p.get("type").and_then(Value::as_str) == Some("image_url"));
            let mut texts = Vec::new();
            for part in parts {
                match part.get("type").and_then(Value::as_str) {
                    Some("image_url") => {
                        let url = part
                            .get("image_url")
                            .and_then(|u| u.get("url"))
                            .and_then(Value::as_str)
                            .unwrap_or("");
                        if let Some((media_type, data)) = validate_data_url_image(url) {
                            out.push(UpstreamMessage::Media { media_type, base64_data: data });
                        }
                        // Invalid/unsupported images are dropped silently;
                        // sibling text in this part array is unaffected.
                    }
                    _ => {
                        if let Some(text) = part.get("text").and_then(Value::as_str) {
                            texts.push(text.to_string());
                        }
                    }
                }
            }
            if has_image {
                // One adjacent user_message for all remaining text, joined.
                let joined = texts.join("\n");
                if !joined.is_empty() {
                    out.push(UpstreamMessage::UserText { content: joined });
                }
            } else {
                // No image in this array: one user_message per text block.
                for text in texts {
                    if !text.is_empty() {
                        out.push(UpstreamMessage::UserText { content: text });
                    }
                }
            }
        }
        Some(Value::String(text)) => out.push(UpstreamMessage::UserText { content: text.clone() }),
        _ => {}
    }
}

fn translate_assistant_message(msg: &Value, out: &mut Vec<UpstreamMessage>) {
    let tool_calls = msg.get("tool_calls").and_then(Value::as_array);
    match tool_calls {
        Some(calls) if !calls.is_empty() => {
            if let Some(text) = extract_text(msg.get("content")) {
                if !text.is_empty() {
                    out.push(UpstreamMessage::AssistantText { content: text });
                }
            }
            for call in calls {
                let id = call.get("id").and_then(Value::as_str).unwrap_or("").to_string();
                let name = call
                    .get("function")
                    .and_then(|f| f.get("name"))
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();
                let raw_args = call
                    .get("function")
                    .and_then(|f| f.get("arguments"))
                    .and_then(Value::as_str)
                    .unwrap_or("");
                let arguments_json = normalize_arguments(raw_args);
                out.push(UpstreamMessage::AssistantToolCall { id, tool_name: name, arguments_json });
            }
        }
        _ => {
            if let Some(text) = extract_text(msg.get("content")) {
                out.push(UpstreamMessage::AssistantText { content: text });
            }
        }
    }
}

fn translate_tool_message(msg: &Value, id_to_name: &HashMap<String, String>, out: &mut Vec<UpstreamMessage>) {
    let id = msg.get("tool_call_id").and_then(Value::as_str).unwrap_or("").to_string();
    let tool_name = id_to_name.get(&id).cloned().unwrap_or_else(|| "Unknown".to_string());
    let result = extract_text(msg.get("content")).unwrap_or_default();
    out.push(UpstreamMessage::ToolResult { id, tool_name, result });
}

/// Unmarshal+remarshal normalizes whitespace/key order when the argument
/// fragment parses as JSON; a non-JSON fragment passes through unchanged.
fn normalize_arguments(raw: &str) -> String {
    match serde_json::from_str::<Value>(raw) {
        Ok(v) => serde_json::to_string(&v).unwrap_or_else(|_| raw.to_string()),
        Err(_) => raw.to_string(),
    }
}

fn extract_text(content: Option<&Value>) -> Option<String> {
    match content? {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => {
            let mut buf = String::new();
            for part in parts {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    if !buf.is_empty() {
                        buf.push('\n');
                    }
                    buf.push_str(text);
                }
            }
            Some(buf)
        }
        _ => None,
    }
}

fn parse_tool_defs(tools: &[Value]) -> Vec<RawTool> {
    tools
        .iter()
        .filter_map(|t| {
            let func = t.get("function").unwrap_or(t);
            let name = func.get("name").and_then(Value::as_str)?.to_string();
            let description = func.get("description").and_then(Value::as_str).unwrap_or("").to_string();
            let parameters = func.get("parameters").cloned().unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}}));
            Some(RawTool { name, description, parameters })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn system_message_maps_to_system() {
        let msgs = vec![json!({"role": "system", "content": "be terse"})];
        let (out, _) = to_upstream(&msgs, &[]);
        assert_eq!(out, vec![UpstreamMessage::System { content: "be terse".into() }]);
    }

    #[test]
    fn plain_user_string_becomes_one_user_text() {
        let msgs = vec![json!({"role": "user", "content": "hello"})];
        let (out, _) = to_upstream(&msgs, &[]);
        assert_eq!(out, vec![UpstreamMessage::UserText { content: "hello".into() }]);
    }

    #[test]
    fn assistant_with_tool_calls_emits_text_then_tool_calls() {
        let msgs = vec![json!({
            "role": "assistant",
            "content": "let me check",
            "tool_calls": [{"id": "t1", "type": "function", "function": {"name": "f", "arguments": "{\"a\":1}"}}]
        })];
        let (out, _) = to_upstream(&msgs, &[]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], UpstreamMessage::AssistantText { content: "let me check".into() });
        assert_eq!(out[1], UpstreamMessage::AssistantToolCall {
            id: "t1".into(), tool_name: "f".into(), arguments_json: "{\"a\":1}".into(),
        });
    }

    #[test]
    fn tool_message_resolves_name_from_earlier_assistant_call() {
        let msgs = vec![
            json!({"role": "assistant", "tool_calls": [{"id": "t1", "function": {"name": "get_weather", "arguments": "{}"}}]}),
            json!({"role": "tool", "tool_call_id": "t1", "content": "sunny"}),
        ];
        let (out, _) = to_upstream(&msgs, &[]);
        assert_eq!(out[1], UpstreamMessage::ToolResult { id: "t1".into(), tool_name: "get_weather".into(), result: "sunny".into() });
    }

    #[test]
    fn tool_message_falls_back_to_unknown_name() {
        let msgs = vec![json!({"role": "tool", "tool_call_id": "ghost", "content": "x"})];
        let (out, _) = to_upstream(&msgs, &[]);
        assert_eq!(out[0], UpstreamMessage::ToolResult { id: "ghost".into(), tool_name: "Unknown".into(), result: "x".into() });
    }

    #[test]
    fn unknown_role_falls_back_to_user_text() {
        let msgs = vec![json!({"role": "developer", "content": "hi"})];
        let (out, _) = to_upstream(&msgs, &[]);
        assert_eq!(out[0], UpstreamMessage::UserText { content: "hi".into() });
    }

    #[test]
    fn non_json_arguments_pass_through_unchanged() {
        let msgs = vec![json!({
            "role": "assistant",
            "tool_calls": [{"id": "t1", "function": {"name": "f", "arguments": "not json"}}]
        })];
        let (out, _) = to_upstream(&msgs, &[]);
        assert_eq!(out[0], UpstreamMessage::AssistantToolCall {
            id: "t1".into(), tool_name: "f".into(), arguments_json: "not json".into(),
        });
    }

    #[test]
    fn array_content_with_multiple_text_parts_emits_one_message_each() {
        let msgs = vec![json!({"role": "user", "content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]})];
        let (out, _) = to_upstream(&msgs, &[]);
        assert_eq!(out, vec![
            UpstreamMessage::UserText { content: "a".into() },
            UpstreamMessage::UserText { content: "b".into() },
        ]);
    }

    #[test]
    fn image_url_part_becomes_media_message() {
        let tiny_png = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNk+A8AAQUBAScY42YAAAAASUVORK5CYII=";
        let msgs = vec![json!({"role": "user", "content": [{"type": "image_url", "image_url": {"url": tiny_png}}]})];
        let (out, _) = to_upstream(&msgs, &[]);
        assert!(matches!(out[0], UpstreamMessage::Media { .. }));
    }

    #[test]
    fn image_with_adjacent_text_parts_joins_into_one_message() {
        let tiny_png = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNk+A8AAQUBAScY42YAAAAASUVORK5CYII=";
        let msgs = vec![json!({"role": "user", "content": [
            {"type": "image_url", "image_url": {"url": tiny_png}},
            {"type": "text", "text": "what is this"},
            {"type": "text", "text": "exactly"},
        ]})];
        let (out, _) = to_upstream(&msgs, &[]);
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0], UpstreamMessage::Media { .. }));
        assert_eq!(out[1], UpstreamMessage::UserText { content: "what is this\nexactly".into() });
    }

    #[test]
    fn tool_definitions_are_sanitized() {
        let tools = vec![json!({
            "type": "function",
            "function": {"name": "bad name!", "description": "d", "parameters": {"type": "object", "properties": {}}}
        })];
        let (_, sanitized) = to_upstream(&[], &tools);
        assert!(sanitized.is_empty());
    }
}
