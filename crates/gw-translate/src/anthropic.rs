// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Anthropic Messages ↔ upstream translation.
//!
//! Mirrors [`crate::openai::to_upstream`] but for the Anthropic dialect:
//! a top-level `system` field, content blocks instead of OpenAI's
//! `tool_calls` array, and `tool_result` blocks living inside `user`
//! messages rather than a separate `tool` role.

use std::collections::HashMap;

use serde_json::Value;

use crate::image::validate_data_url_image;
use crate::sanitize::{sanitize_tools, RawTool};
use crate::types::UpstreamMessage;

/// Translate a `/v1/messages` body's `system` + `messages` + `tools` into
/// upstream wire form. `system` accepts either a plain string or an array
/// of `{text}` / `{type:"text", content}` parts, concatenated; an empty
/// result in either form means "no system prompt" and is omitted entirely.
pub fn to_upstream(
    system: Option<&Value>,
    messages: &[Value],
    tools: &[Value],
) -> (Vec<UpstreamMessage>, Vec<crate::types::ToolDefinition>) {
    let id_to_name = build_tool_name_lookup(messages);

    let mut out = Vec::new();
    if let Some(system_text) = extract_system_text(system) {
        if !system_text.is_empty() {
            out.push(UpstreamMessage::System { content: system_text });
        }
    }

    for msg in messages {
        let role = msg.get("role").and_then(Value::as_str).unwrap_or("user");
        match role {
            "user" => translate_user_message(msg, &id_to_name, &mut out),
            "assistant" => translate_assistant_message(msg, &mut out),
            _ => {
                if let Some(text) = extract_text_blocks(msg.get("content")) {
                    out.push(UpstreamMessage::UserText { content: text });
                }
            }
        }
    }

    let sanitized = sanitize_tools(parse_tool_defs(tools));
    (out, sanitized)
}

fn extract_system_text(system: Option<&Value>) -> Option<String> {
    match system? {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => {
            let mut buf = String::new();
            for part in parts {
                let text = part
                    .get("text")
                    .and_then(Value::as_str)
                    .or_else(|| part.get("content").and_then(Value::as_str));
                if let Some(text) = text {
                    buf.push_str(text);
                }
            }
            Some(buf)
        }
        _ => None,
    }
}

/// First pass: every `assistant` content block of type `tool_use` maps its
/// `id` to its `name`, so a later `user`-role `tool_result` block can
/// recover the function name it is responding to.
fn build_tool_name_lookup(messages: &[Value]) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for msg in messages {
        if msg.get("role").and_then(Value::as_str) != Some("assistant") {
            continue;
        }
        let Some(blocks) = msg.get("content").and_then(Value::as_array) else { continue };
        for block in blocks {
            if block.get("type").and_then(Value::as_str) == Some("tool_use") {
                let id = block.get("id").and_then(Value::as_str);
                let name = block.get("name").and_then(Value::as_str);
                if let (Some(id), Some(name)) = (id, name) {
                    map.insert(id.to_string(), name.to_string());
                }
            }
        }
    }
    map
}

fn translate_user_message(msg: &Value, id_to_name: &HashMap<String, String>, out: &mut Vec<UpstreamMessage>) {
    match msg.get("content") {
        Some(Value::Array(blocks)) => {
            let has_tool_results = blocks.iter().any(|b| b.get("type").and_then(Value::as_str) == Some("tool_result"));
            if has_tool_results {
                let mut text_buf = String::new();
                for block in blocks {
                    match block.get("type").and_then(Value::as_str) {
                        Some("tool_result") => {
                            let tool_use_id = block.get("tool_use_id").and_then(Value::as_str).unwrap_or("").to_string();
                            let tool_name = id_to_name.get(&tool_use_id).cloned().unwrap_or_else(|| "Unknown".to_string());
                            let result = extract_tool_result_text(block.get("content"));
                            out.push(UpstreamMessage::ToolResult { id: tool_use_id, tool_name, result });
                        }
                        Some("text") => {
                            if let Some(text) = block.get("text").and_then(Value::as_str) {
                                if !text_buf.is_empty() {
                                    text_buf.push('\n');
                                }
                                text_buf.push_str(text);
                            }
                        }
                        _ => {}
                    }
                }
                if !text_buf.is_empty() {
                    out.push(UpstreamMessage::UserText { content: text_buf });
                }
            } else {
                translate_plain_content_blocks(blocks, out);
            }
        }
        Some(Value::String(text)) => out.push(UpstreamMessage::UserText { content: text.clone() }),
        _ => {}
    }
}

fn translate_plain_content_blocks(blocks: &[Value], out: &mut Vec<UpstreamMessage>) {
    let mut text_buf = String::new();
    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("image") => {
                let url = image_block_to_data_url(block);
                if let Some(url) = url {
                    if let Some((media_type, data)) = validate_data_url_image(&url) {
                        out.push(UpstreamMessage::Media { media_type, base64_data: data });
                    }
                }
            }
            _ => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    if !text_buf.is_empty() {
                        text_buf.push('\n');
                    }
                    text_buf.push_str(text);
                }
            }
        }
    }
    if !text_buf.is_empty() {
        out.push(UpstreamMessage::UserText { content: text_buf });
    }
}

/// Anthropic image blocks carry `source:{type:"base64",media_type,data}`
/// rather than a `data:` URL — reassemble one so the shared image
/// validator can be reused unchanged.
fn image_block_to_data_url(block: &Value) -> Option<String> {
    let source = block.get("source")?;
    if source.get("type").and_then(Value::as_str) != Some("base64") {
        return None;
    }
    let media_type = source.get("media_type").and_then(Value::as_str)?;
    let data = source.get("data").and_then(Value::as_str)?;
    Some(format!("data:{media_type};base64,{data}"))
}

fn translate_assistant_message(msg: &Value, out: &mut Vec<UpstreamMessage>) {
    let Some(blocks) = msg.get("content").and_then(Value::as_array) else {
        if let Some(text) = extract_text_blocks(msg.get("content")) {
            out.push(UpstreamMessage::AssistantText { content: text });
        }
        return;
    };

    let has_tool_use = blocks.iter().any(|b| b.get("type").and_then(Value::as_str) == Some("tool_use"));
    if has_tool_use {
        // Anthropic's tool-use form has no accompanying text block.
        for block in blocks {
            if block.get("type").and_then(Value::as_str) == Some("tool_use") {
                let id = block.get("id").and_then(Value::as_str).unwrap_or("").to_string();
                let name = block.get("name").and_then(Value::as_str).unwrap_or("").to_string();
                let arguments_json = block
                    .get("input")
                    .map(|v| serde_json::to_string(v).unwrap_or_else(|_| "{}".to_string()))
                    .unwrap_or_else(|| "{}".to_string());
                out.push(UpstreamMessage::AssistantToolCall { id, tool_name: name, arguments_json });
            }
        }
    } else {
        let mut text_buf = String::new();
        for block in blocks {
            if let Some(text) = block.get("text").and_then(Value::as_str) {
                if !text_buf.is_empty() {
                    text_buf.push('\n');
                }
                text_buf.push_str(text);
            }
        }
        if !text_buf.is_empty() {
            out.push(UpstreamMessage::AssistantText { content: text_buf });
        }
    }
}

fn extract_tool_result_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => {
            let mut buf = String::new();
            for part in parts {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    if !buf.is_empty() {
                        buf.push('\n');
                    }
                    buf.push_str(text);
                }
            }
            buf
        }
        _ => String::new(),
    }
}

fn extract_text_blocks(content: Option<&Value>) -> Option<String> {
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
            let name = t.get("name").and_then(Value::as_str)?.to_string();
            let description = t.get("description").and_then(Value::as_str).unwrap_or("").to_string();
            let parameters = t
                .get("input_schema")
                .cloned()
                .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}}));
            Some(RawTool { name, description, parameters })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_system_becomes_leading_system_message() {
        let (out, _) = to_upstream(Some(&json!("be terse")), &[], &[]);
        assert_eq!(out, vec![UpstreamMessage::System { content: "be terse".into() }]);
    }

    #[test]
    fn empty_system_string_is_omitted() {
        let (out, _) = to_upstream(Some(&json!("")), &[json!({"role": "user", "content": "hi"})], &[]);
        assert_eq!(out, vec![UpstreamMessage::UserText { content: "hi".into() }]);
    }

    #[test]
    fn empty_system_array_collapses_to_omitted() {
        let (out, _) = to_upstream(Some(&json!([])), &[json!({"role": "user", "content": "hi"})], &[]);
        assert_eq!(out, vec![UpstreamMessage::UserText { content: "hi".into() }]);
    }

    #[test]
    fn array_system_parts_concatenate() {
        let system = json!([{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]);
        let (out, _) = to_upstream(Some(&system), &[], &[]);
        assert_eq!(out, vec![UpstreamMessage::System { content: "ab".into() }]);
    }

    #[test]
    fn plain_text_user_message_maps_like_openai() {
        let (out, _) = to_upstream(None, &[json!({"role": "user", "content": "hello"})], &[]);
        assert_eq!(out, vec![UpstreamMessage::UserText { content: "hello".into() }]);
    }

    #[test]
    fn assistant_tool_use_blocks_emit_one_call_each_no_text() {
        let msgs = vec![json!({
            "role": "assistant",
            "content": [{"type": "tool_use", "id": "t1", "name": "f", "input": {"a": 1}}]
        })];
        let (out, _) = to_upstream(None, &msgs, &[]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0], UpstreamMessage::AssistantToolCall { id: "t1".into(), tool_name: "f".into(), arguments_json: "{\"a\":1}".into() });
    }

    #[test]
    fn user_tool_result_resolves_name_and_emits_trailing_text() {
        let msgs = vec![
            json!({"role": "assistant", "content": [{"type": "tool_use", "id": "t1", "name": "get_weather", "input": {}}]}),
            json!({"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "t1", "content": "sunny"},
                {"type": "text", "text": "thanks"}
            ]}),
        ];
        let (out, _) = to_upstream(None, &msgs, &[]);
        assert_eq!(out[1], UpstreamMessage::ToolResult { id: "t1".into(), tool_name: "get_weather".into(), result: "sunny".into() });
        assert_eq!(out[2], UpstreamMessage::UserText { content: "thanks".into() });
    }

    #[test]
    fn unresolvable_tool_result_falls_back_to_unknown() {
        let msgs = vec![json!({"role": "user", "content": [{"type": "tool_result", "tool_use_id": "ghost", "content": "x"}]})];
        let (out, _) = to_upstream(None, &msgs, &[]);
        assert_eq!(out[0], UpstreamMessage::ToolResult { id: "ghost".into(), tool_name: "Unknown".into(), result: "x".into() });
    }

    #[test]
    fn tool_definitions_map_input_schema_to_parameters() {
        let tools = vec![json!({"name": "f", "description": "d", "input_schema": {"type": "object", "properties": {}}})];
        let (_, sanitized) = to_upstream(None, &[], &tools);
        assert_eq!(sanitized.len(), 1);
        assert_eq!(sanitized[0].name, "f");
    }

    #[test]
    fn base64_image_block_becomes_media_message() {
        let tiny_png = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNk+A8AAQUBAScY42YAAAAASUVORK5CYII=";
        let msgs = vec![json!({"role": "user", "content": [
            {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": tiny_png}}
        ]})];
        let (out, _) = to_upstream(None, &msgs, &[]);
        assert!(matches!(out[0], UpstreamMessage::Media { .. }));
    }
}
