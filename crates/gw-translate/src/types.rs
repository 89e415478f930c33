// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The upstream wire model: the single intermediate representation that
//! both the OpenAI and the Anthropic translators converge on.
//!
//! Each client dialect is converted to a `Vec<UpstreamMessage>` plus a list
//! of [`ToolDefinition`]s, which [`UpstreamPayload::new`] then wraps into
//! the exact JSON shape the JetBrains AI chat endpoint expects.

use serde::Serialize;
use serde_json::{json, Value};

/// One line of the upstream conversation. Unlike the client dialects,
/// upstream has no nested content-part arrays — tool calls, tool results,
/// and media each get their own message kind.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamMessage {
    UserText { content: String },
    AssistantText { content: String },
    AssistantToolCall { id: String, tool_name: String, arguments_json: String },
    ToolResult { id: String, tool_name: String, result: String },
    System { content: String },
    Media { media_type: String, base64_data: String },
}

impl UpstreamMessage {
    /// Render as the `{type, ...}` JSON object the upstream `chat.messages`
    /// array expects.
    pub fn to_json(&self) -> Value {
        match self {
            UpstreamMessage::UserText { content } => json!({
                "type": "user_message",
                "content": content,
            }),
            UpstreamMessage::AssistantText { content } => json!({
                "type": "assistant_message_text",
                "content": content,
            }),
            UpstreamMessage::AssistantToolCall { id, tool_name, arguments_json } => json!({
                "type": "assistant_message_tool",
                "id": id,
                "toolName": tool_name,
                "content": arguments_json,
            }),
            UpstreamMessage::ToolResult { id, tool_name, result } => json!({
                "type": "tool_message",
                "id": id,
                "toolName": tool_name,
                "result": result,
            }),
            UpstreamMessage::System { content } => json!({
                "type": "system_message",
                "content": content,
            }),
            UpstreamMessage::Media { media_type, base64_data } => json!({
                "type": "media_message",
                "mediaType": media_type,
                "data": base64_data,
            }),
        }
    }
}

/// A sanitized tool definition ready to be sent upstream, as produced by
/// [`crate::sanitize::sanitize_tools`].
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "parameters": { "schema": self.parameters },
        })
    }
}

const CHAT_PROMPT: &str = "ij.workspace.prompt.generic-chat";

/// `{prompt, profile, chat:{messages}, parameters?}` — the exact body sent
/// to `POST .../user/v5/llm/chat/stream/v8`.
#[derive(Debug, Clone)]
pub struct UpstreamPayload {
    pub profile: String,
    pub messages: Vec<UpstreamMessage>,
    pub tools: Vec<ToolDefinition>,
}

impl UpstreamPayload {
    pub fn new(profile: impl Into<String>, messages: Vec<UpstreamMessage>, tools: Vec<ToolDefinition>) -> Self {
        Self { profile: profile.into(), messages, tools }
    }

    pub fn to_json(&self) -> Value {
        let mut body = json!({
            "prompt": CHAT_PROMPT,
            "profile": self.profile,
            "chat": {
                "messages": self.messages.iter().map(UpstreamMessage::to_json).collect::<Vec<_>>(),
            },
        });
        if !self.tools.is_empty() {
            let tools_json: Vec<Value> = self.tools.iter().map(ToolDefinition::to_json).collect();
            body["parameters"] = json!([
                { "type": "json", "fqdn": "llm.parameters.tools" },
                { "type": "json", "value": Value::Array(tools_json) },
            ]);
        }
        body
    }
}
