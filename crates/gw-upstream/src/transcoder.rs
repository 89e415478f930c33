// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Single-pass transcoding of the upstream SSE stream into either OpenAI or
//! Anthropic client-facing event sequences.
//!
//! [`upstream_frames`] turns the raw byte stream into a sequence of
//! normalized [`UpstreamFrame`]s; [`OpenAiTranscoder`] and
//! [`AnthropicTranscoder`] each fold that sequence into their dialect's
//! wire shape. [`accumulate`] runs the same frame semantics without
//! producing incremental events, for the non-streaming response path.

use futures::{Stream, StreamExt};
use serde_json::{json, Value};

/// A normalized upstream SSE frame, after `type` dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamFrame {
    Content { content: String },
    ToolCallHeader { id: String, name: String },
    ToolCallFragment { content: String },
    FunctionCall { name: Option<String>, content: String },
    FinishMetadata { reason: String },
    /// `data: end` or `data: [DONE]` — explicit stream terminator.
    End,
}

fn parse_upstream_frame(v: &Value) -> Option<UpstreamFrame> {
    match v.get("type").and_then(Value::as_str) {
        Some("Content") => Some(UpstreamFrame::Content {
            content: v.get("content").and_then(Value::as_str).unwrap_or("").to_string(),
        }),
        Some("ToolCall") => {
            let id = v.get("id").and_then(Value::as_str);
            let name = v.get("name").and_then(Value::as_str);
            match (id, name) {
                (Some(id), Some(name)) => Some(UpstreamFrame::ToolCallHeader {
                    id: id.to_string(),
                    name: name.to_string(),
                }),
                _ => Some(UpstreamFrame::ToolCallFragment {
                    content: v.get("content").and_then(Value::as_str).unwrap_or("").to_string(),
                }),
            }
        }
        Some("FunctionCall") => Some(UpstreamFrame::FunctionCall {
            name: v.get("name").and_then(Value::as_str).map(String::from),
            content: v.get("content").and_then(Value::as_str).unwrap_or("").to_string(),
        }),
        Some("FinishMetadata") => Some(UpstreamFrame::FinishMetadata {
            reason: v.get("reason").and_then(Value::as_str).unwrap_or("stop").to_string(),
        }),
        _ => None,
    }
}

/// Parse a raw SSE byte stream into [`UpstreamFrame`]s. Lines are buffered
/// across chunks since a `data: ` line can be split mid-chunk by the
/// transport; only complete, newline-terminated lines are parsed.
pub fn upstream_frames(
    resp: reqwest::Response,
) -> impl Stream<Item = anyhow::Result<UpstreamFrame>> {
    resp.bytes_stream()
        .scan(String::new(), |buf, chunk| {
            let text = match chunk {
                Ok(b) => String::from_utf8_lossy(&b).to_string(),
                Err(e) => return futures::future::ready(Some(vec![Err(anyhow::anyhow!(e))])),
            };
            buf.push_str(&text);
            let mut frames = Vec::new();
            while let Some(pos) = buf.find('\n') {
                let line = buf[..pos].trim_end_matches('\r').to_string();
                buf.drain(..=pos);
                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                let data = data.trim();
                if data == "end" || data == "[DONE]" {
                    frames.push(Ok(UpstreamFrame::End));
                    continue;
                }
                match serde_json::from_str::<Value>(data) {
                    Ok(v) => {
                        if let Some(frame) = parse_upstream_frame(&v) {
                            frames.push(Ok(frame));
                        }
                    }
                    Err(e) => frames.push(Err(anyhow::anyhow!(e))),
                }
            }
            futures::future::ready(Some(frames))
        })
        .flat_map(futures::stream::iter)
}

fn openai_finish_reason(reason: &str) -> &'static str {
    match reason {
        "tool_call" => "tool_calls",
        "length" => "length",
        _ => "stop",
    }
}

fn anthropic_stop_reason(reason: &str) -> &'static str {
    match reason {
        "tool_call" => "tool_use",
        "length" => "max_tokens",
        _ => "end_turn",
    }
}

fn mint_tool_id() -> String {
    format!("toolu_{}", uuid::Uuid::new_v4().simple())
}

struct ToolAccumulator {
    index: usize,
    id: String,
    name: String,
    arguments: String,
}

/// Output of [`OpenAiTranscoder::feed`]: either a `chat.completion.chunk`
/// payload or the literal `[DONE]` terminator.
pub enum OpenAiEvent {
    Chunk(Value),
    Done,
}

/// Folds [`UpstreamFrame`]s into `chat.completion.chunk` events. Tool calls
/// are accumulated silently and emitted as a single array in the final
/// delta, per §4.8 — this dialect does not stream individual tool-call
/// argument fragments to the client.
pub struct OpenAiTranscoder {
    id: String,
    created: i64,
    model: String,
    role_emitted: bool,
    tool_calls: Vec<ToolAccumulator>,
    current_tool: Option<ToolAccumulator>,
}

impl OpenAiTranscoder {
    pub fn new(id: impl Into<String>, created: i64, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created,
            model: model.into(),
            role_emitted: false,
            tool_calls: Vec::new(),
            current_tool: None,
        }
    }

    fn chunk(&self, delta: Value, finish_reason: Option<&str>) -> Value {
        json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": finish_reason,
            }],
        })
    }

    fn flush_tool(&mut self) {
        if let Some(t) = self.current_tool.take() {
            self.tool_calls.push(t);
        }
    }

    fn role_prefix(&mut self) -> Value {
        if self.role_emitted {
            json!({})
        } else {
            self.role_emitted = true;
            json!({ "role": "assistant" })
        }
    }

    pub fn feed(&mut self, frame: UpstreamFrame) -> Vec<OpenAiEvent> {
        match frame {
            UpstreamFrame::Content { content } => {
                self.flush_tool();
                let mut delta = self.role_prefix();
                delta["content"] = json!(content);
                vec![OpenAiEvent::Chunk(self.chunk(delta, None))]
            }
            UpstreamFrame::ToolCallHeader { id, name } => {
                self.flush_tool();
                let index = self.tool_calls.len();
                self.current_tool = Some(ToolAccumulator { index, id, name, arguments: String::new() });
                vec![]
            }
            UpstreamFrame::ToolCallFragment { content } => {
                if let Some(t) = self.current_tool.as_mut() {
                    t.arguments.push_str(&content);
                }
                vec![]
            }
            UpstreamFrame::FunctionCall { name, content } => {
                if let Some(name) = name {
                    self.flush_tool();
                    let index = self.tool_calls.len();
                    self.current_tool = Some(ToolAccumulator { index, id: mint_tool_id(), name, arguments: content });
                } else if let Some(t) = self.current_tool.as_mut() {
                    t.arguments.push_str(&content);
                }
                vec![]
            }
            UpstreamFrame::FinishMetadata { reason } => {
                self.flush_tool();
                let mut delta = self.role_prefix();
                if !self.tool_calls.is_empty() {
                    delta["tool_calls"] = Value::Array(
                        self.tool_calls
                            .iter()
                            .map(|t| {
                                json!({
                                    "index": t.index,
                                    "id": t.id,
                                    "type": "function",
                                    "function": { "name": t.name, "arguments": t.arguments },
                                })
                            })
                            .collect(),
                    );
                }
                let chunk = self.chunk(delta, Some(openai_finish_reason(&reason)));
                vec![OpenAiEvent::Chunk(chunk), OpenAiEvent::Done]
            }
            UpstreamFrame::End => vec![],
        }
    }
}

/// Folds [`UpstreamFrame`]s into named Anthropic SSE events with the strict
/// `message_start` / `content_block_*` / `message_stop` block lifecycle.
pub struct AnthropicTranscoder {
    message_id: String,
    model: String,
    next_index: u32,
    in_text: bool,
    in_tool: bool,
    current_index: Option<u32>,
    tool_id: String,
    tool_name: String,
    tool_args: String,
}

impl AnthropicTranscoder {
    pub fn new(message_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            model: model.into(),
            next_index: 0,
            in_text: false,
            in_tool: false,
            current_index: None,
            tool_id: String::new(),
            tool_name: String::new(),
            tool_args: String::new(),
        }
    }

    pub fn start(&self) -> Value {
        json!({
            "type": "message_start",
            "message": {
                "id": self.message_id,
                "type": "message",
                "role": "assistant",
                "content": [],
                "model": self.model,
                "stop_reason": Value::Null,
                "stop_sequence": Value::Null,
                "usage": { "input_tokens": 0, "output_tokens": 0 },
            }
        })
    }

    fn flush_text(&mut self, out: &mut Vec<Value>) {
        if self.in_text {
            out.push(json!({ "type": "content_block_stop", "index": self.current_index.unwrap() }));
            self.in_text = false;
        }
    }

    fn flush_tool(&mut self, out: &mut Vec<Value>) {
        if self.in_tool {
            let index = self.current_index.unwrap();
            out.push(json!({
                "type": "content_block_delta",
                "index": index,
                "delta": { "type": "input_json_delta", "partial_json": self.tool_args },
            }));
            out.push(json!({ "type": "content_block_stop", "index": index }));
            self.in_tool = false;
            self.tool_args.clear();
        }
    }

    fn open_tool_block(&mut self, out: &mut Vec<Value>, id: String, name: String) {
        let index = self.next_index;
        self.next_index += 1;
        self.current_index = Some(index);
        self.tool_id = id.clone();
        self.tool_name = name.clone();
        self.tool_args.clear();
        out.push(json!({
            "type": "content_block_start",
            "index": index,
            "content_block": { "type": "tool_use", "id": id, "name": name, "input": {} },
        }));
        self.in_tool = true;
    }

    pub fn feed(&mut self, frame: UpstreamFrame) -> Vec<Value> {
        let mut out = Vec::new();
        match frame {
            UpstreamFrame::Content { content } => {
                self.flush_tool(&mut out);
                if !self.in_text {
                    let index = self.next_index;
                    self.next_index += 1;
                    self.current_index = Some(index);
                    out.push(json!({
                        "type": "content_block_start",
                        "index": index,
                        "content_block": { "type": "text", "text": "" },
                    }));
                    self.in_text = true;
                }
                out.push(json!({
                    "type": "content_block_delta",
                    "index": self.current_index.unwrap(),
                    "delta": { "type": "text_delta", "text": content },
                }));
            }
            UpstreamFrame::ToolCallHeader { id, name } => {
                self.flush_text(&mut out);
                self.flush_tool(&mut out);
                self.open_tool_block(&mut out, id, name);
            }
            UpstreamFrame::ToolCallFragment { content } => {
                self.tool_args.push_str(&content);
            }
            UpstreamFrame::FunctionCall { name, content } => {
                if let Some(name) = name {
                    self.flush_text(&mut out);
                    self.flush_tool(&mut out);
                    self.open_tool_block(&mut out, mint_tool_id(), name);
                    self.tool_args.push_str(&content);
                } else {
                    self.tool_args.push_str(&content);
                }
            }
            UpstreamFrame::FinishMetadata { reason } => {
                self.flush_text(&mut out);
                self.flush_tool(&mut out);
                out.push(json!({
                    "type": "message_delta",
                    "delta": { "stop_reason": anthropic_stop_reason(&reason), "stop_sequence": Value::Null },
                    "usage": { "output_tokens": 0 },
                }));
                out.push(json!({ "type": "message_stop" }));
            }
            UpstreamFrame::End => {}
        }
        out
    }
}

/// A tool call collected for the non-streaming response path.
pub struct AccumulatedToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Final state of a fully-consumed upstream frame sequence, used to build
/// the non-streaming `ChatCompletionResponse` / `MessagesResponse` bodies.
pub struct Accumulated {
    pub text: String,
    pub tool_calls: Vec<AccumulatedToolCall>,
    pub finish_reason: String,
}

/// Apply the same flush invariants as the incremental transcoders but just
/// collect the final text/tool-call state, for non-streaming callers.
pub async fn accumulate(
    mut frames: impl Stream<Item = anyhow::Result<UpstreamFrame>> + Unpin,
) -> anyhow::Result<Accumulated> {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    let mut current: Option<AccumulatedToolCall> = None;
    let mut finish_reason = "stop".to_string();

    while let Some(frame) = frames.next().await {
        match frame? {
            UpstreamFrame::Content { content } => {
                if let Some(t) = current.take() {
                    tool_calls.push(t);
                }
                text.push_str(&content);
            }
            UpstreamFrame::ToolCallHeader { id, name } => {
                if let Some(t) = current.take() {
                    tool_calls.push(t);
                }
                current = Some(AccumulatedToolCall { id, name, arguments: String::new() });
            }
            UpstreamFrame::ToolCallFragment { content } => {
                if let Some(t) = current.as_mut() {
                    t.arguments.push_str(&content);
                }
            }
            UpstreamFrame::FunctionCall { name, content } => {
                if let Some(name) = name {
                    if let Some(t) = current.take() {
                        tool_calls.push(t);
                    }
                    current = Some(AccumulatedToolCall { id: mint_tool_id(), name, arguments: content });
                } else if let Some(t) = current.as_mut() {
                    t.arguments.push_str(&content);
                }
            }
            UpstreamFrame::FinishMetadata { reason } => {
                if let Some(t) = current.take() {
                    tool_calls.push(t);
                }
                finish_reason = reason;
            }
            UpstreamFrame::End => break,
        }
    }

    Ok(Accumulated { text, tool_calls, finish_reason })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(s: &str) -> UpstreamFrame {
        UpstreamFrame::Content { content: s.to_string() }
    }

    #[test]
    fn parses_content_frame() {
        let v = json!({"type": "Content", "content": "hi"});
        assert_eq!(parse_upstream_frame(&v), Some(content("hi")));
    }

    #[test]
    fn parses_tool_call_header_vs_fragment() {
        let header = json!({"type": "ToolCall", "id": "t1", "name": "search"});
        assert_eq!(
            parse_upstream_frame(&header),
            Some(UpstreamFrame::ToolCallHeader { id: "t1".into(), name: "search".into() })
        );
        let fragment = json!({"type": "ToolCall", "content": "{\"q\":"});
        assert_eq!(
            parse_upstream_frame(&fragment),
            Some(UpstreamFrame::ToolCallFragment { content: "{\"q\":".into() })
        );
    }

    #[test]
    fn unrecognized_type_is_dropped() {
        assert_eq!(parse_upstream_frame(&json!({"type": "Unknown"})), None);
    }

    #[test]
    fn openai_transcoder_emits_role_once_and_accumulates_tool_calls() {
        let mut t = OpenAiTranscoder::new("chatcmpl-1", 1_700_000_000, "gpt-x");
        let events = t.feed(content("hi"));
        assert_eq!(events.len(), 1);
        match &events[0] {
            OpenAiEvent::Chunk(v) => {
                assert_eq!(v["choices"][0]["delta"]["role"], "assistant");
                assert_eq!(v["choices"][0]["delta"]["content"], "hi");
            }
            _ => panic!("expected chunk"),
        }

        // A second content frame must not repeat the role.
        let events2 = t.feed(content(" there"));
        match &events2[0] {
            OpenAiEvent::Chunk(v) => assert!(v["choices"][0]["delta"].get("role").is_none()),
            _ => panic!("expected chunk"),
        }

        t.feed(UpstreamFrame::ToolCallHeader { id: "t1".into(), name: "search".into() });
        t.feed(UpstreamFrame::ToolCallFragment { content: "{\"q\":\"x\"}".into() });
        let finish_events = t.feed(UpstreamFrame::FinishMetadata { reason: "tool_call".into() });
        assert_eq!(finish_events.len(), 2);
        match &finish_events[0] {
            OpenAiEvent::Chunk(v) => {
                assert_eq!(v["choices"][0]["finish_reason"], "tool_calls");
                let calls = v["choices"][0]["delta"]["tool_calls"].as_array().unwrap();
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0]["function"]["arguments"], "{\"q\":\"x\"}");
            }
            _ => panic!("expected chunk"),
        }
        assert!(matches!(finish_events[1], OpenAiEvent::Done));
    }

    #[test]
    fn content_frame_flushes_in_flight_tool_call() {
        let mut t = OpenAiTranscoder::new("id", 0, "m");
        t.feed(UpstreamFrame::ToolCallHeader { id: "t1".into(), name: "f".into() });
        t.feed(UpstreamFrame::ToolCallFragment { content: "abc".into() });
        t.feed(content("more text"));
        let finish = t.feed(UpstreamFrame::FinishMetadata { reason: "stop".into() });
        match &finish[0] {
            OpenAiEvent::Chunk(v) => {
                let calls = v["choices"][0]["delta"]["tool_calls"].as_array().unwrap();
                assert_eq!(calls.len(), 1, "tool call flushed by the Content frame should still surface");
                assert_eq!(calls[0]["function"]["arguments"], "abc");
            }
            _ => panic!("expected chunk"),
        }
    }

    #[test]
    fn anthropic_transcoder_bracket_lifecycle_for_text_then_tool() {
        let mut t = AnthropicTranscoder::new("msg_1", "claude-x");
        let start = t.start();
        assert_eq!(start["type"], "message_start");

        let mut events = t.feed(content("hello"));
        assert_eq!(events[0]["type"], "content_block_start");
        assert_eq!(events[0]["index"], 0);
        assert_eq!(events[1]["type"], "content_block_delta");
        assert_eq!(events[1]["delta"]["text"], "hello");

        events = t.feed(UpstreamFrame::ToolCallHeader { id: "tool_1".into(), name: "lookup".into() });
        // text block must close before the tool block opens
        assert_eq!(events[0]["type"], "content_block_stop");
        assert_eq!(events[0]["index"], 0);
        assert_eq!(events[1]["type"], "content_block_start");
        assert_eq!(events[1]["index"], 1);
        assert_eq!(events[1]["content_block"]["type"], "tool_use");

        t.feed(UpstreamFrame::ToolCallFragment { content: "{\"a\":1}".into() });
        let finish = t.feed(UpstreamFrame::FinishMetadata { reason: "tool_call".into() });
        assert_eq!(finish[0]["type"], "content_block_delta");
        assert_eq!(finish[0]["delta"]["partial_json"], "{\"a\":1}");
        assert_eq!(finish[1]["type"], "content_block_stop");
        assert_eq!(finish[2]["type"], "message_delta");
        assert_eq!(finish[2]["delta"]["stop_reason"], "tool_use");
        assert_eq!(finish[3]["type"], "message_stop");
    }

    #[test]
    fn anthropic_block_indices_increase_monotonically_across_kinds() {
        let mut t = AnthropicTranscoder::new("m", "model");
        t.feed(content("a"));
        t.feed(UpstreamFrame::ToolCallHeader { id: "t".into(), name: "f".into() });
        let e = t.feed(content("b"));
        // a third block (text again) must get index 2, not reuse 0.
        assert_eq!(e[e.len() - 2]["index"], 2);
    }

    #[tokio::test]
    async fn accumulate_collects_text_and_tool_calls_across_frames() {
        let frames = vec![
            Ok(content("part one ")),
            Ok(UpstreamFrame::ToolCallHeader { id: "t1".into(), name: "search".into() }),
            Ok(UpstreamFrame::ToolCallFragment { content: "{\"q\":1}".into() }),
            Ok(UpstreamFrame::FinishMetadata { reason: "tool_call".into() }),
        ];
        let result = accumulate(futures::stream::iter(frames)).await.unwrap();
        assert_eq!(result.text, "part one ");
        assert_eq!(result.tool_calls.len(), 1);
        assert_eq!(result.tool_calls[0].name, "search");
        assert_eq!(result.finish_reason, "tool_call");
    }

    #[tokio::test]
    async fn accumulate_stops_at_explicit_end_frame() {
        let frames = vec![Ok(content("x")), Ok(UpstreamFrame::End), Ok(content("should not appear"))];
        let result = accumulate(futures::stream::iter(frames)).await.unwrap();
        assert_eq!(result.text, "x");
    }
}
