// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! `POST /v1/messages` — the Anthropic-compatible facade.

use std::collections::VecDeque;

use axum::{
    extract::State,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::{stream, Stream, StreamExt};
use gw_translate::{anthropic, UpstreamPayload};
use gw_upstream::{AnthropicTranscoder, UpstreamFrame};
use serde_json::{json, Value};
use tracing::warn;

use super::common::{cached_translate, marshal_all, resolve_profile, send_with_retry, validate_common, MetricsRecorder};
use crate::error::GatewayError;
use crate::state::AppState;

pub async fn messages(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    match handle(state, body).await {
        Ok(resp) => resp,
        Err(err) => err.into_anthropic_response(),
    }
}

async fn handle(state: AppState, body: Value) -> Result<Response, GatewayError> {
    let model = body.get("model").and_then(Value::as_str).unwrap_or("").to_string();
    let system = body.get("system").cloned();
    let messages_in = body.get("messages").and_then(Value::as_array).cloned().unwrap_or_default();
    let tools = body.get("tools").and_then(Value::as_array).cloned().unwrap_or_default();
    let stream_requested = body.get("stream").and_then(Value::as_bool).unwrap_or(false);
    let max_tokens = body.get("max_tokens").and_then(Value::as_i64);

    validate_common(&model, messages_in.len(), max_tokens)?;
    let profile = resolve_profile(&state, &model)?.to_string();

    let marshaled_messages = marshal_all(&messages_in);
    let marshaled_tools = marshal_all(&tools);
    let (upstream_messages, upstream_tools) = cached_translate(&state, marshaled_messages, marshaled_tools, || {
        anthropic::to_upstream(system.as_ref(), &messages_in, &tools)
    })
    .await;

    let payload = UpstreamPayload::new(profile, upstream_messages, upstream_tools);
    let (guard, resp) = send_with_retry(&state, &payload).await?;

    let message_id = format!("msg_{}", uuid::Uuid::new_v4().simple());

    if stream_requested {
        let recorder = MetricsRecorder::start(state.clone(), model.clone(), guard.account());
        let frames = Box::pin(gw_upstream::upstream_frames(resp));
        let transcoder = AnthropicTranscoder::new(message_id, model);
        let sse = Sse::new(anthropic_event_stream(frames, transcoder, guard, recorder))
            .keep_alive(KeepAlive::new().interval(std::time::Duration::from_secs(15)));
        Ok(sse.into_response())
    } else {
        let mut recorder = MetricsRecorder::start(state.clone(), model.clone(), guard.account());
        let frames = Box::pin(gw_upstream::upstream_frames(resp));
        let accumulated = gw_upstream::accumulate(frames)
            .await
            .map_err(|e| GatewayError::Internal(e.to_string()))?;
        recorder.mark_success();
        drop(guard);
        Ok(Json(non_streaming_response(&message_id, &model, accumulated)).into_response())
    }
}

fn non_streaming_response(id: &str, model: &str, acc: gw_upstream::Accumulated) -> Value {
    let stop_reason = match acc.finish_reason.as_str() {
        "tool_call" => "tool_use",
        "length" => "max_tokens",
        _ => "end_turn",
    };

    let mut content = Vec::new();
    if !acc.text.is_empty() {
        content.push(json!({ "type": "text", "text": acc.text }));
    }
    for call in &acc.tool_calls {
        let input: Value = serde_json::from_str(&call.arguments).unwrap_or_else(|_| json!({ "arguments": call.arguments }));
        content.push(json!({ "type": "tool_use", "id": call.id, "name": call.name, "input": input }));
    }

    let output_tokens = (acc.text.chars().count() / 4).max(1);

    json!({
        "id": id,
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": content,
        "stop_reason": stop_reason,
        "stop_sequence": Value::Null,
        "usage": { "input_tokens": 0, "output_tokens": output_tokens },
    })
}

/// Mirrors `openai::openai_event_stream`'s fold shape, but each
/// `AnthropicTranscoder::feed` call can emit several named events at once
/// (e.g. closing a text block and opening a tool block in the same frame),
/// so every queued value carries its own SSE event name from its `type`.
fn anthropic_event_stream(
    frames: impl Stream<Item = anyhow::Result<UpstreamFrame>> + Send + Unpin + 'static,
    transcoder: AnthropicTranscoder,
    guard: super::common::AccountGuard,
    recorder: MetricsRecorder,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    let mut queue: VecDeque<Value> = VecDeque::new();
    queue.push_back(transcoder.start());
    let state = (frames, transcoder, queue, false, Some(guard), Some(recorder));

    stream::unfold(state, |(mut frames, mut transcoder, mut queue, mut done, mut guard, mut recorder)| async move {
        loop {
            if let Some(v) = queue.pop_front() {
                if let Some(r) = recorder.as_mut() {
                    r.mark_success();
                }
                let is_stop = v["type"] == "message_stop";
                let event_name = v["type"].as_str().unwrap_or("message").to_string();
                let event = Event::default().event(event_name).data(v.to_string());
                if is_stop {
                    done = true;
                }
                return Some((Ok(event), (frames, transcoder, queue, done, guard, recorder)));
            }
            if done {
                guard.take();
                recorder.take();
                return None;
            }
            match frames.next().await {
                // An explicit terminator, a read error, or upstream EOF can
                // all arrive without a preceding `FinishMetadata` frame —
                // feed a synthetic one so any open text/tool block is
                // closed and `message_stop` is always emitted before the
                // stream ends (§7 stream-interrupt handling).
                Some(Ok(UpstreamFrame::End)) => {
                    queue.extend(transcoder.feed(UpstreamFrame::FinishMetadata { reason: "stop".into() }));
                }
                Some(Ok(frame)) => queue.extend(transcoder.feed(frame)),
                Some(Err(e)) => {
                    warn!(error = %e, "upstream stream read error");
                    queue.extend(transcoder.feed(UpstreamFrame::FinishMetadata { reason: "stop".into() }));
                }
                None => {
                    queue.extend(transcoder.feed(UpstreamFrame::FinishMetadata { reason: "stop".into() }));
                }
            }
        }
    })
}
