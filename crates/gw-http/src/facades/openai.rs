// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! `POST /v1/chat/completions` — the OpenAI-compatible facade.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    extract::State,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::{stream, Stream, StreamExt};
use gw_translate::{openai, UpstreamPayload};
use gw_upstream::{OpenAiEvent, OpenAiTranscoder, UpstreamFrame};
use serde_json::{json, Value};
use tracing::warn;

use super::common::{cached_translate, marshal_all, resolve_profile, send_with_retry, validate_common, MetricsRecorder};
use crate::error::GatewayError;
use crate::state::AppState;

pub async fn chat_completions(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    match handle(state, body).await {
        Ok(resp) => resp,
        Err(err) => err.into_openai_response(),
    }
}

async fn handle(state: AppState, body: Value) -> Result<Response, GatewayError> {
    let model = body.get("model").and_then(Value::as_str).unwrap_or("").to_string();
    let messages = body.get("messages").and_then(Value::as_array).cloned().unwrap_or_default();
    let tools = body.get("tools").and_then(Value::as_array).cloned().unwrap_or_default();
    let stream_requested = body.get("stream").and_then(Value::as_bool).unwrap_or(false);
    let max_tokens = body.get("max_tokens").and_then(Value::as_i64);

    validate_common(&model, messages.len(), max_tokens)?;
    let profile = resolve_profile(&state, &model)?.to_string();

    let marshaled_messages = marshal_all(&messages);
    let marshaled_tools = marshal_all(&tools);
    let (upstream_messages, upstream_tools) =
        cached_translate(&state, marshaled_messages, marshaled_tools, || openai::to_upstream(&messages, &tools)).await;

    let payload = UpstreamPayload::new(profile, upstream_messages, upstream_tools);
    let (guard, resp) = send_with_retry(&state, &payload).await?;

    let response_id = format!("chatcmpl-{}", uuid::Uuid::new_v4().simple());
    let created = now_unix();

    if stream_requested {
        let recorder = MetricsRecorder::start(state.clone(), model.clone(), guard.account());
        let frames = Box::pin(gw_upstream::upstream_frames(resp));
        let transcoder = OpenAiTranscoder::new(response_id, created, model);
        let sse = Sse::new(openai_event_stream(frames, transcoder, guard, recorder))
            .keep_alive(KeepAlive::new().interval(std::time::Duration::from_secs(15)));
        Ok(sse.into_response())
    } else {
        let mut recorder = MetricsRecorder::start(state.clone(), model.clone(), guard.account());
        let frames = gw_upstream::upstream_frames(resp);
        let accumulated = gw_upstream::accumulate(Box::pin(frames))
            .await
            .map_err(|e| GatewayError::Internal(e.to_string()))?;
        recorder.mark_success();
        drop(guard);
        Ok(Json(non_streaming_response(&response_id, created, &model, accumulated)).into_response())
    }
}

fn non_streaming_response(id: &str, created: i64, model: &str, acc: gw_upstream::Accumulated) -> Value {
    let finish_reason = match acc.finish_reason.as_str() {
        "tool_call" => "tool_calls",
        "length" => "length",
        _ => "stop",
    };

    let mut message = json!({ "role": "assistant", "content": if acc.text.is_empty() { Value::Null } else { json!(acc.text) } });
    if !acc.tool_calls.is_empty() {
        message["tool_calls"] = Value::Array(
            acc.tool_calls
                .iter()
                .map(|t| {
                    json!({
                        "id": t.id,
                        "type": "function",
                        "function": { "name": t.name, "arguments": t.arguments },
                    })
                })
                .collect(),
        );
    }

    json!({
        "id": id,
        "object": "chat.completion",
        "created": created,
        "model": model,
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": finish_reason,
        }],
        "usage": {
            "prompt_tokens": 0,
            "completion_tokens": acc.text.chars().count() / 4,
            "total_tokens": acc.text.chars().count() / 4,
        },
    })
}

/// Drive the transcoder over the upstream frame stream, emitting one SSE
/// `Event` per queued chunk. The account guard and metrics recorder ride
/// along in the fold state so both are dropped — releasing the account and
/// recording the outcome — exactly when the stream itself is dropped,
/// whether that's a clean finish or an early client disconnect.
fn openai_event_stream(
    frames: impl Stream<Item = anyhow::Result<UpstreamFrame>> + Send + Unpin + 'static,
    transcoder: OpenAiTranscoder,
    guard: super::common::AccountGuard,
    recorder: MetricsRecorder,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    let state = (frames, transcoder, VecDeque::<Event>::new(), false, Some(guard), Some(recorder));
    stream::unfold(state, |(mut frames, mut transcoder, mut queue, mut done, mut guard, mut recorder)| async move {
        loop {
            if let Some(ev) = queue.pop_front() {
                if let Some(r) = recorder.as_mut() {
                    r.mark_success();
                }
                return Some((Ok(ev), (frames, transcoder, queue, done, guard, recorder)));
            }
            if done {
                guard.take();
                recorder.take();
                return None;
            }
            // An explicit terminator, a read error, or upstream EOF can all
            // arrive without a preceding `FinishMetadata` frame — feed a
            // synthetic one so any open tool call is flushed and `[DONE]`
            // is always emitted before the stream ends (§7 stream-interrupt
            // handling).
            let frame = match frames.next().await {
                Some(Ok(UpstreamFrame::End)) => UpstreamFrame::FinishMetadata { reason: "stop".into() },
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    warn!(error = %e, "upstream stream read error");
                    UpstreamFrame::FinishMetadata { reason: "stop".into() }
                }
                None => UpstreamFrame::FinishMetadata { reason: "stop".into() },
            };
            for ev in transcoder.feed(frame) {
                match ev {
                    OpenAiEvent::Chunk(v) => queue.push_back(Event::default().data(v.to_string())),
                    OpenAiEvent::Done => {
                        queue.push_back(Event::default().data("[DONE]"));
                        done = true;
                    }
                }
            }
        }
    })
}

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}
