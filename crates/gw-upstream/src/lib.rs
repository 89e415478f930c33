// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The JetBrains AI upstream HTTP client and single-pass SSE stream
//! transcoder.

pub mod client;
pub mod transcoder;

pub use client::{ChatError, UpstreamClient};
pub use transcoder::{
    accumulate, upstream_frames, Accumulated, AccumulatedToolCall, AnthropicTranscoder, OpenAiEvent,
    OpenAiTranscoder, UpstreamFrame,
};
