// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Tool-schema sanitization and bidirectional message translation between
//! the OpenAI and Anthropic client dialects and the single upstream wire
//! format.

pub mod anthropic;
pub mod image;
pub mod openai;
pub mod sanitize;
pub mod types;

pub use sanitize::{validate_tool_call, RawTool};
pub use types::{ToolDefinition, UpstreamMessage, UpstreamPayload};
