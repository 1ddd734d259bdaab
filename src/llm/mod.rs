//! Model provider abstraction.
//!
//! The runtime consumes a streaming chat endpoint through the
//! [`ModelProvider`] trait: it accepts a system prompt, history and tool
//! declarations and yields [`ModelChunk`]s. Provider-specific wire formats
//! (OpenAI, Ollama, Gemini, ...) are the job of adapter crates; the core
//! never sees them.

/// Retry with exponential backoff for transport calls.
pub mod retry;

use crate::signal::AbortSignal;
use crate::types::{Content, Result, ToolDefinition};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;

/// A function call extracted from a model chunk.
///
/// The id is optional on the wire; the turn synthesizes one when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Provider-assigned call id, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Name of the requested tool.
    pub name: String,
    /// Arguments as a JSON object.
    pub args: Value,
}

/// Why a model stream ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamFinishReason {
    /// The model finished normally.
    Stop,
    /// The output token limit was hit.
    MaxTokens,
    /// The stream was aborted by the host.
    Aborted,
    /// Provider-specific reason.
    Other(String),
}

/// Token usage reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub prompt_tokens: u32,
    /// Tokens produced by the model.
    pub completion_tokens: u32,
}

impl TokenUsage {
    /// Create a usage record.
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    /// Total tokens for this record.
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }

    /// Accumulate another record into this one.
    pub fn add(&mut self, other: TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

/// One streamed increment of a model response.
///
/// Any combination of fields may be present in a single chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelChunk {
    /// Incremental visible text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Incremental reasoning text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    /// Fully-formed function calls carried by this chunk.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub function_calls: Vec<FunctionCall>,
    /// Present on the final chunk of a stream.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<StreamFinishReason>,
    /// Usage totals, typically on the final chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl ModelChunk {
    /// A chunk carrying only visible text.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// A chunk carrying only reasoning text.
    pub fn thought(text: impl Into<String>) -> Self {
        Self {
            thought: Some(text.into()),
            ..Default::default()
        }
    }

    /// A terminal chunk with a finish reason.
    pub fn finished(reason: StreamFinishReason) -> Self {
        Self {
            finish_reason: Some(reason),
            ..Default::default()
        }
    }
}

/// A request for one model response.
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    /// System prompt, if any.
    pub system: Option<String>,
    /// Conversation history, oldest first.
    pub contents: Vec<Content>,
    /// Tool declarations offered to the model.
    pub tools: Vec<ToolDefinition>,
}

/// Boxed stream of model chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ModelChunk>> + Send>>;

/// Generic streaming model provider.
///
/// Implementations MUST honor the abort signal at every I/O point and
/// terminate the stream promptly once it fires.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Stream one model response for the request.
    async fn stream_chat(&self, request: ModelRequest, signal: &AbortSignal)
        -> Result<ChunkStream>;

    /// Single-shot completion collecting the streamed text.
    ///
    /// Used for small follow-up calls (next-speaker judgment, history
    /// summarization) where streaming granularity is unnecessary.
    async fn complete(&self, request: ModelRequest, signal: &AbortSignal) -> Result<String> {
        let mut stream = self.stream_chat(request, signal).await?;
        let mut collected = String::new();
        while let Some(chunk) = stream.next().await {
            signal.check()?;
            if let Some(text) = chunk?.text {
                collected.push_str(&text);
            }
        }
        Ok(collected)
    }

    /// Model name/identifier, for logging and accounting.
    fn model_name(&self) -> &str;
}
