//! Conversation history: raw and curated views, plus compression.
//!
//! The chat owns the history exclusively. Appends are append-only; the
//! curated view is derived on demand through a pluggable
//! [`CurationPolicy`]; compression rewrites a prefix into a single
//! model-authored summary and never fails the caller.

use crate::llm::{ModelProvider, ModelRequest};
use crate::signal::AbortSignal;
use crate::types::{Content, Part, Result, Role};
use std::sync::Arc;
use tracing::{debug, info};

/// Marker prefixed to the synthetic summary content produced by
/// compression.
pub const SUMMARY_MARKER: &str = "Summary of earlier conversation:";

/// Decides which history entries the model gets to see.
pub trait CurationPolicy: Send + Sync {
    /// Produce the curated view of the raw history.
    fn curate(&self, history: &[Content]) -> Vec<Content>;
}

/// Default curation: drop model messages with no substantive parts, and
/// drop a function message that immediately follows a dropped model
/// message (its calls no longer exist from the model's point of view).
/// User messages are never dropped.
#[derive(Debug, Default)]
pub struct DefaultCurationPolicy;

impl DefaultCurationPolicy {
    fn is_empty_model(content: &Content) -> bool {
        content.role == Role::Model
            && content
                .parts
                .iter()
                .all(|part| part.is_blank_text())
    }
}

impl CurationPolicy for DefaultCurationPolicy {
    fn curate(&self, history: &[Content]) -> Vec<Content> {
        let mut curated = Vec::with_capacity(history.len());
        let mut dropped_previous_model = false;

        for content in history {
            match content.role {
                Role::Model if Self::is_empty_model(content) => {
                    dropped_previous_model = true;
                }
                Role::Function if dropped_previous_model => {
                    // Orphaned by the dropped model message.
                    dropped_previous_model = false;
                }
                _ => {
                    dropped_previous_model = false;
                    curated.push(content.clone());
                }
            }
        }
        curated
    }
}

/// Outcome of a successful compression pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionInfo {
    /// Estimated token count before compression.
    pub original_tokens: usize,
    /// Estimated token count after compression.
    pub new_tokens: usize,
}

/// Conversation history plus the system prompt.
pub struct Chat {
    system_prompt: String,
    history: Vec<Content>,
    curation: Arc<dyn CurationPolicy>,
    last_compression: Option<CompressionInfo>,
}

impl Chat {
    /// Create a chat with the default curation policy.
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            history: Vec::new(),
            curation: Arc::new(DefaultCurationPolicy),
            last_compression: None,
        }
    }

    /// Replace the curation policy.
    pub fn with_curation_policy(mut self, policy: Arc<dyn CurationPolicy>) -> Self {
        self.curation = policy;
        self
    }

    /// The system prompt built at construction.
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Append one content entry.
    pub fn add_history(&mut self, content: Content) {
        self.history.push(content);
    }

    /// Replace the whole history (host-driven resets).
    pub fn set_history(&mut self, history: Vec<Content>) {
        self.history = history;
    }

    /// A snapshot of the history; curated applies the policy.
    pub fn history(&self, curated: bool) -> Vec<Content> {
        if curated {
            self.curation.curate(&self.history)
        } else {
            self.history.clone()
        }
    }

    /// Number of raw entries.
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// Whether the history is empty.
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Info about the last compression pass, if any.
    pub fn last_compression(&self) -> Option<CompressionInfo> {
        self.last_compression
    }

    /// Crude token estimate over the curated view (~4 chars per token).
    pub fn estimated_tokens(&self) -> usize {
        let curated = self.history(true);
        let chars: usize = curated
            .iter()
            .flat_map(|content| content.parts.iter())
            .map(part_char_len)
            .sum();
        chars / 4
    }

    /// Compress the history prefix into a model-written summary.
    ///
    /// No-op unless the estimate exceeds `threshold_tokens` (or `force`).
    /// The most recent `keep_recent` entries stay verbatim. Failures are
    /// non-fatal: the history is left untouched and the error returned for
    /// logging.
    pub async fn try_compress(
        &mut self,
        provider: &dyn ModelProvider,
        signal: &AbortSignal,
        threshold_tokens: usize,
        keep_recent: usize,
        force: bool,
    ) -> Result<Option<CompressionInfo>> {
        let original_tokens = self.estimated_tokens();
        if !force && original_tokens <= threshold_tokens {
            return Ok(None);
        }
        if self.history.len() <= keep_recent.max(1) {
            return Ok(None);
        }

        let boundary = self.history.len() - keep_recent.max(1);
        let prefix = &self.history[..boundary];
        let transcript = render_transcript(prefix);

        debug!(
            entries = boundary,
            tokens = original_tokens,
            "Compressing history prefix"
        );

        let request = ModelRequest {
            system: Some(
                "You summarize conversations. Produce a dense, factual summary of the \
                 transcript you are given: decisions made, data gathered, tool results, \
                 and any open threads. Do not add commentary."
                    .to_string(),
            ),
            contents: vec![Content::user(vec![Part::text(transcript)])],
            tools: Vec::new(),
        };
        let summary = provider.complete(request, signal).await?;

        let mut rewritten = vec![Content::model(vec![Part::text(format!(
            "{SUMMARY_MARKER}\n{summary}"
        ))])];
        rewritten.extend_from_slice(&self.history[boundary..]);
        self.history = rewritten;

        let info = CompressionInfo {
            original_tokens,
            new_tokens: self.estimated_tokens(),
        };
        self.last_compression = Some(info);
        info!(
            original = info.original_tokens,
            compressed = info.new_tokens,
            "History compressed"
        );
        Ok(Some(info))
    }
}

fn part_char_len(part: &Part) -> usize {
    match part {
        Part::Text { text } | Part::Thought { text } => text.len(),
        Part::FunctionCall { name, args, .. } => name.len() + args.to_string().len(),
        Part::FunctionResponse { name, response, .. } => name.len() + response.to_string().len(),
        Part::ExecutableCode { code, .. } => code.len(),
        Part::CodeExecutionResult { output, .. } => output.len(),
        Part::InlineData { data, .. } => data.len(),
        Part::FileData { file_uri, .. } => file_uri.len(),
    }
}

/// Plain-text rendering of history entries for the summarizer.
fn render_transcript(history: &[Content]) -> String {
    let mut out = String::new();
    for content in history {
        let role = match content.role {
            Role::User => "user",
            Role::Model => "model",
            Role::Function => "function",
        };
        for part in &content.parts {
            match part {
                Part::Text { text } => {
                    out.push_str(role);
                    out.push_str(": ");
                    out.push_str(text);
                    out.push('\n');
                }
                Part::FunctionCall { name, args, .. } => {
                    out.push_str(&format!("{role}: [call {name} {args}]\n"));
                }
                Part::FunctionResponse { name, response, .. } => {
                    out.push_str(&format!("{role}: [result {name} {response}]\n"));
                }
                _ => {}
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChunkStream, ModelChunk};
    use async_trait::async_trait;
    use serde_json::json;

    struct CannedSummarizer;

    #[async_trait]
    impl ModelProvider for CannedSummarizer {
        async fn stream_chat(
            &self,
            _request: ModelRequest,
            _signal: &AbortSignal,
        ) -> Result<ChunkStream> {
            Ok(Box::pin(futures::stream::iter(vec![Ok(ModelChunk::text(
                "the earlier conversation",
            ))])))
        }

        fn model_name(&self) -> &str {
            "canned"
        }
    }

    fn function_error_content(call_id: &str) -> Content {
        Content::function(vec![Part::FunctionResponse {
            id: call_id.to_string(),
            name: "tool".to_string(),
            response: json!({"error": "boom"}),
        }])
    }

    #[test]
    fn test_append_and_views() {
        let mut chat = Chat::new("system");
        chat.add_history(Content::user(vec![Part::text("hello")]));
        chat.add_history(Content::model(vec![Part::text("hi")]));

        assert_eq!(chat.len(), 2);
        assert_eq!(chat.history(false).len(), 2);
        assert_eq!(chat.history(true).len(), 2);
        assert_eq!(chat.system_prompt(), "system");
    }

    #[test]
    fn test_curation_drops_empty_model_messages() {
        let mut chat = Chat::new("system");
        chat.add_history(Content::user(vec![Part::text("hello")]));
        chat.add_history(Content::model(vec![Part::text("   ")]));
        chat.add_history(Content::user(vec![Part::text("again")]));

        let curated = chat.history(true);
        assert_eq!(curated.len(), 2);
        assert!(curated.iter().all(|c| c.role == Role::User));
        // Raw view is untouched.
        assert_eq!(chat.history(false).len(), 3);
    }

    #[test]
    fn test_curation_drops_function_following_dropped_model() {
        let mut chat = Chat::new("system");
        chat.add_history(Content::user(vec![Part::text("do it")]));
        chat.add_history(Content::model(vec![]));
        chat.add_history(function_error_content("c1"));
        chat.add_history(Content::model(vec![Part::text("recovered")]));

        let curated = chat.history(true);
        assert_eq!(curated.len(), 2);
        assert_eq!(curated[0].role, Role::User);
        assert_eq!(curated[1].text(), "recovered");
    }

    #[test]
    fn test_user_messages_never_dropped() {
        let mut chat = Chat::new("system");
        chat.add_history(Content::user(vec![Part::text("")]));
        let curated = chat.history(true);
        assert_eq!(curated.len(), 1);
    }

    #[test]
    fn test_custom_curation_policy() {
        struct KeepEverything;
        impl CurationPolicy for KeepEverything {
            fn curate(&self, history: &[Content]) -> Vec<Content> {
                history.to_vec()
            }
        }

        let mut chat = Chat::new("system").with_curation_policy(Arc::new(KeepEverything));
        chat.add_history(Content::model(vec![]));
        assert_eq!(chat.history(true).len(), 1);
    }

    #[tokio::test]
    async fn test_compress_below_threshold_is_noop() {
        let mut chat = Chat::new("system");
        chat.add_history(Content::user(vec![Part::text("short")]));

        let info = chat
            .try_compress(&CannedSummarizer, &AbortSignal::new(), 10_000, 2, false)
            .await
            .unwrap();
        assert!(info.is_none());
        assert_eq!(chat.len(), 1);
    }

    #[tokio::test]
    async fn test_compress_replaces_prefix_with_summary() {
        let mut chat = Chat::new("system");
        for i in 0..10 {
            chat.add_history(Content::user(vec![Part::text(format!("message {i}"))]));
            chat.add_history(Content::model(vec![Part::text(format!("reply {i}"))]));
        }
        let before = chat.len();

        let info = chat
            .try_compress(&CannedSummarizer, &AbortSignal::new(), 0, 4, true)
            .await
            .unwrap()
            .expect("compression should run");

        assert!(chat.len() < before);
        assert_eq!(chat.len(), 5); // summary + 4 kept verbatim
        let first = &chat.history(false)[0];
        assert_eq!(first.role, Role::Model);
        assert!(first.text().starts_with(SUMMARY_MARKER));
        assert!(first.text().contains("the earlier conversation"));
        assert_eq!(chat.last_compression(), Some(info));

        // The recent turns survived verbatim.
        let tail = chat.history(false);
        assert_eq!(tail[tail.len() - 1].text(), "reply 9");
    }

    #[tokio::test]
    async fn test_compress_failure_is_nonfatal() {
        struct BrokenProvider;

        #[async_trait]
        impl ModelProvider for BrokenProvider {
            async fn stream_chat(
                &self,
                _request: ModelRequest,
                _signal: &AbortSignal,
            ) -> Result<ChunkStream> {
                Err(crate::types::AgentError::Model("offline".to_string()))
            }

            fn model_name(&self) -> &str {
                "broken"
            }
        }

        let mut chat = Chat::new("system");
        for i in 0..6 {
            chat.add_history(Content::user(vec![Part::text(format!("m{i}"))]));
        }
        let before = chat.history(false);

        let result = chat
            .try_compress(&BrokenProvider, &AbortSignal::new(), 0, 2, true)
            .await;
        assert!(result.is_err());
        // History untouched on failure.
        assert_eq!(chat.history(false), before);
    }
}
