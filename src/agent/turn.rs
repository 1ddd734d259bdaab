//! A single model-response cycle.
//!
//! A [`Turn`] streams one model response, translating chunks into
//! [`AgentEvent`]s for the host while accumulating the raw parts so the
//! chat can append the final model content atomically after the stream
//! ends. A turn does not execute tools, does not mutate history, and does
//! not loop.

use crate::llm::{ModelChunk, ModelProvider, ModelRequest, StreamFinishReason, TokenUsage};
use crate::signal::AbortSignal;
use crate::types::{Part, ToolCallRequest};
use async_stream::stream;
use futures::{Stream, StreamExt};
use tracing::debug;
use uuid::Uuid;

/// Events yielded to the host while a response streams.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Incremental visible text.
    Content(String),
    /// Incremental model reasoning.
    Thought(String),
    /// A fully-formed tool call extracted from the stream.
    ToolCallRequest(ToolCallRequest),
    /// Transport or decoding failure.
    Error(String),
    /// The stream closed with a reason.
    Finished(StreamFinishReason),
    /// The client loop ended because the turn budget ran out.
    MaxTurnsReached,
}

/// One model-response cycle.
pub struct Turn {
    prompt_id: String,
    parts: Vec<Part>,
    pending: Vec<ToolCallRequest>,
    finish_reason: Option<StreamFinishReason>,
    usage: TokenUsage,
}

impl Turn {
    /// Create a turn bound to a prompt id.
    pub fn new(prompt_id: impl Into<String>) -> Self {
        Self {
            prompt_id: prompt_id.into(),
            parts: Vec::new(),
            pending: Vec::new(),
            finish_reason: None,
            usage: TokenUsage::default(),
        }
    }

    /// Stream the model response for `request`, yielding events.
    ///
    /// Emission order is the order chunks arrive. The accumulated parts
    /// and pending tool calls are available once the stream is drained.
    pub fn run<'a>(
        &'a mut self,
        provider: &'a dyn ModelProvider,
        request: ModelRequest,
        signal: &'a AbortSignal,
    ) -> impl Stream<Item = AgentEvent> + 'a {
        stream! {
            let chunks = match provider.stream_chat(request, signal).await {
                Ok(chunks) => chunks,
                Err(error) => {
                    yield AgentEvent::Error(error.to_string());
                    return;
                }
            };
            futures::pin_mut!(chunks);

            loop {
                // An abort ends the stream; the terminal event falls out of
                // the end-of-stream arm below via the recorded finish reason.
                let next = tokio::select! {
                    next = chunks.next() => next,
                    _ = signal.cancelled() => {
                        debug!(prompt_id = %self.prompt_id, "Turn aborted mid-stream");
                        self.finish_reason = Some(StreamFinishReason::Aborted);
                        None
                    }
                };

                match next {
                    Some(Ok(chunk)) => {
                        for event in self.ingest(chunk) {
                            yield event;
                        }
                    }
                    Some(Err(error)) => {
                        yield AgentEvent::Error(error.to_string());
                        return;
                    }
                    None => {
                        let reason = self
                            .finish_reason
                            .clone()
                            .unwrap_or(StreamFinishReason::Stop);
                        yield AgentEvent::Finished(reason);
                        return;
                    }
                }
            }
        }
    }

    /// Fold one chunk into the turn, producing the events it carries.
    pub fn ingest(&mut self, chunk: ModelChunk) -> Vec<AgentEvent> {
        let mut events = Vec::new();

        if let Some(text) = chunk.text {
            if !text.is_empty() {
                self.push_text(&text);
                events.push(AgentEvent::Content(text));
            }
        }

        if let Some(thought) = chunk.thought {
            if !thought.is_empty() {
                self.parts.push(Part::Thought {
                    text: thought.clone(),
                });
                events.push(AgentEvent::Thought(thought));
            }
        }

        for call in chunk.function_calls {
            let call_id = match call.id {
                Some(id) if !id.is_empty() => id,
                _ => format!("{}-{}", call.name, Uuid::new_v4()),
            };
            self.parts.push(Part::FunctionCall {
                id: call_id.clone(),
                name: call.name.clone(),
                args: call.args.clone(),
            });
            let request = ToolCallRequest {
                call_id,
                name: call.name,
                args: call.args,
                is_client_initiated: false,
                prompt_id: self.prompt_id.clone(),
            };
            self.pending.push(request.clone());
            events.push(AgentEvent::ToolCallRequest(request));
        }

        if let Some(usage) = chunk.usage {
            self.usage.add(usage);
        }

        if let Some(reason) = chunk.finish_reason {
            self.finish_reason = Some(reason);
        }

        events
    }

    /// Coalesce adjacent text deltas into one part.
    fn push_text(&mut self, text: &str) {
        if let Some(Part::Text { text: last }) = self.parts.last_mut() {
            last.push_str(text);
        } else {
            self.parts.push(Part::text(text));
        }
    }

    /// The accumulated model parts so far.
    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    /// Move the accumulated parts out of the turn.
    pub fn take_parts(&mut self) -> Vec<Part> {
        std::mem::take(&mut self.parts)
    }

    /// Tool calls requested during this turn, in arrival order.
    pub fn pending_requests(&self) -> &[ToolCallRequest] {
        &self.pending
    }

    /// Move the pending tool calls out of the turn.
    pub fn take_pending_requests(&mut self) -> Vec<ToolCallRequest> {
        std::mem::take(&mut self.pending)
    }

    /// Finish reason, once the stream ended.
    pub fn finish_reason(&self) -> Option<&StreamFinishReason> {
        self.finish_reason.as_ref()
    }

    /// Usage accumulated across the stream.
    pub fn usage(&self) -> TokenUsage {
        self.usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::FunctionCall;
    use serde_json::json;

    #[test]
    fn test_ingest_text_coalesces_parts() {
        let mut turn = Turn::new("p1");

        let events = turn.ingest(ModelChunk::text("Hi "));
        assert_eq!(events, vec![AgentEvent::Content("Hi ".to_string())]);

        turn.ingest(ModelChunk::text("there!"));
        assert_eq!(turn.parts().len(), 1);
        assert_eq!(turn.parts()[0], Part::text("Hi there!"));
    }

    #[test]
    fn test_ingest_thought_is_distinct_from_content() {
        let mut turn = Turn::new("p1");
        let events = turn.ingest(ModelChunk::thought("pondering"));
        assert_eq!(events, vec![AgentEvent::Thought("pondering".to_string())]);
        assert!(matches!(turn.parts()[0], Part::Thought { .. }));
    }

    #[test]
    fn test_ingest_function_call_preserves_id() {
        let mut turn = Turn::new("p1");
        let chunk = ModelChunk {
            function_calls: vec![FunctionCall {
                id: Some("c1".to_string()),
                name: "now".to_string(),
                args: json!({}),
            }],
            ..Default::default()
        };

        let events = turn.ingest(chunk);
        assert_eq!(events.len(), 1);
        match &events[0] {
            AgentEvent::ToolCallRequest(request) => {
                assert_eq!(request.call_id, "c1");
                assert_eq!(request.name, "now");
                assert_eq!(request.prompt_id, "p1");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(turn.pending_requests().len(), 1);
    }

    #[test]
    fn test_ingest_function_call_synthesizes_missing_id() {
        let mut turn = Turn::new("p1");
        let chunk = ModelChunk {
            function_calls: vec![FunctionCall {
                id: None,
                name: "grep".to_string(),
                args: json!({"pattern": "x"}),
            }],
            ..Default::default()
        };

        turn.ingest(chunk);
        let request = &turn.pending_requests()[0];
        assert!(request.call_id.starts_with("grep-"));
        assert!(request.call_id.len() > "grep-".len());
    }

    #[test]
    fn test_ingest_accumulates_usage_and_finish() {
        let mut turn = Turn::new("p1");
        turn.ingest(ModelChunk {
            usage: Some(TokenUsage::new(10, 2)),
            ..Default::default()
        });
        turn.ingest(ModelChunk {
            usage: Some(TokenUsage::new(0, 5)),
            finish_reason: Some(StreamFinishReason::Stop),
            ..Default::default()
        });

        assert_eq!(turn.usage().total(), 17);
        assert_eq!(turn.finish_reason(), Some(&StreamFinishReason::Stop));
    }

    #[test]
    fn test_empty_chunks_produce_no_events() {
        let mut turn = Turn::new("p1");
        let events = turn.ingest(ModelChunk::default());
        assert!(events.is_empty());
        assert!(turn.parts().is_empty());
    }
}
