//! The client orchestrator: glues chat, turns and the scheduler into the
//! recursive turn loop.

use crate::agent::chat::Chat;
use crate::agent::turn::{AgentEvent, Turn};
use crate::config::AgentConfig;
use crate::llm::{ModelProvider, ModelRequest, StreamFinishReason, TokenUsage};
use crate::prompts::PromptManager;
use crate::scheduler::ToolScheduler;
use crate::signal::AbortSignal;
use crate::tools::ToolRegistry;
use crate::types::{Content, Part, Result, Role};
use async_stream::stream;
use futures::{Stream, StreamExt};
use parking_lot::Mutex as SyncMutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Who should produce the next message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextSpeaker {
    /// Wait for user input.
    User,
    /// The model should continue on its own.
    Model,
}

const NEXT_SPEAKER_PROMPT: &str = "Analyze *only* the content and structure of your \
immediately preceding response. Decide who should speak next: 'model' if you stated an \
intent to do something further, asked yourself a question you have not answered, or left \
the task visibly unfinished; 'user' if you completed the request or asked the user a \
question. Respond with JSON only, in the form \
{\"reasoning\": \"...\", \"next_speaker\": \"user\" | \"model\"}.";

/// Synthetic user nudge sent when the model should keep going.
const CONTINUE_PROMPT: &str = "Please continue.";

/// Orchestrates the conversation: streams model turns, runs the tool
/// scheduler on requested calls, feeds results back, and loops until the
/// model yields control.
pub struct AgentClient {
    config: Arc<AgentConfig>,
    provider: Arc<dyn ModelProvider>,
    registry: Arc<ToolRegistry>,
    scheduler: Arc<ToolScheduler>,
    chat: Mutex<Chat>,
    session_turns: AtomicU32,
    usage: SyncMutex<TokenUsage>,
}

impl AgentClient {
    /// Build a client: constructs the system prompt (static prompt,
    /// hierarchical memory, project prompt, environment summary) and an
    /// internal scheduler over the registry.
    pub fn new(
        config: Arc<AgentConfig>,
        provider: Arc<dyn ModelProvider>,
        registry: Arc<ToolRegistry>,
    ) -> Result<Self> {
        let prompts = PromptManager::new(config.clone());
        let system_prompt = prompts.core_system_prompt()?;
        let scheduler = Arc::new(ToolScheduler::new(registry.clone()));

        Ok(Self {
            config,
            provider,
            registry,
            scheduler,
            chat: Mutex::new(Chat::new(system_prompt)),
            session_turns: AtomicU32::new(0),
            usage: SyncMutex::new(TokenUsage::default()),
        })
    }

    /// The scheduler, for confirmation handling and observation.
    /// Listeners can be attached through its setters.
    pub fn scheduler(&self) -> &Arc<ToolScheduler> {
        &self.scheduler
    }

    /// The tool registry backing this client.
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Number of model turns executed this session.
    pub fn session_turn_count(&self) -> u32 {
        self.session_turns.load(Ordering::SeqCst)
    }

    /// Cumulative token usage across all turns.
    pub fn usage(&self) -> TokenUsage {
        *self.usage.lock()
    }

    /// Snapshot of the conversation history.
    pub async fn history(&self, curated: bool) -> Vec<Content> {
        self.chat.lock().await.history(curated)
    }

    /// Reset the conversation history.
    pub async fn clear_history(&self) {
        self.chat.lock().await.set_history(Vec::new());
    }

    /// Force a history compression pass; failure is non-fatal.
    pub async fn compress_history(&self, signal: &AbortSignal) -> Option<crate::agent::chat::CompressionInfo> {
        let threshold = self.config.history.compression_threshold_tokens;
        let keep = self.config.history.keep_recent_turns;
        let mut chat = self.chat.lock().await;
        match chat
            .try_compress(self.provider.as_ref(), signal, threshold, keep, true)
            .await
        {
            Ok(info) => info,
            Err(error) => {
                warn!(%error, "Forced history compression failed");
                None
            }
        }
    }

    /// Send user input and stream the resulting events.
    ///
    /// Runs the full turn loop: each model turn streams to the caller; tool
    /// calls are scheduled, awaited, and their function responses fed back
    /// as the next model input. The loop ends when a turn produces no tool
    /// calls and the next-speaker judgment picks the user, when the turn
    /// budget is exhausted, or when the signal aborts.
    pub fn send_message_stream(
        self: Arc<Self>,
        request: Vec<Part>,
        signal: AbortSignal,
        prompt_id: String,
        max_turns: Option<u32>,
    ) -> impl Stream<Item = AgentEvent> + 'static {
        let client = self;

        stream! {
            let mut remaining = max_turns
                .unwrap_or(client.config.agent.max_session_turns)
                .max(1);
            let mut next_content = Content::user(request);

            loop {
                if signal.aborted() {
                    yield AgentEvent::Finished(StreamFinishReason::Aborted);
                    break;
                }

                // Record the pending input, compressing beforehand when the
                // curated history has outgrown its budget.
                {
                    let threshold = client.config.history.compression_threshold_tokens;
                    let keep = client.config.history.keep_recent_turns;
                    let mut chat = client.chat.lock().await;
                    if chat.estimated_tokens() > threshold {
                        if let Err(error) = chat
                            .try_compress(client.provider.as_ref(), &signal, threshold, keep, false)
                            .await
                        {
                            warn!(%error, "History compression failed");
                        }
                    }
                    chat.add_history(next_content.clone());
                }

                if remaining == 0 {
                    debug!("Turn budget exhausted");
                    yield AgentEvent::MaxTurnsReached;
                    break;
                }
                remaining -= 1;
                client.session_turns.fetch_add(1, Ordering::SeqCst);

                let model_request = {
                    let chat = client.chat.lock().await;
                    ModelRequest {
                        system: Some(chat.system_prompt().to_string()),
                        contents: chat.history(true),
                        tools: client.registry.function_declarations(),
                    }
                };

                let mut turn = Turn::new(prompt_id.clone());
                let mut turn_failed = false;
                {
                    let events = turn.run(client.provider.as_ref(), model_request, &signal);
                    futures::pin_mut!(events);
                    while let Some(event) = events.next().await {
                        if matches!(event, AgentEvent::Error(_)) {
                            turn_failed = true;
                        }
                        yield event;
                    }
                }

                // Finalize: the accumulated parts become the model content,
                // even partial ones from an aborted or failed stream.
                let parts = turn.take_parts();
                let pending = turn.take_pending_requests();
                client.usage.lock().add(turn.usage());
                if !parts.is_empty() {
                    client.chat.lock().await.add_history(Content::model(parts));
                }

                if turn_failed || signal.aborted() {
                    break;
                }

                if pending.is_empty() {
                    if !client.config.agent.next_speaker_check {
                        break;
                    }
                    match client.check_next_speaker(&signal).await {
                        Some(NextSpeaker::Model) => {
                            next_content = Content::user(vec![Part::text(CONTINUE_PROMPT)]);
                            continue;
                        }
                        _ => break,
                    }
                }

                // Drive the batch to completion and feed the responses back.
                if let Err(error) = client.scheduler.schedule(pending.clone(), &signal).await {
                    yield AgentEvent::Error(error.to_string());
                    break;
                }
                let batch = match client.scheduler.wait_for_batch(&signal).await {
                    Ok(batch) => batch,
                    Err(error) => {
                        yield AgentEvent::Error(error.to_string());
                        break;
                    }
                };

                // Function responses preserve request order regardless of
                // completion order.
                let mut response_parts = Vec::new();
                for request in &pending {
                    if let Some(call) = batch
                        .iter()
                        .find(|call| call.request.call_id == request.call_id)
                    {
                        if let Some(response) = call.response() {
                            response_parts.extend(response.parts.iter().cloned());
                        }
                    }
                }

                if signal.aborted() {
                    client
                        .chat
                        .lock()
                        .await
                        .add_history(Content::function(response_parts));
                    yield AgentEvent::Finished(StreamFinishReason::Aborted);
                    break;
                }

                next_content = Content::function(response_parts);
            }
        }
    }

    /// Small follow-up model call judging whether the model should keep
    /// going. `None` (and any failure) means: hand control to the user.
    async fn check_next_speaker(&self, signal: &AbortSignal) -> Option<NextSpeaker> {
        let mut contents = {
            let chat = self.chat.lock().await;
            chat.history(true)
        };

        // An empty last model response cannot have yielded to the user.
        let last_model = contents.iter().rev().find(|c| c.role == Role::Model)?;
        if last_model.text().trim().is_empty() {
            return Some(NextSpeaker::Model);
        }

        contents.push(Content::user(vec![Part::text(NEXT_SPEAKER_PROMPT)]));
        let request = ModelRequest {
            system: None,
            contents,
            tools: Vec::new(),
        };

        let raw = match self.provider.complete(request, signal).await {
            Ok(raw) => raw,
            Err(error) => {
                debug!(%error, "Next-speaker check failed");
                return None;
            }
        };

        parse_next_speaker(&raw)
    }
}

/// Extract the `next_speaker` verdict from a (possibly fenced) JSON reply.
fn parse_next_speaker(raw: &str) -> Option<NextSpeaker> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    let value: serde_json::Value = serde_json::from_str(&raw[start..=end]).ok()?;
    match value.get("next_speaker").and_then(|v| v.as_str())? {
        "model" => Some(NextSpeaker::Model),
        "user" => Some(NextSpeaker::User),
        _ => None,
    }
}
