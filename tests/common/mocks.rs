//! Mock implementations for testing.
//!
//! Provides a scripted model provider and a handful of small tools so the
//! turn loop and scheduler can be exercised end-to-end without a real
//! model or external processes.

use async_trait::async_trait;
use parking_lot::Mutex;
use rudder::llm::{ChunkStream, FunctionCall, ModelChunk, ModelProvider, ModelRequest};
use rudder::tools::OutputSink;
use rudder::types::{ConfirmationDetails, Result, ToolResult};
use rudder::{AbortSignal, AgentError, StreamFinishReason, Tool};
use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Initialize test logging once; respects `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One scripted model response.
#[derive(Default)]
pub struct TurnScript {
    chunks: Vec<ModelChunk>,
    error: Option<String>,
    hang: bool,
}

impl TurnScript {
    /// A response made of text chunks, finishing normally.
    pub fn text(chunks: &[&str]) -> Self {
        let mut script: Vec<ModelChunk> = chunks.iter().map(|c| ModelChunk::text(*c)).collect();
        script.push(ModelChunk::finished(StreamFinishReason::Stop));
        Self {
            chunks: script,
            ..Default::default()
        }
    }

    /// A response carrying function calls in a single chunk.
    pub fn tool_calls(calls: Vec<(&str, &str, Value)>) -> Self {
        let chunk = ModelChunk {
            function_calls: calls
                .into_iter()
                .map(|(id, name, args)| FunctionCall {
                    id: Some(id.to_string()),
                    name: name.to_string(),
                    args,
                })
                .collect(),
            finish_reason: Some(StreamFinishReason::Stop),
            ..Default::default()
        };
        Self {
            chunks: vec![chunk],
            ..Default::default()
        }
    }

    /// A response that fails mid-stream after the given chunks.
    pub fn error_after(chunks: &[&str], message: &str) -> Self {
        Self {
            chunks: chunks.iter().map(|c| ModelChunk::text(*c)).collect(),
            error: Some(message.to_string()),
            hang: false,
        }
    }

    /// A response that never produces anything (for abort tests).
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Default::default()
        }
    }
}

/// Scripted model provider: pops one [`TurnScript`] per `stream_chat`
/// call and records every request it receives.
pub struct MockProvider {
    scripts: Mutex<VecDeque<TurnScript>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl MockProvider {
    /// Build a provider from scripts, consumed in order.
    pub fn new(scripts: Vec<TurnScript>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every request seen so far.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().clone()
    }

    /// Number of `stream_chat` calls made.
    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    async fn stream_chat(
        &self,
        request: ModelRequest,
        _signal: &AbortSignal,
    ) -> Result<ChunkStream> {
        self.requests.lock().push(request);

        let script = self.scripts.lock().pop_front().unwrap_or_else(|| TurnScript {
            chunks: vec![ModelChunk::finished(StreamFinishReason::Stop)],
            ..Default::default()
        });

        if script.hang {
            return Ok(Box::pin(futures::stream::pending()));
        }

        let mut items: Vec<Result<ModelChunk>> = script.chunks.into_iter().map(Ok).collect();
        if let Some(message) = script.error {
            items.push(Err(AgentError::Model(message)));
        }
        Ok(Box::pin(futures::stream::iter(items)))
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }
}

// ============= Test tools =============

/// Returns a fixed timestamp; never asks for confirmation.
pub struct ClockTool;

#[async_trait]
impl Tool for ClockTool {
    fn name(&self) -> &str {
        "now"
    }

    fn description(&self) -> &str {
        "Returns the current time"
    }

    fn parameter_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(
        &self,
        _args: Value,
        _signal: &AbortSignal,
        _output: Option<OutputSink>,
    ) -> Result<ToolResult> {
        Ok(ToolResult::text("2024-01-01T00:00:00Z"))
    }
}

/// Pretends to delete a file; always asks for confirmation and counts
/// executions.
pub struct DeleteFileTool {
    executions: AtomicUsize,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[allow(dead_code)]
struct DeleteFileArgs {
    /// Path of the file to delete.
    path: String,
}

impl DeleteFileTool {
    pub fn new() -> Self {
        Self {
            executions: AtomicUsize::new(0),
        }
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Deletes a file from the workspace"
    }

    fn parameter_schema(&self) -> Value {
        serde_json::to_value(schema_for!(DeleteFileArgs))
            .unwrap_or_else(|_| json!({"type": "object", "properties": {}}))
    }

    async fn should_confirm(
        &self,
        args: &Value,
        _signal: &AbortSignal,
    ) -> Result<Option<ConfirmationDetails>> {
        Ok(Some(ConfirmationDetails::Generic {
            title: "Delete file".to_string(),
            description: format!("delete {}", args["path"].as_str().unwrap_or("?")),
        }))
    }

    async fn execute(
        &self,
        args: Value,
        _signal: &AbortSignal,
        _output: Option<OutputSink>,
    ) -> Result<ToolResult> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        Ok(ToolResult::text(format!(
            "deleted {}",
            args["path"].as_str().unwrap_or("?")
        )))
    }
}

/// Sleeps until done or cancelled.
pub struct SlowTool {
    pub duration: Duration,
}

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }

    fn description(&self) -> &str {
        "Takes a while"
    }

    fn parameter_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(
        &self,
        _args: Value,
        signal: &AbortSignal,
        _output: Option<OutputSink>,
    ) -> Result<ToolResult> {
        tokio::select! {
            _ = tokio::time::sleep(self.duration) => Ok(ToolResult::text("finished")),
            _ = signal.cancelled() => Err(AgentError::Cancelled),
        }
    }
}

/// Always raises.
pub struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "failing"
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    fn parameter_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(
        &self,
        _args: Value,
        _signal: &AbortSignal,
        _output: Option<OutputSink>,
    ) -> Result<ToolResult> {
        Err(AgentError::ToolExecution {
            tool: "failing".to_string(),
            message: "synthetic failure".to_string(),
        })
    }
}

/// Records confirmation outcomes it observes.
pub struct OutcomeRecordingTool {
    outcomes: Arc<Mutex<Vec<rudder::ConfirmationOutcome>>>,
}

impl OutcomeRecordingTool {
    pub fn new() -> (Self, Arc<Mutex<Vec<rudder::ConfirmationOutcome>>>) {
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                outcomes: outcomes.clone(),
            },
            outcomes,
        )
    }
}

#[async_trait]
impl Tool for OutcomeRecordingTool {
    fn name(&self) -> &str {
        "guarded"
    }

    fn description(&self) -> &str {
        "Requires confirmation and records the outcome"
    }

    fn parameter_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn should_confirm(
        &self,
        _args: &Value,
        _signal: &AbortSignal,
    ) -> Result<Option<ConfirmationDetails>> {
        Ok(Some(ConfirmationDetails::Generic {
            title: "Guarded operation".to_string(),
            description: "requires approval".to_string(),
        }))
    }

    fn record_confirmation_outcome(&self, outcome: rudder::ConfirmationOutcome) {
        self.outcomes.lock().push(outcome);
    }

    async fn execute(
        &self,
        _args: Value,
        _signal: &AbortSignal,
        _output: Option<OutputSink>,
    ) -> Result<ToolResult> {
        Ok(ToolResult::text("guarded ok"))
    }
}
