//! Tool scheduler: drives batches of tool calls through the
//! validation → confirmation → execution → completion state machine.
//!
//! Each scheduled batch moves every call through:
//!
//! ```text
//! validating → scheduled → executing → success
//! validating → awaitingApproval → scheduled → executing → success
//!                                           → error
//!                                           → cancelled
//! validating → error
//! awaitingApproval → cancelled
//! executing → error
//! ```
//!
//! Terminal states are never left. Executions within a batch run
//! concurrently; the completion sweep fires exactly once per batch when
//! every call is terminal, clears the call list, and hands the completed
//! calls to the host.

use crate::signal::AbortSignal;
use crate::tools::{OutputSink, Tool, ToolRegistry};
use crate::types::{
    AgentError, ConfirmationDetails, ConfirmationOutcome, Part, Result, ToolCallRequest,
    ToolCallResponse, ToolResult,
};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Ceiling after which the completion wait logs a warning.
///
/// A debug safety net, not a correctness bound: confirmations can keep a
/// batch pending far longer legitimately.
pub const COMPLETION_WAIT_CEILING: Duration = Duration::from_secs(30);

const COMPLETION_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Message used when the user rejects a confirmation.
pub const USER_CANCELLED_MESSAGE: &str = "User cancelled the operation";

/// Message used when the abort signal cancels a call.
pub const ABORTED_MESSAGE: &str = "Operation cancelled";

/// Where a tool call is in its lifecycle.
#[derive(Debug, Clone)]
pub enum ToolCallPhase {
    /// Parameters are being validated and confirmation requirements probed.
    Validating {
        /// When the call was created.
        started: Instant,
    },
    /// Cleared to execute, not yet started.
    Scheduled {
        /// When the call was created.
        started: Instant,
    },
    /// Paused until the host resolves a confirmation.
    AwaitingApproval {
        /// What the host must show the user.
        confirmation: ConfirmationDetails,
        /// When the call was created.
        started: Instant,
    },
    /// The tool is running.
    Executing {
        /// When the call was created.
        started: Instant,
        /// Streaming output accumulated so far.
        live_output: Option<String>,
    },
    /// Terminal: the tool completed successfully.
    Success {
        /// The materialized outcome.
        response: ToolCallResponse,
        /// Wall time from creation to completion.
        duration: Duration,
    },
    /// Terminal: the tool failed or could not be resolved.
    Error {
        /// The materialized outcome (carries the error).
        response: ToolCallResponse,
        /// Wall time from creation to completion.
        duration: Duration,
    },
    /// Terminal: the user or the abort signal cancelled the call.
    Cancelled {
        /// The materialized outcome (carries the cancellation notice).
        response: ToolCallResponse,
        /// Wall time from creation to completion.
        duration: Duration,
    },
}

impl ToolCallPhase {
    /// Machine-readable status label.
    pub fn status(&self) -> &'static str {
        match self {
            ToolCallPhase::Validating { .. } => "validating",
            ToolCallPhase::Scheduled { .. } => "scheduled",
            ToolCallPhase::AwaitingApproval { .. } => "awaiting_approval",
            ToolCallPhase::Executing { .. } => "executing",
            ToolCallPhase::Success { .. } => "success",
            ToolCallPhase::Error { .. } => "error",
            ToolCallPhase::Cancelled { .. } => "cancelled",
        }
    }

    /// Whether this phase is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ToolCallPhase::Success { .. }
                | ToolCallPhase::Error { .. }
                | ToolCallPhase::Cancelled { .. }
        )
    }

    fn started(&self) -> Option<Instant> {
        match self {
            ToolCallPhase::Validating { started }
            | ToolCallPhase::Scheduled { started }
            | ToolCallPhase::AwaitingApproval { started, .. }
            | ToolCallPhase::Executing { started, .. } => Some(*started),
            _ => None,
        }
    }
}

/// One tracked tool call: the immutable request plus its current phase.
#[derive(Clone)]
pub struct ToolCall {
    /// The originating request.
    pub request: ToolCallRequest,
    /// Current lifecycle phase.
    pub phase: ToolCallPhase,
    tool: Option<Arc<dyn Tool>>,
}

impl ToolCall {
    /// The resolved tool, absent for registry misses.
    pub fn tool(&self) -> Option<&Arc<dyn Tool>> {
        self.tool.as_ref()
    }

    /// The response, once the call is terminal.
    pub fn response(&self) -> Option<&ToolCallResponse> {
        match &self.phase {
            ToolCallPhase::Success { response, .. }
            | ToolCallPhase::Error { response, .. }
            | ToolCallPhase::Cancelled { response, .. } => Some(response),
            _ => None,
        }
    }

    /// Wall time in milliseconds, once the call is terminal.
    pub fn duration_ms(&self) -> Option<u64> {
        match &self.phase {
            ToolCallPhase::Success { duration, .. }
            | ToolCallPhase::Error { duration, .. }
            | ToolCallPhase::Cancelled { duration, .. } => Some(duration.as_millis() as u64),
            _ => None,
        }
    }
}

impl fmt::Debug for ToolCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolCall")
            .field("call_id", &self.request.call_id)
            .field("name", &self.request.name)
            .field("status", &self.phase.status())
            .finish()
    }
}

/// Listener invoked with a snapshot after every state change.
pub type ToolCallsListener = Arc<dyn Fn(&[ToolCall]) + Send + Sync>;
/// Listener invoked once per batch with the completed calls.
pub type CompletionListener = Arc<dyn Fn(&[ToolCall]) + Send + Sync>;
/// Listener for streaming tool output: (call id, chunk).
pub type OutputListener = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Everything the spawned execution tasks need to share.
struct SchedulerShared {
    calls: Mutex<Vec<ToolCall>>,
    completed: Mutex<VecDeque<Vec<ToolCall>>>,
    completion_notify: Notify,
    // Serializes snapshot + dispatch so listeners observe per-call state
    // monotonically even when concurrent executions finish together.
    // Listeners must not call back into the scheduler synchronously.
    notify_lock: Mutex<()>,
    on_update: RwLock<Option<ToolCallsListener>>,
    on_all_complete: RwLock<Option<CompletionListener>>,
    on_output: RwLock<Option<OutputListener>>,
}

/// Stateful engine driving batches of tool calls to completion.
///
/// The scheduler exclusively owns the call list; hosts observe it through
/// snapshots passed to the update listener or returned from
/// [`calls_snapshot`](ToolScheduler::calls_snapshot).
pub struct ToolScheduler {
    registry: Arc<ToolRegistry>,
    shared: Arc<SchedulerShared>,
}

impl ToolScheduler {
    /// Create a scheduler over the given registry.
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            shared: Arc::new(SchedulerShared {
                calls: Mutex::new(Vec::new()),
                completed: Mutex::new(VecDeque::new()),
                completion_notify: Notify::new(),
                notify_lock: Mutex::new(()),
                on_update: RwLock::new(None),
                on_all_complete: RwLock::new(None),
                on_output: RwLock::new(None),
            }),
        }
    }

    /// Install the state-change listener.
    pub fn set_update_listener(&self, listener: ToolCallsListener) {
        *self.shared.on_update.write() = Some(listener);
    }

    /// Install the batch-completion listener.
    pub fn set_completion_listener(&self, listener: CompletionListener) {
        *self.shared.on_all_complete.write() = Some(listener);
    }

    /// Install the streaming-output listener.
    pub fn set_output_listener(&self, listener: OutputListener) {
        *self.shared.on_output.write() = Some(listener);
    }

    /// Whether any call is executing or awaiting approval.
    pub fn is_running(&self) -> bool {
        self.shared.calls.lock().iter().any(|call| {
            matches!(
                call.phase,
                ToolCallPhase::Executing { .. } | ToolCallPhase::AwaitingApproval { .. }
            )
        })
    }

    /// Snapshot of the current call list.
    pub fn calls_snapshot(&self) -> Vec<ToolCall> {
        self.shared.calls.lock().clone()
    }

    /// Schedule a batch of tool calls.
    ///
    /// Fails fast when a previous batch is still executing or awaiting
    /// approval. An empty batch is a no-op: immediate quiescence, no
    /// completion callback.
    pub async fn schedule(
        &self,
        requests: Vec<ToolCallRequest>,
        signal: &AbortSignal,
    ) -> Result<()> {
        if self.is_running() {
            return Err(AgentError::Scheduler(
                "cannot schedule new tool calls while others are running".to_string(),
            ));
        }
        if requests.is_empty() {
            return Ok(());
        }

        debug!(count = requests.len(), "Scheduling tool call batch");

        // 1. Materialize the batch: registry misses become terminal errors
        //    immediately, everything else starts validating.
        let mut new_calls = Vec::with_capacity(requests.len());
        for request in requests {
            match self.registry.get(&request.name) {
                Some(tool) => new_calls.push(ToolCall {
                    request,
                    phase: ToolCallPhase::Validating {
                        started: Instant::now(),
                    },
                    tool: Some(tool),
                }),
                None => {
                    let message = format!("Tool '{}' not found in registry", request.name);
                    let response = error_response(&request, &message, None);
                    new_calls.push(ToolCall {
                        request,
                        phase: ToolCallPhase::Error {
                            response,
                            duration: Duration::ZERO,
                        },
                        tool: None,
                    });
                }
            }
        }

        let validating: Vec<(String, Arc<dyn Tool>, Value)> = new_calls
            .iter()
            .filter_map(|call| match (&call.phase, &call.tool) {
                (ToolCallPhase::Validating { .. }, Some(tool)) => Some((
                    call.request.call_id.clone(),
                    tool.clone(),
                    call.request.args.clone(),
                )),
                _ => None,
            })
            .collect();

        self.shared.calls.lock().extend(new_calls);
        self.shared.notify_update();

        // 2. Validate and probe confirmation requirements.
        for (call_id, tool, args) in validating {
            if let Some(message) = tool.validate_params(&args) {
                self.shared
                    .finish_error(&call_id, &format!("Validation failed: {message}"));
                continue;
            }

            match tool.should_confirm(&args, signal).await {
                Ok(Some(confirmation)) => self.shared.mark_awaiting(&call_id, confirmation),
                Ok(None) => self.shared.mark_scheduled(&call_id),
                Err(error) => {
                    self.shared
                        .finish_error(&call_id, &format!("Validation failed: {error}"));
                }
            }
        }

        // 3. Execute whatever is cleared.
        SchedulerShared::attempt_execution_of_scheduled_calls(&self.shared, signal);

        // Batches that terminalize without a single transition (e.g. every
        // tool unknown) still need the sweep.
        self.shared.check_and_notify_completion();
        Ok(())
    }

    /// Resolve a pending confirmation.
    ///
    /// Unknown or non-awaiting call ids are ignored (the host may race a
    /// completed batch). `payload` must be a JSON object for
    /// `modify_with_editor`; its keys are merged over the original args.
    pub fn handle_confirmation_response(
        &self,
        call_id: &str,
        outcome: ConfirmationOutcome,
        signal: &AbortSignal,
        payload: Option<Value>,
    ) {
        SchedulerShared::handle_confirmation_response(
            &self.shared,
            call_id,
            outcome,
            signal,
            payload,
        );
    }

    /// Wait until the current batch completes, returning its calls.
    ///
    /// Uses completion notifications plus a slow poll; logs every
    /// [`COMPLETION_WAIT_CEILING`] without a result. Returns
    /// [`AgentError::Cancelled`] when the signal aborts with nothing in
    /// flight.
    pub async fn wait_for_batch(&self, signal: &AbortSignal) -> Result<Vec<ToolCall>> {
        let mut waited = Duration::ZERO;
        loop {
            if let Some(batch) = self.shared.completed.lock().pop_front() {
                return Ok(batch);
            }
            if signal.aborted() && self.shared.calls.lock().is_empty() {
                return Err(AgentError::Cancelled);
            }

            tokio::select! {
                _ = self.shared.completion_notify.notified() => {}
                _ = tokio::time::sleep(COMPLETION_POLL_INTERVAL) => {
                    waited += COMPLETION_POLL_INTERVAL;
                    if waited >= COMPLETION_WAIT_CEILING {
                        warn!(
                            pending = self.shared.calls.lock().len(),
                            "Tool batch still incomplete after {}s",
                            COMPLETION_WAIT_CEILING.as_secs()
                        );
                        waited = Duration::ZERO;
                    }
                }
            }
        }
    }
}

impl SchedulerShared {
    fn handle_confirmation_response(
        shared: &Arc<Self>,
        call_id: &str,
        outcome: ConfirmationOutcome,
        signal: &AbortSignal,
        payload: Option<Value>,
    ) {
        let tool = {
            let calls = shared.calls.lock();
            let Some(call) = calls.iter().find(|call| {
                call.request.call_id == call_id
                    && matches!(call.phase, ToolCallPhase::AwaitingApproval { .. })
            }) else {
                warn!(call_id, "Confirmation response for unknown or settled call");
                return;
            };
            call.tool.clone()
        };

        debug!(call_id, outcome = ?outcome, "Confirmation resolved");

        // Let the tool observe the decision (trust widening happens here).
        if let Some(tool) = &tool {
            tool.record_confirmation_outcome(outcome);
        }

        if outcome == ConfirmationOutcome::Cancel || signal.aborted() {
            shared.finish_cancelled(call_id, USER_CANCELLED_MESSAGE);
        } else {
            if outcome == ConfirmationOutcome::ModifyWithEditor {
                if let Some(Value::Object(updates)) = payload {
                    let mut calls = shared.calls.lock();
                    if let Some(call) = calls
                        .iter_mut()
                        .find(|call| call.request.call_id == call_id)
                    {
                        if let Value::Object(args) = &mut call.request.args {
                            for (key, value) in updates {
                                args.insert(key, value);
                            }
                        } else {
                            call.request.args = Value::Object(updates);
                        }
                    }
                }
            }
            shared.mark_scheduled(call_id);
        }

        Self::attempt_execution_of_scheduled_calls(shared, signal);
    }

    /// Launch every `scheduled` call concurrently.
    fn attempt_execution_of_scheduled_calls(shared: &Arc<Self>, signal: &AbortSignal) {
        let runnable: Vec<(String, Arc<dyn Tool>, Value)> = {
            let calls = shared.calls.lock();
            calls
                .iter()
                .filter_map(|call| match (&call.phase, &call.tool) {
                    (ToolCallPhase::Scheduled { .. }, Some(tool)) => Some((
                        call.request.call_id.clone(),
                        tool.clone(),
                        call.request.args.clone(),
                    )),
                    _ => None,
                })
                .collect()
        };

        for (call_id, tool, args) in runnable {
            if signal.aborted() {
                shared.finish_cancelled(&call_id, ABORTED_MESSAGE);
                continue;
            }

            shared.mark_executing(&call_id);

            let shared = shared.clone();
            let signal = signal.clone();
            tokio::spawn(async move {
                let sink: OutputSink = {
                    let shared = shared.clone();
                    let call_id = call_id.clone();
                    Arc::new(move |chunk: String| {
                        shared.record_live_output(&call_id, &chunk);
                    })
                };

                let outcome = tool.execute(args, &signal, Some(sink)).await;
                match outcome {
                    Ok(result) => {
                        if result.error.is_some() {
                            shared.finish_error_result(&call_id, &result);
                        } else {
                            shared.finish_success(&call_id, &result);
                        }
                    }
                    Err(AgentError::Cancelled) => {
                        shared.finish_cancelled(&call_id, ABORTED_MESSAGE);
                    }
                    Err(error) => {
                        shared.finish_error(&call_id, &error.to_string());
                    }
                }
            });
        }
    }

    // ============= Transitions =============

    fn mark_scheduled(&self, call_id: &str) {
        self.transition(call_id, |call| {
            call.phase
                .started()
                .map(|started| ToolCallPhase::Scheduled { started })
        });
    }

    fn mark_awaiting(&self, call_id: &str, confirmation: ConfirmationDetails) {
        self.transition(call_id, move |call| {
            call.phase
                .started()
                .map(|started| ToolCallPhase::AwaitingApproval {
                    confirmation,
                    started,
                })
        });
    }

    fn mark_executing(&self, call_id: &str) {
        self.transition(call_id, |call| {
            call.phase.started().map(|started| ToolCallPhase::Executing {
                started,
                live_output: None,
            })
        });
    }

    fn finish_success(&self, call_id: &str, result: &ToolResult) {
        self.finish(call_id, |request, duration| ToolCallPhase::Success {
            response: success_response(request, result),
            duration,
        });
    }

    fn finish_error_result(&self, call_id: &str, result: &ToolResult) {
        let message = result.error.clone().unwrap_or_default();
        let display = result.return_display.clone();
        self.finish(call_id, move |request, duration| ToolCallPhase::Error {
            response: error_response(request, &message, display),
            duration,
        });
    }

    fn finish_error(&self, call_id: &str, message: &str) {
        self.finish(call_id, |request, duration| ToolCallPhase::Error {
            response: error_response(request, message, None),
            duration,
        });
    }

    fn finish_cancelled(&self, call_id: &str, message: &str) {
        self.finish(call_id, |request, duration| ToolCallPhase::Cancelled {
            response: cancelled_response(request, message),
            duration,
        });
    }

    fn finish(
        &self,
        call_id: &str,
        build: impl FnOnce(&ToolCallRequest, Duration) -> ToolCallPhase,
    ) {
        self.transition(call_id, |call| {
            let duration = call
                .phase
                .started()
                .map(|started| started.elapsed())
                .unwrap_or(Duration::ZERO);
            Some(build(&call.request, duration))
        });
    }

    /// Apply a phase change unless the call is already terminal.
    fn transition<F>(&self, call_id: &str, update: F)
    where
        F: FnOnce(&ToolCall) -> Option<ToolCallPhase>,
    {
        let changed = {
            let mut calls = self.calls.lock();
            let Some(call) = calls
                .iter_mut()
                .find(|call| call.request.call_id == call_id)
            else {
                return;
            };
            // Terminal states are never left.
            if call.phase.is_terminal() {
                return;
            }
            match update(call) {
                Some(next) => {
                    debug!(
                        call_id,
                        from = call.phase.status(),
                        to = next.status(),
                        "Tool call transition"
                    );
                    call.phase = next;
                    true
                }
                None => false,
            }
        };

        if changed {
            self.notify_update();
            self.check_and_notify_completion();
        }
    }

    fn record_live_output(&self, call_id: &str, chunk: &str) {
        {
            let mut calls = self.calls.lock();
            if let Some(call) = calls
                .iter_mut()
                .find(|call| call.request.call_id == call_id)
            {
                if let ToolCallPhase::Executing { live_output, .. } = &mut call.phase {
                    live_output.get_or_insert_with(String::new).push_str(chunk);
                }
            }
        }
        let listener = self.on_output.read().clone();
        if let Some(listener) = listener {
            listener(call_id, chunk);
        }
    }

    /// Completion sweep: when every call is terminal, clear the list, fire
    /// the completion callback once, and notify listeners of the empty
    /// state.
    fn check_and_notify_completion(&self) {
        let batch = {
            let mut calls = self.calls.lock();
            if calls.is_empty() {
                return;
            }
            let all_terminal = calls.iter().all(|call| call.phase.is_terminal());
            let any_awaiting = calls
                .iter()
                .any(|call| matches!(call.phase, ToolCallPhase::AwaitingApproval { .. }));
            let any_executing = calls
                .iter()
                .any(|call| matches!(call.phase, ToolCallPhase::Executing { .. }));
            if !all_terminal || any_awaiting || any_executing {
                return;
            }
            std::mem::take(&mut *calls)
        };

        info!(count = batch.len(), "All tool calls completed");
        let listener = self.on_all_complete.read().clone();
        if let Some(listener) = listener {
            listener(&batch);
        }
        self.completed.lock().push_back(batch);
        self.notify_update();
        self.completion_notify.notify_waiters();
    }

    fn notify_update(&self) {
        let listener = self.on_update.read().clone();
        if let Some(listener) = listener {
            let _ordered = self.notify_lock.lock();
            let snapshot = self.calls.lock().clone();
            listener(&snapshot);
        }
    }
}

// ============= Response construction =============

/// Function-response part for a successful result: the model sees the
/// concatenated text of the tool's `llm_content`.
fn success_response(request: &ToolCallRequest, result: &ToolResult) -> ToolCallResponse {
    ToolCallResponse {
        call_id: request.call_id.clone(),
        parts: vec![Part::FunctionResponse {
            id: request.call_id.clone(),
            name: request.name.clone(),
            response: json!({ "output": result.llm_text() }),
        }],
        result_display: result.return_display.clone(),
        error: None,
    }
}

fn error_response(
    request: &ToolCallRequest,
    message: &str,
    display: Option<String>,
) -> ToolCallResponse {
    ToolCallResponse {
        call_id: request.call_id.clone(),
        parts: vec![Part::FunctionResponse {
            id: request.call_id.clone(),
            name: request.name.clone(),
            response: json!({ "error": message }),
        }],
        result_display: display,
        error: Some(message.to_string()),
    }
}

fn cancelled_response(request: &ToolCallRequest, message: &str) -> ToolCallResponse {
    ToolCallResponse {
        call_id: request.call_id.clone(),
        parts: vec![Part::FunctionResponse {
            id: request.call_id.clone(),
            name: request.name.clone(),
            response: json!({ "error": message }),
        }],
        result_display: Some(message.to_string()),
        error: Some(message.to_string()),
    }
}
