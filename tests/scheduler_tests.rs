//! Integration tests for the tool scheduler state machine.
//!
//! Covers multi-call batches, confirmation coordination across several
//! pending calls, and the invariants every terminal call must satisfy.

mod common;

use common::mocks::{DeleteFileTool, FailingTool, OutcomeRecordingTool, SlowTool};
use rudder::scheduler::ToolScheduler;
use rudder::types::ToolCallRequest;
use rudder::{
    AbortSignal, ConfirmationOutcome, Part, ToolCallPhase, ToolRegistration, ToolRegistry,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn request(call_id: &str, name: &str, args: serde_json::Value) -> ToolCallRequest {
    ToolCallRequest {
        call_id: call_id.to_string(),
        name: name.to_string(),
        args,
        is_client_initiated: false,
        prompt_id: "prompt-1".to_string(),
    }
}

fn scheduler_with(tools: Vec<Arc<dyn rudder::Tool>>) -> Arc<ToolScheduler> {
    let registry = ToolRegistry::new();
    for tool in tools {
        registry.register(ToolRegistration::new(tool));
    }
    Arc::new(ToolScheduler::new(Arc::new(registry)))
}

#[tokio::test]
async fn multiple_pending_confirmations_block_until_all_resolved() {
    common::mocks::init_tracing();
    let scheduler = scheduler_with(vec![
        Arc::new(DeleteFileTool::new()),
        Arc::new(OutcomeRecordingTool::new().0),
    ]);
    let signal = AbortSignal::new();

    scheduler
        .schedule(
            vec![
                request("c1", "delete_file", json!({"path": "a.txt"})),
                request("c2", "guarded", json!({})),
            ],
            &signal,
        )
        .await
        .unwrap();

    let snapshot = scheduler.calls_snapshot();
    assert!(snapshot
        .iter()
        .all(|call| call.phase.status() == "awaiting_approval"));

    // Resolving one confirmation executes that call but the batch stays
    // open until the sibling resolves too.
    scheduler.handle_confirmation_response("c1", ConfirmationOutcome::ProceedOnce, &signal, None);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(scheduler
        .calls_snapshot()
        .iter()
        .any(|call| call.phase.status() == "awaiting_approval"));

    scheduler.handle_confirmation_response("c2", ConfirmationOutcome::ProceedOnce, &signal, None);
    let batch = scheduler.wait_for_batch(&signal).await.unwrap();

    assert_eq!(batch.len(), 2);
    assert!(batch.iter().all(|call| call.phase.status() == "success"));
}

#[tokio::test]
async fn confirmation_outcomes_are_reported_to_the_tool() {
    let (tool, outcomes) = OutcomeRecordingTool::new();
    let scheduler = scheduler_with(vec![Arc::new(tool)]);
    let signal = AbortSignal::new();

    scheduler
        .schedule(vec![request("c1", "guarded", json!({}))], &signal)
        .await
        .unwrap();
    scheduler.handle_confirmation_response(
        "c1",
        ConfirmationOutcome::ProceedAlwaysTool,
        &signal,
        None,
    );
    scheduler.wait_for_batch(&signal).await.unwrap();

    assert_eq!(
        outcomes.lock().as_slice(),
        &[ConfirmationOutcome::ProceedAlwaysTool]
    );
}

#[tokio::test]
async fn every_terminal_call_carries_a_matching_function_response() {
    let scheduler = scheduler_with(vec![
        Arc::new(common::mocks::ClockTool),
        Arc::new(FailingTool),
    ]);
    let signal = AbortSignal::new();

    scheduler
        .schedule(
            vec![
                request("c1", "now", json!({})),
                request("c2", "failing", json!({})),
                request("c3", "no_such_tool", json!({})),
            ],
            &signal,
        )
        .await
        .unwrap();
    let batch = scheduler.wait_for_batch(&signal).await.unwrap();

    assert_eq!(batch.len(), 3);
    for call in &batch {
        let response = call.response().expect("terminal call has a response");
        assert_eq!(response.call_id, call.request.call_id);

        let function_responses: Vec<_> = response
            .parts
            .iter()
            .filter(|part| matches!(part, Part::FunctionResponse { .. }))
            .collect();
        assert_eq!(function_responses.len(), 1, "exactly one function response");
        match function_responses[0] {
            Part::FunctionResponse { id, name, .. } => {
                assert_eq!(id, &call.request.call_id);
                assert_eq!(name, &call.request.name);
            }
            _ => unreachable!(),
        }
    }
}

#[tokio::test]
async fn aborting_during_confirmation_cancels_the_call() {
    let scheduler = scheduler_with(vec![Arc::new(DeleteFileTool::new())]);
    let signal = AbortSignal::new();

    scheduler
        .schedule(
            vec![request("c1", "delete_file", json!({"path": "x"}))],
            &signal,
        )
        .await
        .unwrap();

    signal.abort();
    // Even a proceed outcome is overridden by an aborted signal.
    scheduler.handle_confirmation_response("c1", ConfirmationOutcome::ProceedOnce, &signal, None);

    let batch = scheduler.wait_for_batch(&signal).await.unwrap();
    assert!(matches!(batch[0].phase, ToolCallPhase::Cancelled { .. }));
}

#[tokio::test]
async fn abort_cancels_in_flight_executions_promptly() {
    let scheduler = scheduler_with(vec![Arc::new(SlowTool {
        duration: Duration::from_secs(60),
    })]);
    let signal = AbortSignal::new();

    scheduler
        .schedule(vec![request("c1", "slow", json!({}))], &signal)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let started = std::time::Instant::now();
    signal.abort();
    let batch = scheduler.wait_for_batch(&signal).await.unwrap();

    assert!(matches!(batch[0].phase, ToolCallPhase::Cancelled { .. }));
    // Cancellation is prompt, nowhere near the tool's own duration.
    assert!(started.elapsed() < Duration::from_secs(5));
}
