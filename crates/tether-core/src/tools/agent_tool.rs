// Agent-as-tool: nested run bounding and result aggregation
//
// A tool spec naming an agent executes a nested run inline on the
// workflow thread. The nested run is bounded the same way an
// activity-backed call is: the outer per-tool timeout races it through a
// deterministic timer, the surrounding cancel scope tears down its
// outstanding work, and both timeout and cancellation surface as normal
// tool results rather than loop failures.

use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::json;

use tether_contracts::{
    Message, RunOutput, ToolCallId, ToolError, ToolName, ToolResult, ToolTelemetry,
};
use tether_durable::{CancelScope, WorkflowContext, WorkflowError};

/// How a bounded nested run ended
pub(crate) enum BoundedRun {
    Finished(RunOutput),
    TimedOut(Duration),
    Canceled,
}

/// Race a nested run against the outer per-tool timeout and the
/// surrounding cancel scope.
///
/// On timeout the scope is canceled before returning so in-flight nested
/// activities observe the cancellation; the abandoned nested run never
/// publishes a terminal event of its own.
pub(crate) async fn run_bounded(
    ctx: &dyn WorkflowContext,
    scope: &CancelScope,
    timeout: Option<Duration>,
    nested: BoxFuture<'_, Result<RunOutput, WorkflowError>>,
) -> Result<BoundedRun, WorkflowError> {
    let canceled = scope.token().clone();
    match timeout {
        Some(limit) => {
            tokio::select! {
                output = nested => Ok(BoundedRun::Finished(output?)),
                _ = ctx.new_timer(limit) => {
                    scope.cancel();
                    Ok(BoundedRun::TimedOut(limit))
                }
                _ = canceled.cancelled() => Ok(BoundedRun::Canceled),
            }
        }
        None => {
            tokio::select! {
                output = nested => Ok(BoundedRun::Finished(output?)),
                _ = canceled.cancelled() => Ok(BoundedRun::Canceled),
            }
        }
    }
}

/// Messages for a nested agent run, from the agent-tool payload
pub(crate) fn nested_messages(payload: &serde_json::Value) -> Result<Vec<Message>, ToolError> {
    if let Some(text) = payload.get("message").and_then(|v| v.as_str()) {
        return Ok(vec![Message::user(text)]);
    }
    if let Some(messages) = payload.get("messages") {
        return serde_json::from_value(messages.clone())
            .map_err(|e| ToolError::new(format!("invalid nested messages: {e}")));
    }
    Err(ToolError::new(
        "agent tool payload requires `message` or `messages`",
    ))
}

/// One synthetic result for the parent call: merged telemetry, error only
/// when every nested tool event failed.
pub(crate) fn aggregate_result(
    tool_call_id: ToolCallId,
    name: ToolName,
    output: &RunOutput,
) -> ToolResult {
    let mut telemetry = ToolTelemetry::default();
    for event in &output.tool_events {
        telemetry.merge(&event.telemetry);
    }
    let all_failed =
        !output.tool_events.is_empty() && output.tool_events.iter().all(|e| !e.success);

    let result = if all_failed {
        ToolResult::err(
            tool_call_id,
            name,
            ToolError::new("all nested tool calls failed"),
        )
    } else {
        ToolResult::ok(
            tool_call_id,
            name,
            json!({
                "message": output.final_message.as_ref().map(|m| m.content.clone()),
                "phase": output.phase,
                "nested_tool_calls": output.tool_events.len(),
            }),
        )
    };
    result.with_telemetry(telemetry)
}

/// The normal result a timed-out nested run turns into
pub(crate) fn timeout_result(
    tool_call_id: ToolCallId,
    name: ToolName,
    limit: Duration,
) -> ToolResult {
    ToolResult::err(
        tool_call_id,
        name,
        ToolError::new(format!(
            "agent tool timed out after {}ms",
            limit.as_millis()
        )),
    )
}
