// Interrupt controller: pause/resume and the await-turn protocol
//
// Converts the engine's typed signal receivers into a deterministic await
// protocol. Payloads are matched by correlation id; duplicate or unknown
// deliveries are dropped with a warning note the loop surfaces as a
// planner-note event.

use std::collections::HashMap;
use std::time::Duration;

use tether_contracts::{
    AwaitItem, AwaitKind, ExternalToolResult, PauseRequest, ResumeRequest, ToolCallId, ToolError,
    ToolName, ToolResult,
};
use tether_durable::{SignalError, WorkflowContext};

/// Runtime-owned result names for resolved await items
fn await_result_name(kind: AwaitKind) -> ToolName {
    let name = match kind {
        AwaitKind::Clarification => "tether.await.clarification",
        AwaitKind::ExternalTool => "tether.await.external",
        AwaitKind::Confirmation => "tether.await.confirmation",
    };
    ToolName::parse(name).expect("await result names are well-formed")
}

/// Outcome of waiting for a resume after a pause
#[derive(Debug)]
pub enum ResumeOutcome {
    Resumed(ResumeRequest),
    /// The pause's auto-resume deadline elapsed
    TimedOut,
    Canceled,
}

/// Outcome of one await turn
#[derive(Debug, Default)]
pub struct AwaitTurnOutcome {
    /// Resolved items, in item order, packaged as tool results
    pub results: Vec<ToolResult>,
    /// True when an item's effective deadline elapsed
    pub timed_out: bool,
    /// Warnings about dropped deliveries
    pub notes: Vec<String>,
    pub canceled: bool,
}

/// Wraps the five typed receivers of a workflow context
pub struct InterruptController<'a> {
    ctx: &'a dyn WorkflowContext,
}

impl<'a> InterruptController<'a> {
    pub fn new(ctx: &'a dyn WorkflowContext) -> Self {
        Self { ctx }
    }

    /// Non-blocking poll for a pending pause request
    pub fn pending_pause(&self) -> Option<PauseRequest> {
        self.ctx.pause_requests().receive_async()
    }

    /// Block until a resume arrives, the optional auto-resume deadline
    /// elapses, or the run is canceled.
    pub async fn wait_for_resume(&self, max_pause: Option<Duration>) -> ResumeOutcome {
        let receiver = self.ctx.resume_requests();
        let received = match max_pause {
            Some(limit) => receiver.receive_with_timeout(limit).await,
            None => receiver.receive().await,
        };
        match received {
            Ok(resume) => ResumeOutcome::Resumed(resume),
            Err(SignalError::Timeout) => ResumeOutcome::TimedOut,
            Err(SignalError::Canceled) => ResumeOutcome::Canceled,
        }
    }

    /// Wait for every await item, matching deliveries by correlation id.
    ///
    /// Items resolve in order. The effective deadline of an item is its
    /// own timeout, else the turn timeout; the first elapsed deadline
    /// stops the turn with `timed_out` set.
    pub async fn collect(
        &self,
        items: &[AwaitItem],
        turn_timeout_ms: Option<u64>,
    ) -> AwaitTurnOutcome {
        let mut outcome = AwaitTurnOutcome::default();

        // External tool results arrive in batches that may cover several
        // pending items; buffer them across the whole turn.
        let mut external_buffer: HashMap<String, ExternalToolResult> = HashMap::new();
        let expected_external: Vec<String> = items
            .iter()
            .filter(|i| i.kind == AwaitKind::ExternalTool)
            .map(|i| i.id.clone())
            .collect();

        for item in items {
            let deadline_ms = item.timeout_ms.or(turn_timeout_ms);
            let resolved = self
                .resolve_item(
                    item,
                    deadline_ms,
                    &mut external_buffer,
                    &expected_external,
                    &mut outcome.notes,
                )
                .await;

            match resolved {
                ItemOutcome::Resolved(result) => outcome.results.push(result),
                ItemOutcome::TimedOut => {
                    outcome.timed_out = true;
                    return outcome;
                }
                ItemOutcome::Canceled => {
                    outcome.canceled = true;
                    return outcome;
                }
            }
        }

        outcome
    }

    async fn resolve_item(
        &self,
        item: &AwaitItem,
        deadline_ms: Option<u64>,
        external_buffer: &mut HashMap<String, ExternalToolResult>,
        expected_external: &[String],
        notes: &mut Vec<String>,
    ) -> ItemOutcome {
        let started = self.ctx.now();

        loop {
            // Earlier batches may already have satisfied this item.
            if item.kind == AwaitKind::ExternalTool {
                if let Some(external) = external_buffer.remove(&item.id) {
                    return ItemOutcome::Resolved(external_result(item, external));
                }
            }

            let remaining = match deadline_ms {
                Some(total) => {
                    let elapsed = (self.ctx.now() - started).num_milliseconds().max(0) as u64;
                    if elapsed >= total {
                        return ItemOutcome::TimedOut;
                    }
                    Some(Duration::from_millis(total - elapsed))
                }
                None => None,
            };

            let received = match item.kind {
                AwaitKind::Clarification => {
                    let receiver = self.ctx.clarification_answers();
                    match receive(&receiver, remaining).await {
                        Ok(answer) => {
                            if answer.item_id == item.id {
                                return ItemOutcome::Resolved(ToolResult::ok(
                                    ToolCallId::new(item.id.clone()),
                                    await_result_name(item.kind),
                                    serde_json::json!({
                                        "item_id": answer.item_id,
                                        "answer": answer.answer,
                                    }),
                                ));
                            }
                            notes.push(format!(
                                "dropping clarification answer for unknown item {}",
                                answer.item_id
                            ));
                            Ok(())
                        }
                        Err(e) => Err(e),
                    }
                }
                AwaitKind::Confirmation => {
                    let receiver = self.ctx.confirmation_decisions();
                    match receive(&receiver, remaining).await {
                        Ok(decision) => {
                            if decision.item_id == item.id {
                                return ItemOutcome::Resolved(ToolResult::ok(
                                    ToolCallId::new(item.id.clone()),
                                    await_result_name(item.kind),
                                    serde_json::json!({
                                        "item_id": decision.item_id,
                                        "approved": decision.approved,
                                        "comment": decision.comment,
                                    }),
                                ));
                            }
                            notes.push(format!(
                                "dropping confirmation decision for unknown item {}",
                                decision.item_id
                            ));
                            Ok(())
                        }
                        Err(e) => Err(e),
                    }
                }
                AwaitKind::ExternalTool => {
                    let receiver = self.ctx.external_tool_results();
                    match receive(&receiver, remaining).await {
                        Ok(batch) => {
                            for result in batch.results {
                                let id = result.tool_call_id.as_str().to_string();
                                if !expected_external.contains(&id) {
                                    notes.push(format!(
                                        "dropping external tool result for unknown id {id}"
                                    ));
                                } else if external_buffer.contains_key(&id) {
                                    notes.push(format!(
                                        "dropping duplicate external tool result for {id}"
                                    ));
                                } else {
                                    external_buffer.insert(id, result);
                                }
                            }
                            Ok(())
                        }
                        Err(e) => Err(e),
                    }
                }
            };

            match received {
                Ok(()) => continue,
                Err(SignalError::Timeout) => return ItemOutcome::TimedOut,
                Err(SignalError::Canceled) => return ItemOutcome::Canceled,
            }
        }
    }
}

enum ItemOutcome {
    Resolved(ToolResult),
    TimedOut,
    Canceled,
}

async fn receive<T>(
    receiver: &tether_durable::SignalReceiver<T>,
    remaining: Option<Duration>,
) -> Result<T, SignalError> {
    match remaining {
        Some(limit) => receiver.receive_with_timeout(limit).await,
        None => receiver.receive().await,
    }
}

fn external_result(item: &AwaitItem, external: ExternalToolResult) -> ToolResult {
    let tool_call_id = external.tool_call_id;
    let name = await_result_name(item.kind);
    match external.error {
        Some(error) => ToolResult::err(tool_call_id, name, error),
        None => ToolResult::ok(
            tool_call_id,
            name,
            external.result.unwrap_or(serde_json::Value::Null),
        ),
    }
}

/// Shape an unresolved await into the error result the planner sees
pub fn await_timeout_result(item: &AwaitItem) -> ToolResult {
    ToolResult::err(
        ToolCallId::new(item.id.clone()),
        await_result_name(item.kind),
        ToolError::new("await item timed out"),
    )
}
