// The run loop: plan / execute / await / finalize
//
// Drives one run from its initial messages to a final assistant message
// or a terminal failure, honoring caps, the time budget, interrupts, and
// policy decisions. Every side effect goes through the workflow context:
// planner calls and tool executions are activities, lifecycle events go
// out through the hook-publishing activity, and external input arrives on
// typed signal receivers. Nothing here touches wall-clock time or
// randomness directly.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tracing::{info, warn};

use tether_contracts::{
    AgentId, CapsState, HookEvent, HookPayload, Message, PlanActivityInput, PlanInput, PlanResult,
    PlanResumeInput, PolicyDecisionRecord, RetryHint, RetryReason, RunContext, RunFailure,
    RunId, RunInput, RunOutput, RunPhase, RunPolicy, SessionId, ToolCallId, ToolError,
    ToolEventRecord, ToolInvocationMeta, ToolRequest, ToolResult, TurnId,
};
use tether_durable::{
    ActivityError, CancelScope, CancellationToken, PlannerActivityCall, ToolActivityCall,
    ToolOutputFuture, WorkflowContext, WorkflowError,
};

use crate::interrupt::{await_timeout_result, InterruptController, ResumeOutcome};
use crate::policy::{PolicyDecision, PolicyInput};
use crate::registry::{AgentRegistration, ToolDispatch, ToolsetRegistration};
use crate::runtime::{provider_detail_from, Runtime};
use crate::tools::{agent_tool, normalize_result, ChildTracker};

/// Link from a nested agent-as-tool run back to its parent call
pub(crate) struct ParentLink {
    run_id: RunId,
    agent_id: AgentId,
    session_id: Option<SessionId>,
    tool_call_id: ToolCallId,
    tracker: Arc<ChildTracker>,
}

/// Mutable accounting for one run
struct LoopState {
    caps: CapsState,
    tool_events: Vec<ToolEventRecord>,
    notes: Vec<String>,
    turn: u32,
    call_counter: u64,
    last_results: Vec<ToolResult>,
    last_hint: Option<RetryHint>,
    finalize_reason: Option<String>,
}

/// Outcome of one executed tool batch
struct BatchOutcome {
    results: Vec<ToolResult>,
    all_failed: bool,
    last_hint: Option<RetryHint>,
    canceled: bool,
}

enum CallPlan {
    /// Tool not in the turn's allow-list; synthesize a policy refusal
    Denied,
    /// Runs a nested agent inline on the workflow thread
    Agent(AgentId),
    /// Inline executor on the workflow thread
    Inline(ToolsetRegistration),
    /// Engine activity on a worker pool
    Activity { parallel_safe: bool },
}

/// Outcome of one agent-as-tool invocation
enum AgentCallOutcome {
    Completed(ToolResult),
    Canceled,
}

struct PreparedCall {
    meta: ToolInvocationMeta,
    request: ToolRequest,
    plan: CallPlan,
}

/// One run's executor, from RunStarted to RunCompleted
pub(crate) struct RunLoop {
    runtime: Arc<Runtime>,
    ctx: Arc<dyn WorkflowContext>,
    registration: Arc<AgentRegistration>,
    /// Logical run id; differs from the workflow id for nested runs
    run_id: RunId,
    agent_id: AgentId,
    session_id: Option<SessionId>,
    labels: BTreeMap<String, String>,
    attempt: u32,
    parent: Option<ParentLink>,
    /// Cancellation observed by this loop; the run-level token for the
    /// root loop, a child of the parent's batch scope for nested runs
    cancel: CancellationToken,
}

impl RunLoop {
    pub(crate) fn root(
        runtime: Arc<Runtime>,
        ctx: Arc<dyn WorkflowContext>,
        registration: Arc<AgentRegistration>,
        input: &RunInput,
    ) -> Self {
        Self {
            run_id: ctx.run_id().clone(),
            agent_id: input.agent_id.clone(),
            session_id: input.session_id.clone(),
            labels: input.labels.clone(),
            attempt: 1,
            parent: None,
            cancel: ctx.cancellation(),
            runtime,
            ctx,
            registration,
        }
    }

    fn execute_boxed(
        self,
        input: RunInput,
    ) -> BoxFuture<'static, Result<RunOutput, WorkflowError>> {
        Box::pin(self.execute(input))
    }

    pub(crate) async fn execute(self, input: RunInput) -> Result<RunOutput, WorkflowError> {
        let policy = self.registration.run_policy.clone();
        let mut state = LoopState {
            caps: CapsState::from_policy(&policy),
            tool_events: Vec::new(),
            notes: Vec::new(),
            turn: 0,
            call_counter: 0,
            last_results: Vec::new(),
            last_hint: None,
            finalize_reason: None,
        };

        self.publish(HookPayload::RunStarted).await?;

        let started = self.ctx.now();
        let deadline = policy.time_budget.map(|budget| {
            started
                + chrono::Duration::from_std(budget)
                    .unwrap_or_else(|_| chrono::Duration::days(365))
        });

        loop {
            if self.cancel.is_cancelled() {
                return self.finalize_canceled(state, "cancel requested").await;
            }

            if policy.interrupts_allowed {
                self.handle_pause(&mut state).await?;
                if self.cancel.is_cancelled() {
                    return self.finalize_canceled(state, "canceled while paused").await;
                }
            }

            if let Some(deadline) = deadline {
                if self.ctx.now() >= deadline {
                    return self
                        .finalize_failed(state, "time budget exceeded", None)
                        .await;
                }
            }

            // Hints are consumed by exactly one turn: the policy engine
            // sees them first, then the planner.
            let turn_hint = state.last_hint.take();

            let decision = self
                .runtime
                .policy_engine()
                .decide(PolicyInput {
                    tools: self.runtime.registry().tool_metadata(),
                    requested: Vec::new(),
                    caps: state.caps,
                    last_hint: turn_hint.clone(),
                })
                .await;
            state.caps = decision.caps;
            let mut decision_metadata = decision.metadata.clone();
            if !decision.labels.is_empty() {
                decision_metadata.insert(
                    "labels".to_string(),
                    serde_json::to_value(&decision.labels).unwrap_or(serde_json::Value::Null),
                );
            }
            self.publish(HookPayload::PolicyDecision {
                record: PolicyDecisionRecord {
                    timestamp: self.ctx.now(),
                    allowed_tools: decision.allowed_tools.clone(),
                    caps: state.caps,
                    metadata: decision_metadata,
                },
            })
            .await?;

            state.turn += 1;
            let turn_id = TurnId::new(format!("{}-t{}", self.run_id, state.turn));
            let context = self.run_context(&turn_id, deadline);
            let allowed_tools = self.runtime.registry().tool_handles(&decision.allowed_tools);

            let plan_input = if state.turn == 1 {
                PlanActivityInput::Start {
                    input: PlanInput {
                        context,
                        messages: input.messages.clone(),
                        allowed_tools,
                        caps: state.caps,
                    },
                }
            } else {
                PlanActivityInput::Resume {
                    input: PlanResumeInput {
                        context,
                        results: std::mem::take(&mut state.last_results),
                        allowed_tools,
                        caps: state.caps,
                        retry_hint: turn_hint,
                        finalize_reason: state.finalize_reason.take(),
                    },
                }
            };

            self.publish(HookPayload::RunPhaseChanged {
                phase: RunPhase::Planning,
            })
            .await?;

            let plan_call = PlannerActivityCall {
                activity: self.registration.plan_activity.clone(),
                activity_id: format!("{}/plan-{}", self.run_id, state.turn),
                input: plan_input,
                options: policy.plan_timeout.map(|timeout| {
                    self.registration
                        .plan_options
                        .clone()
                        .with_start_to_close_timeout(timeout)
                }),
            };

            let output = match self.ctx.execute_planner_activity(plan_call).await {
                Ok(output) => output,
                Err(error) if is_canceled(&error) => {
                    return self.finalize_canceled(state, "canceled during planning").await;
                }
                Err(error) => {
                    let (provider, kind, status) = provider_detail_from(&error);
                    let failure = RunFailure {
                        public_message: "planner failed".into(),
                        debug_message: error.message.clone(),
                        provider,
                        kind,
                        status,
                        retryable: error.retryable,
                    };
                    return self.finalize_failed_with(state, failure).await;
                }
            };

            for note in &output.notes {
                self.publish(HookPayload::PlannerNote { text: note.clone() })
                    .await?;
                state.notes.push(note.clone());
            }
            for block in &output.thinking {
                self.publish(HookPayload::ThinkingBlock {
                    index: block.index,
                    text: block.text.clone(),
                    signature: block.signature.clone(),
                    is_final: block.is_final,
                })
                .await?;
            }

            match output.result {
                PlanResult::Final { message } => {
                    return self.finalize_success(state, message).await;
                }

                PlanResult::ToolCalls { calls } => {
                    if calls.is_empty() {
                        return self
                            .finalize_failed(state, "planner proposed an empty tool batch", None)
                            .await;
                    }
                    if state.caps.remaining_tool_calls == 0 {
                        return self
                            .finalize_failed(state, "tool call cap exhausted", None)
                            .await;
                    }
                    if calls.len() as u32 > state.caps.remaining_tool_calls {
                        self.refuse_batch(&mut state, &turn_id, calls).await?;
                        if self.breaker_tripped(&policy, &state) {
                            return self
                                .finalize_failed(
                                    state,
                                    "consecutive failed tool call cap exceeded",
                                    None,
                                )
                                .await;
                        }
                        continue;
                    }

                    self.publish(HookPayload::RunPhaseChanged {
                        phase: RunPhase::ExecutingTools,
                    })
                    .await?;

                    let batch = self
                        .execute_batch(&mut state, &turn_id, calls, &decision, &policy)
                        .await?;
                    if batch.canceled {
                        return self
                            .finalize_canceled(state, "canceled during tool execution")
                            .await;
                    }

                    state.caps.record_turn(batch.all_failed);
                    state.last_hint = batch.last_hint;
                    state.last_results = batch.results;

                    if self.breaker_tripped(&policy, &state) {
                        return self
                            .finalize_failed(
                                state,
                                "consecutive failed tool call cap exceeded",
                                None,
                            )
                            .await;
                    }
                }

                PlanResult::Await { items, timeout_ms } => {
                    if items.is_empty() {
                        state.finalize_reason = Some("await_without_items".into());
                        continue;
                    }
                    if !policy.interrupts_allowed {
                        let text =
                            "await requested but interrupts are not allowed for this agent";
                        self.publish(HookPayload::PlannerNote { text: text.into() })
                            .await?;
                        state.notes.push(text.into());
                        state.finalize_reason = Some("interrupts_not_allowed".into());
                        continue;
                    }

                    self.publish(HookPayload::RunPhaseChanged {
                        phase: RunPhase::Awaiting,
                    })
                    .await?;

                    let controller = InterruptController::new(self.ctx.as_ref());
                    let outcome = controller.collect(&items, timeout_ms).await;

                    for note in &outcome.notes {
                        self.publish(HookPayload::PlannerNote { text: note.clone() })
                            .await?;
                        state.notes.push(note.clone());
                    }
                    if outcome.canceled {
                        return self.finalize_canceled(state, "canceled while awaiting").await;
                    }

                    let mut results = outcome.results;
                    if outcome.timed_out {
                        let resolved: HashSet<String> = results
                            .iter()
                            .map(|r| r.tool_call_id.as_str().to_string())
                            .collect();
                        for item in &items {
                            if !resolved.contains(&item.id) {
                                results.push(await_timeout_result(item));
                            }
                        }
                        self.publish(HookPayload::RunResumed {
                            reason: Some("await_timeout".into()),
                        })
                        .await?;
                        state.finalize_reason = Some("await_timeout".into());
                    }
                    state.last_results = results;
                }
            }
        }
    }

    // =========================================================================
    // Pause / resume
    // =========================================================================

    async fn handle_pause(&self, state: &mut LoopState) -> Result<(), WorkflowError> {
        let controller = InterruptController::new(self.ctx.as_ref());
        let Some(pause) = controller.pending_pause() else {
            return Ok(());
        };

        info!(run_id = %self.run_id, reason = ?pause.reason, "run paused");
        self.publish(HookPayload::RunPaused {
            reason: pause.reason.clone(),
        })
        .await?;

        let max_pause = pause.max_pause_ms.map(Duration::from_millis);
        match controller.wait_for_resume(max_pause).await {
            ResumeOutcome::Resumed(resume) => {
                self.publish(HookPayload::RunResumed {
                    reason: resume.reason,
                })
                .await?;
            }
            ResumeOutcome::TimedOut => {
                state.notes.push("pause timed out; auto-resuming".into());
                self.publish(HookPayload::RunResumed {
                    reason: Some("pause_timeout".into()),
                })
                .await?;
            }
            ResumeOutcome::Canceled => {
                // The caller re-checks the cancellation token.
            }
        }
        Ok(())
    }

    // =========================================================================
    // Tool batches
    // =========================================================================

    /// Whole-batch refusal when the remaining cap cannot cover it
    async fn refuse_batch(
        &self,
        state: &mut LoopState,
        turn_id: &TurnId,
        calls: Vec<ToolRequest>,
    ) -> Result<(), WorkflowError> {
        let text = format!(
            "refusing batch of {} tool calls: {} remaining in cap",
            calls.len(),
            state.caps.remaining_tool_calls
        );
        warn!(run_id = %self.run_id, "{text}");
        self.publish(HookPayload::PlannerNote { text: text.clone() })
            .await?;
        state.notes.push(text);

        let mut synthetic = Vec::with_capacity(calls.len());
        for request in calls {
            state.call_counter += 1;
            synthetic.push(ToolResult::err(
                ToolCallId::new(format!("{}-{}", turn_id, state.call_counter)),
                request.name,
                ToolError::new("tool call cap exceeded"),
            ));
        }
        state.last_results = synthetic;
        state.caps.record_turn(true);
        Ok(())
    }

    fn breaker_tripped(&self, policy: &RunPolicy, state: &LoopState) -> bool {
        policy
            .max_consecutive_failed_tool_calls
            .is_some_and(|max| state.caps.consecutive_failed_turns > max)
    }

    async fn execute_batch(
        &self,
        state: &mut LoopState,
        turn_id: &TurnId,
        calls: Vec<ToolRequest>,
        decision: &PolicyDecision,
        policy: &RunPolicy,
    ) -> Result<BatchOutcome, WorkflowError> {
        let registry = self.runtime.registry();

        let mut prepared = Vec::with_capacity(calls.len());
        for request in calls {
            state.call_counter += 1;
            let tool_call_id = ToolCallId::new(format!("{}-{}", turn_id, state.call_counter));
            let meta = ToolInvocationMeta {
                run_id: self.run_id.clone(),
                session_id: self.session_id.clone(),
                turn_id: turn_id.clone(),
                tool_call_id,
                parent_tool_call_id: self.parent.as_ref().map(|p| p.tool_call_id.clone()),
                attempt: self.attempt,
            };

            let plan = if !decision.allowed_tools.contains(&request.name) {
                CallPlan::Denied
            } else if let Some(agent_id) =
                registry.spec(&request.name).and_then(|s| s.agent_tool)
            {
                CallPlan::Agent(agent_id)
            } else {
                match registry.toolset(&request.name.toolset_prefix()) {
                    Some(toolset) if toolset.dispatch == ToolDispatch::Inline => {
                        CallPlan::Inline(toolset)
                    }
                    Some(toolset) => CallPlan::Activity {
                        parallel_safe: toolset.parallel_safe,
                    },
                    // The activity handler reports the missing toolset.
                    None => CallPlan::Activity {
                        parallel_safe: true,
                    },
                }
            };

            prepared.push(PreparedCall {
                meta,
                request,
                plan,
            });
        }

        for call in &prepared {
            self.publish(HookPayload::ToolCallScheduled {
                tool_call_id: call.meta.tool_call_id.clone(),
                name: call.request.name.clone(),
                payload: call.request.payload.clone(),
                parent_tool_call_id: call.meta.parent_tool_call_id.clone(),
            })
            .await?;
        }

        // Nested runs announce discovered children on the parent call.
        if let Some(parent) = &self.parent {
            let ids: Vec<ToolCallId> =
                prepared.iter().map(|c| c.meta.tool_call_id.clone()).collect();
            if parent.tracker.register_discovered(&ids) {
                parent.tracker.mark_updated();
                self.publish_as_parent(
                    parent,
                    HookPayload::ToolCallUpdated {
                        tool_call_id: parent.tool_call_id.clone(),
                        expected_children_total: parent.tracker.current_total(),
                    },
                )
                .await?;
            }
        }

        let scope = CancelScope::child_of(&self.cancel);
        let all_parallel = prepared.iter().all(|c| {
            matches!(
                c.plan,
                CallPlan::Denied | CallPlan::Activity {
                    parallel_safe: true
                }
            )
        });

        let mut raw_results: Vec<ToolResult> = Vec::with_capacity(prepared.len());

        if all_parallel && prepared.len() > 1 {
            let mut futures: Vec<Option<ToolOutputFuture>> = Vec::with_capacity(prepared.len());
            for call in &prepared {
                match call.plan {
                    CallPlan::Denied => futures.push(None),
                    _ => futures.push(Some(
                        self.ctx
                            .execute_tool_activity_async(self.tool_call(call, policy, &scope)),
                    )),
                }
            }
            for (call, future) in prepared.iter().zip(futures) {
                let result = match future {
                    None => self.denied_result(call),
                    Some(future) => match future.await {
                        Ok(result) => result,
                        Err(error) if is_canceled(&error) => {
                            return Ok(BatchOutcome {
                                results: raw_results,
                                all_failed: false,
                                last_hint: None,
                                canceled: true,
                            });
                        }
                        Err(error) => self.activity_error_result(call, error),
                    },
                };
                raw_results.push(result);
            }
        } else {
            for call in &prepared {
                let result = match &call.plan {
                    CallPlan::Denied => self.denied_result(call),
                    CallPlan::Agent(agent_id) => {
                        match self
                            .run_agent_tool(agent_id.clone(), call, policy, &scope)
                            .await?
                        {
                            AgentCallOutcome::Completed(result) => result,
                            AgentCallOutcome::Canceled => {
                                return Ok(BatchOutcome {
                                    results: raw_results,
                                    all_failed: false,
                                    last_hint: None,
                                    canceled: true,
                                });
                            }
                        }
                    }
                    CallPlan::Inline(toolset) => {
                        match toolset.executor.execute(&call.meta, &call.request).await {
                            Ok(result) => result,
                            Err(error) if is_canceled(&error) => {
                                return Ok(BatchOutcome {
                                    results: raw_results,
                                    all_failed: false,
                                    last_hint: None,
                                    canceled: true,
                                });
                            }
                            Err(error) => self.activity_error_result(call, error),
                        }
                    }
                    CallPlan::Activity { .. } => {
                        match self
                            .ctx
                            .execute_tool_activity(self.tool_call(call, policy, &scope))
                            .await
                        {
                            Ok(result) => result,
                            Err(error) if is_canceled(&error) => {
                                return Ok(BatchOutcome {
                                    results: raw_results,
                                    all_failed: false,
                                    last_hint: None,
                                    canceled: true,
                                });
                            }
                            Err(error) => self.activity_error_result(call, error),
                        }
                    }
                };
                raw_results.push(result);
            }
        }

        // Per-result bookkeeping, in scheduling order.
        let mut results = Vec::with_capacity(raw_results.len());
        let mut last_hint = None;
        for (call, mut result) in prepared.iter().zip(raw_results) {
            if let Some(spec) = registry.spec(&call.request.name) {
                if let Err(error) = normalize_result(&spec, &mut result) {
                    result = ToolResult::err(
                        call.meta.tool_call_id.clone(),
                        call.request.name.clone(),
                        error,
                    );
                }
            }

            let success = result.is_success();
            self.publish(HookPayload::ToolResultReceived {
                tool_call_id: result.tool_call_id.clone(),
                name: result.name.clone(),
                success,
                result: result.result.clone(),
                error: result.error.clone(),
                retry_hint: result.retry_hint.clone(),
            })
            .await?;

            if let Some(hint) = &result.retry_hint {
                self.publish(HookPayload::RetryHintIssued {
                    tool_call_id: Some(result.tool_call_id.clone()),
                    hint: hint.clone(),
                })
                .await?;
                last_hint = Some(hint.clone());
            }

            if !matches!(call.plan, CallPlan::Denied) {
                state.caps.spend();
            }

            state.tool_events.push(ToolEventRecord {
                tool_call_id: result.tool_call_id.clone(),
                name: result.name.clone(),
                success,
                error: result.error.clone(),
                telemetry: result.telemetry.clone(),
            });
            results.push(result);
        }

        self.publish(HookPayload::MemoryAppended {
            count: prepared.len() + results.len(),
        })
        .await?;

        let all_failed = !results.is_empty() && results.iter().all(|r| !r.is_success());
        Ok(BatchOutcome {
            results,
            all_failed,
            last_hint,
            canceled: false,
        })
    }

    fn tool_call(
        &self,
        call: &PreparedCall,
        policy: &RunPolicy,
        scope: &CancelScope,
    ) -> ToolActivityCall {
        ToolActivityCall {
            activity: self.registration.tool_activity.clone(),
            activity_id: format!("{}/tool-{}", self.run_id, call.meta.tool_call_id),
            input: tether_contracts::ToolActivityInput {
                meta: call.meta.clone(),
                request: call.request.clone(),
            },
            options: policy.timeout_for(&call.request.name).map(|timeout| {
                self.registration
                    .tool_options
                    .clone()
                    .with_start_to_close_timeout(timeout)
            }),
            scope: Some(scope.clone()),
        }
    }

    fn denied_result(&self, call: &PreparedCall) -> ToolResult {
        ToolResult::err(
            call.meta.tool_call_id.clone(),
            call.request.name.clone(),
            ToolError::new("policy_denied").with_cause(ToolError::new(format!(
                "tool {} is not in the allowed set for this turn",
                call.request.name
            ))),
        )
        .with_hint(RetryHint::new(RetryReason::PolicyDenied).for_tool(call.request.name.clone()))
    }

    fn activity_error_result(&self, call: &PreparedCall, error: ActivityError) -> ToolResult {
        ToolResult::err(
            call.meta.tool_call_id.clone(),
            call.request.name.clone(),
            ToolError::new(error.message),
        )
    }

    // =========================================================================
    // Agent-as-tool
    // =========================================================================

    async fn run_agent_tool(
        &self,
        child_agent_id: AgentId,
        call: &PreparedCall,
        policy: &RunPolicy,
        scope: &CancelScope,
    ) -> Result<AgentCallOutcome, WorkflowError> {
        let Some(child_registration) = self.runtime.registry().agent(&child_agent_id) else {
            return Ok(AgentCallOutcome::Completed(ToolResult::err(
                call.meta.tool_call_id.clone(),
                call.request.name.clone(),
                ToolError::new(format!("agent not registered: {child_agent_id}")),
            )));
        };

        let messages = match agent_tool::nested_messages(&call.request.payload) {
            Ok(messages) => messages,
            Err(error) => {
                return Ok(AgentCallOutcome::Completed(ToolResult::err(
                    call.meta.tool_call_id.clone(),
                    call.request.name.clone(),
                    error,
                )));
            }
        };

        let nested_run_id = RunId::new(format!("{}:{}", self.run_id, call.meta.tool_call_id));
        self.publish(HookPayload::AgentRunStarted {
            child_run_id: nested_run_id.clone(),
            child_agent_id: child_agent_id.clone(),
            parent_tool_call_id: call.meta.tool_call_id.clone(),
        })
        .await?;

        // The nested run lives under its own scope so the outer per-tool
        // timeout and outer cancellation tear down its in-flight work.
        let nested_scope = CancelScope::child_of(scope.token());

        let nested = RunLoop {
            runtime: self.runtime.clone(),
            ctx: self.ctx.clone(),
            registration: child_registration,
            run_id: nested_run_id.clone(),
            agent_id: child_agent_id.clone(),
            session_id: self.session_id.clone(),
            labels: self.labels.clone(),
            attempt: self.attempt,
            parent: Some(ParentLink {
                run_id: self.run_id.clone(),
                agent_id: self.agent_id.clone(),
                session_id: self.session_id.clone(),
                tool_call_id: call.meta.tool_call_id.clone(),
                tracker: Arc::new(ChildTracker::new()),
            }),
            cancel: nested_scope.token().clone(),
        };

        let nested_input = RunInput {
            agent_id: child_agent_id,
            run_id: Some(nested_run_id),
            session_id: self.session_id.clone(),
            messages,
            labels: self.labels.clone(),
            metadata: BTreeMap::new(),
        };

        // The nested run inherits the outer per-tool timeout as a whole.
        let timeout = policy.timeout_for(&call.request.name);
        let bounded = agent_tool::run_bounded(
            self.ctx.as_ref(),
            &nested_scope,
            timeout,
            nested.execute_boxed(nested_input),
        )
        .await?;

        let outcome = match bounded {
            agent_tool::BoundedRun::Finished(output) => {
                AgentCallOutcome::Completed(agent_tool::aggregate_result(
                    call.meta.tool_call_id.clone(),
                    call.request.name.clone(),
                    &output,
                ))
            }
            agent_tool::BoundedRun::TimedOut(limit) => {
                warn!(
                    run_id = %self.run_id,
                    tool = %call.request.name,
                    limit_ms = limit.as_millis() as u64,
                    "agent tool timed out"
                );
                AgentCallOutcome::Completed(agent_tool::timeout_result(
                    call.meta.tool_call_id.clone(),
                    call.request.name.clone(),
                    limit,
                ))
            }
            agent_tool::BoundedRun::Canceled => AgentCallOutcome::Canceled,
        };
        Ok(outcome)
    }

    // =========================================================================
    // Finalization
    // =========================================================================

    async fn finalize_success(
        &self,
        mut state: LoopState,
        message: Message,
    ) -> Result<RunOutput, WorkflowError> {
        self.publish(HookPayload::AssistantMessage {
            message: message.clone(),
        })
        .await?;
        self.publish(HookPayload::MemoryAppended { count: 1 }).await?;
        self.publish(HookPayload::RunCompleted {
            phase: RunPhase::Completed,
            failure: None,
        })
        .await?;

        info!(run_id = %self.run_id, turns = state.turn, "run completed");
        Ok(RunOutput {
            run_id: self.run_id.clone(),
            phase: RunPhase::Completed,
            final_message: Some(message),
            tool_events: std::mem::take(&mut state.tool_events),
            notes: std::mem::take(&mut state.notes),
            failure: None,
        })
    }

    async fn finalize_failed(
        &self,
        state: LoopState,
        reason: &str,
        failure: Option<RunFailure>,
    ) -> Result<RunOutput, WorkflowError> {
        let failure = failure.unwrap_or_else(|| RunFailure::new(reason, reason));
        self.finalize_failed_with(state, failure).await
    }

    async fn finalize_failed_with(
        &self,
        mut state: LoopState,
        failure: RunFailure,
    ) -> Result<RunOutput, WorkflowError> {
        warn!(run_id = %self.run_id, reason = %failure.debug_message, "run failed");
        self.publish(HookPayload::RunCompleted {
            phase: RunPhase::Failed,
            failure: Some(failure.clone()),
        })
        .await?;

        Ok(RunOutput {
            run_id: self.run_id.clone(),
            phase: RunPhase::Failed,
            final_message: None,
            tool_events: std::mem::take(&mut state.tool_events),
            notes: std::mem::take(&mut state.notes),
            failure: Some(failure),
        })
    }

    async fn finalize_canceled(
        &self,
        mut state: LoopState,
        debug: &str,
    ) -> Result<RunOutput, WorkflowError> {
        info!(run_id = %self.run_id, "run canceled");
        let failure = RunFailure::new("canceled", debug);
        self.publish(HookPayload::RunCompleted {
            phase: RunPhase::Canceled,
            failure: Some(failure.clone()),
        })
        .await?;

        Ok(RunOutput {
            run_id: self.run_id.clone(),
            phase: RunPhase::Canceled,
            final_message: None,
            tool_events: std::mem::take(&mut state.tool_events),
            notes: std::mem::take(&mut state.notes),
            failure: Some(failure),
        })
    }

    // =========================================================================
    // Plumbing
    // =========================================================================

    fn run_context(&self, turn_id: &TurnId, deadline: Option<DateTime<Utc>>) -> RunContext {
        let max_duration = deadline.map(|d| {
            let remaining = (d - self.ctx.now()).num_milliseconds().max(0);
            format!("{remaining}ms")
        });
        RunContext {
            run_id: self.run_id.clone(),
            attempt: self.attempt,
            labels: self.labels.clone(),
            max_duration,
            session_id: self.session_id.clone(),
            turn_id: turn_id.clone(),
            parent_tool_call_id: self.parent.as_ref().map(|p| p.tool_call_id.clone()),
        }
    }

    async fn publish(&self, payload: HookPayload) -> Result<(), WorkflowError> {
        let event = HookEvent::new(
            self.run_id.clone(),
            self.agent_id.clone(),
            self.session_id.clone(),
            self.ctx.now(),
            payload,
        );
        self.ctx.publish_hook(event).await.map_err(WorkflowError::from)
    }

    /// Publish under the parent run's identity (child-total updates)
    async fn publish_as_parent(
        &self,
        parent: &ParentLink,
        payload: HookPayload,
    ) -> Result<(), WorkflowError> {
        let event = HookEvent::new(
            parent.run_id.clone(),
            parent.agent_id.clone(),
            parent.session_id.clone(),
            self.ctx.now(),
            payload,
        );
        self.ctx.publish_hook(event).await.map_err(WorkflowError::from)
    }
}

fn is_canceled(error: &ActivityError) -> bool {
    error.kind.as_deref() == Some("canceled")
}
