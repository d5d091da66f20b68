//! In-process engine
//!
//! Runs workflow handlers as tokio tasks in the calling process: activity
//! futures resolve as soon as the work finishes, timers sleep wall-clock
//! time, and signals travel through per-run hubs. Outcomes are journaled
//! so starting the same run id twice observes a single execution.
//!
//! This engine backs tests and examples; production deployments put a
//! durable engine behind the same [`WorkflowEngine`] contract.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tether_contracts::{
    ClarificationAnswer, ConfirmationDecision, ExternalToolResults, HookEvent, PauseRequest,
    PlanActivityOutput, ResumeRequest, RunId, RunOutput, ToolResult,
};

use crate::activity::{
    ActivityError, ActivityOptions, HookActivityFn, PlannerActivityFn, ToolActivityFn,
};
use crate::journal::{InMemoryJournal, Journal, RecordedOutcome};
use crate::signal::{Signal, SignalHub, SignalReceiver};
use crate::workflow::{
    CancelScope, EngineError, PlannerActivityCall, Signaler, StartWorkflowRequest, TimerFuture,
    ToolActivityCall, ToolOutputFuture, WorkflowContext, WorkflowDefinition, WorkflowEngine,
    WorkflowError, WorkflowHandle,
};

struct Registrations {
    workflows: HashMap<String, WorkflowDefinition>,
    planner: HashMap<String, (ActivityOptions, PlannerActivityFn)>,
    tool: HashMap<String, (ActivityOptions, ToolActivityFn)>,
    hook: HashMap<String, (ActivityOptions, HookActivityFn)>,
}

struct RunEntry {
    hub: Arc<SignalHub>,
    outcome: watch::Receiver<Option<Result<RunOutput, WorkflowError>>>,
}

struct EngineInner {
    registrations: RwLock<Registrations>,
    runs: DashMap<String, RunEntry>,
    journal: Arc<dyn Journal>,
}

/// The in-process reference engine
#[derive(Clone)]
pub struct InProcessEngine {
    inner: Arc<EngineInner>,
}

impl InProcessEngine {
    pub fn new() -> Self {
        Self::with_journal(Arc::new(InMemoryJournal::new()))
    }

    /// Build with an explicit journal (the durability seam)
    pub fn with_journal(journal: Arc<dyn Journal>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                registrations: RwLock::new(Registrations {
                    workflows: HashMap::new(),
                    planner: HashMap::new(),
                    tool: HashMap::new(),
                    hook: HashMap::new(),
                }),
                runs: DashMap::new(),
                journal,
            }),
        }
    }
}

impl Default for InProcessEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkflowEngine for InProcessEngine {
    fn register_workflow(&self, definition: WorkflowDefinition) -> Result<(), EngineError> {
        let mut regs = self.inner.registrations.write();
        if regs.workflows.contains_key(&definition.name) {
            return Err(EngineError::DuplicateRegistration(definition.name));
        }
        info!(workflow = %definition.name, "registered workflow");
        regs.workflows.insert(definition.name.clone(), definition);
        Ok(())
    }

    fn register_planner_activity(
        &self,
        name: &str,
        options: ActivityOptions,
        handler: PlannerActivityFn,
    ) -> Result<(), EngineError> {
        let mut regs = self.inner.registrations.write();
        if regs.planner.contains_key(name) {
            return Err(EngineError::DuplicateRegistration(name.to_string()));
        }
        regs.planner.insert(name.to_string(), (options, handler));
        Ok(())
    }

    fn register_tool_activity(
        &self,
        name: &str,
        options: ActivityOptions,
        handler: ToolActivityFn,
    ) -> Result<(), EngineError> {
        let mut regs = self.inner.registrations.write();
        if regs.tool.contains_key(name) {
            return Err(EngineError::DuplicateRegistration(name.to_string()));
        }
        regs.tool.insert(name.to_string(), (options, handler));
        Ok(())
    }

    fn register_hook_activity(
        &self,
        name: &str,
        options: ActivityOptions,
        handler: HookActivityFn,
    ) -> Result<(), EngineError> {
        let mut regs = self.inner.registrations.write();
        if regs.hook.contains_key(name) {
            return Err(EngineError::DuplicateRegistration(name.to_string()));
        }
        regs.hook.insert(name.to_string(), (options, handler));
        Ok(())
    }

    async fn start_workflow(
        &self,
        request: StartWorkflowRequest,
    ) -> Result<WorkflowHandle, EngineError> {
        EngineInner::start(&self.inner, request).await
    }

    fn signaler(&self) -> Arc<dyn Signaler> {
        Arc::new(EngineSignaler {
            inner: self.inner.clone(),
        })
    }
}

struct EngineSignaler {
    inner: Arc<EngineInner>,
}

#[async_trait]
impl Signaler for EngineSignaler {
    async fn signal(&self, run_id: &RunId, signal: Signal) -> Result<(), EngineError> {
        let entry = self
            .inner
            .runs
            .get(run_id.as_str())
            .ok_or_else(|| EngineError::WorkflowNotFound(run_id.clone()))?;
        entry.hub.deliver(signal);
        Ok(())
    }
}

impl EngineInner {
    /// Start a workflow, or observe the execution already started under
    /// the same run id.
    async fn start(
        inner: &Arc<Self>,
        request: StartWorkflowRequest,
    ) -> Result<WorkflowHandle, EngineError> {
        let definition = {
            let regs = inner.registrations.read();
            regs.workflows
                .get(&request.workflow)
                .cloned()
                .ok_or_else(|| EngineError::UnknownWorkflow(request.workflow.clone()))?
        };

        let run_id = request.run_id.clone();
        let signaler: Arc<dyn Signaler> = Arc::new(EngineSignaler {
            inner: inner.clone(),
        });

        if let Some(existing) = inner.runs.get(run_id.as_str()) {
            debug!(run_id = %run_id, "start is idempotent; observing existing execution");
            return Ok(WorkflowHandle::new(
                run_id.clone(),
                existing.outcome.clone(),
                signaler,
            ));
        }

        let hub = Arc::new(SignalHub::new());
        let (outcome_tx, outcome_rx) = watch::channel(None);

        // A racing second start takes the entry inserted first.
        use dashmap::mapref::entry::Entry;
        match inner.runs.entry(run_id.as_str().to_string()) {
            Entry::Occupied(existing) => {
                return Ok(WorkflowHandle::new(
                    run_id.clone(),
                    existing.get().outcome.clone(),
                    signaler,
                ));
            }
            Entry::Vacant(slot) => {
                slot.insert(RunEntry {
                    hub: hub.clone(),
                    outcome: outcome_rx.clone(),
                });
            }
        }

        let context: Arc<dyn WorkflowContext> = Arc::new(InProcessContext {
            run_id: run_id.clone(),
            hook_activity: definition.hook_activity.clone(),
            hub: hub.clone(),
            inner: inner.clone(),
            hook_seq: AtomicU64::new(0),
        });

        info!(run_id = %run_id, workflow = %definition.name, "starting workflow execution");

        let future = (definition.handler)(context, request.input);
        tokio::spawn(async move {
            let result = future.await;
            if let Err(error) = &result {
                warn!(run_id = %run_id, error = %error, "workflow execution failed");
            }
            let _ = outcome_tx.send(Some(result));
        });

        Ok(WorkflowHandle::new(
            request.run_id,
            outcome_rx,
            Arc::new(EngineSignaler {
                inner: inner.clone(),
            }),
        ))
    }

    async fn run_planner_activity(
        &self,
        run_id: &RunId,
        call: PlannerActivityCall,
        cancel: CancellationToken,
    ) -> Result<PlanActivityOutput, ActivityError> {
        if let Some(RecordedOutcome::Planner(outcome)) =
            self.journal.lookup(run_id, &call.activity_id).await
        {
            debug!(run_id = %run_id, activity_id = %call.activity_id, "replaying journaled planner outcome");
            return outcome;
        }

        let (registered, handler) = {
            let regs = self.registrations.read();
            match regs.planner.get(&call.activity) {
                Some((options, handler)) => (options.clone(), handler.clone()),
                None => {
                    return Err(ActivityError::non_retryable(format!(
                        "unknown planner activity: {}",
                        call.activity
                    )))
                }
            }
        };
        let options = call.options.unwrap_or(registered);
        let input = call.input;

        let outcome =
            execute_with_retry(&options, Some(&cancel), || handler(input.clone())).await;

        if !is_cancellation(&outcome) {
            self.journal
                .record(
                    run_id,
                    &call.activity_id,
                    RecordedOutcome::Planner(outcome.clone()),
                )
                .await;
        }
        outcome
    }

    async fn run_tool_activity(
        &self,
        run_id: &RunId,
        call: ToolActivityCall,
        run_cancel: CancellationToken,
    ) -> Result<ToolResult, ActivityError> {
        if let Some(RecordedOutcome::Tool(outcome)) =
            self.journal.lookup(run_id, &call.activity_id).await
        {
            debug!(run_id = %run_id, activity_id = %call.activity_id, "replaying journaled tool outcome");
            return outcome;
        }

        let (registered, handler) = {
            let regs = self.registrations.read();
            match regs.tool.get(&call.activity) {
                Some((options, handler)) => (options.clone(), handler.clone()),
                None => {
                    return Err(ActivityError::non_retryable(format!(
                        "unknown tool activity: {}",
                        call.activity
                    )))
                }
            }
        };
        let options = call.options.unwrap_or(registered);
        let cancel = call
            .scope
            .as_ref()
            .map(|scope| scope.token().clone())
            .unwrap_or(run_cancel);
        let input = call.input;

        let outcome =
            execute_with_retry(&options, Some(&cancel), || handler(input.clone())).await;

        if !is_cancellation(&outcome) {
            self.journal
                .record(
                    run_id,
                    &call.activity_id,
                    RecordedOutcome::Tool(outcome.clone()),
                )
                .await;
        }
        outcome
    }

    async fn run_hook_activity(
        &self,
        run_id: &RunId,
        activity: &str,
        activity_id: &str,
        event: HookEvent,
    ) -> Result<(), ActivityError> {
        if let Some(RecordedOutcome::Hook(outcome)) = self.journal.lookup(run_id, activity_id).await
        {
            return outcome;
        }

        let (options, handler) = {
            let regs = self.registrations.read();
            match regs.hook.get(activity) {
                Some((options, handler)) => (options.clone(), handler.clone()),
                None => {
                    return Err(ActivityError::non_retryable(format!(
                        "unknown hook activity: {activity}"
                    )))
                }
            }
        };

        // Hooks keep publishing through cancellation so terminal events
        // still reach subscribers.
        let outcome = execute_with_retry(&options, None, || handler(event.clone())).await;

        self.journal
            .record(run_id, activity_id, RecordedOutcome::Hook(outcome.clone()))
            .await;
        outcome
    }
}

fn is_cancellation<T>(outcome: &Result<T, ActivityError>) -> bool {
    matches!(outcome, Err(e) if e.kind.as_deref() == Some("canceled"))
}

/// Drive one activity through its retry policy and timeout
async fn execute_with_retry<T, F, Fut>(
    options: &ActivityOptions,
    cancel: Option<&CancellationToken>,
    mut attempt_fn: F,
) -> Result<T, ActivityError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ActivityError>>,
{
    let policy = &options.retry_policy;
    let mut attempt: u32 = 1;

    loop {
        if cancel.is_some_and(|token| token.is_cancelled()) {
            return Err(ActivityError::canceled());
        }

        let attempt_result = {
            let work = tokio::time::timeout(options.start_to_close_timeout, attempt_fn());
            match cancel {
                Some(token) => tokio::select! {
                    _ = token.cancelled() => return Err(ActivityError::canceled()),
                    result = work => result,
                },
                None => work.await,
            }
        };

        let result = match attempt_result {
            Ok(inner) => inner,
            Err(_) => Err(ActivityError::deadline_exceeded(
                options.start_to_close_timeout,
            )),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(error) if error.retryable && policy.has_attempts_remaining(attempt) => {
                let delay = policy.delay_for_attempt(attempt + 1);
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "activity attempt failed; retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

struct InProcessContext {
    run_id: RunId,
    hook_activity: String,
    hub: Arc<SignalHub>,
    inner: Arc<EngineInner>,
    hook_seq: AtomicU64,
}

#[async_trait]
impl WorkflowContext for InProcessContext {
    fn run_id(&self) -> &RunId {
        &self.run_id
    }

    async fn publish_hook(&self, event: HookEvent) -> Result<(), ActivityError> {
        let seq = self.hook_seq.fetch_add(1, Ordering::SeqCst);
        let activity_id = format!("hook-{seq}");
        self.inner
            .run_hook_activity(&self.run_id, &self.hook_activity, &activity_id, event)
            .await
    }

    async fn execute_planner_activity(
        &self,
        call: PlannerActivityCall,
    ) -> Result<PlanActivityOutput, ActivityError> {
        self.inner
            .run_planner_activity(&self.run_id, call, self.hub.cancellation())
            .await
    }

    async fn execute_tool_activity(
        &self,
        call: ToolActivityCall,
    ) -> Result<ToolResult, ActivityError> {
        self.inner
            .run_tool_activity(&self.run_id, call, self.hub.cancellation())
            .await
    }

    fn execute_tool_activity_async(&self, call: ToolActivityCall) -> ToolOutputFuture {
        let (tx, rx) = oneshot::channel();
        let inner = self.inner.clone();
        let run_id = self.run_id.clone();
        let run_cancel = self.hub.cancellation();

        tokio::spawn(async move {
            let result = inner.run_tool_activity(&run_id, call, run_cancel).await;
            let _ = tx.send(result);
        });

        ToolOutputFuture::new(rx)
    }

    fn pause_requests(&self) -> SignalReceiver<PauseRequest> {
        self.hub.pause_requests()
    }

    fn resume_requests(&self) -> SignalReceiver<ResumeRequest> {
        self.hub.resume_requests()
    }

    fn clarification_answers(&self) -> SignalReceiver<ClarificationAnswer> {
        self.hub.clarification_answers()
    }

    fn external_tool_results(&self) -> SignalReceiver<ExternalToolResults> {
        self.hub.external_tool_results()
    }

    fn confirmation_decisions(&self) -> SignalReceiver<ConfirmationDecision> {
        self.hub.confirmation_decisions()
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn new_timer(&self, duration: Duration) -> TimerFuture {
        Box::pin(async move {
            tokio::time::sleep(duration).await;
            Utc::now()
        })
    }

    async fn start_child_workflow(
        &self,
        request: StartWorkflowRequest,
    ) -> Result<WorkflowHandle, EngineError> {
        EngineInner::start(&self.inner, request).await
    }

    fn cancel_scope(&self) -> CancelScope {
        CancelScope::child_of(&self.hub.cancellation())
    }

    fn cancellation(&self) -> CancellationToken {
        self.hub.cancellation()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tether_contracts::{
        AgentId, Message, PlanActivityInput, PlanInput, PlanResult, RunInput, RunPhase,
        ToolActivityInput, ToolCallId, ToolInvocationMeta, ToolName, ToolRequest, TurnId,
    };

    fn run_input(run_id: &str) -> RunInput {
        RunInput::new(AgentId::new("svc.agent"), vec![Message::user("hi")])
            .with_run_id(RunId::new(run_id))
    }

    fn noop_hook() -> HookActivityFn {
        Arc::new(|_event| Box::pin(async { Ok(()) }))
    }

    fn echo_definition(name: &str) -> WorkflowDefinition {
        WorkflowDefinition::new(
            name,
            "hooks",
            Arc::new(|ctx: Arc<dyn WorkflowContext>, input: RunInput| {
                Box::pin(async move {
                    Ok(RunOutput {
                        run_id: ctx.run_id().clone(),
                        phase: RunPhase::Completed,
                        final_message: input.messages.first().cloned(),
                        tool_events: vec![],
                        notes: vec![],
                        failure: None,
                    })
                })
            }),
        )
    }

    fn engine_with_echo() -> InProcessEngine {
        let engine = InProcessEngine::new();
        engine
            .register_hook_activity("hooks", ActivityOptions::default(), noop_hook())
            .unwrap();
        engine.register_workflow(echo_definition("echo")).unwrap();
        engine
    }

    #[tokio::test]
    async fn test_start_and_wait() {
        let engine = engine_with_echo();

        let handle = engine
            .start_workflow(StartWorkflowRequest {
                workflow: "echo".into(),
                run_id: RunId::new("r1"),
                input: run_input("r1"),
            })
            .await
            .unwrap();

        let output = handle.wait().await.unwrap();
        assert_eq!(output.run_id.as_str(), "r1");
        assert_eq!(output.phase, RunPhase::Completed);
    }

    #[tokio::test]
    async fn test_start_is_idempotent_per_run_id() {
        let engine = engine_with_echo();

        let request = StartWorkflowRequest {
            workflow: "echo".into(),
            run_id: RunId::new("r1"),
            input: run_input("r1"),
        };

        let first = engine.start_workflow(request.clone()).await.unwrap();
        let second = engine.start_workflow(request).await.unwrap();

        let a = first.wait().await.unwrap();
        let b = second.wait().await.unwrap();
        assert_eq!(a.run_id, b.run_id);
        assert_eq!(engine.inner.runs.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_workflow_rejected() {
        let engine = InProcessEngine::new();
        let result = engine
            .start_workflow(StartWorkflowRequest {
                workflow: "nope".into(),
                run_id: RunId::new("r1"),
                input: run_input("r1"),
            })
            .await;

        assert!(matches!(result, Err(EngineError::UnknownWorkflow(_))));
    }

    #[tokio::test]
    async fn test_duplicate_workflow_registration_rejected() {
        let engine = engine_with_echo();
        let result = engine.register_workflow(echo_definition("echo"));
        assert!(matches!(result, Err(EngineError::DuplicateRegistration(_))));
    }

    #[tokio::test]
    async fn test_signal_reaches_running_workflow() {
        let engine = InProcessEngine::new();
        engine
            .register_hook_activity("hooks", ActivityOptions::default(), noop_hook())
            .unwrap();

        // Workflow that waits for a resume signal, then completes.
        engine
            .register_workflow(WorkflowDefinition::new(
                "waiter",
                "hooks",
                Arc::new(|ctx: Arc<dyn WorkflowContext>, _input: RunInput| {
                    Box::pin(async move {
                        let resume = ctx.resume_requests().receive().await.map_err(|e| {
                            WorkflowError::new(format!("receive failed: {e}"))
                        })?;
                        Ok(RunOutput {
                            run_id: ctx.run_id().clone(),
                            phase: RunPhase::Completed,
                            final_message: resume.reason.map(Message::assistant),
                            tool_events: vec![],
                            notes: vec![],
                            failure: None,
                        })
                    })
                }),
            ))
            .unwrap();

        let handle = engine
            .start_workflow(StartWorkflowRequest {
                workflow: "waiter".into(),
                run_id: RunId::new("r1"),
                input: run_input("r1"),
            })
            .await
            .unwrap();

        engine
            .signaler()
            .signal(
                &RunId::new("r1"),
                Signal::Resume(ResumeRequest::new(RunId::new("r1")).with_reason("go")),
            )
            .await
            .unwrap();

        let output = handle.wait().await.unwrap();
        assert_eq!(output.final_message.unwrap().content, "go");
    }

    #[tokio::test]
    async fn test_signal_unknown_run_fails() {
        let engine = engine_with_echo();
        let result = engine
            .signaler()
            .signal(
                &RunId::new("ghost"),
                Signal::Resume(ResumeRequest::new(RunId::new("ghost"))),
            )
            .await;
        assert!(matches!(result, Err(EngineError::WorkflowNotFound(_))));
    }

    #[tokio::test]
    async fn test_planner_activity_retries_until_success() {
        let engine = InProcessEngine::new();
        engine
            .register_hook_activity("hooks", ActivityOptions::default(), noop_hook())
            .unwrap();

        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_in_handler = attempts.clone();
        engine
            .register_planner_activity(
                "plan",
                ActivityOptions::default()
                    .with_retry(crate::RetryPolicy::fixed(Duration::from_millis(1), 3)),
                Arc::new(move |_input| {
                    let attempts = attempts_in_handler.clone();
                    Box::pin(async move {
                        if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err(ActivityError::retryable("flaky"))
                        } else {
                            Ok(tether_contracts::PlanActivityOutput::of(PlanResult::Final {
                                message: Message::assistant("done"),
                            }))
                        }
                    })
                }),
            )
            .unwrap();

        engine
            .register_workflow(WorkflowDefinition::new(
                "planning",
                "hooks",
                Arc::new(|ctx: Arc<dyn WorkflowContext>, input: RunInput| {
                    Box::pin(async move {
                        let output = ctx
                            .execute_planner_activity(PlannerActivityCall {
                                activity: "plan".into(),
                                activity_id: "plan-1".into(),
                                input: PlanActivityInput::Start {
                                    input: PlanInput {
                                        context: tether_contracts::RunContext {
                                            run_id: ctx.run_id().clone(),
                                            attempt: 1,
                                            labels: Default::default(),
                                            max_duration: None,
                                            session_id: input.session_id.clone(),
                                            turn_id: TurnId::new("t1"),
                                            parent_tool_call_id: None,
                                        },
                                        messages: input.messages.clone(),
                                        allowed_tools: vec![],
                                        caps: tether_contracts::CapsState {
                                            remaining_tool_calls: 1,
                                            consecutive_failed_turns: 0,
                                        },
                                    },
                                },
                                options: None,
                            })
                            .await?;

                        let final_message = match output.result {
                            PlanResult::Final { message } => Some(message),
                            _ => None,
                        };
                        Ok(RunOutput {
                            run_id: ctx.run_id().clone(),
                            phase: RunPhase::Completed,
                            final_message,
                            tool_events: vec![],
                            notes: vec![],
                            failure: None,
                        })
                    })
                }),
            ))
            .unwrap();

        let handle = engine
            .start_workflow(StartWorkflowRequest {
                workflow: "planning".into(),
                run_id: RunId::new("r1"),
                input: run_input("r1"),
            })
            .await
            .unwrap();

        let output = handle.wait().await.unwrap();
        assert_eq!(output.final_message.unwrap().content, "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_timer_and_child_workflow() {
        let engine = InProcessEngine::new();
        engine
            .register_hook_activity("hooks", ActivityOptions::default(), noop_hook())
            .unwrap();
        engine.register_workflow(echo_definition("echo")).unwrap();

        // Parent sleeps on a deterministic timer, then runs a child
        // workflow and forwards its result.
        engine
            .register_workflow(WorkflowDefinition::new(
                "parent",
                "hooks",
                Arc::new(|ctx: Arc<dyn WorkflowContext>, input: RunInput| {
                    Box::pin(async move {
                        let before = ctx.now();
                        let fired_at = ctx.new_timer(Duration::from_millis(10)).await;
                        assert!(fired_at >= before);

                        let scope = ctx.cancel_scope();
                        assert!(!scope.is_cancelled());

                        let child_run_id = RunId::new(format!("{}:child", ctx.run_id()));
                        let child = ctx
                            .start_child_workflow(StartWorkflowRequest {
                                workflow: "echo".into(),
                                run_id: child_run_id.clone(),
                                input: RunInput {
                                    run_id: Some(child_run_id),
                                    ..input
                                },
                            })
                            .await
                            .map_err(|e| WorkflowError::new(e.to_string()))?;

                        child.wait().await
                    })
                }),
            ))
            .unwrap();

        let handle = engine
            .start_workflow(StartWorkflowRequest {
                workflow: "parent".into(),
                run_id: RunId::new("r1"),
                input: run_input("r1"),
            })
            .await
            .unwrap();

        let output = handle.wait().await.unwrap();
        assert_eq!(output.phase, RunPhase::Completed);
        assert_eq!(output.final_message.unwrap().content, "hi");
    }

    #[tokio::test]
    async fn test_tool_activity_outcome_is_journaled() {
        let journal = Arc::new(InMemoryJournal::new());
        let engine = InProcessEngine::with_journal(journal.clone());
        engine
            .register_hook_activity("hooks", ActivityOptions::default(), noop_hook())
            .unwrap();

        let executions = Arc::new(AtomicU32::new(0));
        let executions_in_handler = executions.clone();
        engine
            .register_tool_activity(
                "tools",
                ActivityOptions::default(),
                Arc::new(move |input: ToolActivityInput| {
                    executions_in_handler.fetch_add(1, Ordering::SeqCst);
                    Box::pin(async move {
                        Ok(ToolResult::ok(
                            input.meta.tool_call_id,
                            input.request.name,
                            serde_json::json!({"ok": true}),
                        ))
                    })
                }),
            )
            .unwrap();

        let call = || ToolActivityCall {
            activity: "tools".into(),
            activity_id: "t1-0".into(),
            input: ToolActivityInput {
                meta: ToolInvocationMeta {
                    run_id: RunId::new("r1"),
                    session_id: None,
                    turn_id: TurnId::new("t1"),
                    tool_call_id: ToolCallId::new("c1"),
                    parent_tool_call_id: None,
                    attempt: 1,
                },
                request: ToolRequest::new(
                    ToolName::parse("svc.ts.search").unwrap(),
                    serde_json::json!({"q": "x"}),
                ),
            },
            options: None,
            scope: None,
        };

        let run_id = RunId::new("r1");
        let cancel = CancellationToken::new();
        let first = engine
            .inner
            .run_tool_activity(&run_id, call(), cancel.clone())
            .await
            .unwrap();
        let second = engine
            .inner
            .run_tool_activity(&run_id, call(), cancel)
            .await
            .unwrap();

        assert_eq!(first.tool_call_id, second.tool_call_id);
        // Second invocation replayed the journal instead of re-running.
        assert_eq!(executions.load(Ordering::SeqCst), 1);
    }
}
