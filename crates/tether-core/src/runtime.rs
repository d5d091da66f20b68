// Runtime facade
//
// Owns the engine, the stores, the hook bus, the policy engine, and the
// registry, and wires each registered agent's workflow and typed
// activities into the engine. All collaborators are injected explicitly;
// there is no process-global runtime handle.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use tether_contracts::{
    ClarificationAnswer, ConfirmationDecision, ExternalToolResults, HookEvent, HookPayload,
    MemoryEvent, PauseRequest, ProviderErrorKind, ResumeRequest, Run, RunId, RunInput, RunOutput,
    RunStatus, RetryHint, RetryReason, RunPhase, ToolError, ToolResult,
    METADATA_POLICY_DECISIONS,
};
use tether_durable::{
    ActivityError, ActivityOptions, PlannerActivityFn, Signal, StartWorkflowRequest,
    ToolActivityFn, WorkflowContext, WorkflowDefinition, WorkflowEngine, WorkflowError,
    WorkflowHandle,
};
use tether_storage::{
    InMemoryMemoryStore, InMemoryRunStore, InMemorySessionStore, MemoryStore, RunStore, Session,
    SessionStore,
};

use crate::error::{Result, RuntimeError};
use crate::hooks::HookBus;
use crate::planner::PlannerError;
use crate::policy::{BasicPolicyEngine, PolicyEngine};
use crate::registry::{AgentRegistration, RuntimeRegistry};
use crate::run_loop::RunLoop;

/// Handle returned by [`Runtime::start_run`]
pub struct StartedRun {
    pub run_id: RunId,
    pub handle: WorkflowHandle,
}

/// The agent workflow runtime
pub struct Runtime {
    engine: Arc<dyn WorkflowEngine>,
    run_store: Arc<dyn RunStore>,
    memory_store: Arc<dyn MemoryStore>,
    session_store: Arc<dyn SessionStore>,
    hook_bus: Arc<HookBus>,
    policy: Arc<dyn PolicyEngine>,
    registry: Arc<RuntimeRegistry>,
}

/// Builder for a [`Runtime`]; in-memory stores and an allow-all policy
/// engine by default.
pub struct RuntimeBuilder {
    engine: Arc<dyn WorkflowEngine>,
    run_store: Option<Arc<dyn RunStore>>,
    memory_store: Option<Arc<dyn MemoryStore>>,
    session_store: Option<Arc<dyn SessionStore>>,
    policy: Option<Arc<dyn PolicyEngine>>,
}

impl RuntimeBuilder {
    pub fn with_run_store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.run_store = Some(store);
        self
    }

    pub fn with_memory_store(mut self, store: Arc<dyn MemoryStore>) -> Self {
        self.memory_store = Some(store);
        self
    }

    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = Some(store);
        self
    }

    pub fn with_policy_engine(mut self, policy: Arc<dyn PolicyEngine>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn build(self) -> Arc<Runtime> {
        Arc::new(Runtime {
            engine: self.engine,
            run_store: self
                .run_store
                .unwrap_or_else(|| Arc::new(InMemoryRunStore::new())),
            memory_store: self
                .memory_store
                .unwrap_or_else(|| Arc::new(InMemoryMemoryStore::new())),
            session_store: self
                .session_store
                .unwrap_or_else(|| Arc::new(InMemorySessionStore::new())),
            hook_bus: Arc::new(HookBus::new()),
            policy: self
                .policy
                .unwrap_or_else(|| Arc::new(BasicPolicyEngine::allow_all())),
            registry: Arc::new(RuntimeRegistry::new()),
        })
    }
}

impl Runtime {
    pub fn builder(engine: Arc<dyn WorkflowEngine>) -> RuntimeBuilder {
        RuntimeBuilder {
            engine,
            run_store: None,
            memory_store: None,
            session_store: None,
            policy: None,
        }
    }

    pub fn hook_bus(&self) -> &Arc<HookBus> {
        &self.hook_bus
    }

    pub fn registry(&self) -> &Arc<RuntimeRegistry> {
        &self.registry
    }

    pub fn run_store(&self) -> &Arc<dyn RunStore> {
        &self.run_store
    }

    pub fn memory_store(&self) -> &Arc<dyn MemoryStore> {
        &self.memory_store
    }

    pub(crate) fn policy_engine(&self) -> &Arc<dyn PolicyEngine> {
        &self.policy
    }

    /// Register an agent: its planner, tool, and hook activities plus the
    /// workflow definition hosting the run loop.
    pub fn register_agent(self: &Arc<Self>, registration: AgentRegistration) -> Result<()> {
        registration
            .agent_id
            .clone()
            .validated()
            .map_err(|_| RuntimeError::validation("agent id must not be empty"))?;

        let registration = self.registry.register_agent(registration)?;

        self.engine.register_planner_activity(
            &registration.plan_activity,
            registration.plan_options.clone(),
            planner_activity(&registration),
        )?;

        self.engine.register_tool_activity(
            &registration.tool_activity,
            registration.tool_options.clone(),
            tool_activity(self),
        )?;

        self.engine.register_hook_activity(
            &registration.hook_activity,
            ActivityOptions::default(),
            hook_activity(self),
        )?;

        let runtime = self.clone();
        let agent_id = registration.agent_id.clone();
        self.engine.register_workflow(WorkflowDefinition::new(
            registration.workflow_name.clone(),
            registration.hook_activity.clone(),
            Arc::new(move |ctx, input| {
                let runtime = runtime.clone();
                Box::pin(async move { runtime.execute_workflow(ctx, input).await })
            }),
        ))?;

        info!(agent_id = %agent_id, "registered agent");
        Ok(())
    }

    /// Drive one run to completion. Invoked inside the workflow handler;
    /// exposed for engines that host handlers elsewhere.
    pub async fn execute_workflow(
        self: &Arc<Self>,
        ctx: Arc<dyn WorkflowContext>,
        input: RunInput,
    ) -> std::result::Result<RunOutput, WorkflowError> {
        let registration = self
            .registry
            .agent(&input.agent_id)
            .ok_or_else(|| WorkflowError::new(format!("unknown agent: {}", input.agent_id)))?;
        RunLoop::root(self.clone(), ctx, registration, &input)
            .execute(input)
            .await
    }

    /// Validate the input, persist the run record, and start the workflow.
    /// Starting the same run id twice observes the first execution.
    pub async fn start_run(&self, mut input: RunInput) -> Result<StartedRun> {
        input
            .agent_id
            .clone()
            .validated()
            .map_err(|_| RuntimeError::validation("agent id must not be empty"))?;

        let registration = self
            .registry
            .agent(&input.agent_id)
            .ok_or_else(|| RuntimeError::UnknownAgent(input.agent_id.clone()))?;

        if input.messages.is_empty() {
            return Err(RuntimeError::validation(
                "run requires at least one message",
            ));
        }

        let run_id = input.run_id.clone().unwrap_or_else(RunId::generate);
        input.run_id = Some(run_id.clone());

        let now = Utc::now();
        let mut run = Run::new(input.agent_id.clone(), run_id.clone(), now)
            .with_labels(input.labels.clone());
        if let Some(session_id) = &input.session_id {
            run = run.with_session(session_id.clone());
            if self.session_store.load(session_id).await?.is_none() {
                self.session_store
                    .upsert(Session::new(
                        session_id.clone(),
                        input.agent_id.clone(),
                        now,
                    ))
                    .await?;
            }
        }
        self.run_store.upsert(run).await?;

        let handle = self
            .engine
            .start_workflow(StartWorkflowRequest {
                workflow: registration.workflow_name.clone(),
                run_id: run_id.clone(),
                input,
            })
            .await?;

        info!(run_id = %run_id, agent_id = %registration.agent_id, "run started");
        Ok(StartedRun { run_id, handle })
    }

    /// Ask a running workflow to pause at its next loop iteration
    pub async fn pause_run(&self, request: PauseRequest) -> Result<()> {
        let run_id = request.run_id.clone();
        self.engine
            .signaler()
            .signal(&run_id, Signal::Pause(request))
            .await?;
        Ok(())
    }

    /// Resume a paused workflow
    pub async fn resume_run(&self, request: ResumeRequest) -> Result<()> {
        let run_id = request.run_id.clone();
        self.engine
            .signaler()
            .signal(&run_id, Signal::Resume(request))
            .await?;
        Ok(())
    }

    /// Answer a pending clarification await item
    pub async fn provide_clarification(&self, answer: ClarificationAnswer) -> Result<()> {
        let run_id = answer.run_id.clone();
        self.engine
            .signaler()
            .signal(&run_id, Signal::Clarification(answer))
            .await?;
        Ok(())
    }

    /// Deliver externally-executed tool results for an await turn
    pub async fn provide_tool_results(&self, results: ExternalToolResults) -> Result<()> {
        let run_id = results.run_id.clone();
        self.engine
            .signaler()
            .signal(&run_id, Signal::ExternalToolResults(results))
            .await?;
        Ok(())
    }

    /// Deliver a confirmation decision for an await turn
    pub async fn provide_confirmation(&self, decision: ConfirmationDecision) -> Result<()> {
        let run_id = decision.run_id.clone();
        self.engine
            .signaler()
            .signal(&run_id, Signal::Confirmation(decision))
            .await?;
        Ok(())
    }

    /// Request cancellation of a run
    pub async fn cancel_run(&self, run_id: &RunId, reason: Option<String>) -> Result<()> {
        self.engine
            .signaler()
            .signal(run_id, Signal::Cancel { reason })
            .await?;
        Ok(())
    }
}

fn planner_activity(registration: &Arc<AgentRegistration>) -> PlannerActivityFn {
    let planner = registration.planner.clone();
    Arc::new(move |input| {
        let planner = planner.clone();
        Box::pin(async move {
            let outcome = match input {
                tether_contracts::PlanActivityInput::Start { input } => {
                    planner.plan_start(input).await
                }
                tether_contracts::PlanActivityInput::Resume { input } => {
                    planner.plan_resume(input).await
                }
            };
            outcome.map_err(planner_error_to_activity)
        })
    })
}

fn planner_error_to_activity(error: PlannerError) -> ActivityError {
    let details = json!({
        "provider": error.provider,
        "kind": error.kind,
        "status": error.status,
    });
    let base = if error.retryable {
        ActivityError::retryable(error.message)
    } else {
        ActivityError::non_retryable(error.message)
    };
    base.with_kind("planner").with_details(details)
}

/// Reconstruct provider detail from a journaled planner activity error
pub(crate) fn provider_detail_from(
    error: &ActivityError,
) -> (Option<String>, Option<ProviderErrorKind>, Option<u16>) {
    let Some(details) = &error.details else {
        return (None, None, None);
    };
    let provider = details
        .get("provider")
        .and_then(|v| v.as_str())
        .map(String::from);
    let kind = details
        .get("kind")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok());
    let status = details
        .get("status")
        .and_then(|v| v.as_u64())
        .map(|v| v as u16);
    (provider, kind, status)
}

fn tool_activity(runtime: &Arc<Runtime>) -> ToolActivityFn {
    let registry = runtime.registry.clone();
    Arc::new(move |input| {
        let registry = registry.clone();
        Box::pin(async move {
            let prefix = input.request.name.toolset_prefix();
            match registry.toolset(&prefix) {
                Some(toolset) => toolset.executor.execute(&input.meta, &input.request).await,
                None => {
                    warn!(tool = %input.request.name, "no toolset registered");
                    Ok(ToolResult::err(
                        input.meta.tool_call_id.clone(),
                        input.request.name.clone(),
                        ToolError::new(format!("no toolset registered for {prefix}")),
                    )
                    .with_hint(
                        RetryHint::new(RetryReason::ToolUnavailable)
                            .for_tool(input.request.name.clone()),
                    ))
                }
            }
        })
    })
}

fn hook_activity(runtime: &Arc<Runtime>) -> tether_durable::HookActivityFn {
    let run_store = runtime.run_store.clone();
    let memory_store = runtime.memory_store.clone();
    let bus = runtime.hook_bus.clone();
    Arc::new(move |event| {
        let run_store = run_store.clone();
        let memory_store = memory_store.clone();
        let bus = bus.clone();
        Box::pin(async move {
            persist_hook_event(&run_store, &memory_store, &event)
                .await
                .map_err(|e| ActivityError::retryable(e.to_string()).with_kind("store"))?;
            bus.publish(&event)
                .await
                .map_err(|e| ActivityError::non_retryable(e.to_string()).with_kind("subscriber"))
        })
    })
}

/// The runtime-owned persistence a hook event implies: run status
/// transitions, memory appends, and the policy-decision metadata trail.
async fn persist_hook_event(
    run_store: &Arc<dyn RunStore>,
    memory_store: &Arc<dyn MemoryStore>,
    event: &HookEvent,
) -> std::result::Result<(), tether_storage::StoreError> {
    match &event.payload {
        HookPayload::RunStarted => {
            transition_run(run_store, event, RunStatus::Running).await
        }
        HookPayload::RunPaused { .. } => transition_run(run_store, event, RunStatus::Paused).await,
        HookPayload::RunResumed { .. } => {
            transition_run(run_store, event, RunStatus::Running).await
        }
        HookPayload::RunCompleted { phase, .. } => {
            let status = match phase {
                RunPhase::Completed => RunStatus::Completed,
                RunPhase::Canceled => RunStatus::Canceled,
                _ => RunStatus::Failed,
            };
            transition_run(run_store, event, status).await
        }

        HookPayload::ToolCallScheduled {
            tool_call_id,
            name,
            payload,
            parent_tool_call_id,
        } => {
            memory_store
                .append(
                    &event.agent_id,
                    &event.run_id,
                    vec![MemoryEvent::ToolCall {
                        tool_call_id: tool_call_id.clone(),
                        name: name.clone(),
                        payload: payload.clone(),
                        parent_tool_call_id: parent_tool_call_id.clone(),
                    }],
                )
                .await
        }

        HookPayload::ToolResultReceived {
            tool_call_id,
            name,
            success,
            result,
            error,
            ..
        } => {
            memory_store
                .append(
                    &event.agent_id,
                    &event.run_id,
                    vec![MemoryEvent::ToolResult {
                        tool_call_id: tool_call_id.clone(),
                        name: name.clone(),
                        success: *success,
                        result: result.clone(),
                        error: error.clone(),
                    }],
                )
                .await
        }

        HookPayload::PlannerNote { text } => {
            memory_store
                .append(
                    &event.agent_id,
                    &event.run_id,
                    vec![MemoryEvent::PlannerNote { text: text.clone() }],
                )
                .await
        }

        HookPayload::AssistantMessage { message } => {
            memory_store
                .append(
                    &event.agent_id,
                    &event.run_id,
                    vec![MemoryEvent::AssistantMessage {
                        message: message.clone(),
                    }],
                )
                .await
        }

        HookPayload::PolicyDecision { record } => {
            memory_store
                .append(
                    &event.agent_id,
                    &event.run_id,
                    vec![MemoryEvent::PolicyDecision {
                        record: record.clone(),
                    }],
                )
                .await?;

            let mut run = match run_store.load(&event.run_id).await? {
                Some(run) => run,
                None => Run::new(event.agent_id.clone(), event.run_id.clone(), event.timestamp),
            };
            let decisions = run
                .metadata
                .entry(METADATA_POLICY_DECISIONS.to_string())
                .or_insert_with(|| serde_json::Value::Array(Vec::new()));
            if let Some(list) = decisions.as_array_mut() {
                list.push(serde_json::to_value(record).unwrap_or(serde_json::Value::Null));
            }
            run.updated_at = event.timestamp;
            run_store.upsert(run).await
        }

        // Fan-out only; no persistence implied.
        _ => Ok(()),
    }
}

async fn transition_run(
    run_store: &Arc<dyn RunStore>,
    event: &HookEvent,
    status: RunStatus,
) -> std::result::Result<(), tether_storage::StoreError> {
    // Nested agent runs have no pre-created record; create on first event.
    let mut run = match run_store.load(&event.run_id).await? {
        Some(run) => run,
        None => Run::new(event.agent_id.clone(), event.run_id.clone(), event.timestamp),
    };
    if run.session_id.is_none() {
        run.session_id = event.session_id.clone();
    }
    run.transition(status, event.timestamp);
    run_store.upsert(run).await
}
