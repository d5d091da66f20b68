//! The workflow contract
//!
//! A workflow is an async handler driven entirely through a
//! [`WorkflowContext`]: every interaction with the outside world goes
//! through activities, timers, and typed signal receivers so a durable
//! engine can journal and replay it. Direct wall-clock reads, random
//! numbers, or uncoordinated concurrency inside a handler are forbidden.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

use tether_contracts::{
    ClarificationAnswer, ConfirmationDecision, ExternalToolResults, HookEvent, PauseRequest,
    PlanActivityInput, PlanActivityOutput, ResumeRequest, RunId, RunInput, RunOutput,
    ToolActivityInput, ToolResult,
};

use crate::activity::{
    ActivityError, ActivityOptions, HookActivityFn, PlannerActivityFn, ToolActivityFn,
};
use crate::signal::{Signal, SignalReceiver};

/// Terminal error of a workflow execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct WorkflowError {
    pub message: String,
    pub code: Option<String>,
    pub retryable: bool,
}

impl WorkflowError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            retryable: false,
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            retryable: true,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl From<ActivityError> for WorkflowError {
    fn from(err: ActivityError) -> Self {
        Self {
            message: err.message,
            code: err.kind,
            retryable: err.retryable,
        }
    }
}

/// Errors from engine operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No workflow definition registered under this name
    #[error("unknown workflow: {0}")]
    UnknownWorkflow(String),

    /// No activity registered under this name
    #[error("unknown activity: {0}")]
    UnknownActivity(String),

    /// A definition or activity was registered twice
    #[error("duplicate registration: {0}")]
    DuplicateRegistration(String),

    /// No execution exists for this run id
    #[error("workflow not found: {0}")]
    WorkflowNotFound(RunId),

    /// Signal could not be delivered
    #[error("signal delivery failed: {0}")]
    SignalDelivery(String),
}

/// One planner activity invocation
#[derive(Debug, Clone)]
pub struct PlannerActivityCall {
    /// Registered activity name
    pub activity: String,
    /// Deterministic id journaling this invocation within the run
    pub activity_id: String,
    pub input: PlanActivityInput,
    /// Override of the registered options
    pub options: Option<ActivityOptions>,
}

/// One tool activity invocation
#[derive(Debug, Clone)]
pub struct ToolActivityCall {
    /// Registered activity name
    pub activity: String,
    /// Deterministic id journaling this invocation within the run
    pub activity_id: String,
    pub input: ToolActivityInput,
    /// Override of the registered options
    pub options: Option<ActivityOptions>,
    /// Scope whose cancellation aborts the invocation
    pub scope: Option<CancelScope>,
}

/// Future returned by the non-blocking tool activity call
pub struct ToolOutputFuture {
    rx: oneshot::Receiver<Result<ToolResult, ActivityError>>,
}

impl ToolOutputFuture {
    pub fn new(rx: oneshot::Receiver<Result<ToolResult, ActivityError>>) -> Self {
        Self { rx }
    }
}

impl Future for ToolOutputFuture {
    type Output = Result<ToolResult, ActivityError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.rx).poll(cx).map(|received| match received {
            Ok(outcome) => outcome,
            Err(_) => Err(ActivityError::non_retryable("activity task dropped")),
        })
    }
}

/// Future resolving at a deterministic point in time
pub type TimerFuture = BoxFuture<'static, DateTime<Utc>>;

/// Cancellation scope for a group of outstanding operations.
///
/// Cancelling the scope propagates to activity invocations and child
/// workflows started under it.
#[derive(Debug, Clone)]
pub struct CancelScope {
    token: CancellationToken,
}

impl CancelScope {
    pub fn child_of(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Request to start a workflow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartWorkflowRequest {
    /// Name of the registered workflow definition
    pub workflow: String,
    /// Globally unique run id, stable across retries
    pub run_id: RunId,
    pub input: RunInput,
}

/// The deterministic primitives a workflow handler runs against
#[async_trait]
pub trait WorkflowContext: Send + Sync {
    /// Id of the hosting run
    fn run_id(&self) -> &RunId;

    /// Schedule the hook-publishing activity and wait until subscribers
    /// have been notified. Subscriber I/O happens inside the activity,
    /// never on the workflow thread.
    async fn publish_hook(&self, event: HookEvent) -> Result<(), ActivityError>;

    /// Execute the planner activity, blocking until it resolves
    async fn execute_planner_activity(
        &self,
        call: PlannerActivityCall,
    ) -> Result<PlanActivityOutput, ActivityError>;

    /// Execute a tool activity, blocking until it resolves
    async fn execute_tool_activity(
        &self,
        call: ToolActivityCall,
    ) -> Result<ToolResult, ActivityError>;

    /// Schedule a tool activity and return immediately with its future
    fn execute_tool_activity_async(&self, call: ToolActivityCall) -> ToolOutputFuture;

    fn pause_requests(&self) -> SignalReceiver<PauseRequest>;
    fn resume_requests(&self) -> SignalReceiver<ResumeRequest>;
    fn clarification_answers(&self) -> SignalReceiver<ClarificationAnswer>;
    fn external_tool_results(&self) -> SignalReceiver<ExternalToolResults>;
    fn confirmation_decisions(&self) -> SignalReceiver<ConfirmationDecision>;

    /// Deterministic current time
    fn now(&self) -> DateTime<Utc>;

    /// Deterministic timer resolving with the fire time
    fn new_timer(&self, duration: Duration) -> TimerFuture;

    /// Start a child workflow execution
    async fn start_child_workflow(
        &self,
        request: StartWorkflowRequest,
    ) -> Result<WorkflowHandle, EngineError>;

    /// Open a new cancellation scope under the run-level token
    fn cancel_scope(&self) -> CancelScope;

    /// Run-level cancellation token
    fn cancellation(&self) -> CancellationToken;
}

/// Handler driving one workflow execution
pub type WorkflowHandlerFn = Arc<
    dyn Fn(Arc<dyn WorkflowContext>, RunInput) -> BoxFuture<'static, Result<RunOutput, WorkflowError>>
        + Send
        + Sync,
>;

/// A registered workflow definition
#[derive(Clone)]
pub struct WorkflowDefinition {
    /// Definition name referenced by start requests
    pub name: String,
    /// Hook activity this workflow publishes through
    pub hook_activity: String,
    pub handler: WorkflowHandlerFn,
}

impl WorkflowDefinition {
    pub fn new(
        name: impl Into<String>,
        hook_activity: impl Into<String>,
        handler: WorkflowHandlerFn,
    ) -> Self {
        Self {
            name: name.into(),
            hook_activity: hook_activity.into(),
            handler,
        }
    }
}

impl std::fmt::Debug for WorkflowDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowDefinition")
            .field("name", &self.name)
            .field("hook_activity", &self.hook_activity)
            .finish_non_exhaustive()
    }
}

/// Delivery of signals by run id, usable out of process
#[async_trait]
pub trait Signaler: Send + Sync {
    async fn signal(&self, run_id: &RunId, signal: Signal) -> Result<(), EngineError>;
}

/// Handle on one workflow execution
#[derive(Clone)]
pub struct WorkflowHandle {
    run_id: RunId,
    outcome: watch::Receiver<Option<Result<RunOutput, WorkflowError>>>,
    signaler: Arc<dyn Signaler>,
}

impl WorkflowHandle {
    pub fn new(
        run_id: RunId,
        outcome: watch::Receiver<Option<Result<RunOutput, WorkflowError>>>,
        signaler: Arc<dyn Signaler>,
    ) -> Self {
        Self {
            run_id,
            outcome,
            signaler,
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Wait for the execution to finish. Safe to call from many waiters.
    pub async fn wait(&self) -> Result<RunOutput, WorkflowError> {
        let mut rx = self.outcome.clone();
        loop {
            {
                let current = rx.borrow_and_update();
                if let Some(outcome) = current.as_ref() {
                    return outcome.clone();
                }
            }
            if rx.changed().await.is_err() {
                return Err(WorkflowError::new("workflow execution dropped"));
            }
        }
    }

    /// Deliver a typed signal to this execution
    pub async fn signal(&self, signal: Signal) -> Result<(), EngineError> {
        self.signaler.signal(&self.run_id, signal).await
    }

    /// Request cancellation of this execution
    pub async fn cancel(&self, reason: Option<String>) -> Result<(), EngineError> {
        self.signaler
            .signal(&self.run_id, Signal::Cancel { reason })
            .await
    }
}

impl std::fmt::Debug for WorkflowHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowHandle")
            .field("run_id", &self.run_id)
            .finish_non_exhaustive()
    }
}

/// The contract a workflow engine must satisfy.
///
/// Two families of implementation share it: a durable remote engine for
/// production and the in-process engine used by tests and examples.
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    fn register_workflow(&self, definition: WorkflowDefinition) -> Result<(), EngineError>;

    fn register_planner_activity(
        &self,
        name: &str,
        options: ActivityOptions,
        handler: PlannerActivityFn,
    ) -> Result<(), EngineError>;

    fn register_tool_activity(
        &self,
        name: &str,
        options: ActivityOptions,
        handler: ToolActivityFn,
    ) -> Result<(), EngineError>;

    fn register_hook_activity(
        &self,
        name: &str,
        options: ActivityOptions,
        handler: HookActivityFn,
    ) -> Result<(), EngineError>;

    /// Start (or, for an already-started run id, observe) an execution
    async fn start_workflow(
        &self,
        request: StartWorkflowRequest,
    ) -> Result<WorkflowHandle, EngineError>;

    /// Signal delivery by run id
    fn signaler(&self) -> Arc<dyn Signaler>;
}
