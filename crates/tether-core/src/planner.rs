// Planner contract and the scripted planner used by tests and examples

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use tether_contracts::{
    AwaitItem, Message, PlanActivityOutput, PlanInput, PlanResult, PlanResumeInput,
    ProviderErrorKind, ToolRequest,
};

/// Error surfaced by a planner implementation.
///
/// Retryable errors ride the engine's activity retry policy; fatal errors
/// finalize the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct PlannerError {
    pub message: String,
    pub provider: Option<String>,
    pub kind: Option<ProviderErrorKind>,
    pub status: Option<u16>,
    pub retryable: bool,
}

impl PlannerError {
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            provider: None,
            kind: None,
            status: None,
            retryable: false,
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            provider: None,
            kind: None,
            status: None,
            retryable: true,
        }
    }

    pub fn with_provider(
        mut self,
        provider: impl Into<String>,
        kind: ProviderErrorKind,
        status: Option<u16>,
    ) -> Self {
        self.provider = Some(provider.into());
        self.kind = Some(kind);
        self.status = status;
        self
    }
}

/// Proposes the next step of a run: a final response, a batch of tool
/// calls, or an await for external input.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan_start(&self, input: PlanInput) -> Result<PlanActivityOutput, PlannerError>;

    async fn plan_resume(
        &self,
        input: PlanResumeInput,
    ) -> Result<PlanActivityOutput, PlannerError>;
}

enum ScriptedStep {
    Output(PlanActivityOutput),
    Error(PlannerError),
}

/// Deterministic planner replaying a prepared script.
///
/// Each planning call (start or resume) consumes the next step. An
/// exhausted script fails the call, which makes runaway loops visible in
/// tests instead of silent.
pub struct ScriptedPlanner {
    steps: Mutex<VecDeque<ScriptedStep>>,
}

impl ScriptedPlanner {
    pub fn new() -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
        }
    }

    /// Queue a final response
    pub fn then_final(self, message: impl Into<String>) -> Self {
        self.push(ScriptedStep::Output(PlanActivityOutput::of(
            PlanResult::Final {
                message: Message::assistant(message),
            },
        )))
    }

    /// Queue a batch of tool calls
    pub fn then_tool_calls(self, calls: Vec<ToolRequest>) -> Self {
        self.push(ScriptedStep::Output(PlanActivityOutput::of(
            PlanResult::ToolCalls { calls },
        )))
    }

    /// Queue an await turn
    pub fn then_await(self, items: Vec<AwaitItem>, timeout_ms: Option<u64>) -> Self {
        self.push(ScriptedStep::Output(PlanActivityOutput::of(
            PlanResult::Await { items, timeout_ms },
        )))
    }

    /// Queue a fully-specified activity output (notes, thinking blocks)
    pub fn then_output(self, output: PlanActivityOutput) -> Self {
        self.push(ScriptedStep::Output(output))
    }

    /// Queue a planner failure
    pub fn then_error(self, error: PlannerError) -> Self {
        self.push(ScriptedStep::Error(error))
    }

    /// Wrap into the Arc the registration wants
    pub fn build(self) -> Arc<dyn Planner> {
        Arc::new(self)
    }

    fn push(self, step: ScriptedStep) -> Self {
        self.steps.lock().push_back(step);
        self
    }

    fn next(&self) -> Result<PlanActivityOutput, PlannerError> {
        match self.steps.lock().pop_front() {
            Some(ScriptedStep::Output(output)) => Ok(output),
            Some(ScriptedStep::Error(error)) => Err(error),
            None => Err(PlannerError::fatal("planner script exhausted")),
        }
    }
}

impl Default for ScriptedPlanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn plan_start(&self, _input: PlanInput) -> Result<PlanActivityOutput, PlannerError> {
        self.next()
    }

    async fn plan_resume(
        &self,
        _input: PlanResumeInput,
    ) -> Result<PlanActivityOutput, PlannerError> {
        self.next()
    }
}
