// Lifecycle events
//
// HookEvent is the internal notification published by the run loop to
// in-process subscribers; StreamEvent is the UI-facing projection a
// subscriber derives from the hook stream. Per run, both preserve
// emission order.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AgentId, RunId, SessionId, ToolCallId, ToolName};
use crate::plan::CapsState;
use crate::run::Message;
use crate::tools::{RetryHint, ToolError};

/// Phase of a run as observed on the event stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Starting,
    Planning,
    ExecutingTools,
    Awaiting,
    Paused,
    Finalizing,
    Completed,
    Failed,
    Canceled,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Planning => "planning",
            Self::ExecutingTools => "executing_tools",
            Self::Awaiting => "awaiting",
            Self::Paused => "paused",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// Provider-originated error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    RateLimited,
    DeadlineExceeded,
    InvalidRequest,
    Unavailable,
    Unauthorized,
    Internal,
}

/// Terminal failure detail carried on RunCompleted and the Workflow stream
/// event. The public message is safe to show end users; the debug message
/// is for operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    pub public_message: String,
    pub debug_message: String,
    pub provider: Option<String>,
    pub kind: Option<ProviderErrorKind>,
    pub status: Option<u16>,
    pub retryable: bool,
}

impl RunFailure {
    pub fn new(public: impl Into<String>, debug: impl Into<String>) -> Self {
        Self {
            public_message: public.into(),
            debug_message: debug.into(),
            provider: None,
            kind: None,
            status: None,
            retryable: false,
        }
    }

    pub fn with_provider(
        mut self,
        provider: impl Into<String>,
        kind: ProviderErrorKind,
        status: Option<u16>,
        retryable: bool,
    ) -> Self {
        self.provider = Some(provider.into());
        self.kind = Some(kind);
        self.status = status;
        self.retryable = retryable;
        self
    }
}

/// One policy decision as persisted under the run's metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecisionRecord {
    pub timestamp: DateTime<Utc>,
    pub allowed_tools: Vec<ToolName>,
    pub caps: CapsState,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Variant-specific payload of a hook event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HookPayload {
    RunStarted,
    RunCompleted {
        phase: RunPhase,
        failure: Option<RunFailure>,
    },
    RunPhaseChanged {
        phase: RunPhase,
    },
    RunPaused {
        reason: Option<String>,
    },
    RunResumed {
        reason: Option<String>,
    },
    ToolCallScheduled {
        tool_call_id: ToolCallId,
        name: ToolName,
        payload: serde_json::Value,
        parent_tool_call_id: Option<ToolCallId>,
    },
    ToolCallUpdated {
        tool_call_id: ToolCallId,
        expected_children_total: usize,
    },
    ToolResultReceived {
        tool_call_id: ToolCallId,
        name: ToolName,
        success: bool,
        result: Option<serde_json::Value>,
        error: Option<ToolError>,
        retry_hint: Option<RetryHint>,
    },
    PlannerNote {
        text: String,
    },
    ThinkingBlock {
        index: u32,
        text: Option<String>,
        signature: Option<String>,
        #[serde(rename = "final")]
        is_final: bool,
    },
    AssistantMessage {
        message: Message,
    },
    RetryHintIssued {
        tool_call_id: Option<ToolCallId>,
        hint: RetryHint,
    },
    MemoryAppended {
        count: usize,
    },
    PolicyDecision {
        record: PolicyDecisionRecord,
    },
    AgentRunStarted {
        child_run_id: RunId,
        child_agent_id: AgentId,
        parent_tool_call_id: ToolCallId,
    },
}

/// A lifecycle notification published during run execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookEvent {
    pub run_id: RunId,
    pub agent_id: AgentId,
    pub session_id: Option<SessionId>,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: HookPayload,
}

impl HookEvent {
    pub fn new(
        run_id: RunId,
        agent_id: AgentId,
        session_id: Option<SessionId>,
        timestamp: DateTime<Utc>,
        payload: HookPayload,
    ) -> Self {
        Self {
            run_id,
            agent_id,
            session_id,
            timestamp,
            payload,
        }
    }
}

/// Status attached to Workflow stream events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStreamStatus {
    Running,
    Succeeded,
    Failed,
    Canceled,
}

/// Failure projection on the Workflow stream event.
///
/// Cancellation keeps the debug message but omits the public one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamFailure {
    pub message: Option<String>,
    pub debug_message: String,
    pub provider: Option<String>,
    pub kind: Option<ProviderErrorKind>,
    pub retryable: bool,
}

/// UI-facing projection of the hook stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    AssistantReply {
        run_id: RunId,
        text: String,
    },
    PlannerThought {
        run_id: RunId,
        index: u32,
        /// Full text of a final block
        text: Option<String>,
        /// Partial text of a non-final block
        delta: Option<String>,
        signature: Option<String>,
        #[serde(rename = "final")]
        is_final: bool,
    },
    ToolStart {
        run_id: RunId,
        tool_call_id: ToolCallId,
        name: ToolName,
    },
    ToolUpdate {
        run_id: RunId,
        tool_call_id: ToolCallId,
        expected_children_total: usize,
    },
    ToolEnd {
        run_id: RunId,
        tool_call_id: ToolCallId,
        name: ToolName,
        success: bool,
        error: Option<String>,
    },
    Workflow {
        run_id: RunId,
        phase: RunPhase,
        status: WorkflowStreamStatus,
        failure: Option<StreamFailure>,
    },
    AgentRunStarted {
        run_id: RunId,
        child_run_id: RunId,
        child_agent_id: AgentId,
        parent_tool_call_id: ToolCallId,
    },
}

impl StreamEvent {
    /// The run the event belongs to
    pub fn run_id(&self) -> &RunId {
        match self {
            Self::AssistantReply { run_id, .. }
            | Self::PlannerThought { run_id, .. }
            | Self::ToolStart { run_id, .. }
            | Self::ToolUpdate { run_id, .. }
            | Self::ToolEnd { run_id, .. }
            | Self::Workflow { run_id, .. }
            | Self::AgentRunStarted { run_id, .. } => run_id,
        }
    }
}
