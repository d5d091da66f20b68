// Run records and the per-attempt context envelope

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::{RunFailure, RunPhase};
use crate::ids::{AgentId, RunId, SessionId, ToolCallId, ToolName, TurnId};
use crate::tools::{ToolError, ToolTelemetry};

/// Metadata key under which policy decisions accumulate on a run record
pub const METADATA_POLICY_DECISIONS: &str = "policy_decisions";

/// Lifecycle status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Canceled,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

/// Persistent metadata for one execution attempt.
///
/// Created at start, mutated only through the run store, never destroyed by
/// the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub agent_id: AgentId,
    pub run_id: RunId,
    pub session_id: Option<SessionId>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Caller-provided labels, opaque to the runtime
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Runtime-owned structured metadata (see [`METADATA_POLICY_DECISIONS`])
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Run {
    /// Create a pending run record
    pub fn new(agent_id: AgentId, run_id: RunId, now: DateTime<Utc>) -> Self {
        Self {
            agent_id,
            run_id,
            session_id: None,
            status: RunStatus::Pending,
            started_at: now,
            updated_at: now,
            labels: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Attach a session
    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Attach caller labels
    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    /// Transition the status, stamping `updated_at`
    pub fn transition(&mut self, status: RunStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
    }
}

/// Per-attempt envelope threaded through planner calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    pub run_id: RunId,
    /// Monotonically increasing across resumes
    pub attempt: u32,
    /// Immutable within a turn
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Remaining time budget, human-encoded for prompt use (e.g. "42s")
    pub max_duration: Option<String>,
    pub session_id: Option<SessionId>,
    pub turn_id: TurnId,
    pub parent_tool_call_id: Option<ToolCallId>,
}

/// Role of a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One conversation message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Input to start one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInput {
    pub agent_id: AgentId,
    /// Caller-chosen run id; generated when absent
    pub run_id: Option<RunId>,
    pub session_id: Option<SessionId>,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl RunInput {
    pub fn new(agent_id: AgentId, messages: Vec<Message>) -> Self {
        Self {
            agent_id,
            run_id: None,
            session_id: None,
            messages,
            labels: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }
}

/// One tool invocation as recorded on the run output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEventRecord {
    pub tool_call_id: ToolCallId,
    pub name: ToolName,
    pub success: bool,
    pub error: Option<ToolError>,
    pub telemetry: ToolTelemetry,
}

/// Result of one completed run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutput {
    pub run_id: RunId,
    pub phase: RunPhase,
    pub final_message: Option<Message>,
    pub tool_events: Vec<ToolEventRecord>,
    pub notes: Vec<String>,
    pub failure: Option<RunFailure>,
}
