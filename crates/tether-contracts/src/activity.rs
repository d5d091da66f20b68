// Payloads crossing the activity boundary
//
// Everything here is serializable: activity inputs and outputs are
// journaled by the engine so a replayed workflow observes recorded
// outcomes instead of re-running side effects.

use serde::{Deserialize, Serialize};

use crate::ids::{RunId, SessionId, ToolCallId, TurnId};
use crate::plan::{PlanInput, PlanResult, PlanResumeInput};
use crate::tools::ToolRequest;

/// Input to the planner activity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlanActivityInput {
    /// First planning call of a run
    Start { input: PlanInput },
    /// Planning call after tool results or an await turn
    Resume { input: PlanResumeInput },
}

/// One reasoning block surfaced by the planner activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThinkingSegment {
    pub index: u32,
    pub text: Option<String>,
    pub signature: Option<String>,
    #[serde(rename = "final")]
    pub is_final: bool,
}

/// Output of the planner activity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanActivityOutput {
    pub result: PlanResult,
    /// Free-form notes the planner wants surfaced as events
    #[serde(default)]
    pub notes: Vec<String>,
    /// Reasoning blocks surfaced for streaming
    #[serde(default)]
    pub thinking: Vec<ThinkingSegment>,
}

impl PlanActivityOutput {
    pub fn of(result: PlanResult) -> Self {
        Self {
            result,
            notes: Vec::new(),
            thinking: Vec::new(),
        }
    }
}

/// Correlation metadata for one tool invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocationMeta {
    pub run_id: RunId,
    pub session_id: Option<SessionId>,
    pub turn_id: TurnId,
    pub tool_call_id: ToolCallId,
    pub parent_tool_call_id: Option<ToolCallId>,
    pub attempt: u32,
}

/// Input to the tool activity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolActivityInput {
    pub meta: ToolInvocationMeta,
    pub request: ToolRequest,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{CapsState, PlanResumeInput};
    use crate::run::RunContext;
    use std::collections::BTreeMap;

    #[test]
    fn test_plan_activity_input_tagged() {
        let input = PlanActivityInput::Resume {
            input: PlanResumeInput {
                context: RunContext {
                    run_id: RunId::new("r1"),
                    attempt: 1,
                    labels: BTreeMap::new(),
                    max_duration: None,
                    session_id: None,
                    turn_id: TurnId::new("t2"),
                    parent_tool_call_id: None,
                },
                results: vec![],
                allowed_tools: vec![],
                caps: CapsState {
                    remaining_tool_calls: 2,
                    consecutive_failed_turns: 0,
                },
                retry_hint: None,
                finalize_reason: Some("await_timeout".into()),
            },
        };

        let json = serde_json::to_string(&input).unwrap();
        assert!(json.contains("\"type\":\"resume\""));
        assert!(json.contains("await_timeout"));
    }
}
