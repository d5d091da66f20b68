// Append-only memory log entries, one list per (agent, run)

use serde::{Deserialize, Serialize};

use crate::events::PolicyDecisionRecord;
use crate::ids::{ToolCallId, ToolName};
use crate::plan::AwaitKind;
use crate::run::Message;
use crate::tools::ToolError;

/// One entry in a run's memory log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MemoryEvent {
    ToolCall {
        tool_call_id: ToolCallId,
        name: ToolName,
        payload: serde_json::Value,
        parent_tool_call_id: Option<ToolCallId>,
    },
    ToolResult {
        tool_call_id: ToolCallId,
        name: ToolName,
        success: bool,
        result: Option<serde_json::Value>,
        error: Option<ToolError>,
    },
    PlannerNote {
        text: String,
    },
    AssistantMessage {
        message: Message,
    },
    PolicyDecision {
        record: PolicyDecisionRecord,
    },
    AwaitResolved {
        item_id: String,
        kind: AwaitKind,
        timed_out: bool,
    },
}
