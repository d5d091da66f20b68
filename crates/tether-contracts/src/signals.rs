// Typed payloads delivered to running workflows as signals

use serde::{Deserialize, Serialize};

use crate::ids::{RunId, ToolCallId};
use crate::tools::ToolError;

/// Ask a running workflow to pause at its next loop iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PauseRequest {
    pub run_id: RunId,
    pub reason: Option<String>,
    /// Auto-resume after this many milliseconds if no resume arrives
    pub max_pause_ms: Option<u64>,
}

impl PauseRequest {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            reason: None,
            max_pause_ms: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Resume a paused workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeRequest {
    pub run_id: RunId,
    pub reason: Option<String>,
}

impl ResumeRequest {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Answer to a clarification await item, matched by item id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationAnswer {
    pub run_id: RunId,
    pub item_id: String,
    pub answer: serde_json::Value,
}

/// Result of one externally-executed tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalToolResult {
    pub tool_call_id: ToolCallId,
    pub result: Option<serde_json::Value>,
    pub error: Option<ToolError>,
}

/// Batch of externally-executed tool results for an await turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalToolResults {
    pub run_id: RunId,
    pub results: Vec<ExternalToolResult>,
}

/// Human decision on a confirmation await item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationDecision {
    pub run_id: RunId,
    pub item_id: String,
    pub approved: bool,
    pub comment: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pause_request_builder() {
        let req = PauseRequest::new(RunId::new("r1")).with_reason("human_review");
        assert_eq!(req.reason.as_deref(), Some("human_review"));
        assert!(req.max_pause_ms.is_none());
    }

    #[test]
    fn test_external_tool_results_round_trip() {
        let batch = ExternalToolResults {
            run_id: RunId::new("r1"),
            results: vec![ExternalToolResult {
                tool_call_id: ToolCallId::new("c1"),
                result: Some(serde_json::json!({"ok": true})),
                error: None,
            }],
        };

        let json = serde_json::to_string(&batch).unwrap();
        let parsed: ExternalToolResults = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, batch);
    }
}
