// Typed chunks of a streaming planner response
//
// Planner implementations surface partial output as a stream of these
// chunks. The serialized form always carries a `type` discriminator so a
// chunk can be journaled and replayed without ambiguity.

use serde::{Deserialize, Serialize};

use crate::ids::ToolName;

/// One chunk of a streaming planner response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlannerChunk {
    /// Reasoning content, possibly partial
    Thinking {
        /// Position of the block within the response
        index: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        redacted: Option<Vec<u8>>,
        #[serde(rename = "final")]
        is_final: bool,
    },
    /// Assistant-visible text delta
    Text { text: String },
    /// A tool invocation the planner wants executed
    ToolUse {
        id: String,
        name: ToolName,
        payload: serde_json::Value,
    },
    /// A tool result echoed back into the stream
    ToolResult { id: String, result: serde_json::Value },
    /// End of stream
    Stop {
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discriminator_is_always_present() {
        let chunk = PlannerChunk::Stop { reason: None };
        let json = serde_json::to_string(&chunk).unwrap();
        assert!(json.contains("\"type\":\"stop\""));

        let chunk = PlannerChunk::Text { text: "hi".into() };
        let json = serde_json::to_string(&chunk).unwrap();
        assert!(json.contains("\"type\":\"text\""));
    }

    #[test]
    fn test_thinking_round_trip_preserves_all_fields() {
        let chunk = PlannerChunk::Thinking {
            index: 2,
            text: Some("partial reasoning".into()),
            signature: Some("sig-abc".into()),
            redacted: Some(vec![0x01, 0x02, 0xff]),
            is_final: true,
        };

        let json = serde_json::to_string(&chunk).unwrap();
        let parsed: PlannerChunk = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, chunk);
    }

    #[test]
    fn test_thinking_final_flag_serialized_as_final() {
        let chunk = PlannerChunk::Thinking {
            index: 0,
            text: None,
            signature: None,
            redacted: None,
            is_final: false,
        };
        let json = serde_json::to_string(&chunk).unwrap();
        assert!(json.contains("\"final\":false"));
    }

    #[test]
    fn test_tool_use_round_trip() {
        let chunk = PlannerChunk::ToolUse {
            id: "call_1".into(),
            name: ToolName::parse("svc.ts.search").unwrap(),
            payload: serde_json::json!({"q": "x"}),
        };

        let json = serde_json::to_string(&chunk).unwrap();
        let parsed: PlannerChunk = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, chunk);
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        let err = serde_json::from_str::<PlannerChunk>(r#"{"type":"bogus"}"#);
        assert!(err.is_err());
    }
}
