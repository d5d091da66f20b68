// Tool contract: requests, results, errors, retry hints, specs, codecs
//
// Payloads, results, and artifacts travel as opaque JSON values; the
// runtime never interprets their contents, only passes them through the
// codecs declared on the tool spec.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{AgentId, ToolCallId, ToolName};

/// One requested tool invocation from the planner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    pub name: ToolName,
    pub payload: serde_json::Value,
    /// Optional planner-side correlation id, echoed back on results
    pub correlation_id: Option<String>,
}

impl ToolRequest {
    pub fn new(name: ToolName, payload: serde_json::Value) -> Self {
        Self {
            name,
            payload,
            correlation_id: None,
        }
    }

    pub fn with_correlation(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }
}

/// Structured, chainable tool error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<ToolError>>,
}

impl ToolError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    /// Attach an underlying cause
    pub fn with_cause(mut self, cause: ToolError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Iterate the cause chain, outermost first
    pub fn chain(&self) -> impl Iterator<Item = &ToolError> {
        std::iter::successors(Some(self), |e| e.cause.as_deref())
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ToolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|c| c as &(dyn std::error::Error + 'static))
    }
}

/// Reason code attached to a retry hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryReason {
    ToolUnavailable,
    PolicyDenied,
    RateLimited,
    InvalidPayload,
    Other,
}

/// Guidance a failing tool hands the next planning turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryHint {
    pub reason: RetryReason,
    /// Tool the hint refers to
    pub tool: Option<ToolName>,
    /// When set, the next turn should only be offered this tool
    #[serde(default)]
    pub restrict_to_tool: bool,
    pub message: Option<String>,
}

impl RetryHint {
    pub fn new(reason: RetryReason) -> Self {
        Self {
            reason,
            tool: None,
            restrict_to_tool: false,
            message: None,
        }
    }

    pub fn for_tool(mut self, tool: ToolName) -> Self {
        self.tool = Some(tool);
        self
    }

    pub fn restricting(mut self) -> Self {
        self.restrict_to_tool = true;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Execution telemetry carried on every tool result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolTelemetry {
    pub duration_ms: u64,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub model: Option<String>,
    #[serde(default)]
    pub extras: BTreeMap<String, serde_json::Value>,
}

impl ToolTelemetry {
    /// Fold another telemetry record into this one (agent-as-tool rollup)
    pub fn merge(&mut self, other: &ToolTelemetry) {
        self.duration_ms += other.duration_ms;
        self.input_tokens = sum_opt(self.input_tokens, other.input_tokens);
        self.output_tokens = sum_opt(self.output_tokens, other.output_tokens);
        if self.model.is_none() {
            self.model = other.model.clone();
        }
        for (k, v) in &other.extras {
            self.extras.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
}

fn sum_opt(a: Option<u32>, b: Option<u32>) -> Option<u32> {
    match (a, b) {
        (None, None) => None,
        (x, y) => Some(x.unwrap_or(0) + y.unwrap_or(0)),
    }
}

/// Kind-tagged blob produced by a tool but never sent to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: String,
    pub data: serde_json::Value,
}

/// Outcome of one tool invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: ToolCallId,
    pub name: ToolName,
    pub result: Option<serde_json::Value>,
    pub error: Option<ToolError>,
    pub retry_hint: Option<RetryHint>,
    #[serde(default)]
    pub telemetry: ToolTelemetry,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
}

impl ToolResult {
    /// Successful result carrying a value
    pub fn ok(tool_call_id: ToolCallId, name: ToolName, result: serde_json::Value) -> Self {
        Self {
            tool_call_id,
            name,
            result: Some(result),
            error: None,
            retry_hint: None,
            telemetry: ToolTelemetry::default(),
            artifacts: Vec::new(),
        }
    }

    /// Failed result carrying a structured error
    pub fn err(tool_call_id: ToolCallId, name: ToolName, error: ToolError) -> Self {
        Self {
            tool_call_id,
            name,
            result: None,
            error: Some(error),
            retry_hint: None,
            telemetry: ToolTelemetry::default(),
            artifacts: Vec::new(),
        }
    }

    pub fn with_hint(mut self, hint: RetryHint) -> Self {
        self.retry_hint = Some(hint);
        self
    }

    pub fn with_telemetry(mut self, telemetry: ToolTelemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Codec failure while encoding or decoding an opaque payload
#[derive(Debug, Clone, Error)]
#[error("codec error: {0}")]
pub struct CodecError(pub String);

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        Self(err.to_string())
    }
}

type EncodeFn = Arc<dyn Fn(&serde_json::Value) -> Result<Vec<u8>, CodecError> + Send + Sync>;
type DecodeFn = Arc<dyn Fn(&[u8]) -> Result<serde_json::Value, CodecError> + Send + Sync>;

/// Encode/decode pair for one opaque payload kind.
///
/// The runtime treats payloads as opaque; specs declare how they become
/// canonical JSON bytes at the wire boundary.
#[derive(Clone)]
pub struct ToolCodec {
    encode: EncodeFn,
    decode: DecodeFn,
}

impl ToolCodec {
    pub fn new(encode: EncodeFn, decode: DecodeFn) -> Self {
        Self { encode, decode }
    }

    /// Canonical JSON pass-through codec
    pub fn json() -> Self {
        Self {
            encode: Arc::new(|value| Ok(serde_json::to_vec(value)?)),
            decode: Arc::new(|bytes| Ok(serde_json::from_slice(bytes)?)),
        }
    }

    pub fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, CodecError> {
        (self.encode)(value)
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<serde_json::Value, CodecError> {
        (self.decode)(bytes)
    }
}

impl fmt::Debug for ToolCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ToolCodec")
    }
}

/// Whether a declared server-data artifact must be encodable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactMode {
    Required,
    Optional,
}

/// Typed artifact declaration on a tool spec
#[derive(Debug, Clone)]
pub struct ServerData {
    /// Absent codec is fatal for Required artifacts, a no-op for Optional
    pub codec: Option<ToolCodec>,
    pub mode: ArtifactMode,
}

/// Static metadata for one registered tool
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: ToolName,
    pub description: String,
    pub tags: Vec<String>,
    pub payload_codec: ToolCodec,
    pub result_codec: ToolCodec,
    pub server_data: Option<ServerData>,
    /// When set, invoking this tool runs the named agent inline
    pub agent_tool: Option<AgentId>,
}

impl ToolSpec {
    pub fn new(name: ToolName, description: impl Into<String>) -> Self {
        Self {
            name,
            description: description.into(),
            tags: Vec::new(),
            payload_codec: ToolCodec::json(),
            result_codec: ToolCodec::json(),
            server_data: None,
            agent_tool: None,
        }
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_server_data(mut self, codec: Option<ToolCodec>, mode: ArtifactMode) -> Self {
        self.server_data = Some(ServerData { codec, mode });
        self
    }

    pub fn as_agent_tool(mut self, agent_id: AgentId) -> Self {
        self.agent_tool = Some(agent_id);
        self
    }

    pub fn is_agent_tool(&self) -> bool {
        self.agent_tool.is_some()
    }
}
