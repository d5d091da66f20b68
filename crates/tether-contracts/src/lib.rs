//! # Tether Contracts
//!
//! The shared data model of the Tether agent runtime: strong-typed
//! identifiers, run records, the planner contract, the tool contract,
//! lifecycle events, signal payloads, and the memory log entries.
//!
//! This crate is deliberately leaf-shaped: no async, no I/O, no engine
//! types. Everything here is plain data that crosses crate (and, for the
//! serializable parts, process) boundaries.

pub mod activity;
pub mod chunks;
pub mod error;
pub mod events;
pub mod ids;
pub mod memory;
pub mod plan;
pub mod run;
pub mod signals;
pub mod tools;

pub use activity::{
    PlanActivityInput, PlanActivityOutput, ThinkingSegment, ToolActivityInput, ToolInvocationMeta,
};
pub use chunks::PlannerChunk;
pub use error::ContractError;
pub use events::{
    HookEvent, HookPayload, PolicyDecisionRecord, ProviderErrorKind, RunFailure, RunPhase,
    StreamEvent, StreamFailure, WorkflowStreamStatus,
};
pub use ids::{provider_name, AgentId, RunId, SessionId, ToolCallId, ToolName, TurnId};
pub use memory::MemoryEvent;
pub use plan::{
    AwaitItem, AwaitKind, CapsState, PlanInput, PlanResult, PlanResumeInput, RunPolicy, ToolHandle,
};
pub use run::{
    Message, MessageRole, Run, RunContext, RunInput, RunOutput, RunStatus, ToolEventRecord,
    METADATA_POLICY_DECISIONS,
};
pub use signals::{
    ClarificationAnswer, ConfirmationDecision, ExternalToolResult, ExternalToolResults,
    PauseRequest, ResumeRequest,
};
pub use tools::{
    Artifact, ArtifactMode, CodecError, RetryHint, RetryReason, ServerData, ToolCodec, ToolError,
    ToolRequest, ToolResult, ToolSpec, ToolTelemetry,
};
