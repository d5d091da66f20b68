// Error types for the runtime

use thiserror::Error;

use tether_contracts::AgentId;
use tether_durable::EngineError;
use tether_storage::StoreError;

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors surfaced to callers of the runtime
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Malformed caller input (empty agent id, no messages, duplicate
    /// registration)
    #[error("validation error: {0}")]
    Validation(String),

    /// No agent registered under this id
    #[error("unknown agent: {0}")]
    UnknownAgent(AgentId),

    /// Engine-level failure
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Store-level failure
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl RuntimeError {
    pub fn validation(msg: impl Into<String>) -> Self {
        RuntimeError::Validation(msg.into())
    }
}
