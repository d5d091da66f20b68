// Validation errors for contract types

use thiserror::Error;

/// Errors raised while constructing or parsing contract values
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractError {
    /// Identifier was empty or whitespace-only
    #[error("identifier must not be empty")]
    EmptyIdentifier,

    /// Tool name did not match the `<service>.<toolset>.<tool>` form
    #[error("invalid tool name: {0}")]
    InvalidToolName(String),
}
