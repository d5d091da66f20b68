//! Activity layer: errors, execution options, and typed activity handlers
//!
//! Activities are the only place side effects happen. There is one handler
//! type per activity category (planner, tool, hook) so outputs stay typed
//! end to end; no reflection, no dynamic result assignment.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use tether_contracts::{HookEvent, PlanActivityInput, PlanActivityOutput, ToolActivityInput, ToolResult};

use crate::retry::RetryPolicy;

/// Error type for activity failures
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityError {
    /// Error message
    pub message: String,

    /// Error kind for programmatic handling (e.g. `deadline_exceeded`)
    pub kind: Option<String>,

    /// Whether the engine may retry this failure
    pub retryable: bool,

    /// Additional detail for debugging
    pub details: Option<serde_json::Value>,
}

impl ActivityError {
    /// Create a retryable error
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: None,
            retryable: true,
            details: None,
        }
    }

    /// Create a non-retryable error
    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: None,
            retryable: false,
            details: None,
        }
    }

    /// Set the error kind
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Attach debugging detail
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Error used when an activity exceeds its start-to-close timeout
    pub fn deadline_exceeded(timeout: Duration) -> Self {
        Self::retryable(format!("activity exceeded {}ms timeout", timeout.as_millis()))
            .with_kind("deadline_exceeded")
    }

    /// Error used when the hosting scope was canceled
    pub fn canceled() -> Self {
        Self::non_retryable("activity canceled").with_kind("canceled")
    }
}

impl std::fmt::Display for ActivityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ActivityError {}

/// Options for activity execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityOptions {
    /// Retry policy applied to retryable failures
    pub retry_policy: RetryPolicy,

    /// Maximum time for one execution attempt
    #[serde(with = "duration_millis")]
    pub start_to_close_timeout: Duration,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            start_to_close_timeout: Duration::from_secs(300),
        }
    }
}

impl ActivityOptions {
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_start_to_close_timeout(mut self, timeout: Duration) -> Self {
        self.start_to_close_timeout = timeout;
        self
    }
}

/// Handler for the planner activity
pub type PlannerActivityFn = Arc<
    dyn Fn(PlanActivityInput) -> BoxFuture<'static, Result<PlanActivityOutput, ActivityError>>
        + Send
        + Sync,
>;

/// Handler for the tool-execution activity
pub type ToolActivityFn = Arc<
    dyn Fn(ToolActivityInput) -> BoxFuture<'static, Result<ToolResult, ActivityError>>
        + Send
        + Sync,
>;

/// Handler for the hook-publishing activity
pub type HookActivityFn =
    Arc<dyn Fn(HookEvent) -> BoxFuture<'static, Result<(), ActivityError>> + Send + Sync>;

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_error() {
        let error = ActivityError::retryable("timeout");
        assert!(error.retryable);
        assert_eq!(error.to_string(), "timeout");
    }

    #[test]
    fn test_non_retryable_error() {
        let error = ActivityError::non_retryable("invalid input");
        assert!(!error.retryable);
    }

    #[test]
    fn test_deadline_error_kind() {
        let error = ActivityError::deadline_exceeded(Duration::from_millis(1500));
        assert!(error.retryable);
        assert_eq!(error.kind.as_deref(), Some("deadline_exceeded"));
        assert!(error.message.contains("1500"));
    }

    #[test]
    fn test_error_serialization() {
        let error = ActivityError::retryable("boom")
            .with_kind("test")
            .with_details(serde_json::json!({"attempt": 2}));

        let json = serde_json::to_string(&error).unwrap();
        let parsed: ActivityError = serde_json::from_str(&json).unwrap();
        assert_eq!(error, parsed);
    }

    #[test]
    fn test_options_builders() {
        let options = ActivityOptions::default()
            .with_retry(RetryPolicy::no_retry())
            .with_start_to_close_timeout(Duration::from_secs(10));

        assert_eq!(options.retry_policy.max_attempts, 1);
        assert_eq!(options.start_to_close_timeout, Duration::from_secs(10));
    }
}
