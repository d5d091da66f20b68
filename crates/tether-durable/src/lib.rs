//! # Workflow Engine Abstraction
//!
//! The contract a durable workflow engine must satisfy for the Tether run
//! loop, plus the in-process reference engine used by tests and examples.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Run Loop                              │
//! │   (plan/execute/await/finalize, written against the          │
//! │    WorkflowContext trait only)                               │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     WorkflowContext                          │
//! │  (activities, typed signal receivers, timers, child runs)   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              InProcessEngine  /  durable engine              │
//! │  (activity retry + timeout, journaled outcomes, signals)    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Operations producing external effects (activities, child workflows)
//! are journaled: on replay the engine returns the recorded outcome
//! without re-running side effects. Hook publication is itself an
//! activity precisely so subscriber I/O stays off the deterministic
//! workflow thread.

pub mod activity;
pub mod inprocess;
pub mod journal;
pub mod retry;
pub mod signal;
pub mod workflow;

/// Prelude for common imports
pub mod prelude {
    pub use crate::activity::{
        ActivityError, ActivityOptions, HookActivityFn, PlannerActivityFn, ToolActivityFn,
    };
    pub use crate::inprocess::InProcessEngine;
    pub use crate::journal::{InMemoryJournal, Journal, RecordedOutcome};
    pub use crate::retry::RetryPolicy;
    pub use crate::signal::{Signal, SignalError, SignalReceiver};
    pub use crate::workflow::{
        CancelScope, EngineError, PlannerActivityCall, Signaler, StartWorkflowRequest,
        TimerFuture, ToolActivityCall, ToolOutputFuture, WorkflowContext, WorkflowDefinition,
        WorkflowEngine, WorkflowError, WorkflowHandle,
    };
}

pub use activity::{
    ActivityError, ActivityOptions, HookActivityFn, PlannerActivityFn, ToolActivityFn,
};
pub use inprocess::InProcessEngine;
pub use journal::{InMemoryJournal, Journal, RecordedOutcome};
pub use retry::RetryPolicy;
pub use signal::{Signal, SignalError, SignalHub, SignalReceiver};
// Cancellation tokens appear in the WorkflowContext surface; re-exported
// so consumers do not need their own tokio-util dependency.
pub use tokio_util::sync::CancellationToken;
pub use workflow::{
    CancelScope, EngineError, PlannerActivityCall, Signaler, StartWorkflowRequest, TimerFuture,
    ToolActivityCall, ToolOutputFuture, WorkflowContext, WorkflowDefinition, WorkflowEngine,
    WorkflowError, WorkflowHandle,
};
