//! Activity journal
//!
//! Every activity outcome is recorded under its deterministic activity id.
//! When a run is started again with the same run id (process restart,
//! retry of the hosting worker), activity calls find their recorded
//! outcome and return it without re-running the side effect. This is the
//! seam a durable engine persists; the in-memory journal backs the
//! reference engine.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use tether_contracts::{PlanActivityOutput, RunId, ToolResult};

use crate::activity::ActivityError;

/// A journaled activity outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RecordedOutcome {
    Planner(Result<PlanActivityOutput, ActivityError>),
    Tool(Result<ToolResult, ActivityError>),
    Hook(Result<(), ActivityError>),
}

/// Store of journaled activity outcomes per run
#[async_trait]
pub trait Journal: Send + Sync {
    /// Recorded outcome for the given activity id, if any
    async fn lookup(&self, run_id: &RunId, activity_id: &str) -> Option<RecordedOutcome>;

    /// Record the outcome of a finished activity
    async fn record(&self, run_id: &RunId, activity_id: &str, outcome: RecordedOutcome);

    /// Drop all entries for a run
    async fn forget(&self, run_id: &RunId);
}

/// In-memory journal backing the in-process engine
#[derive(Default)]
pub struct InMemoryJournal {
    entries: DashMap<String, HashMap<String, RecordedOutcome>>,
}

impl InMemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Journal for InMemoryJournal {
    async fn lookup(&self, run_id: &RunId, activity_id: &str) -> Option<RecordedOutcome> {
        self.entries
            .get(run_id.as_str())
            .and_then(|run| run.get(activity_id).cloned())
    }

    async fn record(&self, run_id: &RunId, activity_id: &str, outcome: RecordedOutcome) {
        self.entries
            .entry(run_id.as_str().to_string())
            .or_default()
            .insert(activity_id.to_string(), outcome);
    }

    async fn forget(&self, run_id: &RunId) {
        self.entries.remove(run_id.as_str());
    }
}
