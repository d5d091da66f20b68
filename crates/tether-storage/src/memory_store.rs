// Memory store: append-only event log per (agent, run)

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use tether_contracts::{AgentId, MemoryEvent, RunId};

use crate::StoreError;

/// Append-only run memory
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Append events to the log for (agent, run)
    async fn append(
        &self,
        agent_id: &AgentId,
        run_id: &RunId,
        events: Vec<MemoryEvent>,
    ) -> Result<(), StoreError>;

    /// Snapshot of the log, isolated from later mutation
    async fn load_run(
        &self,
        agent_id: &AgentId,
        run_id: &RunId,
    ) -> Result<Vec<MemoryEvent>, StoreError>;
}

/// In-memory memory store
#[derive(Clone, Default)]
pub struct InMemoryMemoryStore {
    logs: Arc<RwLock<HashMap<(AgentId, RunId), Vec<MemoryEvent>>>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn append(
        &self,
        agent_id: &AgentId,
        run_id: &RunId,
        events: Vec<MemoryEvent>,
    ) -> Result<(), StoreError> {
        if events.is_empty() {
            return Ok(());
        }
        self.logs
            .write()
            .await
            .entry((agent_id.clone(), run_id.clone()))
            .or_default()
            .extend(events);
        Ok(())
    }

    async fn load_run(
        &self,
        agent_id: &AgentId,
        run_id: &RunId,
    ) -> Result<Vec<MemoryEvent>, StoreError> {
        Ok(self
            .logs
            .read()
            .await
            .get(&(agent_id.clone(), run_id.clone()))
            .cloned()
            .unwrap_or_default())
    }
}
