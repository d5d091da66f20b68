// Run store: one metadata record per run id

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use tether_contracts::{Run, RunId};

use crate::StoreError;

/// Persistence of run metadata
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert or replace the record for `run.run_id`
    async fn upsert(&self, run: Run) -> Result<(), StoreError>;

    /// Load a record. Returns a defensive copy: mutating the returned
    /// labels or metadata must not affect a subsequent load.
    async fn load(&self, run_id: &RunId) -> Result<Option<Run>, StoreError>;
}

/// In-memory run store
#[derive(Clone, Default)]
pub struct InMemoryRunStore {
    runs: Arc<RwLock<HashMap<RunId, Run>>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn upsert(&self, run: Run) -> Result<(), StoreError> {
        self.runs.write().await.insert(run.run_id.clone(), run);
        Ok(())
    }

    async fn load(&self, run_id: &RunId) -> Result<Option<Run>, StoreError> {
        Ok(self.runs.read().await.get(run_id).cloned())
    }
}
