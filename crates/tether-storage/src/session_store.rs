// Session store: optional grouping of runs

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use tether_contracts::{AgentId, SessionId};

use crate::StoreError;

/// One session record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub agent_id: AgentId,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(session_id: SessionId, agent_id: AgentId, now: DateTime<Utc>) -> Self {
        Self {
            session_id,
            agent_id,
            labels: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Persistence of session records
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn upsert(&self, session: Session) -> Result<(), StoreError>;

    /// Load a record; defensive copy semantics match the run store
    async fn load(&self, session_id: &SessionId) -> Result<Option<Session>, StoreError>;
}

/// In-memory session store
#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<SessionId, Session>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn upsert(&self, session: Session) -> Result<(), StoreError> {
        self.sessions
            .write()
            .await
            .insert(session.session_id.clone(), session);
        Ok(())
    }

    async fn load(&self, session_id: &SessionId) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_then_load() {
        let store = InMemorySessionStore::new();
        let session = Session::new(
            SessionId::new("s1"),
            AgentId::new("svc.agent"),
            Utc::now(),
        );
        store.upsert(session).await.unwrap();

        let loaded = store.load(&SessionId::new("s1")).await.unwrap().unwrap();
        assert_eq!(loaded.agent_id.as_str(), "svc.agent");
    }

    #[tokio::test]
    async fn test_load_returns_defensive_copy() {
        let store = InMemorySessionStore::new();
        let mut session = Session::new(
            SessionId::new("s1"),
            AgentId::new("svc.agent"),
            Utc::now(),
        );
        session.labels.insert("env".into(), "prod".into());
        store.upsert(session).await.unwrap();

        let mut first = store.load(&SessionId::new("s1")).await.unwrap().unwrap();
        first.labels.insert("env".into(), "mutated".into());

        let second = store.load(&SessionId::new("s1")).await.unwrap().unwrap();
        assert_eq!(second.labels["env"], "prod");
    }
}
