//! # Tether Storage
//!
//! The three store interfaces the runtime persists through, with
//! in-memory reference implementations:
//!
//! - [`RunStore`]: run metadata, one record per run id
//! - [`MemoryStore`]: append-only event log per (agent, run)
//! - [`SessionStore`]: optional session grouping
//!
//! Loads return defensive copies: callers mutating a returned record never
//! affect the stored one. A persistent backend can be swapped in behind
//! the same traits.

mod memory_store;
mod run_store;
mod session_store;

pub use memory_store::{InMemoryMemoryStore, MemoryStore};
pub use run_store::{InMemoryRunStore, RunStore};
pub use session_store::{InMemorySessionStore, Session, SessionStore};

use thiserror::Error;

/// Error type for store operations
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Record not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Backend failure
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Serialization failure
    #[error("serialization error: {0}")]
    Serialization(String),
}
