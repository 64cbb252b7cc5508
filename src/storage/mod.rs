//! Result persistence
//!
//! The orchestrator writes one immutable [`RunResult`] per run through the
//! [`ResultStore`] trait; [`Database`] is the SQLite implementation.

pub mod database;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::orchestrator::RunResult;
use crate::types::{Result, RunId};

pub use database::{Database, PoolConfig, SharedDatabase};

/// Listing row for persisted runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub final_state: String,
    pub failure_reason: Option<String>,
    /// RFC 3339
    pub completed_at: String,
}

/// Where finished runs go
pub trait ResultStore: Send + Sync {
    /// Persist a result. A second save for the same run id is rejected.
    fn save(&self, result: &RunResult) -> Result<()>;

    fn load(&self, run_id: &RunId) -> Result<Option<RunResult>>;

    /// Most recently completed first
    fn list(&self, limit: usize) -> Result<Vec<RunSummary>>;
}

pub type SharedResultStore = Arc<dyn ResultStore>;
