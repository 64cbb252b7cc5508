//! Database Layer with Connection Pooling
//!
//! SQLite result store featuring:
//! - Connection pooling via r2d2 for concurrent access
//! - Panic-safe transactions with automatic rollback
//! - Version-tracked migrations
//! - WAL mode for concurrent readers while a run finalizes

use std::path::Path;
use std::sync::Arc;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};

use super::{ResultStore, RunSummary};
use crate::orchestrator::RunResult;
use crate::types::{Result, ResultExt, RunId, ThreatError};

/// Shared database handle for async contexts.
pub type SharedDatabase = Arc<Database>;

const SCHEMA: &str = include_str!("schema.sql");

/// Current schema version for migration tracking
const SCHEMA_VERSION: u32 = 2;

struct Migration {
    version: u32,
    description: &'static str,
    up: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Add final_state index",
        up: "CREATE INDEX IF NOT EXISTS idx_run_results_final_state ON run_results (final_state)",
    },
    Migration {
        version: 2,
        description: "Add WAL checkpoint settings",
        up: "PRAGMA wal_autocheckpoint = 1000",
    },
];

/// Connection pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_size: u32,
    pub min_idle: u32,
    /// Timeout for acquiring a connection (seconds)
    pub connection_timeout_secs: u64,
}

impl PoolConfig {
    const MIN_POOL_SIZE: u32 = 2;
    const MAX_POOL_SIZE: u32 = 16;

    /// One connection per core, within bounds. Writes are rare (one per
    /// finished run), so the pool mostly serves `result` and `runs` readers.
    pub fn optimal_pool_size() -> u32 {
        let cores = std::thread::available_parallelism()
            .map(|p| p.get() as u32)
            .unwrap_or(4);
        cores.clamp(Self::MIN_POOL_SIZE, Self::MAX_POOL_SIZE)
    }

    pub fn auto() -> Self {
        let max_size = Self::optimal_pool_size();
        Self {
            max_size,
            min_idle: (max_size / 4).max(1),
            connection_timeout_secs: 30,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::auto()
    }
}

/// Thread-safe database with connection pooling.
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Open (creating parent directories) and initialize the schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, PoolConfig::default())
    }

    pub fn open_with_config<P: AsRef<Path>>(path: P, config: PoolConfig) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let manager = SqliteConnectionManager::file(path).with_init(Self::configure_connection);

        let pool = Pool::builder()
            .max_size(config.max_size)
            .min_idle(Some(config.min_idle))
            .connection_timeout(std::time::Duration::from_secs(
                config.connection_timeout_secs,
            ))
            .build(manager)
            .map_err(|e| ThreatError::Storage(format!("Failed to create connection pool: {}", e)))?;

        let db = Self { pool };
        db.initialize()?;
        Ok(db)
    }

    /// In-memory database for tests and throwaway runs.
    pub fn open_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();

        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| ThreatError::Storage(format!("Failed to create in-memory pool: {}", e)))?;

        let db = Self { pool };
        db.initialize()?;
        Ok(db)
    }

    fn configure_connection(conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| {
            ThreatError::Storage(format!("Failed to acquire database connection: {}", e))
        })
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.conn()?;
        let current_version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        conn.execute_batch(SCHEMA)
            .with_context("Failed to initialize database schema")?;
        drop(conn);

        self.migrate(current_version)
    }

    /// Apply migrations newer than the version found on open.
    fn migrate(&self, current_version: u32) -> Result<()> {
        let conn = self.conn()?;

        for migration in MIGRATIONS {
            if migration.version > current_version {
                conn.execute_batch(migration.up).with_context_fn(|| {
                    format!(
                        "Failed to apply migration {}: {}",
                        migration.version, migration.description
                    )
                })?;

                tracing::debug!(
                    "Applied migration {}: {}",
                    migration.version,
                    migration.description
                );
            }
        }

        if current_version < SCHEMA_VERSION {
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                .with_context("Failed to update schema version")?;
        }

        Ok(())
    }

    pub fn schema_version(&self) -> Result<u32> {
        let conn = self.conn()?;
        conn.pragma_query_value(None, "user_version", |row| row.get(0))
            .with_context("Failed to read schema version")
    }

    /// Execute a function within a panic-safe database transaction.
    ///
    /// If the closure errors or panics, the transaction is rolled back and
    /// the pool stays usable.
    pub fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + std::panic::UnwindSafe,
    {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .with_context("Failed to start transaction")?;

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(&tx)));

        match result {
            Ok(Ok(value)) => {
                tx.commit().with_context("Failed to commit transaction")?;
                Ok(value)
            }
            Ok(Err(e)) => Err(e),
            Err(panic_payload) => {
                let panic_msg = panic_payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic_payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "Unknown panic".to_string());

                tracing::error!("Transaction panicked: {}", panic_msg);
                Err(ThreatError::Storage(format!(
                    "Transaction panicked: {}",
                    panic_msg
                )))
            }
        }
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

impl ResultStore for Database {
    fn save(&self, result: &RunResult) -> Result<()> {
        let document =
            serde_json::to_string(result).with_context("Failed to serialize run result")?;
        let run_id = result.run_id.as_str().to_string();
        let final_state = result.final_state.as_str();
        let failure_reason = result.failure.as_ref().map(|f| f.reason.to_string());
        let completed_at = result.completed_at.to_rfc3339();
        let stored_at = chrono::Utc::now().to_rfc3339();

        let inserted = self.conn()?.execute(
            "INSERT INTO run_results
             (run_id, final_state, failure_reason, document, completed_at, stored_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                run_id,
                final_state,
                failure_reason,
                document,
                completed_at,
                stored_at
            ],
        );

        match inserted {
            Ok(_) => {
                tracing::debug!(run_id = %result.run_id, final_state, "Stored run result");
                Ok(())
            }
            Err(e) if is_unique_violation(&e) => Err(ThreatError::Storage(format!(
                "Result for run {} is already persisted",
                result.run_id
            ))),
            Err(e) => Err(e).with_context("Failed to store run result"),
        }
    }

    fn load(&self, run_id: &RunId) -> Result<Option<RunResult>> {
        let document: Option<String> = self
            .conn()?
            .query_row(
                "SELECT document FROM run_results WHERE run_id = ?1",
                params![run_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .with_context("Failed to load run result")?;

        document
            .map(|doc| serde_json::from_str(&doc).with_context("Corrupt run result document"))
            .transpose()
    }

    fn list(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT run_id, final_state, failure_reason, completed_at
                 FROM run_results ORDER BY completed_at DESC, run_id LIMIT ?1",
            )
            .with_context("Failed to prepare run listing")?;

        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(RunSummary {
                    run_id: RunId::new(row.get::<_, String>(0)?),
                    final_state: row.get(1)?,
                    failure_reason: row.get(2)?,
                    completed_at: row.get(3)?,
                })
            })
            .with_context("Failed to list run results")?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .with_context("Failed to read run result row")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::UsageSummary;
    use crate::context::{AgentRole, AgentStatus, SharedContext};
    use crate::orchestrator::{FailureReason, RunFailure, RunState};
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn result(id: &str, state: RunState, minute: u32) -> RunResult {
        let run_id = RunId::new(id);
        let mut agents = BTreeMap::new();
        agents.insert(AgentRole::SystemAnalyst, AgentStatus::succeeded(0.8));
        RunResult {
            run_id: run_id.clone(),
            final_state: state,
            failure: (state == RunState::Failed)
                .then(|| RunFailure::new(FailureReason::AgentFailed, "evaluator down")),
            shared_context_snapshot: SharedContext::new(run_id, "web app".into(), None),
            agent_status: agents,
            usage_summary: UsageSummary::default(),
            flagged_for_review: vec![],
            completed_at: Utc.with_ymd_and_hms(2026, 1, 1, 12, minute, 0).unwrap(),
        }
    }

    #[test]
    fn test_open_creates_schema() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path().join("nested/results.db")).unwrap();
        assert_eq!(db.schema_version().unwrap(), SCHEMA_VERSION);
        assert!(db.list(10).unwrap().is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let db = Database::open_in_memory().unwrap();
        let stored = result("run-1", RunState::Completed, 0);
        db.save(&stored).unwrap();

        let loaded = db.load(&RunId::new("run-1")).unwrap().unwrap();
        assert_eq!(loaded, stored);
        assert!(db.load(&RunId::new("missing")).unwrap().is_none());
    }

    #[test]
    fn test_second_save_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.save(&result("run-1", RunState::Completed, 0)).unwrap();

        let err = db.save(&result("run-1", RunState::Failed, 1)).unwrap_err();
        assert!(matches!(err, ThreatError::Storage(ref msg) if msg.contains("already persisted")));
        assert_eq!(
            db.load(&RunId::new("run-1")).unwrap().unwrap().final_state,
            RunState::Completed
        );
    }

    #[test]
    fn test_list_newest_first() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path().join("results.db")).unwrap();
        db.save(&result("old", RunState::Completed, 0)).unwrap();
        db.save(&result("new", RunState::Failed, 30)).unwrap();

        let runs = db.list(10).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].run_id.as_str(), "new");
        assert_eq!(runs[0].failure_reason.as_deref(), Some("agent_failed"));
        assert_eq!(runs[1].final_state, "completed");
        assert_eq!(db.list(1).unwrap().len(), 1);
    }

    #[test]
    fn test_reopen_keeps_results() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results.db");
        Database::open(&path)
            .unwrap()
            .save(&result("persisted", RunState::Completed, 0))
            .unwrap();

        let reopened = Database::open(&path).unwrap();
        assert!(reopened.load(&RunId::new("persisted")).unwrap().is_some());
    }

    #[test]
    fn test_transaction_panic_safety() {
        let db = Database::open_in_memory().unwrap();

        let result = db.transaction(|_conn| {
            panic!("Intentional panic for testing");
            #[allow(unreachable_code)]
            Ok(())
        });

        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("panicked"));
        assert!(db.list(10).is_ok());
    }
}
