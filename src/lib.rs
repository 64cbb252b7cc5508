//! ThreatWeave - Multi-Agent LLM Threat Modeling
//!
//! Coordinates specialised LLM agents that turn a free-text system
//! description into a threat model mapped to MITRE ATT&CK: assets, attack
//! paths, control gaps and prioritised recommendations.
//!
//! ## Core Features
//!
//! - **Provider Gateway**: ordered fallback over LLM backends with retries,
//!   schema enforcement and per-run usage accounting
//! - **Shared Context**: one versioned document per run, each field owned by
//!   exactly one agent
//! - **Orchestrator**: non-blocking run lifecycle with status polling,
//!   cancellation and timeouts
//! - **Persistence**: one immutable result document per run in SQLite
//!
//! ## Quick Start
//!
//! ```ignore
//! use threatweave::{Config, Database, Orchestrator, ProviderGateway, RunOptions};
//! use threatweave::attack::StaticKnowledgeBase;
//!
//! let config = Config::default();
//! let gateway = Arc::new(ProviderGateway::from_config(&config.llm)?);
//! let store = Arc::new(Database::open(&config.storage.database_path)?);
//! let orchestrator = Orchestrator::new(
//!     gateway,
//!     Arc::new(StaticKnowledgeBase::bundled()),
//!     store,
//!     config,
//! );
//! let run_id = orchestrator.start("Web app: React frontend, Postgres DB", RunOptions::default())?;
//! let status = orchestrator.wait(&run_id).await?;
//! let result = orchestrator.result(&run_id)?;
//! ```
//!
//! ## Modules
//!
//! - [`ai`]: LLM providers, the fallback gateway, validation, usage metrics
//! - [`context`]: shared context model and the single-writer manager
//! - [`agents`]: the five pipeline agents
//! - [`attack`]: ATT&CK tactics, technique knowledge, path ranking
//! - [`orchestrator`]: run state machine and lifecycle API
//! - [`storage`]: SQLite result store

pub mod agents;
pub mod ai;
pub mod attack;
pub mod cli;
pub mod config;
pub mod constants;
pub mod context;
pub mod orchestrator;
pub mod storage;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// =============================================================================
// Core Re-exports
// =============================================================================

// Configuration
pub use config::{AnalysisDepth, Config, ConfigLoader};

// Error Types
pub use types::error::{ErrorCategory, Result, ResultExt, ThreatError};
pub use types::RunId;

// Storage
pub use storage::{Database, PoolConfig, ResultStore, SharedDatabase};

// =============================================================================
// Pipeline Re-exports
// =============================================================================

pub use agents::{Agent, AgentRegistry};
pub use context::{AgentRole, ContextManager, ContextUpdate, SharedContext};
pub use orchestrator::{Orchestrator, RunOptions, RunResult, RunState, RunStatus};

// =============================================================================
// AI Re-exports
// =============================================================================

pub use ai::{
    GatewaySession, LlmProvider, LlmResponse, ProviderGateway, ProviderGatewayBuilder,
    TimeoutConfig, UsageSummary,
};
