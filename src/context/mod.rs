//! Shared Analysis Context
//!
//! A versioned, field-partitioned threat model for one run. Any agent may
//! read every field; each field has exactly one writing role.

mod manager;
mod model;
mod ownership;

pub use manager::{ContextManager, ContextSnapshot};
pub use model::{
    AgentState, AgentStatus, Asset, AttackPath, ContextUpdate, ControlGap, DataFlow, EntryPoint,
    Recommendation, RecommendationStatus, Severity, SharedContext, ThreatIntel, TrustBoundary,
};
pub use ownership::{AgentRole, ContextField};
