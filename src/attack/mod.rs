//! MITRE ATT&CK support: tactics, the technique knowledge store and attack
//! path ordering.

mod knowledge;
mod paths;
mod tactic;

pub use knowledge::{AttackKnowledge, Mitigation, SharedKnowledge, StaticKnowledgeBase, Technique};
pub use paths::{
    intel_priorities, normalize_technique_id, order_by_kill_chain, parent_technique, rank_paths,
};
pub use tactic::Tactic;
