//! Shared Context Manager
//!
//! The only mutation path for a run's [`SharedContext`]. Every write goes
//! through one critical section that checks ownership, write-once and
//! freeze rules before bumping the version.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, error};

use super::model::{AgentStatus, ContextUpdate, SharedContext};
use super::ownership::AgentRole;
use crate::types::{Result, RunId, ThreatError, WriteViolation};

/// Read-only view handed to agents
pub type ContextSnapshot = Arc<SharedContext>;

pub struct ContextManager {
    inner: RwLock<SharedContext>,
}

impl ContextManager {
    /// Create the context with every scheduled role `pending`
    pub fn new(
        run_id: RunId,
        raw_input: String,
        control_documentation: Option<String>,
        scheduled: &[AgentRole],
    ) -> Self {
        let mut ctx = SharedContext::new(run_id, raw_input, control_documentation);
        for role in scheduled {
            ctx.agent_status.insert(*role, AgentStatus::pending());
        }
        Self {
            inner: RwLock::new(ctx),
        }
    }

    /// Merge an agent's update, returning the new version.
    ///
    /// The whole update is rejected if any field in it is not owned by
    /// `role`, was already written, or the context is frozen. A rejected
    /// update leaves the context and its version untouched.
    pub fn apply(&self, role: AgentRole, update: ContextUpdate) -> Result<u64> {
        let mut ctx = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let violation = if ctx.frozen {
            Some(WriteViolation::Frozen)
        } else {
            update.fields().into_iter().find_map(|field| {
                let owner = field.owner();
                if owner != role {
                    Some(WriteViolation::NotOwner {
                        field: field.to_string(),
                        owner: owner.to_string(),
                    })
                } else if ctx.written.contains(&field) {
                    Some(WriteViolation::AlreadyWritten {
                        field: field.to_string(),
                    })
                } else {
                    None
                }
            })
        };

        if let Some(violation) = violation {
            error!(
                run_id = %ctx.run_id,
                agent = %role,
                %violation,
                "Rejected shared context write"
            );
            return Err(ThreatError::ContextWriteViolation {
                agent: role.to_string(),
                violation,
            });
        }

        let fields = update.fields();
        ctx.written.extend(fields.iter().copied());
        update.merge_into(&mut ctx);
        ctx.version += 1;

        debug!(
            run_id = %ctx.run_id,
            agent = %role,
            fields = ?fields,
            version = ctx.version,
            "Applied context update"
        );
        Ok(ctx.version)
    }

    /// Record an agent's lifecycle state. Ignored once frozen.
    pub fn set_agent_status(&self, role: AgentRole, status: AgentStatus) -> u64 {
        let mut ctx = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if ctx.frozen {
            return ctx.version;
        }
        ctx.agent_status.insert(role, status);
        ctx.version += 1;
        ctx.version
    }

    pub fn agent_status(&self, role: AgentRole) -> Option<AgentStatus> {
        self.read(|ctx| ctx.agent_status.get(&role).cloned())
    }

    /// Status of every scheduled agent
    pub fn agent_statuses(&self) -> BTreeMap<AgentRole, AgentStatus> {
        self.read(|ctx| ctx.agent_status.clone())
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        Arc::new(self.read(SharedContext::clone))
    }

    pub fn version(&self) -> u64 {
        self.read(|ctx| ctx.version)
    }

    /// Make the context read-only and return its final state
    pub fn freeze(&self) -> ContextSnapshot {
        let mut ctx = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        ctx.frozen = true;
        Arc::new(ctx.clone())
    }

    pub fn is_frozen(&self) -> bool {
        self.read(|ctx| ctx.frozen)
    }

    fn read<T>(&self, f: impl FnOnce(&SharedContext) -> T) -> T {
        let ctx = self
            .inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::model::{AgentState, Asset, Severity};
    use crate::context::ownership::ContextField;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn manager() -> ContextManager {
        ContextManager::new(
            RunId::new("run-ctx"),
            "web app".into(),
            None,
            &AgentRole::ALL,
        )
    }

    fn asset(name: &str) -> Asset {
        Asset {
            name: name.to_string(),
            asset_type: "service".to_string(),
            criticality: Severity::High,
            description: String::new(),
        }
    }

    /// Update touching `field` with empty content
    fn touch(field: ContextField) -> ContextUpdate {
        let mut u = ContextUpdate::default();
        match field {
            ContextField::Assets => u.assets = Some(vec![]),
            ContextField::EntryPoints => u.entry_points = Some(vec![]),
            ContextField::TrustBoundaries => u.trust_boundaries = Some(vec![]),
            ContextField::DataFlows => u.data_flows = Some(vec![]),
            ContextField::AttackPaths => u.attack_paths = Some(vec![]),
            ContextField::ThreatIntel => u.threat_intel = Some(vec![]),
            ContextField::IntelPriority => u.intel_priority = Some(BTreeMap::new()),
            ContextField::ControlGaps => u.control_gaps = Some(vec![]),
            ContextField::ControlCoverage => u.control_coverage = Some(BTreeMap::new()),
            ContextField::Recommendations => u.recommendations = Some(vec![]),
        }
        u
    }

    fn touch_all(fields: &[ContextField]) -> ContextUpdate {
        let mut merged = ContextUpdate::default();
        for field in fields {
            let u = touch(*field);
            merged.assets = merged.assets.or(u.assets);
            merged.entry_points = merged.entry_points.or(u.entry_points);
            merged.trust_boundaries = merged.trust_boundaries.or(u.trust_boundaries);
            merged.data_flows = merged.data_flows.or(u.data_flows);
            merged.attack_paths = merged.attack_paths.or(u.attack_paths);
            merged.threat_intel = merged.threat_intel.or(u.threat_intel);
            merged.intel_priority = merged.intel_priority.or(u.intel_priority);
            merged.control_gaps = merged.control_gaps.or(u.control_gaps);
            merged.control_coverage = merged.control_coverage.or(u.control_coverage);
            merged.recommendations = merged.recommendations.or(u.recommendations);
        }
        merged
    }

    #[test]
    fn test_owner_write_succeeds() {
        let mgr = manager();
        let update = ContextUpdate {
            assets: Some(vec![asset("api"), asset("db")]),
            ..Default::default()
        };
        let v = mgr.apply(AgentRole::SystemAnalyst, update).unwrap();
        assert_eq!(v, 1);
        assert_eq!(mgr.snapshot().assets.len(), 2);
    }

    #[test]
    fn test_non_owner_is_rejected_without_side_effects() {
        let mgr = manager();
        let before = mgr.snapshot();
        let err = mgr
            .apply(AgentRole::Mitigation, touch(ContextField::Assets))
            .unwrap_err();
        match err {
            ThreatError::ContextWriteViolation { agent, violation } => {
                assert_eq!(agent, "mitigation");
                assert_eq!(
                    violation,
                    WriteViolation::NotOwner {
                        field: "assets".into(),
                        owner: "system_analyst".into()
                    }
                );
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(*mgr.snapshot(), *before);
    }

    #[test]
    fn test_mixed_ownership_rejects_whole_update() {
        let mgr = manager();
        let update = touch_all(&[ContextField::AttackPaths, ContextField::ControlGaps]);
        assert!(mgr.apply(AgentRole::AttackMapper, update).is_err());
        assert!(mgr.snapshot().written.is_empty());
    }

    #[test]
    fn test_second_write_is_rejected() {
        let mgr = manager();
        mgr.apply(AgentRole::AttackMapper, touch(ContextField::AttackPaths))
            .unwrap();
        let err = mgr
            .apply(AgentRole::AttackMapper, touch(ContextField::AttackPaths))
            .unwrap_err();
        assert!(matches!(
            err,
            ThreatError::ContextWriteViolation {
                violation: WriteViolation::AlreadyWritten { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_frozen_context_rejects_writes() {
        let mgr = manager();
        let frozen = mgr.freeze();
        assert!(frozen.frozen);
        let err = mgr
            .apply(AgentRole::SystemAnalyst, touch(ContextField::Assets))
            .unwrap_err();
        assert!(matches!(
            err,
            ThreatError::ContextWriteViolation {
                violation: WriteViolation::Frozen,
                ..
            }
        ));
        assert_eq!(
            mgr.set_agent_status(AgentRole::Mitigation, AgentStatus::running()),
            frozen.version
        );
    }

    #[test]
    fn test_snapshot_is_isolated() {
        let mgr = manager();
        let snap = mgr.snapshot();
        mgr.apply(
            AgentRole::SystemAnalyst,
            ContextUpdate {
                assets: Some(vec![asset("api")]),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(snap.assets.is_empty());
        assert_eq!(mgr.snapshot().assets.len(), 1);
    }

    #[test]
    fn test_status_updates_bump_version() {
        let mgr = manager();
        assert_eq!(
            mgr.agent_status(AgentRole::ThreatIntel).unwrap().state,
            AgentState::Pending
        );
        let v1 = mgr.set_agent_status(AgentRole::ThreatIntel, AgentStatus::running());
        let v2 = mgr.set_agent_status(AgentRole::ThreatIntel, AgentStatus::succeeded(0.8));
        assert!(v2 > v1);
    }

    fn field_strategy() -> impl Strategy<Value = ContextField> {
        prop::sample::select(ContextField::ALL.to_vec())
    }

    fn role_strategy() -> impl Strategy<Value = AgentRole> {
        prop::sample::select(AgentRole::ALL.to_vec())
    }

    proptest! {
        /// Concurrent writers with overlapping field sets: each field is
        /// successfully written at most once, and only by its owner.
        #[test]
        fn prop_single_writer_per_field(
            attempts in prop::collection::vec(
                (role_strategy(), prop::collection::vec(field_strategy(), 1..4)),
                1..24,
            )
        ) {
            let mgr = manager();
            let successes: Vec<(AgentRole, Vec<ContextField>, u64)> = std::thread::scope(|s| {
                let handles: Vec<_> = attempts
                    .iter()
                    .map(|(role, fields)| {
                        let mgr = &mgr;
                        s.spawn(move || {
                            mgr.apply(*role, touch_all(fields))
                                .ok()
                                .map(|v| (*role, fields.clone(), v))
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .filter_map(|h| h.join().ok().flatten())
                    .collect()
            });

            let mut written = std::collections::BTreeSet::new();
            for (role, fields, _) in &successes {
                let distinct: std::collections::BTreeSet<_> = fields.iter().copied().collect();
                for field in distinct {
                    prop_assert_eq!(field.owner(), *role);
                    prop_assert!(written.insert(field), "field {} written twice", field);
                }
            }

            let snap = mgr.snapshot();
            prop_assert_eq!(snap.version, successes.len() as u64);
            prop_assert_eq!(snap.written.len(), written.len());
        }

        /// Every successful apply returns a version no other apply returned,
        /// and the final version equals the number of successes.
        #[test]
        fn prop_version_strictly_increases(
            sequence in prop::collection::vec((role_strategy(), field_strategy()), 1..40)
        ) {
            let mgr = manager();
            let mut last = mgr.version();
            let mut successes = 0u64;
            for (role, field) in sequence {
                match mgr.apply(role, touch(field)) {
                    Ok(v) => {
                        prop_assert!(v > last);
                        last = v;
                        successes += 1;
                    }
                    Err(_) => prop_assert_eq!(mgr.version(), last),
                }
            }
            prop_assert_eq!(mgr.version(), successes);
        }
    }
}
