//! Attack path normalisation and ordering.

use regex::Regex;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use super::knowledge::AttackKnowledge;
use crate::constants::pipeline::{INTEL_PRIORITY_WEIGHT, INTEL_RELEVANCE_WEIGHT};
use crate::context::{AttackPath, ThreatIntel};

static TECHNIQUE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bT(\d{4})(\.\d{3})?\b").expect("technique id pattern"));

/// Canonical `T1234` / `T1234.001` form of the first technique id in `raw`
pub fn normalize_technique_id(raw: &str) -> Option<String> {
    let caps = TECHNIQUE_ID.captures(raw.trim())?;
    let base = caps.get(1)?.as_str();
    Some(match caps.get(2) {
        Some(sub) => format!("T{}{}", base, sub.as_str()),
        None => format!("T{}", base),
    })
}

/// `T1059` for `T1059.001`; `None` for a parent technique
pub fn parent_technique(id: &str) -> Option<&str> {
    id.split_once('.').map(|(parent, _)| parent)
}

/// Normalise, de-duplicate and stably re-order a sequence by tactic rank.
///
/// Techniques unknown to the knowledge store keep the rank of the technique
/// before them, so they stay next to their neighbour.
pub fn order_by_kill_chain(sequence: &[String], knowledge: &dyn AttackKnowledge) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut ranked: Vec<(u8, String)> = Vec::with_capacity(sequence.len());
    let mut carry = 0u8;

    for id in sequence.iter().filter_map(|raw| normalize_technique_id(raw)) {
        if !seen.insert(id.clone()) {
            continue;
        }
        if let Some(technique) = knowledge.get_technique(&id) {
            carry = technique.tactic.rank();
        }
        ranked.push((carry, id));
    }

    ranked.sort_by_key(|(rank, _)| *rank);
    ranked.into_iter().map(|(_, id)| id).collect()
}

/// Final path ordering: effective priority (desc), then distinct assets
/// threatened (desc), then id.
pub fn rank_paths(paths: &mut [AttackPath]) {
    paths.sort_by(compare_paths);
}

fn compare_paths(a: &AttackPath, b: &AttackPath) -> Ordering {
    b.effective_priority()
        .total_cmp(&a.effective_priority())
        .then_with(|| b.distinct_asset_count().cmp(&a.distinct_asset_count()))
        .then_with(|| a.id.cmp(&b.id))
}

/// Intel-weighted priority for each path that has at least one technique
/// with intelligence; other paths are absent from the map.
pub fn intel_priorities(paths: &[AttackPath], intel: &[ThreatIntel]) -> BTreeMap<String, f64> {
    let mut relevance: BTreeMap<String, f64> = BTreeMap::new();
    for entry in intel {
        let Some(id) = normalize_technique_id(&entry.technique_id) else {
            continue;
        };
        let r = entry.relevance.clamp(0.0, 1.0);
        relevance
            .entry(id)
            .and_modify(|v| *v = v.max(r))
            .or_insert(r);
    }

    paths
        .iter()
        .filter_map(|path| {
            let best = path
                .technique_sequence
                .iter()
                .filter_map(|t| {
                    relevance
                        .get(t)
                        .or_else(|| parent_technique(t).and_then(|p| relevance.get(p)))
                })
                .copied()
                .reduce(f64::max)?;
            let score = INTEL_PRIORITY_WEIGHT * path.priority_score + INTEL_RELEVANCE_WEIGHT * best;
            Some((path.id.clone(), score.clamp(0.0, 1.0)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attack::StaticKnowledgeBase;

    fn path(id: &str, priority: f64, techniques: &[&str], assets: &[&str]) -> AttackPath {
        AttackPath {
            id: id.to_string(),
            technique_sequence: techniques.iter().map(|s| s.to_string()).collect(),
            priority_score: priority,
            rationale: String::new(),
            targeted_assets: assets.iter().map(|s| s.to_string()).collect(),
            control_coverage: None,
            intel_priority: None,
        }
    }

    fn strings(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_normalize_technique_id() {
        assert_eq!(normalize_technique_id("T1190").as_deref(), Some("T1190"));
        assert_eq!(normalize_technique_id(" t1059.001 ").as_deref(), Some("T1059.001"));
        assert_eq!(
            normalize_technique_id("T1190 - Exploit Public-Facing Application").as_deref(),
            Some("T1190")
        );
        assert_eq!(normalize_technique_id("TA0001"), None);
        assert_eq!(normalize_technique_id("T12"), None);
        assert_eq!(normalize_technique_id(""), None);
    }

    #[test]
    fn test_kill_chain_order() {
        let kb = StaticKnowledgeBase::bundled();
        let ordered = order_by_kill_chain(
            &strings(&["T1048", "T1059", "T1190", "bogus", "T1021", "T1505.003", "T1190"]),
            &kb,
        );
        assert_eq!(
            ordered,
            strings(&["T1190", "T1059", "T1505.003", "T1021", "T1048"])
        );
    }

    #[test]
    fn test_unknown_technique_stays_with_neighbour() {
        let kb = StaticKnowledgeBase::bundled();
        let ordered = order_by_kill_chain(&strings(&["T1048", "T1190", "T1999"]), &kb);
        assert_eq!(ordered, strings(&["T1190", "T1999", "T1048"]));
    }

    #[test]
    fn test_equal_priority_breaks_on_asset_count() {
        let mut paths = vec![
            path("AP-001", 0.8, &["T1190"], &["db"]),
            path("AP-002", 0.8, &["T1190"], &["api", "db", "frontend"]),
            path("AP-003", 0.9, &["T1190"], &[]),
        ];
        rank_paths(&mut paths);
        let ids: Vec<_> = paths.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["AP-003", "AP-002", "AP-001"]);
    }

    #[test]
    fn test_intel_priorities() {
        let paths = vec![
            path("AP-001", 0.5, &["T1190", "T1059.001"], &[]),
            path("AP-002", 0.5, &["T1486"], &[]),
        ];
        let intel = vec![
            ThreatIntel {
                technique_id: "T1059".into(),
                relevance: 1.0,
                actors: vec![],
                note: String::new(),
            },
            ThreatIntel {
                technique_id: "T1190".into(),
                relevance: 0.2,
                actors: vec![],
                note: String::new(),
            },
        ];
        let priorities = intel_priorities(&paths, &intel);
        assert_eq!(priorities.len(), 1);
        assert!((priorities["AP-001"] - (0.7 * 0.5 + 0.3 * 1.0)).abs() < 1e-9);
    }
}
