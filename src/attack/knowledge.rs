//! ATT&CK Knowledge Store
//!
//! Read-only technique lookup used by the mapper and mitigation agents. A
//! bundled table covers common enterprise techniques; a full export can be
//! loaded from a JSON file instead.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use super::paths::parent_technique;
use super::tactic::Tactic;
use crate::types::{Result, ThreatError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mitigation {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Technique {
    pub id: String,
    pub name: String,
    pub tactic: Tactic,
    #[serde(default)]
    pub mitigations: Vec<Mitigation>,
}

/// Read-only technique lookup
pub trait AttackKnowledge: Send + Sync {
    /// Exact id, falling back to the parent for unknown sub-techniques
    fn get_technique(&self, id: &str) -> Option<Technique>;

    /// Technique ids matching a free-text query, best match first
    fn search(&self, query: &str) -> Vec<String>;
}

pub type SharedKnowledge = Arc<dyn AttackKnowledge>;

#[derive(Debug, Clone, Default)]
pub struct StaticKnowledgeBase {
    techniques: BTreeMap<String, Technique>,
}

impl StaticKnowledgeBase {
    pub fn from_techniques(techniques: impl IntoIterator<Item = Technique>) -> Self {
        Self {
            techniques: techniques
                .into_iter()
                .map(|t| (t.id.to_ascii_uppercase(), t))
                .collect(),
        }
    }

    /// Load a JSON array of techniques
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let techniques: Vec<Technique> = serde_json::from_str(&content).map_err(|e| {
            ThreatError::Config(format!(
                "Invalid knowledge base file {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(Self::from_techniques(techniques))
    }

    /// The bundled enterprise subset
    pub fn bundled() -> Self {
        Self::from_techniques(BUNDLED.iter().map(|(id, name, tactic, mitigations)| {
            Technique {
                id: id.to_string(),
                name: name.to_string(),
                tactic: *tactic,
                mitigations: mitigations
                    .iter()
                    .map(|(mid, mname)| Mitigation {
                        id: mid.to_string(),
                        name: mname.to_string(),
                    })
                    .collect(),
            }
        }))
    }

    pub fn len(&self) -> usize {
        self.techniques.len()
    }

    pub fn is_empty(&self) -> bool {
        self.techniques.is_empty()
    }

    pub fn techniques(&self) -> impl Iterator<Item = &Technique> {
        self.techniques.values()
    }
}

impl AttackKnowledge for StaticKnowledgeBase {
    fn get_technique(&self, id: &str) -> Option<Technique> {
        let id = id.trim().to_ascii_uppercase();
        self.techniques
            .get(&id)
            .or_else(|| parent_technique(&id).and_then(|parent| self.techniques.get(parent)))
            .cloned()
    }

    fn search(&self, query: &str) -> Vec<String> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return Vec::new();
        }
        let terms: Vec<&str> = query.split_whitespace().collect();

        let mut scored: Vec<(usize, &str)> = self
            .techniques
            .values()
            .filter_map(|t| {
                let id = t.id.to_lowercase();
                if id == query {
                    return Some((usize::MAX, t.id.as_str()));
                }
                let haystack = format!(
                    "{} {} {} {}",
                    id,
                    t.name.to_lowercase(),
                    t.tactic.short_name(),
                    t.tactic.name().to_lowercase()
                );
                let hits = terms.iter().filter(|term| haystack.contains(*term)).count();
                (hits > 0).then_some((hits, t.id.as_str()))
            })
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        scored.into_iter().map(|(_, id)| id.to_string()).collect()
    }
}

type BundledEntry = (
    &'static str,
    &'static str,
    Tactic,
    &'static [(&'static str, &'static str)],
);

const M_AUDIT: (&str, &str) = ("M1047", "Audit");
const M_MFA: (&str, &str) = ("M1032", "Multi-factor Authentication");
const M_SEGMENTATION: (&str, &str) = ("M1030", "Network Segmentation");
const M_UPDATE: (&str, &str) = ("M1051", "Update Software");
const M_VULN_SCAN: (&str, &str) = ("M1016", "Vulnerability Scanning");
const M_EXPLOIT_PROTECTION: (&str, &str) = ("M1050", "Exploit Protection");
const M_ISOLATION: (&str, &str) = ("M1048", "Application Isolation and Sandboxing");
const M_PRIV_ACCOUNTS: (&str, &str) = ("M1026", "Privileged Account Management");
const M_PASSWORD: (&str, &str) = ("M1027", "Password Policies");
const M_DISABLE: (&str, &str) = ("M1042", "Disable or Remove Feature or Program");
const M_NIPS: (&str, &str) = ("M1031", "Network Intrusion Prevention");
const M_FILTER: (&str, &str) = ("M1037", "Filter Network Traffic");
const M_DLP: (&str, &str) = ("M1057", "Data Loss Prevention");
const M_USER_ACCOUNTS: (&str, &str) = ("M1018", "User Account Management");
const M_FILE_PERMS: (&str, &str) = ("M1022", "Restrict File and Directory Permissions");
const M_BACKUP: (&str, &str) = ("M1053", "Data Backup");
const M_TRAINING: (&str, &str) = ("M1017", "User Training");
const M_OS_CONFIG: (&str, &str) = ("M1028", "Operating System Configuration");
const M_ENCRYPT: (&str, &str) = ("M1041", "Encrypt Sensitive Information");
const M_BEHAVIOR: (&str, &str) = ("M1040", "Behavior Prevention on Endpoint");

const BUNDLED: &[BundledEntry] = &[
    ("T1595", "Active Scanning", Tactic::Reconnaissance, &[("M1056", "Pre-compromise")]),
    ("T1589", "Gather Victim Identity Information", Tactic::Reconnaissance, &[("M1056", "Pre-compromise")]),
    ("T1583", "Acquire Infrastructure", Tactic::ResourceDevelopment, &[]),
    ("T1190", "Exploit Public-Facing Application", Tactic::InitialAccess, &[M_ISOLATION, M_EXPLOIT_PROTECTION, M_SEGMENTATION, M_UPDATE, M_VULN_SCAN]),
    ("T1133", "External Remote Services", Tactic::InitialAccess, &[M_DISABLE, M_MFA, M_SEGMENTATION]),
    ("T1566", "Phishing", Tactic::InitialAccess, &[("M1049", "Antivirus/Antimalware"), M_NIPS, M_TRAINING]),
    ("T1078", "Valid Accounts", Tactic::InitialAccess, &[M_MFA, M_PASSWORD, M_PRIV_ACCOUNTS, M_USER_ACCOUNTS]),
    ("T1195", "Supply Chain Compromise", Tactic::InitialAccess, &[M_UPDATE, M_VULN_SCAN]),
    ("T1059", "Command and Scripting Interpreter", Tactic::Execution, &[("M1038", "Execution Prevention"), M_DISABLE, M_PRIV_ACCOUNTS]),
    ("T1203", "Exploitation for Client Execution", Tactic::Execution, &[M_ISOLATION, M_EXPLOIT_PROTECTION]),
    ("T1053", "Scheduled Task/Job", Tactic::Execution, &[M_PRIV_ACCOUNTS, M_OS_CONFIG]),
    ("T1505", "Server Software Component", Tactic::Persistence, &[M_AUDIT, M_PRIV_ACCOUNTS]),
    ("T1505.003", "Web Shell", Tactic::Persistence, &[M_AUDIT, M_PRIV_ACCOUNTS]),
    ("T1136", "Create Account", Tactic::Persistence, &[M_MFA, M_SEGMENTATION, M_PRIV_ACCOUNTS]),
    ("T1098", "Account Manipulation", Tactic::Persistence, &[M_MFA, M_PRIV_ACCOUNTS]),
    ("T1068", "Exploitation for Privilege Escalation", Tactic::PrivilegeEscalation, &[M_ISOLATION, M_EXPLOIT_PROTECTION, M_UPDATE]),
    ("T1548", "Abuse Elevation Control Mechanism", Tactic::PrivilegeEscalation, &[M_AUDIT, M_PRIV_ACCOUNTS, M_OS_CONFIG]),
    ("T1562", "Impair Defenses", Tactic::DefenseEvasion, &[M_FILE_PERMS, M_USER_ACCOUNTS]),
    ("T1070", "Indicator Removal", Tactic::DefenseEvasion, &[("M1029", "Remote Data Storage"), M_FILE_PERMS]),
    ("T1027", "Obfuscated Files or Information", Tactic::DefenseEvasion, &[("M1049", "Antivirus/Antimalware"), M_BEHAVIOR]),
    ("T1110", "Brute Force", Tactic::CredentialAccess, &[("M1036", "Account Use Policies"), M_MFA, M_PASSWORD]),
    ("T1003", "OS Credential Dumping", Tactic::CredentialAccess, &[("M1043", "Credential Access Protection"), M_PRIV_ACCOUNTS]),
    ("T1552", "Unsecured Credentials", Tactic::CredentialAccess, &[M_AUDIT, M_FILE_PERMS, M_TRAINING]),
    ("T1046", "Network Service Discovery", Tactic::Discovery, &[M_DISABLE, M_NIPS, M_SEGMENTATION]),
    ("T1087", "Account Discovery", Tactic::Discovery, &[M_OS_CONFIG]),
    ("T1083", "File and Directory Discovery", Tactic::Discovery, &[]),
    ("T1021", "Remote Services", Tactic::LateralMovement, &[M_MFA, ("M1035", "Limit Access to Resource Over Network"), M_USER_ACCOUNTS]),
    ("T1210", "Exploitation of Remote Services", Tactic::LateralMovement, &[M_ISOLATION, M_SEGMENTATION, M_UPDATE, M_VULN_SCAN]),
    ("T1550", "Use Alternate Authentication Material", Tactic::LateralMovement, &[M_PRIV_ACCOUNTS, M_USER_ACCOUNTS]),
    ("T1005", "Data from Local System", Tactic::Collection, &[M_DLP]),
    ("T1213", "Data from Information Repositories", Tactic::Collection, &[M_AUDIT, M_TRAINING, M_USER_ACCOUNTS]),
    ("T1530", "Data from Cloud Storage", Tactic::Collection, &[M_AUDIT, M_ENCRYPT, M_FILE_PERMS, M_USER_ACCOUNTS]),
    ("T1071", "Application Layer Protocol", Tactic::CommandAndControl, &[M_NIPS, M_FILTER]),
    ("T1105", "Ingress Tool Transfer", Tactic::CommandAndControl, &[M_NIPS]),
    ("T1041", "Exfiltration Over C2 Channel", Tactic::Exfiltration, &[M_DLP, M_NIPS]),
    ("T1048", "Exfiltration Over Alternative Protocol", Tactic::Exfiltration, &[M_DLP, M_FILTER, M_SEGMENTATION, M_NIPS]),
    ("T1567", "Exfiltration Over Web Service", Tactic::Exfiltration, &[("M1021", "Restrict Web-Based Content"), M_DLP]),
    ("T1486", "Data Encrypted for Impact", Tactic::Impact, &[M_BEHAVIOR, M_BACKUP]),
    ("T1485", "Data Destruction", Tactic::Impact, &[M_BACKUP]),
    ("T1499", "Endpoint Denial of Service", Tactic::Impact, &[M_FILTER]),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_lookup() {
        let kb = StaticKnowledgeBase::bundled();
        let t = kb.get_technique("T1190").unwrap();
        assert_eq!(t.tactic, Tactic::InitialAccess);
        assert!(t.mitigations.iter().any(|m| m.id == "M1050"));
        assert!(kb.get_technique("t1190").is_some());
        assert!(kb.get_technique("T9999").is_none());
    }

    #[test]
    fn test_unknown_subtechnique_falls_back_to_parent() {
        let kb = StaticKnowledgeBase::bundled();
        assert_eq!(kb.get_technique("T1059.001").unwrap().id, "T1059");
        assert_eq!(kb.get_technique("T1505.003").unwrap().name, "Web Shell");
    }

    #[test]
    fn test_search_ranks_by_term_hits() {
        let kb = StaticKnowledgeBase::bundled();
        let hits = kb.search("exploit public application");
        assert_eq!(hits.first().map(String::as_str), Some("T1190"));
        assert_eq!(
            kb.search("T1110").first().map(String::as_str),
            Some("T1110")
        );
        assert!(kb.search("   ").is_empty());
    }

    #[test]
    fn test_search_by_tactic() {
        let kb = StaticKnowledgeBase::bundled();
        let hits = kb.search("exfiltration");
        assert!(hits.contains(&"T1048".to_string()));
        assert!(hits.contains(&"T1041".to_string()));
    }

    #[test]
    fn test_json_file_loading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kb.json");
        std::fs::write(
            &path,
            r#"[{"id": "T1609", "name": "Container Administration Command", "tactic": "execution"}]"#,
        )
        .unwrap();
        let kb = StaticKnowledgeBase::from_json_file(&path).unwrap();
        assert_eq!(kb.len(), 1);
        assert!(kb.get_technique("T1609").unwrap().mitigations.is_empty());

        std::fs::write(&path, "not json").unwrap();
        assert!(StaticKnowledgeBase::from_json_file(&path).is_err());
    }
}
