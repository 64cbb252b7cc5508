//! ATT&CK enterprise tactics in kill-chain order.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tactic {
    Reconnaissance,
    ResourceDevelopment,
    InitialAccess,
    Execution,
    Persistence,
    PrivilegeEscalation,
    DefenseEvasion,
    CredentialAccess,
    Discovery,
    LateralMovement,
    Collection,
    CommandAndControl,
    Exfiltration,
    Impact,
}

impl Tactic {
    pub const ALL: [Tactic; 14] = [
        Tactic::Reconnaissance,
        Tactic::ResourceDevelopment,
        Tactic::InitialAccess,
        Tactic::Execution,
        Tactic::Persistence,
        Tactic::PrivilegeEscalation,
        Tactic::DefenseEvasion,
        Tactic::CredentialAccess,
        Tactic::Discovery,
        Tactic::LateralMovement,
        Tactic::Collection,
        Tactic::CommandAndControl,
        Tactic::Exfiltration,
        Tactic::Impact,
    ];

    /// Position in the attacker progression, 1-based
    pub fn rank(&self) -> u8 {
        match self {
            Self::Reconnaissance => 1,
            Self::ResourceDevelopment => 2,
            Self::InitialAccess => 3,
            Self::Execution => 4,
            Self::Persistence => 5,
            Self::PrivilegeEscalation => 6,
            Self::DefenseEvasion => 7,
            Self::CredentialAccess => 8,
            Self::Discovery => 9,
            Self::LateralMovement => 10,
            Self::Collection => 11,
            Self::CommandAndControl => 12,
            Self::Exfiltration => 13,
            Self::Impact => 14,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Reconnaissance => "Reconnaissance",
            Self::ResourceDevelopment => "Resource Development",
            Self::InitialAccess => "Initial Access",
            Self::Execution => "Execution",
            Self::Persistence => "Persistence",
            Self::PrivilegeEscalation => "Privilege Escalation",
            Self::DefenseEvasion => "Defense Evasion",
            Self::CredentialAccess => "Credential Access",
            Self::Discovery => "Discovery",
            Self::LateralMovement => "Lateral Movement",
            Self::Collection => "Collection",
            Self::CommandAndControl => "Command and Control",
            Self::Exfiltration => "Exfiltration",
            Self::Impact => "Impact",
        }
    }

    /// ATT&CK short name (`initial-access`)
    pub fn short_name(&self) -> &'static str {
        match self {
            Self::Reconnaissance => "reconnaissance",
            Self::ResourceDevelopment => "resource-development",
            Self::InitialAccess => "initial-access",
            Self::Execution => "execution",
            Self::Persistence => "persistence",
            Self::PrivilegeEscalation => "privilege-escalation",
            Self::DefenseEvasion => "defense-evasion",
            Self::CredentialAccess => "credential-access",
            Self::Discovery => "discovery",
            Self::LateralMovement => "lateral-movement",
            Self::Collection => "collection",
            Self::CommandAndControl => "command-and-control",
            Self::Exfiltration => "exfiltration",
            Self::Impact => "impact",
        }
    }
}

impl std::fmt::Display for Tactic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranks_follow_declaration_order() {
        for (i, tactic) in Tactic::ALL.iter().enumerate() {
            assert_eq!(tactic.rank() as usize, i + 1);
        }
        assert!(Tactic::InitialAccess < Tactic::Exfiltration);
    }

    #[test]
    fn test_serde_uses_short_names() {
        for tactic in Tactic::ALL {
            let json = serde_json::to_string(&tactic).unwrap();
            assert_eq!(json, format!("\"{}\"", tactic.short_name()));
        }
    }
}
