//! JSON Schemas for agent outputs
//!
//! Sent to providers as response-format guidance and enforced by the
//! gateway before a response reaches an agent.

use serde_json::{Value, json};

const SEVERITIES: [&str; 4] = ["low", "medium", "high", "critical"];

pub(crate) struct AgentSchemas;

impl AgentSchemas {
    pub fn system_analysis() -> Value {
        json!({
            "type": "object",
            "description": "System decomposition for threat modeling",
            "required": ["assets", "entry_points", "trust_boundaries", "data_flows"],
            "properties": {
                "assets": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["name", "type", "criticality"],
                        "properties": {
                            "name": {"type": "string"},
                            "type": {"type": "string", "description": "service, datastore, client, identity, network, ..."},
                            "criticality": {"type": "string", "enum": SEVERITIES},
                            "description": {"type": "string"}
                        }
                    }
                },
                "entry_points": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["name"],
                        "properties": {
                            "name": {"type": "string"},
                            "description": {"type": "string"},
                            "asset": {"type": "string", "description": "Name of the exposed asset"}
                        }
                    }
                },
                "trust_boundaries": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["name"],
                        "properties": {
                            "name": {"type": "string"},
                            "description": {"type": "string"},
                            "assets": {"type": "array", "items": {"type": "string"}}
                        }
                    }
                },
                "data_flows": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["source", "destination"],
                        "properties": {
                            "source": {"type": "string"},
                            "destination": {"type": "string"},
                            "data": {"type": "string"},
                            "protocol": {"type": "string"}
                        }
                    }
                }
            }
        })
    }

    pub fn attack_paths() -> Value {
        json!({
            "type": "object",
            "required": ["attack_paths"],
            "properties": {
                "attack_paths": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["technique_sequence", "priority_score"],
                        "properties": {
                            "id": {"type": "string"},
                            "technique_sequence": {
                                "type": "array",
                                "description": "ATT&CK technique ids (T1190, T1059.001) from initial access onward",
                                "items": {"type": "string"}
                            },
                            "priority_score": {"type": "number", "minimum": 0, "maximum": 1},
                            "rationale": {"type": "string"},
                            "targeted_assets": {"type": "array", "items": {"type": "string"}}
                        }
                    }
                }
            }
        })
    }

    pub fn threat_intel() -> Value {
        json!({
            "type": "object",
            "required": ["techniques"],
            "properties": {
                "techniques": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["technique_id", "relevance"],
                        "properties": {
                            "technique_id": {"type": "string"},
                            "relevance": {"type": "number", "minimum": 0, "maximum": 1},
                            "actors": {"type": "array", "items": {"type": "string"}},
                            "note": {"type": "string"}
                        }
                    }
                }
            }
        })
    }

    pub fn control_evaluation() -> Value {
        json!({
            "type": "object",
            "required": ["control_gaps", "coverage"],
            "properties": {
                "control_gaps": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["attack_path_id", "technique_id", "severity", "description"],
                        "properties": {
                            "attack_path_id": {"type": "string"},
                            "technique_id": {"type": "string"},
                            "severity": {"type": "string", "enum": SEVERITIES},
                            "description": {"type": "string"}
                        }
                    }
                },
                "coverage": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["attack_path_id", "coverage"],
                        "properties": {
                            "attack_path_id": {"type": "string"},
                            "coverage": {"type": "number", "minimum": 0, "maximum": 1}
                        }
                    }
                }
            }
        })
    }

    pub fn recommendations() -> Value {
        json!({
            "type": "object",
            "required": ["recommendations"],
            "properties": {
                "recommendations": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["description", "mapped_technique_id", "priority"],
                        "properties": {
                            "description": {"type": "string"},
                            "mapped_technique_id": {"type": "string"},
                            "priority": {"type": "string", "enum": SEVERITIES},
                            "status": {"type": "string", "enum": ["proposed", "accepted", "implemented", "rejected"]}
                        }
                    }
                }
            }
        })
    }
}
