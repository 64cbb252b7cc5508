//! CLI Common Utilities
//!
//! Shared initialization for command handlers.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use crate::attack::{SharedKnowledge, StaticKnowledgeBase};
use crate::config::{Config, ConfigLoader};
use crate::storage::{Database, SharedDatabase};
use crate::types::{Result, ThreatError};

/// Resources most commands need
#[derive(Clone)]
pub struct CommandContext {
    pub config: Config,
    pub db: SharedDatabase,
}

impl CommandContext {
    /// Load configuration and open the result database it points at
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let config = load_config(config_path)?;
        let db = Database::open(&config.storage.database_path)?;
        Ok(Self {
            config,
            db: Arc::new(db),
        })
    }
}

/// An explicit file replaces the global/project/env resolution chain
pub fn load_config(config_path: Option<&Path>) -> Result<Config> {
    match config_path {
        Some(path) => {
            if !path.exists() {
                return Err(ThreatError::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            ConfigLoader::load_from_file(path)
        }
        None => ConfigLoader::load(),
    }
}

/// Bundled ATT&CK techniques, or a JSON export when given
pub fn load_knowledge(path: Option<&Path>) -> Result<SharedKnowledge> {
    Ok(match path {
        Some(path) => Arc::new(StaticKnowledgeBase::from_json_file(path)?),
        None => Arc::new(StaticKnowledgeBase::bundled()),
    })
}

/// Read a text input; `-` means stdin
pub fn read_text(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).map_err(|e| {
        ThreatError::InvalidRequest(format!("Cannot read {}: {}", path.display(), e))
    })
}
