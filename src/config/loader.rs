//! Configuration Loader (Figment-based)
//!
//! Loads and merges configuration from multiple sources using Figment:
//! 1. Built-in defaults (Serialized)
//! 2. Global config (<config dir>/threatweave/config.toml)
//! 3. Project config (.threatweave/config.toml)
//! 4. Environment variables (THREATWEAVE_* prefix, `__` separates nesting)

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::types::Config;
use crate::types::{Result, ThreatError};

/// Output encoding for `config show`
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ConfigFormat {
    Toml,
    Json,
    Yaml,
}

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with full resolution chain using Figment:
    /// defaults → global → project → env vars
    pub fn load() -> Result<Config> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if let Some(global_path) = Self::global_config_path()
            && global_path.exists()
        {
            debug!("Loading global config from: {}", global_path.display());
            figment = figment.merge(Toml::file(&global_path));
        }

        let project_path = Self::project_config_path();
        if project_path.exists() {
            debug!("Loading project config from: {}", project_path.display());
            figment = figment.merge(Toml::file(&project_path));
        }

        // THREATWEAVE_PIPELINE__RUN_TIMEOUT_SECS -> pipeline.run_timeout_secs
        figment = figment.merge(Env::prefixed("THREATWEAVE_").split("__").lowercase(true));

        Self::extract(figment)
    }

    /// Load configuration from a specific file only
    pub fn load_from_file(path: &Path) -> Result<Config> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path));
        Self::extract(figment)
    }

    fn extract(figment: Figment) -> Result<Config> {
        let config: Config = figment
            .extract()
            .map_err(|e| ThreatError::Config(format!("Configuration error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    // =========================================================================
    // Path Management
    // =========================================================================

    /// Global config directory, resolved per platform
    pub fn global_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "threatweave").map(|dirs| dirs.config_dir().to_path_buf())
    }

    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_dir().map(|dir| dir.join("config.toml"))
    }

    pub fn project_dir() -> PathBuf {
        PathBuf::from(".threatweave")
    }

    pub fn project_config_path() -> PathBuf {
        Self::project_dir().join("config.toml")
    }

    // =========================================================================
    // Config Commands
    // =========================================================================

    /// Render the configuration in the requested format
    pub fn render(config: &Config, format: ConfigFormat) -> Result<String> {
        match format {
            ConfigFormat::Json => Ok(serde_json::to_string_pretty(config)?),
            ConfigFormat::Toml => {
                toml::to_string_pretty(config).map_err(|e| ThreatError::Config(e.to_string()))
            }
            ConfigFormat::Yaml => {
                serde_yaml::to_string(config).map_err(|e| ThreatError::Config(e.to_string()))
            }
        }
    }

    /// Write a starter project config; existing files are kept unless `force`
    pub fn init_project(dir: &Path, force: bool) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;

        let config_path = dir.join("config.toml");
        if !config_path.exists() || force {
            fs::write(&config_path, Self::default_project_config())?;
            info!("Created project config: {}", config_path.display());
        } else {
            info!("Project config exists: {}", config_path.display());
        }

        Ok(config_path)
    }

    fn default_project_config() -> &'static str {
        r#"# ThreatWeave Project Configuration
# Overrides global defaults. API keys are best supplied via environment
# (OPENAI_API_KEY) rather than written here.

version = "1.0"

[llm]
max_retries = 3
max_schema_retries = 2
request_timeout_secs = 60
temperature = 0.0

# Providers are tried in order; later entries are fallbacks.
[[llm.providers]]
name = "primary"
provider = "openai"
model = "gpt-4o"
input_cost_per_1k = 0.0025
output_cost_per_1k = 0.01

[[llm.providers]]
name = "secondary"
provider = "ollama"
model = "llama3.1"

[pipeline]
enable_threat_intel = true
depth = "standard"
agent_timeout_secs = 300
run_timeout_secs = 900

[storage]
database_path = ".threatweave/results.db"
"#
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_starter_config_loads_and_validates() {
        let temp_dir = TempDir::new().unwrap();
        let path = ConfigLoader::init_project(temp_dir.path(), false).unwrap();

        let config = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(config.llm.providers.len(), 2);
        assert_eq!(config.llm.providers[1].model, "llama3.1");
        assert_eq!(config.pipeline.agent_timeout_secs, 300);
    }

    #[test]
    fn test_init_project_keeps_existing_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "version = \"2.0\"\n").unwrap();

        ConfigLoader::init_project(temp_dir.path(), false).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "version = \"2.0\"\n");

        ConfigLoader::init_project(temp_dir.path(), true).unwrap();
        assert!(fs::read_to_string(&path).unwrap().contains("[[llm.providers]]"));
    }

    #[test]
    fn test_invalid_file_fails_validation() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[llm]\ntemperature = 3.0\n").unwrap();

        assert!(matches!(
            ConfigLoader::load_from_file(&path),
            Err(ThreatError::Config(_))
        ));
    }

    #[test]
    fn test_render_formats() {
        let config = Config::default();
        let toml = ConfigLoader::render(&config, ConfigFormat::Toml).unwrap();
        assert!(toml.contains("[pipeline]"));

        let json = ConfigLoader::render(&config, ConfigFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["storage"]["database_path"], ".threatweave/results.db");

        let yaml = ConfigLoader::render(&config, ConfigFormat::Yaml).unwrap();
        assert!(yaml.contains("run_timeout_secs: 900"));
    }
}
