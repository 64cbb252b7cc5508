//! Config Command
//!
//! Manage ThreatWeave configuration.
//!
//! Usage:
//!   threatweave config show [-f toml|json|yaml]
//!   threatweave config path
//!   threatweave config init [--force]

use std::path::Path;

use crate::cli::ui::Output;
use crate::cli::util::load_config;
use crate::config::{ConfigFormat, ConfigLoader};
use crate::types::Result;

/// Print the effective configuration (defaults, files and environment merged)
pub fn show(config_path: Option<&Path>, format: ConfigFormat) -> Result<()> {
    let config = load_config(config_path)?;
    println!("{}", ConfigLoader::render(&config, format)?);
    Ok(())
}

/// Show configuration paths and whether each exists
pub fn path() -> Result<()> {
    let marker = |p: &Path| if p.exists() { "" } else { " (not found)" };

    match ConfigLoader::global_config_path() {
        Some(global) => println!("Global:  {}{}", global.display(), marker(&global)),
        None => println!("Global:  (no home directory)"),
    }
    let project = ConfigLoader::project_config_path();
    println!("Project: {}{}", project.display(), marker(&project));
    println!("Env:     THREATWEAVE_<SECTION>__<KEY>");
    Ok(())
}

/// Write a starter project configuration
pub fn init(force: bool) -> Result<()> {
    let config_path = ConfigLoader::init_project(&ConfigLoader::project_dir(), force)?;
    Output::new().success(&format!(
        "Project configuration at {}",
        config_path.display()
    ));
    Ok(())
}
