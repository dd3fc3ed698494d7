// src/commands/cook.rs

//! Build command - cook a recipe without installing it

use super::open_manager;
use anyhow::{Context, Result};
use ibuild::Config;

/// Build a package into its artifact triple
pub fn cmd_build(config: &Config, package: &str) -> Result<()> {
    let manager = open_manager(config)?;

    println!("Cooking {}...", package);
    let result = manager
        .build(package)
        .with_context(|| format!("Failed to build {}", package))?;

    for warning in &result.warnings {
        println!("Warning: {}", warning);
    }

    println!("\n[COMPLETE] Built {}-{}", result.artifact.name, result.artifact.version);
    for path in result.artifact.files() {
        println!("  - {}", path.display());
    }
    println!("Build log: {}", result.log_path.display());
    Ok(())
}
