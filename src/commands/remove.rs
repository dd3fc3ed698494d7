// src/commands/remove.rs
//! Package removal command

use super::{open_manager, print_plan, report_failure};
use anyhow::Result;
use ibuild::{Config, RemoveOptions};
use tracing::info;

/// Remove an installed package
pub fn cmd_remove(
    config: &Config,
    package: &str,
    force: bool,
    recursive: bool,
    dry_run: bool,
) -> Result<()> {
    info!("Removing package: {}", package);
    let manager = open_manager(config)?;

    let opts = RemoveOptions {
        force,
        recursive,
        dry_run,
    };
    let plan = manager.remove(package, opts).map_err(report_failure)?;

    print_plan(&format!("Remove {}", package), &plan, dry_run);
    if !dry_run {
        println!("[OK] Removed {}", plan.changed_packages().join(", "));
    }
    Ok(())
}
