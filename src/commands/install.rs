// src/commands/install.rs
//! Install and upgrade commands

use super::{open_manager, print_plan, report_failure};
use anyhow::Result;
use ibuild::{Config, InstallOptions};
use tracing::info;

/// Install a package and its missing run-time dependencies
pub fn cmd_install(
    config: &Config,
    package: &str,
    dry_run: bool,
    rebuild: bool,
    with_optional: bool,
) -> Result<()> {
    info!("Installing package: {}", package);
    let manager = open_manager(config)?;

    let opts = InstallOptions {
        dry_run,
        explicit: true,
        rebuild,
        with_optional,
    };
    let plan = manager.install(package, opts).map_err(report_failure)?;

    print_plan(&format!("Install {}", package), &plan, dry_run);
    if !dry_run {
        if plan.is_noop() {
            println!("{} is already installed", package);
        } else {
            println!("[OK] Installed {}", package);
        }
    }
    Ok(())
}

/// Upgrade packages as one transaction
pub fn cmd_upgrade(config: &Config, packages: &[String], dry_run: bool) -> Result<()> {
    info!("Upgrading: {}", packages.join(", "));
    let manager = open_manager(config)?;

    let plan = manager.upgrade(packages, dry_run).map_err(report_failure)?;
    print_plan("Upgrade", &plan, dry_run);

    if plan.is_noop() {
        println!("All packages are up to date");
    } else if !dry_run {
        println!("[OK] Upgraded {}", plan.changed_packages().join(", "));
    }
    Ok(())
}
