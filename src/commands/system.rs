// src/commands/system.rs
//! System status and maintenance

use super::{open_manager, report_failure};
use anyhow::Result;
use ibuild::Config;
use tracing::info;

/// Reinstall the snapshots kept by transaction `txn`
pub fn cmd_rollback(config: &Config, txn: u64) -> Result<()> {
    info!("Rolling back transaction {}", txn);
    let manager = open_manager(config)?;

    let restored = manager.rollback_transaction(txn).map_err(report_failure)?;
    if restored.is_empty() {
        println!("[OK] Transaction {} had nothing left to restore", txn);
    } else {
        println!("[OK] Transaction {} rolled back: {}", txn, restored.join(", "));
    }
    Ok(())
}

/// Show system status; optionally clear the inconsistency marker
pub fn cmd_status(config: &Config, clear: bool) -> Result<()> {
    let manager = open_manager(config)?;

    if clear {
        manager.clear_inconsistent()?;
        println!("Inconsistency marker cleared");
        return Ok(());
    }

    let status = manager.status()?;
    println!("Root: {}", manager.root().display());
    println!("Installed packages: {}", status.installed);

    match &status.inconsistency {
        Some(details) => {
            println!("\n[INCONSISTENT] A rollback failed; manual intervention required:");
            for line in details.lines() {
                println!("  {}", line);
            }
        }
        None => println!("State: consistent"),
    }

    if !status.incomplete.is_empty() {
        println!("\nIncomplete transactions:");
        for path in &status.incomplete {
            println!("  {}", path.display());
        }
    }
    Ok(())
}

/// Remove orphaned sandbox directories
pub fn cmd_sweep(config: &Config) -> Result<()> {
    let manager = open_manager(config)?;
    let removed = manager.kitchen().sandboxes().sweep()?;
    println!("Removed {} orphaned sandbox(es)", removed);
    Ok(())
}
