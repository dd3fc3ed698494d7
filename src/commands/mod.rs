// src/commands/mod.rs
//! Command handlers for the ibuild CLI

mod cook;
mod install;
mod query;
mod remove;
mod system;

pub use cook::cmd_build;
pub use install::{cmd_install, cmd_upgrade};
pub use query::{cmd_history, cmd_orphans, cmd_rdepends, cmd_resolve, cmd_verify};
pub use remove::cmd_remove;
pub use system::{cmd_rollback, cmd_status, cmd_sweep};

use anyhow::{Context, Result};
use ibuild::transaction::Plan;
use ibuild::{Config, Error, TransactionManager};

/// Open the transaction manager for a loaded configuration
pub(crate) fn open_manager(config: &Config) -> Result<TransactionManager> {
    TransactionManager::new(config).context("Failed to initialize package state")
}

/// Print a plan, headed by what it is for
pub(crate) fn print_plan(title: &str, plan: &Plan, dry_run: bool) {
    if plan.is_empty() {
        return;
    }
    if dry_run {
        println!("{} (dry run, nothing changed):", title);
    } else {
        println!("{}:", title);
    }
    for action in &plan.actions {
        println!("  {}", action);
    }
    for (package, dependency) in &plan.optional {
        println!("  optional {} for {} (not installed)", dependency, package);
    }
}

/// Surface a failed rollback distinctly before it becomes the exit error
pub(crate) fn report_failure(err: Error) -> anyhow::Error {
    if let Error::RollbackFailed {
        transaction,
        packages,
        ..
    } = &err
    {
        eprintln!();
        eprintln!(
            "[CRITICAL] Rollback of transaction {} could not restore {}.",
            transaction,
            packages.join(", ")
        );
        eprintln!("The system is in an inconsistent state and needs manual intervention.");
        eprintln!("Run `ibuild status` for details; clear the flag with `ibuild status --clear` once repaired.");
    }
    err.into()
}
