// src/commands/query.rs
//! Dependency and state queries

use super::{open_manager, report_failure};
use anyhow::Result;
use ibuild::Config;
use ibuild::recipe::DepKind;

/// Print the dependency order for a package, dependencies first
pub fn cmd_resolve(config: &Config, package: &str, kind: DepKind) -> Result<()> {
    let manager = open_manager(config)?;
    let order = manager.resolve(package, kind)?;

    for (i, name) in order.iter().enumerate() {
        let marker = match manager.db().version_of(name)? {
            Some(version) => format!(" [installed {}]", version),
            None if !manager.store().contains(name) => " [no recipe]".to_string(),
            None => String::new(),
        };
        println!("{:3}. {}{}", i + 1, name, marker);
    }
    Ok(())
}

/// Show what depends on a package
pub fn cmd_rdepends(config: &Config, package: &str) -> Result<()> {
    let manager = open_manager(config)?;
    let dependents = manager.reverse_dependents(package)?;

    if dependents.is_empty() {
        println!("Nothing depends on {}", package);
        return Ok(());
    }

    println!("Packages depending on {}:", package);
    for name in dependents {
        let state = if manager.db().is_installed(&name) {
            " (installed)"
        } else {
            ""
        };
        println!("  {}{}", name, state);
    }
    Ok(())
}

/// Check installed files against their manifests
pub fn cmd_verify(config: &Config, package: Option<&str>) -> Result<()> {
    let manager = open_manager(config)?;
    let reports = manager.verify(package)?;

    let mut failed = 0;
    for report in &reports {
        if report.is_ok() {
            println!("[OK] {}-{} ({} files)", report.package, report.version, report.checked);
        } else {
            failed += 1;
            println!(
                "[FAILED] {}-{}: {} of {} files missing",
                report.package,
                report.version,
                report.missing.len(),
                report.checked
            );
            for path in &report.missing {
                println!("  missing: /{}", path);
            }
        }
    }

    if failed > 0 {
        return Err(anyhow::anyhow!("{} package(s) failed verification", failed));
    }
    Ok(())
}

/// List installed dependencies nothing needs any more, or remove them
pub fn cmd_orphans(config: &Config, remove: bool, dry_run: bool) -> Result<()> {
    let manager = open_manager(config)?;

    if remove {
        let removed = manager.remove_orphans(dry_run).map_err(report_failure)?;
        if removed.is_empty() {
            println!("No orphaned packages");
        } else if dry_run {
            println!("Would remove (dry run): {}", removed.join(", "));
        } else {
            println!("[OK] Removed {}", removed.join(", "));
        }
        return Ok(());
    }

    let orphans = manager.orphans()?;

    if orphans.is_empty() {
        println!("No orphaned packages");
    } else {
        for name in orphans {
            println!("{}", name);
        }
    }
    Ok(())
}

/// Show transaction history
pub fn cmd_history(config: &Config) -> Result<()> {
    let manager = open_manager(config)?;
    let history = manager.history()?;

    if history.is_empty() {
        println!("No transactions recorded");
        return Ok(());
    }

    for summary in history {
        let packages = summary
            .records
            .iter()
            .find_map(|r| match r {
                ibuild::transaction::JournalRecord::Begin {
                    packages,
                    timestamp,
                    ..
                } => Some(format!(
                    "{} {}",
                    timestamp.format("%Y-%m-%d %H:%M:%S"),
                    packages.join(" ")
                )),
                _ => None,
            })
            .unwrap_or_default();
        println!(
            "{:>5}  {:<8} {:<16} {}",
            summary.txn,
            summary.operation().unwrap_or("?"),
            summary.outcome(),
            packages
        );
    }
    Ok(())
}
