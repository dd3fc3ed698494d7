// src/cli/mod.rs
//! CLI definitions for ibuild
//!
//! This module contains the command-line interface definitions using clap.
//! The command implementations are in the `commands` module.
//!
//! - `install` / `remove` / `upgrade` - transactional package operations
//! - `build` - run the build pipeline only
//! - `resolve` / `rdepends` - dependency queries
//! - `rollback` - reinstall the snapshots a failed transaction kept
//! - `verify` / `orphans` / `history` / `status` / `sweep` - system checks

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use ibuild::recipe::DepKind;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ibuild")]
#[command(author, version)]
#[command(about = "Source/binary package manager with sandboxed builds and transactional upgrades", long_about = None)]
pub struct Cli {
    /// Configuration file (overrides the default lookup)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Install root directory
    #[arg(long, global = true, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Dependency kind on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Build,
    Run,
    Both,
}

impl From<KindArg> for DepKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Build => DepKind::Build,
            KindArg::Run => DepKind::Run,
            KindArg::Both => DepKind::Both,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install a package and its missing run-time dependencies
    Install {
        /// Package name
        package: String,

        /// Show what would be done without doing it
        #[arg(long)]
        dry_run: bool,

        /// Build again even if an artifact exists
        #[arg(long)]
        rebuild: bool,

        /// Install optional dependencies too
        #[arg(long)]
        with_optional: bool,
    },

    /// Remove an installed package
    Remove {
        /// Package name
        package: String,

        /// Remove despite dependents; required for essential packages
        #[arg(long)]
        force: bool,

        /// Remove installed dependents first
        #[arg(long)]
        recursive: bool,

        /// Show what would be done without doing it
        #[arg(long)]
        dry_run: bool,
    },

    /// Upgrade packages as one transaction
    Upgrade {
        /// Package names
        #[arg(required = true)]
        packages: Vec<String>,

        /// Show what would be done without doing it
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the dependency order for a package
    Resolve {
        /// Package name
        package: String,

        /// Which dependencies to follow
        #[arg(long, value_enum, default_value = "both")]
        kind: KindArg,
    },

    /// Build a package into its artifact triple without installing
    Build {
        /// Package name
        package: String,
    },

    /// Show what depends on a package
    Rdepends {
        /// Package name
        package: String,
    },

    /// Check installed files against their manifests
    Verify {
        /// Package name (all packages if omitted)
        package: Option<String>,
    },

    /// List installed dependencies nothing needs any more
    Orphans {
        /// Remove them, repeating until none are left
        #[arg(long)]
        remove: bool,

        /// With --remove, only show what would be removed
        #[arg(long, requires = "remove")]
        dry_run: bool,
    },

    /// Reinstall the snapshots a failed or interrupted transaction kept
    Rollback {
        /// Transaction id (see `ibuild history`)
        txn: u64,
    },

    /// Show transaction history
    History,

    /// Remove orphaned sandbox directories
    Sweep,

    /// Show system status and inconsistency flags
    Status {
        /// Clear the inconsistency marker after manual repair
        #[arg(long)]
        clear: bool,
    },
}
