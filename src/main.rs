// src/main.rs

mod cli;
mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use ibuild::Config;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise -v / -vv raise the default level
    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::load().context("Failed to load configuration")?,
    };
    if let Some(root) = cli.root {
        config.paths.root = root;
    }

    match cli.command {
        Commands::Install {
            package,
            dry_run,
            rebuild,
            with_optional,
        } => commands::cmd_install(&config, &package, dry_run, rebuild, with_optional),
        Commands::Remove {
            package,
            force,
            recursive,
            dry_run,
        } => commands::cmd_remove(&config, &package, force, recursive, dry_run),
        Commands::Upgrade { packages, dry_run } => {
            commands::cmd_upgrade(&config, &packages, dry_run)
        }
        Commands::Resolve { package, kind } => {
            commands::cmd_resolve(&config, &package, kind.into())
        }
        Commands::Build { package } => commands::cmd_build(&config, &package),
        Commands::Rdepends { package } => commands::cmd_rdepends(&config, &package),
        Commands::Verify { package } => commands::cmd_verify(&config, package.as_deref()),
        Commands::Orphans { remove, dry_run } => commands::cmd_orphans(&config, remove, dry_run),
        Commands::Rollback { txn } => commands::cmd_rollback(&config, txn),
        Commands::History => commands::cmd_history(&config),
        Commands::Sweep => commands::cmd_sweep(&config),
        Commands::Status { clear } => commands::cmd_status(&config, clear),
    }
}
