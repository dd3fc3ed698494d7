// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: package name
fn package_arg() -> Arg {
    Arg::new("package").required(true).help("Package name")
}

/// Common argument: dry run
fn dry_run_arg() -> Arg {
    Arg::new("dry_run")
        .long("dry-run")
        .action(ArgAction::SetTrue)
        .help("Show what would be done without doing it")
}

fn build_cli() -> Command {
    Command::new("ibuild")
        .version(env!("CARGO_PKG_VERSION"))
        .author("ibuild Contributors")
        .about("Source/binary package manager with sandboxed builds and transactional upgrades")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .global(true)
                .help("Configuration file (overrides the default lookup)"),
        )
        .arg(
            Arg::new("root")
                .long("root")
                .value_name("DIR")
                .global(true)
                .help("Install root directory"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .global(true)
                .help("More log output (-v debug, -vv trace)"),
        )
        .subcommand(
            Command::new("install")
                .about("Install a package and its missing run-time dependencies")
                .arg(package_arg())
                .arg(dry_run_arg())
                .arg(
                    Arg::new("rebuild")
                        .long("rebuild")
                        .action(ArgAction::SetTrue)
                        .help("Build again even if an artifact exists"),
                )
                .arg(
                    Arg::new("with-optional")
                        .long("with-optional")
                        .action(ArgAction::SetTrue)
                        .help("Install optional dependencies too"),
                ),
        )
        .subcommand(
            Command::new("remove")
                .about("Remove an installed package")
                .arg(package_arg())
                .arg(
                    Arg::new("force")
                        .long("force")
                        .action(ArgAction::SetTrue)
                        .help("Remove despite dependents; required for essential packages"),
                )
                .arg(
                    Arg::new("recursive")
                        .long("recursive")
                        .action(ArgAction::SetTrue)
                        .help("Remove installed dependents first"),
                )
                .arg(dry_run_arg()),
        )
        .subcommand(
            Command::new("upgrade")
                .about("Upgrade packages as one transaction")
                .arg(
                    Arg::new("packages")
                        .required(true)
                        .num_args(1..)
                        .help("Package names"),
                )
                .arg(dry_run_arg()),
        )
        .subcommand(
            Command::new("resolve")
                .about("Print the dependency order for a package")
                .arg(package_arg())
                .arg(
                    Arg::new("kind")
                        .long("kind")
                        .value_parser(["build", "run", "both"])
                        .default_value("both")
                        .help("Which dependencies to follow"),
                ),
        )
        .subcommand(
            Command::new("build")
                .about("Build a package into its artifact triple without installing")
                .arg(package_arg()),
        )
        .subcommand(
            Command::new("rdepends")
                .about("Show what depends on a package")
                .arg(package_arg()),
        )
        .subcommand(
            Command::new("verify")
                .about("Check installed files against their manifests")
                .arg(Arg::new("package").help("Package name (all packages if omitted)")),
        )
        .subcommand(
            Command::new("orphans")
                .about("List installed dependencies nothing needs any more")
                .arg(
                    Arg::new("remove")
                        .long("remove")
                        .action(ArgAction::SetTrue)
                        .help("Remove them, repeating until none are left"),
                )
                .arg(dry_run_arg()),
        )
        .subcommand(
            Command::new("rollback")
                .about("Reinstall the snapshots a failed or interrupted transaction kept")
                .arg(
                    Arg::new("txn")
                        .required(true)
                        .help("Transaction id (see `ibuild history`)"),
                ),
        )
        .subcommand(Command::new("history").about("Show transaction history"))
        .subcommand(Command::new("sweep").about("Remove orphaned sandbox directories"))
        .subcommand(
            Command::new("status")
                .about("Show system status and inconsistency flags")
                .arg(
                    Arg::new("clear")
                        .long("clear")
                        .action(ArgAction::SetTrue)
                        .help("Clear the inconsistency marker after manual repair"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("ibuild.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
