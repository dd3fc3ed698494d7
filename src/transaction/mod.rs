// src/transaction/mod.rs

//! Transaction manager for install, upgrade and remove
//!
//! Every batch runs as one transaction with a monotonically assigned id, a
//! journal, and a directory for snapshots of the packages it touches. Each
//! package moves through:
//!
//! ```text
//! pending -> applied -> committed
//!    |          |
//!    +----------+-> failed -> rolled-back
//! ```
//!
//! If any package fails, everything already applied is rolled back in
//! reverse order and the remaining packages are never touched. A rollback
//! that cannot restore a package is terminal: the state directory is
//! flagged `INCONSISTENT` and the snapshot directory is kept for manual
//! recovery.
//!
//! Install, upgrade and remove of a package hold its advisory lock for the
//! whole transaction.

pub mod journal;
pub mod lock;
pub mod planner;
mod recovery;

pub use journal::{JournalRecord, JournalSummary, TransactionJournal};
pub use lock::PackageLock;
pub use planner::{Plan, PlannedAction, UpgradeClass, classify};
pub use recovery::Snapshot;

use crate::config::Config;
use crate::db::{InstalledPackage, StateDb};
use crate::error::{Error, Result};
use crate::filesystem::path::sanitize_path;
use crate::filesystem::{ProtectedPaths, prune_empty_parents};
use crate::hooks::{HookContext, HookExecutor};
use crate::recipe::{
    BuildArtifact, CookResult, DepKind, HookPoint, Kitchen, Recipe, RecipeSet, RecipeStore, Stage,
    Timing,
};
use crate::resolver::{self, DependencyGraph, ProvidesIndex};
use chrono::Utc;
use recovery::Applied;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Options for [`TransactionManager::install`]
#[derive(Debug, Clone, Copy, Default)]
pub struct InstallOptions {
    /// Report the plan only
    pub dry_run: bool,
    /// Mark the target as user-requested
    pub explicit: bool,
    /// Build the target again even if an artifact exists
    pub rebuild: bool,
    /// Install the target's optional dependencies too
    pub with_optional: bool,
}

/// Options for [`TransactionManager::remove`]
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOptions {
    /// Remove despite dependents, and remove essential packages
    pub force: bool,
    /// Remove every installed dependent first
    pub recursive: bool,
    /// Report the plan only
    pub dry_run: bool,
}

/// Manifest check of one installed package
#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub package: String,
    pub version: String,
    pub checked: usize,
    /// Manifest entries not present under the root
    pub missing: Vec<String>,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.missing.is_empty()
    }
}

/// System health as shown by `ibuild status`
#[derive(Debug, Clone)]
pub struct Status {
    pub installed: usize,
    /// Contents of the inconsistency marker
    pub inconsistency: Option<String>,
    /// Journals of transactions that never finished
    pub incomplete: Vec<PathBuf>,
}

/// One package of a transaction batch
#[derive(Debug, Clone)]
struct Step {
    recipe: Recipe,
    explicit: bool,
    rebuild: bool,
}

/// A running transaction
struct Transaction {
    id: u64,
    dir: PathBuf,
    journal: TransactionJournal,
    applied: Vec<Applied>,
    /// Held until the transaction is dropped
    locks: Vec<PackageLock>,
    started: Instant,
}

impl Transaction {
    /// Journal a record; a write failure is logged but does not stop the transaction
    fn record(&mut self, record: JournalRecord) {
        if let Err(e) = self.journal.write(record) {
            warn!("Failed to write journal of transaction {}: {}", self.id, e);
        }
    }

    /// Archive the journal and drop the snapshots
    fn finish(self) {
        let Transaction { id, dir, journal, .. } = self;
        if let Err(e) = journal.archive() {
            warn!("Failed to archive journal of transaction {}: {}", id, e);
        }
        if dir.exists()
            && let Err(e) = fs::remove_dir_all(&dir)
        {
            warn!("Failed to remove {}: {}", dir.display(), e);
        }
    }
}

/// Install, upgrade and remove packages against one system root
pub struct TransactionManager {
    store: RecipeStore,
    db: StateDb,
    kitchen: Kitchen,
    protected: ProtectedPaths,
    root: PathBuf,
    txn_dir: PathBuf,
}

impl TransactionManager {
    /// Manager wired from the loaded configuration
    pub fn new(config: &Config) -> Result<Self> {
        config.ensure_dirs()?;
        Ok(Self {
            store: RecipeStore::new(&config.paths.repo_dir),
            db: StateDb::open(&config.paths.state_dir)?,
            kitchen: Kitchen::from_config(config),
            protected: ProtectedPaths::with_extra(&config.remove.protected_paths),
            root: config.paths.root.clone(),
            txn_dir: config.paths.txn_dir.clone(),
        })
    }

    pub fn store(&self) -> &RecipeStore {
        &self.store
    }

    pub fn db(&self) -> &StateDb {
        &self.db
    }

    pub fn kitchen(&self) -> &Kitchen {
        &self.kitchen
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn hooks(&self) -> &HookExecutor {
        self.kitchen.hooks()
    }

    fn journal_dir(&self) -> PathBuf {
        self.txn_dir.join("journal")
    }

    /// Directory of the per-package lock files
    pub fn lock_dir(&self) -> PathBuf {
        self.txn_dir.join("locks")
    }

    /// Resolve against the current recipe set
    pub fn resolve(&self, target: &str, kind: DepKind) -> Result<Vec<String>> {
        resolver::resolve(&self.store.load_all()?, target, kind)
    }

    /// Build a package into its artifact triple without installing it
    pub fn build(&self, name: &str) -> Result<CookResult> {
        let recipe = self.store.get(name)?;
        self.warn_missing_build_deps(&recipe);
        self.kitchen.cook(&recipe)
    }

    /// Recipes and installed records that depend on `name`
    pub fn reverse_dependents(&self, name: &str) -> Result<Vec<String>> {
        let graph = self.installed_graph(&self.store.load_all()?, &self.db.list()?);
        Ok(graph.dependents(name))
    }

    /// Recipe edges of every kind plus the run deps recorded at install time
    ///
    /// Virtual names resolve to providers, installed ones included.
    fn installed_graph(&self, recipes: &RecipeSet, installed: &[InstalledPackage]) -> DependencyGraph {
        let provides = ProvidesIndex::with_installed(recipes, installed);
        let mut graph = DependencyGraph::from_recipes_with(recipes, DepKind::Both, &provides);
        for pkg in installed {
            let deps: Vec<String> = pkg
                .run_deps
                .iter()
                .map(|dep| provides.resolve_name(dep))
                .filter(|dep| *dep != pkg.name)
                .collect();
            graph.add_edges(&pkg.name, deps.iter().map(String::as_str));
        }
        graph
    }

    /// Whether an installed package is `name` or provides it
    fn satisfied(installed: &[InstalledPackage], name: &str) -> bool {
        installed
            .iter()
            .any(|p| p.name == name || p.provides.contains(name))
    }

    /// Refuse steps that would conflict with each other or with the system
    fn check_conflicts(&self, steps: &[Step], installed: &[InstalledPackage]) -> Result<()> {
        let batch: Vec<&Recipe> = steps.iter().map(|s| &s.recipe).collect();
        resolver::check_conflicts(&batch, installed)
    }

    // ---- install ----

    /// Install a package and any run-time dependencies it is missing
    ///
    /// Dependencies are installed first, each fully committed before its
    /// dependent starts. An existing artifact triple skips the build.
    /// Optional dependencies are only reported unless `with_optional` is set.
    /// A declared conflict with the batch or the system refuses the whole
    /// install, dry runs included.
    pub fn install(&self, name: &str, opts: InstallOptions) -> Result<Plan> {
        let recipes = self.store.load_all()?;
        let installed_pkgs = self.db.list()?;
        let is_installed = |n: &str| Self::satisfied(&installed_pkgs, n);

        let target_order = resolver::plan_install(&recipes, name, DepKind::Run, is_installed)?;
        // A virtual name installs its provider
        let target = target_order.last().cloned().unwrap_or_else(|| name.to_string());
        let name = target.as_str();

        let mut order: Vec<String> = Vec::new();
        if opts.with_optional
            && let Some(recipe) = recipes.get(name)
        {
            for optional in recipe.optional_deps.iter() {
                if is_installed(optional) {
                    continue;
                }
                match resolver::plan_install(&recipes, optional, DepKind::Run, is_installed) {
                    Ok(resolved) => order.extend(resolved),
                    Err(Error::RecipeNotFound(missing)) => {
                        warn!("{}: optional dependency {} has no recipe", name, missing)
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        order.extend(target_order);
        let mut seen = HashSet::new();
        order.retain(|pkg| seen.insert(pkg.clone()));

        let mut plan = Plan::new();
        let mut steps = Vec::new();
        for pkg in &order {
            let is_target = pkg == name;
            let installed = self.db.version_of(pkg)?;
            let Some(recipe) = recipes.get(pkg) else {
                plan.push(PlannedAction::Skip {
                    package: pkg.clone(),
                    reason: "installed without a recipe".to_string(),
                });
                continue;
            };

            let rebuild = is_target && opts.rebuild;
            if let Some(version) = &installed
                && !rebuild
            {
                plan.push(PlannedAction::Skip {
                    package: pkg.clone(),
                    reason: format!("{} already installed", version),
                });
                continue;
            }

            self.plan_step(&mut plan, recipe, installed, rebuild);
            steps.push(Step {
                recipe: recipe.clone(),
                explicit: is_target && opts.explicit,
                rebuild,
            });
        }

        if let Some(recipe) = recipes.get(name) {
            for optional in recipe.optional_deps.iter() {
                if !is_installed(optional) && !order.iter().any(|p| p == optional) {
                    info!("{}: optional dependency {} is not installed", name, optional);
                    plan.note_optional(name, optional);
                }
            }
        }

        self.check_conflicts(&steps, &installed_pkgs)?;
        if opts.dry_run || steps.is_empty() {
            if steps.is_empty() {
                info!("{} is already installed", name);
            }
            return Ok(plan);
        }
        self.execute("install", steps)?;
        Ok(plan)
    }

    fn plan_step(&self, plan: &mut Plan, recipe: &Recipe, installed: Option<String>, rebuild: bool) {
        if rebuild || self.kitchen.existing_artifact(recipe).is_none() {
            plan.push(PlannedAction::Build {
                package: recipe.name.clone(),
                version: recipe.version.clone(),
            });
        }
        plan.push(match installed {
            Some(from) => PlannedAction::Upgrade {
                package: recipe.name.clone(),
                from,
                to: recipe.version.clone(),
            },
            None => PlannedAction::Install {
                package: recipe.name.clone(),
                version: recipe.version.clone(),
            },
        });
    }

    // ---- upgrade ----

    /// Upgrade a batch of packages as one transaction
    ///
    /// Packages are classified against their recipes; up-to-date ones are
    /// skipped. If any package fails, the ones already applied are rolled
    /// back in reverse order and the rest are never touched.
    pub fn upgrade(&self, names: &[String], dry_run: bool) -> Result<Plan> {
        let recipes = self.store.load_all()?;
        let installed_pkgs = self.db.list()?;
        let order = self.batch_order(&recipes, &installed_pkgs, names)?;
        let requested: HashSet<&str> = names.iter().map(String::as_str).collect();

        let mut plan = Plan::new();
        let mut steps = Vec::new();
        for pkg in &order {
            let recipe = recipes
                .get(pkg)
                .ok_or_else(|| Error::RecipeNotFound(pkg.clone()))?;
            let installed = self.db.version_of(pkg)?;

            match classify(installed.as_deref(), &recipe.version) {
                UpgradeClass::UpToDate { installed } => {
                    info!("{} is up to date ({})", pkg, installed);
                    plan.push(PlannedAction::Skip {
                        package: pkg.clone(),
                        reason: format!("up to date ({})", installed),
                    });
                    continue;
                }
                UpgradeClass::NeedsInstall => self.plan_step(&mut plan, recipe, None, false),
                UpgradeClass::NeedsUpgrade { from } => {
                    self.plan_step(&mut plan, recipe, Some(from), false)
                }
            }
            steps.push(Step {
                recipe: recipe.clone(),
                explicit: requested.contains(pkg.as_str()),
                rebuild: false,
            });
        }

        if plan.is_noop() {
            info!("Nothing to upgrade");
            return Ok(plan);
        }
        self.check_conflicts(&steps, &installed_pkgs)?;
        if dry_run {
            return Ok(plan);
        }
        self.execute("upgrade", steps)?;
        Ok(plan)
    }

    /// Requested packages in dependency order
    ///
    /// Each request is resolved in turn and its order appended, keeping the
    /// requested packages plus run dependencies that are not installed yet.
    fn batch_order(
        &self,
        recipes: &RecipeSet,
        installed: &[InstalledPackage],
        names: &[String],
    ) -> Result<Vec<String>> {
        let requested: HashSet<&str> = names.iter().map(String::as_str).collect();
        let is_installed = |n: &str| Self::satisfied(installed, n);
        let mut order: Vec<String> = Vec::new();
        for name in names {
            let resolved = resolver::plan_install(recipes, name, DepKind::Run, is_installed)?;
            for pkg in resolved {
                let wanted = requested.contains(pkg.as_str()) || !is_installed(pkg.as_str());
                if wanted && !order.contains(&pkg) {
                    order.push(pkg);
                }
            }
        }
        Ok(order)
    }

    // ---- transaction execution ----

    fn execute(&self, operation: &str, steps: Vec<Step>) -> Result<()> {
        let id = lock::next_transaction_id(&self.txn_dir)?;
        let packages: Vec<String> = steps.iter().map(|s| s.recipe.name.clone()).collect();

        let mut journal = TransactionJournal::create(&self.journal_dir(), id)?;
        journal.write(JournalRecord::Begin {
            txn: id,
            operation: operation.to_string(),
            packages: packages.clone(),
            timestamp: Utc::now(),
        })?;

        info!("Transaction {} ({}): {}", id, operation, packages.join(", "));
        let mut txn = Transaction {
            id,
            dir: self.txn_dir.join(id.to_string()),
            journal,
            applied: Vec::new(),
            locks: Vec::new(),
            started: Instant::now(),
        };

        for step in &steps {
            if let Err(e) = self.apply(&mut txn, step) {
                error!("{} failed: {}", step.recipe.name, e);
                txn.record(JournalRecord::Failed {
                    package: step.recipe.name.clone(),
                    error: e.to_string(),
                });
                return self.rollback(txn, e);
            }
        }

        let duration_ms = txn.started.elapsed().as_millis() as u64;
        txn.record(JournalRecord::Committed { duration_ms });
        info!("Transaction {} committed in {}ms", id, duration_ms);
        txn.finish();
        Ok(())
    }

    /// Install one package inside a transaction
    fn apply(&self, txn: &mut Transaction, step: &Step) -> Result<()> {
        let recipe = &step.recipe;
        let name = &recipe.name;
        txn.locks.push(PackageLock::acquire(&self.lock_dir(), name)?);

        let prior = self.db.get(name)?;
        let snapshot = Snapshot::take(&txn.dir, name, prior, &self.kitchen.config().pkg_dir)?;
        txn.record(JournalRecord::Snapshot {
            package: name.clone(),
            prior_version: snapshot.prior_version().map(str::to_string),
            snapshot_dir: snapshot.dir.clone(),
        });

        let artifact = self.ensure_artifact(recipe, step.rebuild)?;
        let new_files = artifact.read_manifest()?;
        let prior_files = snapshot
            .prior
            .as_ref()
            .map(|p| p.files.clone())
            .unwrap_or_default();
        let was_explicit = snapshot.prior.as_ref().is_some_and(|p| p.explicit);

        // From here on the system root changes
        txn.applied.push(Applied {
            snapshot,
            new_files: new_files.clone(),
        });

        let ctx = HookContext::for_recipe(recipe).with_destdir(&self.root);
        self.hooks()
            .run_checked(HookPoint::new(Stage::Install, Timing::Pre), &ctx)?;

        // Files of the old version the new one no longer ships
        let keep: HashSet<&str> = new_files.iter().map(String::as_str).collect();
        let stale: Vec<String> = prior_files
            .into_iter()
            .filter(|f| !keep.contains(f.as_str()))
            .collect();
        if !stale.is_empty() {
            self.remove_files(&stale)?;
        }

        artifact.extract_to(&self.root)?;

        let mut record = InstalledPackage::new(name, &recipe.version);
        record.essential = recipe.essential;
        record.explicit = step.explicit || was_explicit;
        record.run_deps = recipe.run_deps.clone();
        record.optional_deps = recipe.optional_deps.clone();
        record.provides = recipe.provides.clone();
        record.conflicts = recipe.conflicts.clone();
        record.hooks = recipe.hooks.clone();
        record.artifact = Some(artifact.archive.clone());
        record.files = new_files;
        self.db.write(&record)?;

        self.hooks()
            .run_checked(HookPoint::new(Stage::Install, Timing::Post), &ctx)?;

        txn.record(JournalRecord::Applied {
            package: name.clone(),
            version: recipe.version.clone(),
        });
        info!("Installed {}-{}", name, recipe.version);
        Ok(())
    }

    /// Existing artifact triple, or a fresh build
    fn ensure_artifact(&self, recipe: &Recipe, rebuild: bool) -> Result<BuildArtifact> {
        if !rebuild && let Some(artifact) = self.kitchen.existing_artifact(recipe) {
            info!("Using existing artifact {}", artifact.archive.display());
            return Ok(artifact);
        }
        self.warn_missing_build_deps(recipe);
        Ok(self.kitchen.cook(recipe)?.artifact)
    }

    fn warn_missing_build_deps(&self, recipe: &Recipe) {
        for dep in recipe.build_deps.iter() {
            if !self.db.is_installed(dep) {
                warn!("{}: build dependency {} is not installed", recipe.name, dep);
            }
        }
    }

    /// Undo every applied package in reverse order
    ///
    /// A package that cannot be restored does not stop the walk: every
    /// other applied package is still put back. Returns `cause` after a
    /// clean rollback, `RollbackFailed` naming each unrestored package
    /// otherwise.
    fn rollback(&self, mut txn: Transaction, cause: Error) -> Result<()> {
        warn!(
            "Rolling back transaction {} ({} package(s))",
            txn.id,
            txn.applied.len()
        );

        let mut failures: Vec<(String, String)> = Vec::new();
        while let Some(applied) = txn.applied.pop() {
            let package = applied.snapshot.package.clone();
            match self.restore(&applied) {
                Ok(()) => txn.record(JournalRecord::RolledBack { package }),
                Err(reason) => {
                    error!("Rollback of {} in transaction {} failed: {}", package, txn.id, reason);
                    failures.push((package, reason));
                }
            }
        }

        if failures.is_empty() {
            info!("Transaction {} rolled back", txn.id);
            txn.finish();
            return Err(cause);
        }

        let mut details = format!(
            "transaction={}\nsnapshot={}\ncause={}\n",
            txn.id,
            txn.dir.display(),
            cause
        );
        for (package, reason) in &failures {
            txn.record(JournalRecord::RollbackFailed {
                package: package.clone(),
                error: reason.clone(),
            });
            details.push_str(&format!("package={}\nreason={}\n", package, reason));
        }
        if let Err(e) = self.db.flag_inconsistent(&details) {
            error!("Failed to write inconsistency marker: {}", e);
        }

        let (packages, reasons): (Vec<String>, Vec<String>) = failures
            .into_iter()
            .map(|(package, reason)| {
                let line = format!("{}: {}", package, reason);
                (package, line)
            })
            .unzip();
        error!(
            "Transaction {} left {} unrestored. Manual intervention required; snapshots kept in {}",
            txn.id,
            packages.join(", "),
            txn.dir.display()
        );
        Err(Error::RollbackFailed {
            transaction: txn.id,
            packages,
            reason: reasons.join("; "),
        })
    }

    // ---- remove ----

    /// Remove an installed package
    ///
    /// Refused while installed packages depend on it, unless `force` or
    /// `recursive` is set; recursive removal takes the dependents out first.
    /// Essential packages need `force` even when removed recursively.
    pub fn remove(&self, name: &str, opts: RemoveOptions) -> Result<Plan> {
        // Held from the dependents check until the record is gone
        let target_lock = PackageLock::acquire(&self.lock_dir(), name)?;
        let record = self
            .db
            .get(name)?
            .ok_or_else(|| Error::NotInstalled(name.to_string()))?;

        let recipes = self.store.load_all()?;
        let installed = self.db.list()?;
        let installed_names: BTreeSet<&str> = installed.iter().map(|p| p.name.as_str()).collect();
        let graph = self.installed_graph(&recipes, &installed);

        let dependents: Vec<String> = graph
            .dependents(name)
            .into_iter()
            .filter(|d| d != name && installed_names.contains(d.as_str()))
            .collect();

        if record.essential && !opts.force {
            return Err(Error::EssentialPackage(name.to_string()));
        }
        if !dependents.is_empty() && !opts.force && !opts.recursive {
            return Err(Error::UnsafeRemoval {
                package: name.to_string(),
                dependents,
            });
        }

        let mut targets: Vec<InstalledPackage> = Vec::new();
        if opts.recursive {
            for dependent in graph.transitive_dependents(name) {
                let Some(pkg) = installed.iter().find(|p| p.name == dependent) else {
                    continue;
                };
                if pkg.essential && !opts.force {
                    return Err(Error::EssentialPackage(pkg.name.clone()));
                }
                targets.push(pkg.clone());
            }
        } else if !dependents.is_empty() {
            warn!(
                "Forcing removal of {}; still required by {}",
                name,
                dependents.join(", ")
            );
        }
        targets.push(record);

        let mut plan = Plan::new();
        for pkg in &targets {
            plan.push(PlannedAction::Remove {
                package: pkg.name.clone(),
                version: pkg.version.clone(),
            });
        }
        if opts.dry_run {
            return Ok(plan);
        }

        let id = lock::next_transaction_id(&self.txn_dir)?;
        let mut journal = TransactionJournal::create(&self.journal_dir(), id)?;
        journal.write(JournalRecord::Begin {
            txn: id,
            operation: "remove".to_string(),
            packages: targets.iter().map(|p| p.name.clone()).collect(),
            timestamp: Utc::now(),
        })?;
        let mut txn = Transaction {
            id,
            dir: self.txn_dir.join(id.to_string()),
            journal,
            applied: Vec::new(),
            locks: Vec::new(),
            started: Instant::now(),
        };
        txn.locks.push(target_lock);

        for pkg in &targets {
            let locked = if pkg.name == name {
                Ok(())
            } else {
                PackageLock::acquire(&self.lock_dir(), &pkg.name).map(|lock| txn.locks.push(lock))
            };
            let result = locked.and_then(|()| self.remove_one(pkg, recipes.get(&pkg.name)));
            if let Err(e) = result {
                txn.record(JournalRecord::Failed {
                    package: pkg.name.clone(),
                    error: e.to_string(),
                });
                txn.finish();
                return Err(e);
            }
            txn.record(JournalRecord::Applied {
                package: pkg.name.clone(),
                version: pkg.version.clone(),
            });
        }

        let duration_ms = txn.started.elapsed().as_millis() as u64;
        txn.record(JournalRecord::Committed { duration_ms });
        txn.finish();
        Ok(plan)
    }

    /// Remove one package's files, then its record
    fn remove_one(&self, pkg: &InstalledPackage, recipe: Option<&Recipe>) -> Result<()> {
        let ctx = HookContext::for_installed(&pkg.name, &pkg.version, &pkg.hooks, recipe)
            .with_destdir(&self.root);
        self.hooks()
            .run_checked(HookPoint::new(Stage::Remove, Timing::Pre), &ctx)?;

        let removed = self.remove_files(&pkg.files)?;
        self.db.delete(&pkg.name)?;
        info!("Removed {}-{} ({} files)", pkg.name, pkg.version, removed);

        self.hooks()
            .run_checked(HookPoint::new(Stage::Remove, Timing::Post), &ctx)
    }

    /// Delete manifest entries under the root
    ///
    /// Protected paths are skipped with a warning; directories left empty
    /// are pruned. Entries already gone are not an error.
    fn remove_files(&self, files: &[String]) -> Result<usize> {
        let mut removed = 0;
        for entry in files.iter().rev() {
            let rel = sanitize_path(entry)?;
            if self.protected.is_protected(&rel) {
                warn!("Skipping protected path /{}", rel.display());
                continue;
            }

            let path = self.root.join(&rel);
            match fs::symlink_metadata(&path) {
                Ok(meta) if meta.is_dir() => {
                    debug!("Not removing directory {}", path.display());
                    continue;
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!("Already gone: {}", path.display());
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            fs::remove_file(&path).map_err(|e| {
                Error::IoError(format!("Failed to remove {}: {}", path.display(), e))
            })?;
            prune_empty_parents(&self.root, &path, &self.protected);
            removed += 1;
        }
        Ok(removed)
    }

    // ---- queries ----

    /// Check manifests against the root; all packages when `name` is `None`
    pub fn verify(&self, name: Option<&str>) -> Result<Vec<VerifyReport>> {
        let packages = match name {
            Some(name) => vec![
                self.db
                    .get(name)?
                    .ok_or_else(|| Error::NotInstalled(name.to_string()))?,
            ],
            None => self.db.list()?,
        };

        let mut reports = Vec::with_capacity(packages.len());
        for pkg in packages {
            let mut missing = Vec::new();
            for entry in &pkg.files {
                let path = self.root.join(sanitize_path(entry)?);
                if fs::symlink_metadata(&path).is_err() {
                    missing.push(entry.clone());
                }
            }
            if !missing.is_empty() {
                warn!("{}: {} file(s) missing", pkg.name, missing.len());
            }
            reports.push(VerifyReport {
                checked: pkg.files.len(),
                package: pkg.name,
                version: pkg.version,
                missing,
            });
        }
        Ok(reports)
    }

    /// Installed dependencies nothing needs any more
    /// Reinstall the snapshots a transaction left behind
    ///
    /// Only transactions whose journal is still live keep snapshots: those
    /// whose rollback failed and those that never finished. Packages already
    /// rolled back are skipped, the rest are restored newest first. On
    /// success the journal is archived, the snapshots are dropped and an
    /// inconsistency marker naming this transaction is cleared. Returns the
    /// restored packages.
    pub fn rollback_transaction(&self, id: u64) -> Result<Vec<String>> {
        let summary = self
            .history()?
            .into_iter()
            .find(|s| s.txn == id && !s.archived)
            .ok_or(Error::NoSnapshot(id))?;
        let dir = self.txn_dir.join(id.to_string());
        if !dir.is_dir() {
            return Err(Error::NoSnapshot(id));
        }

        let done: HashSet<&str> = summary
            .records
            .iter()
            .filter_map(|r| match r {
                JournalRecord::RolledBack { package } => Some(package.as_str()),
                _ => None,
            })
            .collect();
        let mut pending: Vec<&str> = Vec::new();
        for record in &summary.records {
            if let JournalRecord::Snapshot { package, .. } = record
                && !done.contains(package.as_str())
                && !pending.contains(&package.as_str())
            {
                pending.push(package);
            }
        }

        info!("Rolling back transaction {} ({} package(s))", id, pending.len());
        let mut journal = TransactionJournal::open(summary.path.clone())?;
        let mut locks = Vec::new();
        let mut restored = Vec::new();
        let mut failures: Vec<(String, String)> = Vec::new();
        for package in pending.into_iter().rev() {
            locks.push(PackageLock::acquire(&self.lock_dir(), package)?);
            let applied = Applied {
                snapshot: Snapshot::load(&dir, package)?,
                new_files: Vec::new(),
            };
            match self.restore(&applied) {
                Ok(()) => {
                    journal.write(JournalRecord::RolledBack {
                        package: package.to_string(),
                    })?;
                    restored.push(package.to_string());
                }
                Err(reason) => {
                    error!("Cannot restore {}: {}", package, reason);
                    journal.write(JournalRecord::RollbackFailed {
                        package: package.to_string(),
                        error: reason.clone(),
                    })?;
                    failures.push((package.to_string(), reason));
                }
            }
        }

        if !failures.is_empty() {
            let (packages, reasons): (Vec<String>, Vec<String>) = failures
                .into_iter()
                .map(|(package, reason)| {
                    let line = format!("{}: {}", package, reason);
                    (package, line)
                })
                .unzip();
            return Err(Error::RollbackFailed {
                transaction: id,
                packages,
                reason: reasons.join("; "),
            });
        }

        journal.write(JournalRecord::Recovered {
            packages: restored.clone(),
        })?;
        journal.archive()?;
        if let Err(e) = fs::remove_dir_all(&dir) {
            warn!("Failed to remove {}: {}", dir.display(), e);
        }
        if let Some(marker) = self.db.inconsistency()?
            && marker.contains(&format!("transaction={}\n", id))
        {
            self.db.clear_inconsistent()?;
            info!("Cleared inconsistency marker of transaction {}", id);
        }
        info!("Transaction {} rolled back: {}", id, restored.join(", "));
        Ok(restored)
    }

    /// Installed packages nobody asked for and nothing installed needs
    pub fn orphans(&self) -> Result<Vec<String>> {
        let installed = self.db.list()?;
        let provides = ProvidesIndex::with_installed(&RecipeSet::new(), &installed);
        let mut needed: HashSet<String> = HashSet::new();
        for pkg in &installed {
            for dep in pkg.run_deps.iter() {
                let real = provides.resolve_name(dep);
                if real != pkg.name {
                    needed.insert(real);
                }
            }
        }
        Ok(installed
            .iter()
            .filter(|p| !p.explicit && !needed.contains(&p.name))
            .map(|p| p.name.clone())
            .collect())
    }

    /// Remove orphans until none are left
    ///
    /// Removing one orphan can orphan its own dependencies, so the scan
    /// repeats. Essential orphans are kept with a warning. Returns the
    /// removed packages in removal order.
    pub fn remove_orphans(&self, dry_run: bool) -> Result<Vec<String>> {
        let mut removed: Vec<String> = Vec::new();
        let mut kept: BTreeSet<String> = BTreeSet::new();
        loop {
            let candidates: Vec<String> = self
                .orphans()?
                .into_iter()
                .filter(|name| !kept.contains(name))
                .collect();
            if candidates.is_empty() || dry_run {
                if dry_run {
                    removed.extend(candidates);
                }
                return Ok(removed);
            }

            for name in candidates {
                match self.remove(&name, RemoveOptions::default()) {
                    Ok(_) => removed.push(name),
                    Err(Error::EssentialPackage(_)) => {
                        warn!("Keeping essential orphan {}", name);
                        kept.insert(name);
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }

    /// Live and archived transaction journals
    pub fn history(&self) -> Result<Vec<JournalSummary>> {
        journal::list_journals(&self.journal_dir())
    }

    pub fn status(&self) -> Result<Status> {
        Ok(Status {
            installed: self.db.list()?.len(),
            inconsistency: self.db.inconsistency()?,
            incomplete: journal::find_incomplete_journals(&self.journal_dir())?,
        })
    }

    /// Remove the inconsistency marker after manual repair
    pub fn clear_inconsistent(&self) -> Result<()> {
        self.db.clear_inconsistent()
    }
}
