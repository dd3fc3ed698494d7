// src/hooks/mod.rs

//! Lifecycle hook execution
//!
//! Every stage boundary (`<stage>_<timing>`) polls three providers in a
//! fixed order and runs every hook that exists:
//!
//! 1. global script: `<hooks_dir>/<stage>_<timing>`
//! 2. inline command: the recipe's `hook_<stage>_<timing>` key, or for an
//!    installed package the copy kept in its state record
//! 3. package-local script: `<package_dir>/hooks/<stage>_<timing>`
//!
//! Hooks are non-critical unless flagged: global hooks through the
//! `hooks.critical` config list, inline and local hooks through the
//! recipe's `hook_<stage>_<timing>_critical` key. A non-critical failure is
//! logged and the next provider runs; a critical failure stops the rest.
//!
//! All hook output is appended to `<log_dir>/<package>.hooks.log`.

use crate::container::run_with_timeout;
use crate::error::{Error, Result};
use crate::recipe::{HookPoint, HookSpec, Recipe};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for one hook invocation
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// What a hook runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookScript {
    /// Script file executed with `sh <path>`
    File(PathBuf),
    /// Command line executed with `sh -c`
    Inline(String),
}

/// A hook found by a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookCommand {
    pub script: HookScript,
    pub critical: bool,
}

/// Package and paths a hook runs against
#[derive(Debug, Clone)]
pub struct HookContext<'a> {
    pub package: &'a str,
    pub version: &'a str,
    /// Recipe, when one is available (host removal may not have it)
    pub recipe: Option<&'a Recipe>,
    /// Inline bindings recorded at install time; take precedence over the recipe's
    pub recorded: Option<&'a BTreeMap<HookPoint, HookSpec>>,
    /// Working directory, usually the extracted source tree
    pub workdir: Option<&'a Path>,
    /// Stage root exported as `DESTDIR`
    pub destdir: Option<&'a Path>,
}

impl<'a> HookContext<'a> {
    pub fn for_recipe(recipe: &'a Recipe) -> Self {
        Self {
            package: &recipe.name,
            version: &recipe.version,
            recipe: Some(recipe),
            recorded: None,
            workdir: None,
            destdir: None,
        }
    }

    /// Context for an installed package, with or without its recipe
    pub fn for_installed(
        package: &'a str,
        version: &'a str,
        recorded: &'a BTreeMap<HookPoint, HookSpec>,
        recipe: Option<&'a Recipe>,
    ) -> Self {
        Self {
            package,
            version,
            recipe,
            recorded: Some(recorded),
            workdir: None,
            destdir: None,
        }
    }

    pub fn with_workdir(mut self, workdir: &'a Path) -> Self {
        self.workdir = Some(workdir);
        self
    }

    pub fn with_destdir(mut self, destdir: &'a Path) -> Self {
        self.destdir = Some(destdir);
        self
    }

    fn inline_spec(&self, point: HookPoint) -> Option<&'a HookSpec> {
        match self.recorded {
            Some(recorded) => recorded.get(&point),
            None => self.recipe?.hook(point),
        }
    }

    fn recipe_critical(&self, point: HookPoint) -> bool {
        self.inline_spec(point).is_some_and(|spec| spec.critical)
    }
}

/// One source of hooks
pub trait HookProvider: Send + Sync {
    /// Short label used in logs and errors
    fn name(&self) -> &'static str;

    /// The hook bound at `point`, if this provider has one
    fn lookup(&self, point: HookPoint, ctx: &HookContext<'_>) -> Option<HookCommand>;
}

/// Site-wide scripts in the hooks directory
#[derive(Debug, Clone)]
pub struct GlobalScriptProvider {
    dir: PathBuf,
    critical: BTreeSet<String>,
}

impl GlobalScriptProvider {
    pub fn new(dir: impl Into<PathBuf>, critical: impl IntoIterator<Item = String>) -> Self {
        Self {
            dir: dir.into(),
            critical: critical.into_iter().collect(),
        }
    }
}

impl HookProvider for GlobalScriptProvider {
    fn name(&self) -> &'static str {
        "global"
    }

    fn lookup(&self, point: HookPoint, _ctx: &HookContext<'_>) -> Option<HookCommand> {
        let name = point.name();
        let path = self.dir.join(&name);
        path.is_file().then(|| HookCommand {
            script: HookScript::File(path),
            critical: self.critical.contains(&name),
        })
    }
}

/// `hook_<stage>_<timing>` commands from the recipe or the state record
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineProvider;

impl HookProvider for InlineProvider {
    fn name(&self) -> &'static str {
        "inline"
    }

    fn lookup(&self, point: HookPoint, ctx: &HookContext<'_>) -> Option<HookCommand> {
        let spec = ctx.inline_spec(point)?;
        let command = spec.command.as_ref()?;
        Some(HookCommand {
            script: HookScript::Inline(command.clone()),
            critical: spec.critical,
        })
    }
}

/// Scripts shipped next to the recipe in `hooks/`
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalScriptProvider;

impl HookProvider for LocalScriptProvider {
    fn name(&self) -> &'static str {
        "local"
    }

    fn lookup(&self, point: HookPoint, ctx: &HookContext<'_>) -> Option<HookCommand> {
        let dir = ctx.recipe?.package_dir.as_ref()?;
        let path = dir.join("hooks").join(point.name());
        path.is_file().then(|| HookCommand {
            script: HookScript::File(path),
            critical: ctx.recipe_critical(point),
        })
    }
}

/// How a single hook invocation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    Ran { exit_code: i32 },
    TimedOut,
    SpawnFailed(String),
}

impl HookOutcome {
    pub fn success(&self) -> bool {
        matches!(self, HookOutcome::Ran { exit_code: 0 })
    }

    fn describe(&self) -> String {
        match self {
            HookOutcome::Ran { exit_code } => format!("exit code {}", exit_code),
            HookOutcome::TimedOut => "timed out".to_string(),
            HookOutcome::SpawnFailed(reason) => format!("spawn failed: {}", reason),
        }
    }
}

/// Overall result of running a hook point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStatus {
    Success,
    NonFatalFailure,
    FatalFailure,
}

/// One provider's invocation
#[derive(Debug, Clone)]
pub struct HookRun {
    pub source: &'static str,
    pub critical: bool,
    pub outcome: HookOutcome,
}

/// Everything that ran at one hook point
#[derive(Debug, Clone)]
pub struct HookReport {
    pub package: String,
    pub point: HookPoint,
    pub runs: Vec<HookRun>,
    pub status: HookStatus,
}

impl HookReport {
    /// `HookFailed` for a fatal report, `Ok` otherwise
    pub fn into_result(self) -> Result<()> {
        if self.status != HookStatus::FatalFailure {
            return Ok(());
        }
        let failed = self
            .runs
            .iter()
            .find(|run| run.critical && !run.outcome.success());
        Err(Error::HookFailed {
            package: self.package.clone(),
            hook: self.point.name(),
            source_name: failed.map_or("unknown", |r| r.source).to_string(),
            reason: failed.map_or_else(String::new, |r| r.outcome.describe()),
        })
    }
}

/// Runs hook points against the provider list
pub struct HookExecutor {
    providers: Vec<Box<dyn HookProvider>>,
    log_dir: PathBuf,
    timeout: Duration,
}

impl HookExecutor {
    /// Executor with the standard provider order
    pub fn new(hooks_dir: impl Into<PathBuf>, log_dir: impl Into<PathBuf>) -> Self {
        Self::with_providers(
            vec![
                Box::new(GlobalScriptProvider::new(hooks_dir, Vec::new())),
                Box::new(InlineProvider),
                Box::new(LocalScriptProvider),
            ],
            log_dir,
        )
    }

    /// Executor configured from the loaded configuration
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::with_providers(
            vec![
                Box::new(GlobalScriptProvider::new(
                    &config.paths.hooks_dir,
                    config.hooks.critical.iter().cloned(),
                )),
                Box::new(InlineProvider),
                Box::new(LocalScriptProvider),
            ],
            &config.paths.log_dir,
        )
        .with_timeout(Duration::from_secs(config.hooks.timeout_secs))
    }

    pub fn with_providers(
        providers: Vec<Box<dyn HookProvider>>,
        log_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            providers,
            log_dir: log_dir.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Per-package hook log
    pub fn log_path(&self, package: &str) -> PathBuf {
        self.log_dir.join(format!("{}.hooks.log", package))
    }

    /// Run every hook bound at `point`
    pub fn run(&self, point: HookPoint, ctx: &HookContext<'_>) -> HookReport {
        let mut runs = Vec::new();
        let mut status = HookStatus::Success;

        for provider in &self.providers {
            let Some(hook) = provider.lookup(point, ctx) else {
                continue;
            };

            info!(
                "Running {} {} hook for {}",
                provider.name(),
                point,
                ctx.package
            );
            let outcome = self.invoke(provider.name(), point, &hook, ctx);
            let failed = !outcome.success();

            if failed {
                if hook.critical {
                    warn!(
                        "Critical {} hook {} for {} failed: {}",
                        provider.name(),
                        point,
                        ctx.package,
                        outcome.describe()
                    );
                } else {
                    warn!(
                        "{} hook {} for {} failed ({}), continuing",
                        provider.name(),
                        point,
                        ctx.package,
                        outcome.describe()
                    );
                }
            }

            runs.push(HookRun {
                source: provider.name(),
                critical: hook.critical,
                outcome,
            });

            if failed && hook.critical {
                status = HookStatus::FatalFailure;
                break;
            }
            if failed {
                status = HookStatus::NonFatalFailure;
            }
        }

        HookReport {
            package: ctx.package.to_string(),
            point,
            runs,
            status,
        }
    }

    /// Run and convert a fatal report into `HookFailed`
    pub fn run_checked(&self, point: HookPoint, ctx: &HookContext<'_>) -> Result<()> {
        self.run(point, ctx).into_result()
    }

    fn invoke(
        &self,
        source: &str,
        point: HookPoint,
        hook: &HookCommand,
        ctx: &HookContext<'_>,
    ) -> HookOutcome {
        let mut cmd = Command::new("sh");
        match &hook.script {
            HookScript::File(path) => cmd.arg(path),
            HookScript::Inline(command) => cmd.arg("-c").arg(command),
        };
        if let Some(dir) = ctx.workdir
            && dir.is_dir()
        {
            cmd.current_dir(dir);
        }
        cmd.env("IBUILD_PACKAGE", ctx.package)
            .env("IBUILD_VERSION", ctx.version)
            .env("IBUILD_STAGE", point.stage.as_str())
            .env("IBUILD_TIMING", point.timing.as_str());
        if let Some(destdir) = ctx.destdir {
            cmd.env("DESTDIR", destdir);
        }

        let (outcome, stdout, stderr) = match run_with_timeout(&mut cmd, self.timeout) {
            Ok(out) if out.timed_out => (HookOutcome::TimedOut, out.stdout, out.stderr),
            Ok(out) => (
                HookOutcome::Ran {
                    exit_code: out.code,
                },
                out.stdout,
                out.stderr,
            ),
            Err(e) => (
                HookOutcome::SpawnFailed(e.to_string()),
                String::new(),
                String::new(),
            ),
        };

        if let Err(e) = self.append_log(ctx.package, source, point, &outcome, &stdout, &stderr) {
            warn!("Failed to write hook log for {}: {}", ctx.package, e);
        }
        outcome
    }

    fn append_log(
        &self,
        package: &str,
        source: &str,
        point: HookPoint,
        outcome: &HookOutcome,
        stdout: &str,
        stderr: &str,
    ) -> std::io::Result<()> {
        fs::create_dir_all(&self.log_dir)?;
        let path = self.log_path(package);
        let mut log = OpenOptions::new().create(true).append(true).open(&path)?;

        writeln!(
            log,
            "=== {} {} [{}] {} ===",
            Utc::now().to_rfc3339(),
            point,
            source,
            outcome.describe()
        )?;
        if !stdout.is_empty() {
            writeln!(log, "--- stdout ---")?;
            log.write_all(stdout.as_bytes())?;
            if !stdout.ends_with('\n') {
                writeln!(log)?;
            }
        }
        if !stderr.is_empty() {
            writeln!(log, "--- stderr ---")?;
            log.write_all(stderr.as_bytes())?;
            if !stderr.ends_with('\n') {
                writeln!(log)?;
            }
        }
        debug!("Appended hook output to {}", path.display());
        Ok(())
    }
}
