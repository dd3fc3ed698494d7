// src/recipe/kitchen/cook.rs

//! Cook: the actual build execution for a single recipe

use crate::container::{BUILD_DIR, SANDBOX_PATH, STAGE_DIR, SandboxGuard, SandboxRequest};
use crate::error::{Error, Result};
use crate::filesystem::path::sanitize_filename;
use crate::hooks::HookContext;
use crate::recipe::{HookPoint, Recipe, Stage, Timing};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::Kitchen;
use super::archive::{apply_patch, extract_archive};
use super::artifact::BuildArtifact;

/// A single cook operation
pub struct Cook<'a> {
    pub(super) kitchen: &'a Kitchen,
    pub(super) recipe: &'a Recipe,
    /// Sandbox the build commands run in; destroyed when the cook is dropped
    pub(super) sandbox: SandboxGuard<'a>,
    /// Source tree, as an in-sandbox path under `/build`
    pub(super) source_dir: String,
    /// Build log accumulator
    pub(super) log: String,
    /// Warnings
    pub(super) warnings: Vec<String>,
}

impl<'a> Cook<'a> {
    pub(super) fn new(kitchen: &'a Kitchen, recipe: &'a Recipe) -> Result<Self> {
        let sandbox = kitchen
            .sandboxes
            .scoped(&recipe.name, &sandbox_request(recipe))?;
        Ok(Self {
            kitchen,
            recipe,
            sandbox,
            source_dir: BUILD_DIR.to_string(),
            log: String::new(),
            warnings: Vec::new(),
        })
    }

    /// Run every pipeline stage with its hook boundaries
    pub(super) fn run(&mut self) -> Result<BuildArtifact> {
        let mut artifact = None;
        for stage in Stage::PIPELINE {
            self.hook(stage, Timing::Pre)?;
            match stage {
                Stage::Fetch => self.fetch()?,
                Stage::Patch => self.patch()?,
                Stage::Configure | Stage::Build | Stage::Stage => self.simmer(stage)?,
                Stage::Package => artifact = Some(self.plate()?),
                Stage::Install | Stage::Remove => {}
            }
            self.hook(stage, Timing::Post)?;
        }

        artifact.ok_or_else(|| Error::BuildCommandFailed {
            package: self.recipe.name.clone(),
            stage: Stage::Package.to_string(),
            code: 0,
        })
    }

    fn host_source_dir(&self) -> PathBuf {
        self.sandbox.host_path(&self.source_dir)
    }

    fn hook(&mut self, stage: Stage, timing: Timing) -> Result<()> {
        let point = HookPoint::new(stage, timing);
        let workdir = self.host_source_dir();
        let destdir = self.sandbox.host_path(STAGE_DIR);
        let ctx = HookContext::for_recipe(self.recipe)
            .with_workdir(&workdir)
            .with_destdir(&destdir);

        let report = self.kitchen.hooks.run(point, &ctx);
        if !report.runs.is_empty() {
            self.log_line(&format!("=== hook {} ({:?}) ===", point, report.status));
        }
        report.into_result()
    }

    /// Fetch the source into the cache, verify it and unpack it under `/build`
    pub(super) fn fetch(&mut self) -> Result<()> {
        let cached = self.kitchen.fetch_source(self.recipe)?;
        self.log_line(&format!("Fetched source: {}", self.recipe.source));

        let build_dir = self.sandbox.host_path(BUILD_DIR);
        extract_archive(&cached, &source_basename(&self.recipe.source), &build_dir)?;

        // Find the actual source directory (often archives have a top-level dir)
        let entries: Vec<_> = fs::read_dir(&build_dir)?.filter_map(|e| e.ok()).collect();
        if entries.len() == 1 && entries[0].file_type().map(|t| t.is_dir()).unwrap_or(false) {
            self.source_dir = format!(
                "{}/{}",
                BUILD_DIR,
                entries[0].file_name().to_string_lossy()
            );
        }
        debug!("Source directory: {}", self.source_dir);
        self.log_line(&format!("Extracted source to {}", self.source_dir));
        Ok(())
    }

    /// Patch files in application order
    ///
    /// An explicit `patches=` list is applied as written; otherwise every
    /// `*.patch` and `*.diff` file in the recipe's `patches/` directory,
    /// sorted by file name.
    pub(super) fn patch_files(&self) -> Result<Vec<(String, PathBuf)>> {
        let Some(package_dir) = &self.recipe.package_dir else {
            return Ok(Vec::new());
        };
        let patch_dir = package_dir.join("patches");

        let names: Vec<String> = match &self.recipe.patches {
            Some(list) => list.clone(),
            None => {
                if !patch_dir.is_dir() {
                    return Ok(Vec::new());
                }
                let mut names: Vec<String> = fs::read_dir(&patch_dir)?
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .filter(|name| is_patch_file(name))
                    .collect();
                names.sort();
                names
            }
        };

        names
            .into_iter()
            .map(|name| {
                let path = patch_dir.join(sanitize_filename(&name)?);
                Ok((name, path))
            })
            .collect()
    }

    pub(super) fn patch(&mut self) -> Result<()> {
        let source_dir = self.host_source_dir();
        for (name, path) in self.patch_files()? {
            if !path.is_file() {
                return Err(Error::PatchFailed {
                    package: self.recipe.name.clone(),
                    patch: name,
                    reason: format!("{} not found", path.display()),
                });
            }

            info!("Applying patch: {}", name);
            apply_patch(&source_dir, &path).map_err(|reason| Error::PatchFailed {
                package: self.recipe.name.clone(),
                patch: name.clone(),
                reason,
            })?;
            self.log_line(&format!("Applied patch: {}", name));
        }
        Ok(())
    }

    /// Environment every build command runs with
    fn build_env(&self) -> Vec<(String, String)> {
        vec![
            (
                "DESTDIR".to_string(),
                self.sandbox.visible_path(STAGE_DIR).display().to_string(),
            ),
            (
                "MAKEFLAGS".to_string(),
                format!("-j{}", self.kitchen.config.jobs),
            ),
            ("IBUILD_PACKAGE".to_string(), self.recipe.name.clone()),
            ("IBUILD_VERSION".to_string(), self.recipe.version.clone()),
            ("PATH".to_string(), SANDBOX_PATH.to_string()),
        ]
    }

    /// Configure, build or stage-install inside the sandbox
    pub(super) fn simmer(&mut self, stage: Stage) -> Result<()> {
        if let Some(command) = self.recipe.stage_command(stage) {
            self.run_build_step(stage.as_str(), &command)?;
        }

        // Tests run between build and install; failures only warn
        if stage == Stage::Build
            && let Some(check) = self.recipe.check.clone()
            && let Err(e) = self.run_build_step("check", &check)
        {
            warn!("{}: checks failed: {}", self.recipe.name, e);
            self.warnings.push(format!("Tests failed: {}", e));
        }
        Ok(())
    }

    /// Run a build step in the sandbox
    fn run_build_step(&mut self, phase: &str, command: &str) -> Result<()> {
        info!("Running {} phase for {}", phase, self.recipe.name);
        debug!("Command: {}", command);

        let env = self.build_env();
        let workdir = self
            .sandbox
            .visible_path(&self.source_dir)
            .display()
            .to_string();
        let output = self.sandbox.exec(command, &workdir, &env)?;

        self.log_build_output(phase, &output.stdout, &output.stderr);
        if output.timed_out {
            self.log_line(&format!("{} phase timed out", phase));
        }

        if !output.success() {
            return Err(Error::BuildCommandFailed {
                package: self.recipe.name.clone(),
                stage: phase.to_string(),
                code: output.code,
            });
        }
        Ok(())
    }

    /// Package the stage directory
    pub(super) fn plate(&mut self) -> Result<BuildArtifact> {
        let stage_dir = self.sandbox.host_path(STAGE_DIR);
        let artifact = BuildArtifact::create(&self.kitchen.config.pkg_dir, self.recipe, &stage_dir)?;
        self.log_line(&format!("Created package: {}", artifact.archive.display()));
        Ok(artifact)
    }

    pub(super) fn log_line(&mut self, line: &str) {
        self.log.push_str(line);
        self.log.push('\n');
    }

    /// Log build step output (stdout/stderr) with a phase header
    fn log_build_output(&mut self, phase: &str, stdout: &str, stderr: &str) {
        self.log_line(&format!("=== {} ===", phase));
        if !stdout.is_empty() {
            self.log.push_str(stdout);
            self.log.push('\n');
        }
        if !stderr.is_empty() {
            self.log.push_str(stderr);
            self.log.push('\n');
        }
    }
}

/// What a recipe asks of its sandbox beyond the defaults
fn sandbox_request(recipe: &Recipe) -> SandboxRequest {
    SandboxRequest {
        allow_network: recipe.network,
        read_only_binds: recipe.ro_binds.clone(),
    }
}

/// Directory-scanned patches: `*.patch` and `*.diff` only
fn is_patch_file(name: &str) -> bool {
    matches!(
        Path::new(name).extension().and_then(|e| e.to_str()),
        Some("patch" | "diff")
    )
}

/// File name of a source location, without query strings
pub(super) fn source_basename(source: &str) -> String {
    let trimmed = source.strip_prefix("file://").unwrap_or(source);
    let trimmed = trimmed.split(['?', '#']).next().unwrap_or(trimmed);
    Path::new(trimmed)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "source".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_basename() {
        assert_eq!(
            source_basename("https://example.com/dl/foo-1.0.tar.gz?raw=1"),
            "foo-1.0.tar.gz"
        );
        assert_eq!(source_basename("file:///srv/foo.tgz"), "foo.tgz");
        assert_eq!(source_basename("foo-1.0.tar.xz"), "foo-1.0.tar.xz");
    }

    #[test]
    fn test_sandbox_request_follows_recipe() {
        let mut recipe = Recipe::new("foo", "1.0", "foo.tgz");
        assert_eq!(sandbox_request(&recipe), SandboxRequest::default());

        recipe.network = true;
        recipe.ro_binds = vec![PathBuf::from("/opt/sdk")];
        let request = sandbox_request(&recipe);
        assert!(request.allow_network);
        assert_eq!(request.read_only_binds, vec![PathBuf::from("/opt/sdk")]);
    }

    #[test]
    fn test_only_patch_and_diff_files_are_scanned() {
        assert!(is_patch_file("0001-fix-build.patch"));
        assert!(is_patch_file("musl.diff"));
        assert!(!is_patch_file("README"));
        assert!(!is_patch_file("series"));
        assert!(!is_patch_file("notes.patch.txt"));
    }
}
