// src/recipe/kitchen/mod.rs

//! Kitchen: the sandboxed build pipeline for cooking recipes
//!
//! A cook runs the fixed stage sequence
//! `fetch -> patch -> configure -> build -> stage -> package`, with pre and
//! post hooks around every stage:
//!
//! - **fetch**: download (or copy) the source into the cache, verify its
//!   digest, unpack it under `/build`
//! - **patch**: apply the recipe's patches in order
//! - **configure / build / stage**: run the recipe's commands in the
//!   sandbox with `DESTDIR` pointing at `/stage`
//! - **package**: archive the stage directory into the artifact triple
//!
//! The sandbox is torn down on every exit path. The build log is written to
//! `<log_dir>/<name>-<version>.build.log`.

mod archive;
mod artifact;
mod config;
mod cook;

pub use archive::sha256_file;
pub use artifact::{BuildArtifact, manifest_entries, render_manifest};
pub use config::{CookResult, KitchenConfig};
pub use cook::Cook;

use crate::config::Config;
use crate::container::{SandboxManager, SandboxOptions};
use crate::error::{Error, Result};
use crate::hooks::HookExecutor;
use crate::recipe::Recipe;
use archive::{copy_local, download_file, is_remote};
use cook::source_basename;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// The Kitchen: where recipes are cooked
pub struct Kitchen {
    pub(crate) config: KitchenConfig,
    pub(crate) sandboxes: SandboxManager,
    pub(crate) hooks: HookExecutor,
}

impl Kitchen {
    pub fn new(config: KitchenConfig, sandboxes: SandboxManager, hooks: HookExecutor) -> Self {
        Self {
            config,
            sandboxes,
            hooks,
        }
    }

    /// Kitchen wired from the loaded configuration
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            KitchenConfig::from_config(config),
            SandboxManager::new(
                &config.paths.sandbox_dir,
                SandboxOptions::from_config(config),
            ),
            HookExecutor::from_config(config),
        )
    }

    pub fn config(&self) -> &KitchenConfig {
        &self.config
    }

    pub fn sandboxes(&self) -> &SandboxManager {
        &self.sandboxes
    }

    pub fn hooks(&self) -> &HookExecutor {
        &self.hooks
    }

    /// Existing artifact triple for a recipe, if it was built before
    pub fn existing_artifact(&self, recipe: &Recipe) -> Option<BuildArtifact> {
        BuildArtifact::locate(&self.config.pkg_dir, &recipe.name, &recipe.version)
    }

    /// Cook a recipe into an artifact triple
    pub fn cook(&self, recipe: &Recipe) -> Result<CookResult> {
        info!("Cooking {} version {}", recipe.name, recipe.version);

        let mut log = String::new();
        let result = (|| -> Result<(BuildArtifact, Vec<String>)> {
            let mut cook = Cook::new(self, recipe)?;
            let outcome = cook.run();
            log = std::mem::take(&mut cook.log);
            outcome.map(|artifact| (artifact, std::mem::take(&mut cook.warnings)))
        })();

        let log_path = self.config.log_path(&recipe.name, &recipe.version);
        match result {
            Ok((artifact, warnings)) => {
                self.write_log(&log_path, &log);
                info!("Cooked {}", artifact.archive.display());
                Ok(CookResult {
                    artifact,
                    log_path,
                    warnings,
                })
            }
            Err(e) => {
                if self.config.keep_failed_logs {
                    log.push_str(&format!("=== failed ===\n{}\n", e));
                    self.write_log(&log_path, &log);
                }
                Err(e)
            }
        }
    }

    fn write_log(&self, path: &Path, log: &str) {
        let written = fs::create_dir_all(&self.config.log_dir).and_then(|()| fs::write(path, log));
        if let Err(e) = written {
            warn!("Failed to write build log {}: {}", path.display(), e);
        }
    }

    /// Fetch sources for a recipe without building
    pub fn fetch(&self, recipe: &Recipe) -> Result<PathBuf> {
        self.fetch_source(recipe)
    }

    /// Cache file name for a recipe's source
    ///
    /// Content-addressed when a digest is declared, name and version
    /// addressed otherwise.
    pub fn cache_key(recipe: &Recipe) -> String {
        match recipe.checksum.as_deref() {
            Some(checksum) => checksum.replace(':', "_"),
            None => format!(
                "{}-{}-{}",
                recipe.name,
                recipe.version,
                source_basename(&recipe.source)
            ),
        }
    }

    /// Fetch a source archive (with caching)
    pub(crate) fn fetch_source(&self, recipe: &Recipe) -> Result<PathBuf> {
        fs::create_dir_all(&self.config.source_cache)?;

        let cache_key = Self::cache_key(recipe);
        let cached_path = self.config.source_cache.join(&cache_key);
        let expected = recipe
            .checksum
            .as_deref()
            .map(|c| c.trim_start_matches("sha256:"));

        if cached_path.is_file() {
            debug!("Using cached source: {}", cached_path.display());
            match expected {
                None => return Ok(cached_path),
                Some(hash) if sha256_file(&cached_path)? == hash => return Ok(cached_path),
                Some(_) => {
                    warn!("Cached file checksum mismatch, fetching again");
                    fs::remove_file(&cached_path)?;
                }
            }
        }

        let temp_path = self.config.source_cache.join(format!("{}.tmp", cache_key));
        if is_remote(&recipe.source) {
            info!("Downloading: {}", recipe.source);
            download_file(&recipe.source, &temp_path)?;
        } else {
            let local = self.local_source(recipe);
            info!("Copying source: {}", local.display());
            copy_local(&local, &temp_path)?;
        }

        if let Some(hash) = expected {
            let actual = sha256_file(&temp_path)?;
            if actual != hash {
                fs::remove_file(&temp_path)?;
                return Err(Error::IntegrityMismatch {
                    package: recipe.name.clone(),
                    expected: format!("sha256:{}", hash),
                    actual: format!("sha256:{}", actual),
                });
            }
        }

        fs::rename(&temp_path, &cached_path)?;
        Ok(cached_path)
    }

    /// Local source path; relative paths are resolved against the recipe
    fn local_source(&self, recipe: &Recipe) -> PathBuf {
        let raw = recipe
            .source
            .strip_prefix("file://")
            .unwrap_or(&recipe.source);
        let path = PathBuf::from(raw);
        match &recipe.package_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Isolation;
    use tempfile::TempDir;

    fn kitchen(base: &Path) -> Kitchen {
        let mut config = Config::with_base_dir(base);
        config.sandbox.isolation = Isolation::None;
        Kitchen::from_config(&config)
    }

    #[test]
    fn test_cache_key() {
        let mut recipe = Recipe::new("foo", "1.0", "https://example.com/foo-1.0.tar.gz");
        assert_eq!(Kitchen::cache_key(&recipe), "foo-1.0-foo-1.0.tar.gz");
        recipe.checksum = Some(format!("sha256:{}", "a".repeat(64)));
        assert_eq!(Kitchen::cache_key(&recipe), format!("sha256_{}", "a".repeat(64)));
    }

    #[test]
    fn test_fetch_local_relative_source() {
        let tmp = TempDir::new().unwrap();
        let pkg_dir = tmp.path().join("repo/foo");
        fs::create_dir_all(&pkg_dir).unwrap();
        fs::write(pkg_dir.join("foo.txt"), "hello").unwrap();

        let mut recipe = Recipe::new("foo", "1.0", "foo.txt");
        recipe.package_dir = Some(pkg_dir);
        recipe.checksum = Some(
            "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824".to_string(),
        );

        let kitchen = kitchen(tmp.path());
        let cached = kitchen.fetch(&recipe).unwrap();
        assert_eq!(fs::read_to_string(&cached).unwrap(), "hello");
        assert!(cached.file_name().unwrap().to_string_lossy().starts_with("sha256_"));
    }

    #[test]
    fn test_fetch_integrity_mismatch() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("foo.txt");
        fs::write(&src, "tampered").unwrap();

        let mut recipe = Recipe::new("foo", "1.0", &format!("file://{}", src.display()));
        recipe.checksum = Some(format!("sha256:{}", "0".repeat(64)));

        let kitchen = kitchen(tmp.path());
        assert!(matches!(
            kitchen.fetch(&recipe),
            Err(Error::IntegrityMismatch { .. })
        ));
        assert!(!kitchen
            .config()
            .source_cache
            .join(format!("{}.tmp", Kitchen::cache_key(&recipe)))
            .exists());
    }

    #[test]
    fn test_corrupt_cache_refetched() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("foo.txt");
        fs::write(&src, "hello").unwrap();

        let mut recipe = Recipe::new("foo", "1.0", &src.display().to_string());
        recipe.checksum = Some(
            "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824".to_string(),
        );

        let kitchen = kitchen(tmp.path());
        let cached = kitchen.config().source_cache.join(Kitchen::cache_key(&recipe));
        fs::create_dir_all(cached.parent().unwrap()).unwrap();
        fs::write(&cached, "corrupt").unwrap();

        kitchen.fetch(&recipe).unwrap();
        assert_eq!(fs::read_to_string(&cached).unwrap(), "hello");
    }
}
