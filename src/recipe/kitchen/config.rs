// src/recipe/kitchen/config.rs

//! Configuration types for the Kitchen build pipeline

use crate::config::Config;
use std::path::PathBuf;

use super::artifact::BuildArtifact;

/// Configuration for the Kitchen
#[derive(Debug, Clone)]
pub struct KitchenConfig {
    /// Directory for downloaded sources
    pub source_cache: PathBuf,
    /// Where artifact triples are written
    pub pkg_dir: PathBuf,
    /// Build logs (`<name>-<version>.build.log`)
    pub log_dir: PathBuf,
    /// Number of parallel jobs, exported as MAKEFLAGS
    pub jobs: u32,
    /// Keep the build log when a build fails
    pub keep_failed_logs: bool,
}

impl Default for KitchenConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl KitchenConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            source_cache: config.paths.source_cache.clone(),
            pkg_dir: config.paths.pkg_dir.clone(),
            log_dir: config.paths.log_dir.clone(),
            jobs: config.build.jobs.max(1),
            keep_failed_logs: config.build.keep_failed_logs,
        }
    }

    /// Build log location for a package
    pub fn log_path(&self, name: &str, version: &str) -> PathBuf {
        self.log_dir.join(format!("{}-{}.build.log", name, version))
    }
}

/// Result of cooking a recipe
#[derive(Debug)]
pub struct CookResult {
    /// The archive, manifest and metadata triple
    pub artifact: BuildArtifact,
    /// Where the build log was written
    pub log_path: PathBuf,
    /// Warnings generated during build (failed checks)
    pub warnings: Vec<String>,
}
