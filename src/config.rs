// src/config.rs

//! Layered configuration
//!
//! The first existing file wins and is merged over built-in defaults:
//! `$IBUILD_CONFIG`, then `~/.config/ibuild/config.toml`, then
//! `/etc/ibuild/config.toml`. Missing keys keep their defaults.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "IBUILD_CONFIG";

/// System-wide config file
pub const SYSTEM_CONFIG: &str = "/etc/ibuild/config.toml";

/// Complete ibuild configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub build: BuildConfig,
    pub sandbox: SandboxSettings,
    pub hooks: HooksConfig,
    pub remove: RemoveConfig,
}

/// Directory layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Recipe repository
    pub repo_dir: PathBuf,
    /// Downloaded sources, shared read-write with every sandbox
    pub source_cache: PathBuf,
    /// Built artifact triples
    pub pkg_dir: PathBuf,
    /// Installed-state records
    pub state_dir: PathBuf,
    pub log_dir: PathBuf,
    pub sandbox_dir: PathBuf,
    /// Transaction snapshots, journals and locks
    pub txn_dir: PathBuf,
    /// Global hook scripts named `<stage>_<timing>`
    pub hooks_dir: PathBuf,
    /// Install root
    pub root: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            repo_dir: PathBuf::from("/usr/ibuild"),
            source_cache: PathBuf::from("/var/cache/ibuild/sources"),
            pkg_dir: PathBuf::from("/var/cache/ibuild/packages"),
            state_dir: PathBuf::from("/var/lib/ibuild/packages"),
            log_dir: PathBuf::from("/var/log/ibuild"),
            sandbox_dir: PathBuf::from("/var/lib/ibuild/sandbox"),
            txn_dir: PathBuf::from("/var/lib/ibuild/txn"),
            hooks_dir: PathBuf::from("/etc/ibuild/hooks"),
            root: PathBuf::from("/"),
        }
    }
}

/// Build pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Parallel jobs exported as MAKEFLAGS
    pub jobs: u32,
    /// Wall-clock limit per build command
    pub timeout_secs: u64,
    /// Keep build logs of failed builds
    pub keep_failed_logs: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            jobs: std::thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(4),
            timeout_secs: 3600,
            keep_failed_logs: true,
        }
    }
}

impl BuildConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// How sandboxed commands are launched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Isolation {
    /// External bubblewrap launcher
    Bwrap,
    /// Run directly on the host inside the sandbox directory (no isolation)
    None,
}

/// Sandbox settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSettings {
    pub isolation: Isolation,
    /// Launcher executable; looked up on PATH when unset
    pub launcher: Option<PathBuf>,
    /// Network is denied unless this is set
    pub allow_network: bool,
    /// Extra host paths bound read-only at the same location
    pub read_only_binds: Vec<PathBuf>,
    /// Address space limit in bytes (0 = no limit)
    pub memory_limit: u64,
    /// CPU time limit in seconds (0 = no limit)
    pub cpu_time_limit: u64,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            isolation: Isolation::Bwrap,
            launcher: None,
            allow_network: false,
            read_only_binds: Vec::new(),
            memory_limit: 0,
            cpu_time_limit: 0,
        }
    }
}

/// Hook executor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HooksConfig {
    pub timeout_secs: u64,
    /// Global hooks (by `<stage>_<timing>`) whose failure is fatal
    pub critical: Vec<String>,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            critical: Vec::new(),
        }
    }
}

/// Removal settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoveConfig {
    /// Additional directories never deleted by removal
    pub protected_paths: Vec<PathBuf>,
}

impl Config {
    /// Load following the lookup order
    pub fn load() -> Result<Self> {
        match Self::locate() {
            Some(path) => Self::from_file(&path),
            None => {
                debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// First config file that exists
    pub fn locate() -> Option<PathBuf> {
        let mut candidates = Vec::new();
        if let Ok(env_path) = std::env::var(CONFIG_ENV)
            && !env_path.is_empty()
        {
            candidates.push(PathBuf::from(env_path));
        }
        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join("ibuild").join("config.toml"));
        }
        candidates.push(PathBuf::from(SYSTEM_CONFIG));

        candidates.into_iter().find(|p| p.is_file())
    }

    /// Load one file merged over defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::parse(&content)
            .map_err(|e| Error::ConfigError(format!("{}: {}", path.display(), e)))?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigError(e.to_string()))
    }

    /// Configuration with every directory placed under `base`
    pub fn with_base_dir(base: &Path) -> Self {
        let mut config = Self::default();
        config.paths = PathsConfig {
            repo_dir: base.join("repo"),
            source_cache: base.join("cache/sources"),
            pkg_dir: base.join("cache/packages"),
            state_dir: base.join("state"),
            log_dir: base.join("log"),
            sandbox_dir: base.join("sandbox"),
            txn_dir: base.join("txn"),
            hooks_dir: base.join("hooks"),
            root: base.join("root"),
        };
        config
    }

    /// Create every configured directory
    pub fn ensure_dirs(&self) -> Result<()> {
        let p = &self.paths;
        for dir in [
            &p.source_cache,
            &p.pkg_dir,
            &p.state_dir,
            &p.log_dir,
            &p.sandbox_dir,
            &p.txn_dir,
            &p.root,
        ] {
            fs::create_dir_all(dir).map_err(|e| {
                Error::IoError(format!("Failed to create {}: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }
}
