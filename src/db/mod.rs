// src/db/mod.rs

//! Installed-state store
//!
//! One record file per installed package under the state directory, plus a
//! version-only marker for quick lookups:
//!
//! - `<state_dir>/<name>.installed`
//! - `<state_dir>/<name>.version`

pub mod models;

pub use models::InstalledPackage;

use crate::error::{Error, Result};
use crate::filesystem::write_atomic;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

const RECORD_EXT: &str = "installed";
const MARKER_EXT: &str = "version";

/// Marker written when a rollback could not restore prior state
pub const INCONSISTENT_MARKER: &str = "INCONSISTENT";

/// File-backed installed-state database
#[derive(Debug, Clone)]
pub struct StateDb {
    dir: PathBuf,
}

impl StateDb {
    /// Open the store, creating the directory if needed
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            Error::IoError(format!("Failed to create state dir {}: {}", dir.display(), e))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name, RECORD_EXT))
    }

    fn marker_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name, MARKER_EXT))
    }

    /// Full record, or `None` when not installed
    pub fn get(&self, name: &str) -> Result<Option<InstalledPackage>> {
        match fs::read_to_string(self.record_path(name)) {
            Ok(content) => InstalledPackage::from_record(&content).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Installed version from the marker, falling back to the full record
    pub fn version_of(&self, name: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.marker_path(name)) {
            Ok(v) => Ok(Some(v.trim().to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Ok(self.get(name)?.map(|p| p.version))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn is_installed(&self, name: &str) -> bool {
        self.record_path(name).is_file()
    }

    /// Write or replace a record and its version marker
    pub fn write(&self, pkg: &InstalledPackage) -> Result<()> {
        write_atomic(&self.record_path(&pkg.name), pkg.to_record().as_bytes())?;
        write_atomic(
            &self.marker_path(&pkg.name),
            format!("{}\n", pkg.version).as_bytes(),
        )?;
        debug!("Wrote state record for {}-{}", pkg.name, pkg.version);
        Ok(())
    }

    /// Delete a record, then its marker
    pub fn delete(&self, name: &str) -> Result<()> {
        for path in [self.record_path(name), self.marker_path(name)] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Every installed package, sorted by name
    pub fn list(&self) -> Result<Vec<InstalledPackage>> {
        let mut names: Vec<String> = fs::read_dir(&self.dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let path = e.path();
                if path.extension().and_then(|x| x.to_str()) == Some(RECORD_EXT) {
                    path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
                } else {
                    None
                }
            })
            .collect();
        names.sort();

        let mut packages = Vec::with_capacity(names.len());
        for name in names {
            if let Some(pkg) = self.get(&name)? {
                packages.push(pkg);
            }
        }
        Ok(packages)
    }

    /// Path of the inconsistency marker
    pub fn inconsistent_marker(&self) -> PathBuf {
        self.dir.join(INCONSISTENT_MARKER)
    }

    /// Contents of the inconsistency marker, if the system is flagged
    pub fn inconsistency(&self) -> Result<Option<String>> {
        match fs::read_to_string(self.inconsistent_marker()) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn flag_inconsistent(&self, details: &str) -> Result<()> {
        write_atomic(&self.inconsistent_marker(), details.as_bytes())?;
        Ok(())
    }

    pub fn clear_inconsistent(&self) -> Result<()> {
        match fs::remove_file(self.inconsistent_marker()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
