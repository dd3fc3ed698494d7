// src/transaction/recovery.rs

//! Snapshots and rollback
//!
//! Before a package is touched, its installed-state record and the artifact
//! it was installed from are copied into `<txn_dir>/<id>/<package>/`.
//! Rolling back removes whatever the transaction put in place and
//! reinstalls the snapshot. A prior install whose artifact is gone cannot
//! be restored; that is reported as a rollback failure.

use crate::db::InstalledPackage;
use crate::error::Result;
use crate::recipe::BuildArtifact;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::TransactionManager;

/// Prior state of one package inside a transaction
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub package: String,
    pub dir: PathBuf,
    /// Installed-state record at snapshot time, `None` when absent
    pub prior: Option<InstalledPackage>,
    /// Copy of the prior artifact triple, when one was retained
    pub artifact: Option<BuildArtifact>,
}

impl Snapshot {
    /// Save the prior state of `package` under `txn_dir`
    pub fn take(
        txn_dir: &Path,
        package: &str,
        prior: Option<InstalledPackage>,
        pkg_dir: &Path,
    ) -> Result<Self> {
        let dir = txn_dir.join(package);
        fs::create_dir_all(&dir)?;

        let mut artifact = None;
        if let Some(record) = &prior {
            fs::write(
                dir.join(format!("{}.installed", package)),
                record.to_record(),
            )?;

            match BuildArtifact::locate(pkg_dir, package, &record.version) {
                Some(found) => artifact = Some(found.copy_to(&dir)?),
                None => warn!(
                    "No artifact retained for {}-{}; it cannot be restored if this transaction fails",
                    package, record.version
                ),
            }
        }

        debug!("Snapshot of {} in {}", package, dir.display());
        Ok(Self {
            package: package.to_string(),
            dir,
            prior,
            artifact,
        })
    }

    /// Read back a snapshot kept under `txn_dir`
    ///
    /// An artifact triple placed in the snapshot directory after the fact
    /// is picked up too.
    pub fn load(txn_dir: &Path, package: &str) -> Result<Self> {
        let dir = txn_dir.join(package);
        let record_path = dir.join(format!("{}.installed", package));
        let prior = match fs::read_to_string(&record_path) {
            Ok(content) => Some(InstalledPackage::from_record(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        let artifact = prior
            .as_ref()
            .and_then(|p| BuildArtifact::locate(&dir, package, &p.version));

        Ok(Self {
            package: package.to_string(),
            dir,
            prior,
            artifact,
        })
    }

    pub fn prior_version(&self) -> Option<&str> {
        self.prior.as_ref().map(|p| p.version.as_str())
    }
}

/// A package the transaction has started modifying
#[derive(Debug, Clone)]
pub(super) struct Applied {
    pub snapshot: Snapshot,
    /// Manifest of the artifact being installed
    pub new_files: Vec<String>,
}

impl TransactionManager {
    /// Put one package back the way its snapshot found it
    ///
    /// Errors are plain strings: they end up in a `RollbackFailed`.
    pub(super) fn restore(&self, applied: &Applied) -> std::result::Result<(), String> {
        let snapshot = &applied.snapshot;
        let name = &snapshot.package;

        if let Some(prior) = &snapshot.prior
            && snapshot.artifact.is_none()
        {
            return Err(format!(
                "no artifact retained for prior version {}",
                prior.version
            ));
        }

        // Remove everything the transaction may have placed
        let current = self.db.get(name).map_err(|e| e.to_string())?;
        let mut placed: BTreeSet<String> = applied.new_files.iter().cloned().collect();
        if let Some(current) = current {
            placed.extend(current.files);
        }
        let placed: Vec<String> = placed.into_iter().collect();
        self.remove_files(&placed).map_err(|e| e.to_string())?;
        self.db.delete(name).map_err(|e| e.to_string())?;

        match (&snapshot.prior, &snapshot.artifact) {
            (Some(prior), Some(artifact)) => {
                artifact
                    .extract_to(&self.root)
                    .map_err(|e| format!("reinstalling {}: {}", artifact.archive.display(), e))?;
                self.db.write(prior).map_err(|e| e.to_string())?;
                info!("Restored {}-{}", name, prior.version);
            }
            _ => info!("Removed {} (not installed before)", name),
        }
        Ok(())
    }
}
