// src/filesystem/mod.rs

//! Filesystem helpers shared by install, remove and packaging
//!
//! - Path sanitization for untrusted archive and manifest entries
//! - The protected-path policy consulted by removal
//! - Cross-filesystem safe moves for artifacts and snapshots

pub mod path;

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directories that are never deleted themselves
const PROTECTED_DIRS: &[&str] = &[
    "/",
    "/bin",
    "/boot",
    "/dev",
    "/etc",
    "/home",
    "/lib",
    "/lib64",
    "/opt",
    "/proc",
    "/root",
    "/run",
    "/sbin",
    "/srv",
    "/sys",
    "/tmp",
    "/usr",
    "/usr/bin",
    "/usr/include",
    "/usr/lib",
    "/usr/lib64",
    "/usr/local",
    "/usr/sbin",
    "/usr/share",
    "/var",
];

/// Trees nothing under which is ever deleted
const PROTECTED_SUBTREES: &[&str] = &["/boot", "/dev", "/proc", "/sys", "/run"];

/// Removal policy over root-relative paths
#[derive(Debug, Clone)]
pub struct ProtectedPaths {
    exact: BTreeSet<PathBuf>,
    subtrees: Vec<PathBuf>,
}

impl Default for ProtectedPaths {
    fn default() -> Self {
        Self {
            exact: PROTECTED_DIRS.iter().map(PathBuf::from).collect(),
            subtrees: PROTECTED_SUBTREES.iter().map(PathBuf::from).collect(),
        }
    }
}

impl ProtectedPaths {
    /// Default policy plus configured extra directories
    pub fn with_extra(extra: &[PathBuf]) -> Self {
        let mut policy = Self::default();
        for dir in extra {
            policy.exact.insert(Path::new("/").join(dir));
        }
        policy
    }

    /// Whether a manifest path (relative to the system root) must be skipped
    pub fn is_protected(&self, rel_path: &Path) -> bool {
        let absolute = Path::new("/").join(rel_path);
        self.exact.contains(&absolute)
            || self
                .subtrees
                .iter()
                .any(|tree| absolute.starts_with(tree))
    }
}

/// Move a file, falling back to copy + fsync + delete across filesystems
pub(crate) fn move_file_atomic(src: &Path, dst: &Path) -> io::Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
            debug!(
                "Cross-filesystem move {} -> {}, copying",
                src.display(),
                dst.display()
            );
            fs::copy(src, dst)?;
            File::open(dst)?.sync_all()?;
            fs::remove_file(src)?;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Write a file through a temp sibling and rename it into place
pub(crate) fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)
}

/// Remove now-empty parent directories of `path` up to (not including) `root`
///
/// Protected directories stop the walk.
pub(crate) fn prune_empty_parents(root: &Path, path: &Path, protected: &ProtectedPaths) {
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) {
            break;
        }
        let Ok(rel) = dir.strip_prefix(root) else {
            break;
        };
        if protected.is_protected(rel) {
            break;
        }
        // Fails on non-empty directories, which ends the walk
        if fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
}
