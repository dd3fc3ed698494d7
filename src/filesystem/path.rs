// src/filesystem/path.rs

//! Path sanitization for archive entries, manifests and patch names
//!
//! Artifact archives and manifest files are untrusted input: a crafted
//! entry such as `../../etc/shadow` must never reach the install root.

use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Normalize an untrusted path to a relative one
///
/// Leading slashes and `.` components are dropped; any `..` component is a
/// [`Error::PathTraversal`]; an empty result is [`Error::InvalidPath`].
///
/// ```
/// use ibuild::filesystem::path::sanitize_path;
/// use std::path::PathBuf;
///
/// assert_eq!(sanitize_path("/usr/bin/foo").unwrap(), PathBuf::from("usr/bin/foo"));
/// assert!(sanitize_path("usr/../../etc/passwd").is_err());
/// ```
pub fn sanitize_path(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Normal(c) => normalized.push(c),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                return Err(Error::PathTraversal(path.display().to_string()));
            }
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(Error::InvalidPath(format!(
            "{:?} is empty after sanitization",
            path
        )));
    }

    Ok(normalized)
}

/// Join an untrusted relative path under `root`
///
/// When both sides already exist, the canonical result is also checked to
/// stay under the canonical root, which catches symlinked escapes.
pub fn safe_join(root: impl AsRef<Path>, path: impl AsRef<Path>) -> Result<PathBuf> {
    let root = root.as_ref();
    let joined = root.join(sanitize_path(path)?);

    if let (Ok(canonical_root), Ok(canonical_joined)) =
        (root.canonicalize(), joined.canonicalize())
        && !canonical_joined.starts_with(&canonical_root)
    {
        return Err(Error::PathTraversal(format!(
            "{} escapes {}",
            joined.display(),
            root.display()
        )));
    }

    Ok(joined)
}

/// Accept a single file name with no directory part
pub fn sanitize_filename(name: &str) -> Result<&str> {
    if name.is_empty() {
        return Err(Error::InvalidPath("empty file name".to_string()));
    }
    if name.contains('/') || name == "." || name == ".." {
        return Err(Error::PathTraversal(name.to_string()));
    }
    Ok(name)
}
