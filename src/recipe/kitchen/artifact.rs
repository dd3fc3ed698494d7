// src/recipe/kitchen/artifact.rs

//! Built artifact triples
//!
//! A finished build leaves three files in the package directory, all named
//! by package name and version:
//!
//! - `<name>-<version>.tar.gz`: the stage directory
//! - `<name>-<version>.files`: sorted manifest, one relative path per line
//! - `<name>-<version>.meta`: the recipe record the build started from

use crate::error::{Error, Result};
use crate::filesystem::move_file_atomic;
use crate::filesystem::path::sanitize_path;
use crate::recipe::Recipe;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::archive::unpack_tar;

/// The archive, manifest and metadata of one built package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildArtifact {
    pub name: String,
    pub version: String,
    pub archive: PathBuf,
    pub manifest: PathBuf,
    pub meta: PathBuf,
}

impl BuildArtifact {
    /// Paths of the triple, whether or not it exists
    pub fn paths(pkg_dir: &Path, name: &str, version: &str) -> Self {
        let stem = format!("{}-{}", name, version);
        Self {
            name: name.to_string(),
            version: version.to_string(),
            archive: pkg_dir.join(format!("{}.tar.gz", stem)),
            manifest: pkg_dir.join(format!("{}.files", stem)),
            meta: pkg_dir.join(format!("{}.meta", stem)),
        }
    }

    /// An existing, complete triple
    pub fn locate(pkg_dir: &Path, name: &str, version: &str) -> Option<Self> {
        let artifact = Self::paths(pkg_dir, name, version);
        artifact.exists().then_some(artifact)
    }

    pub fn exists(&self) -> bool {
        self.archive.is_file() && self.manifest.is_file() && self.meta.is_file()
    }

    /// Every file of the triple
    pub fn files(&self) -> [&Path; 3] {
        [&self.archive, &self.manifest, &self.meta]
    }

    /// Package a stage directory into a triple under `pkg_dir`
    ///
    /// An empty stage directory means the install stage put nothing there
    /// and is reported as a failed `package` stage.
    pub fn create(pkg_dir: &Path, recipe: &Recipe, stage_dir: &Path) -> Result<Self> {
        let entries = manifest_entries(stage_dir)?;
        if entries.is_empty() {
            warn!("{}: nothing installed into {}", recipe.name, stage_dir.display());
            return Err(Error::BuildCommandFailed {
                package: recipe.name.clone(),
                stage: "package".to_string(),
                code: 0,
            });
        }

        fs::create_dir_all(pkg_dir)?;
        let artifact = Self::paths(pkg_dir, &recipe.name, &recipe.version);

        let archive_tmp = tmp_sibling(&artifact.archive);
        write_archive(stage_dir, &archive_tmp)?;

        let manifest_tmp = tmp_sibling(&artifact.manifest);
        fs::write(&manifest_tmp, render_manifest(&entries))?;

        let meta_tmp = tmp_sibling(&artifact.meta);
        fs::write(&meta_tmp, &recipe.raw)?;

        move_file_atomic(&archive_tmp, &artifact.archive)?;
        move_file_atomic(&manifest_tmp, &artifact.manifest)?;
        move_file_atomic(&meta_tmp, &artifact.meta)?;

        info!(
            "Packaged {}-{} ({} files)",
            recipe.name,
            recipe.version,
            entries.len()
        );
        Ok(artifact)
    }

    /// Manifest entries, as written at build time
    pub fn read_manifest(&self) -> Result<Vec<String>> {
        let content = fs::read_to_string(&self.manifest).map_err(|e| {
            Error::IoError(format!("Failed to read {}: {}", self.manifest.display(), e))
        })?;
        let mut entries = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            entries.push(sanitize_path(line)?.to_string_lossy().into_owned());
        }
        Ok(entries)
    }

    /// Unpack the archive over `root`
    pub fn extract_to(&self, root: &Path) -> Result<()> {
        debug!("Extracting {} into {}", self.archive.display(), root.display());
        let reader = GzDecoder::new(BufReader::new(File::open(&self.archive)?));
        unpack_tar(reader, root)
    }

    /// Copy the triple into `dir`, keeping file names
    pub fn copy_to(&self, dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let copy = |src: &Path| -> Result<PathBuf> {
            let name = src
                .file_name()
                .ok_or_else(|| Error::InvalidPath(src.display().to_string()))?;
            let dst = dir.join(name);
            fs::copy(src, &dst)?;
            Ok(dst)
        };
        Ok(Self {
            name: self.name.clone(),
            version: self.version.clone(),
            archive: copy(&self.archive)?,
            manifest: copy(&self.manifest)?,
            meta: copy(&self.meta)?,
        })
    }
}

/// Sorted relative paths of files and symlinks under `stage_dir`
pub fn manifest_entries(stage_dir: &Path) -> Result<Vec<String>> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(stage_dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::IoError(e.to_string()))?;
        let file_type = entry.file_type();
        if !(file_type.is_file() || file_type.is_symlink()) {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(stage_dir)
            .map_err(|e| Error::InvalidPath(e.to_string()))?;
        entries.push(rel.to_string_lossy().into_owned());
    }
    entries.sort();
    Ok(entries)
}

/// Manifest file content: one path per line, trailing newline
pub fn render_manifest(entries: &[String]) -> String {
    let mut out = String::new();
    for entry in entries {
        out.push_str(entry);
        out.push('\n');
    }
    out
}

fn write_archive(stage_dir: &Path, dest: &Path) -> Result<()> {
    let file = BufWriter::new(File::create(dest)?);
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder.follow_symlinks(false);

    for entry in WalkDir::new(stage_dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::IoError(e.to_string()))?;
        let rel = entry
            .path()
            .strip_prefix(stage_dir)
            .map_err(|e| Error::InvalidPath(e.to_string()))?;
        if entry.file_type().is_dir() {
            builder.append_dir(rel, entry.path())?;
        } else {
            builder.append_path_with_name(entry.path(), rel)?;
        }
    }

    let mut writer = builder.into_inner()?.finish()?;
    writer.flush()?;
    Ok(())
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn stage_with_files(root: &Path) {
        fs::create_dir_all(root.join("usr/bin")).unwrap();
        fs::create_dir_all(root.join("usr/share/doc/foo")).unwrap();
        fs::write(root.join("usr/bin/foo"), "#!/bin/sh\n").unwrap();
        fs::write(root.join("usr/share/doc/foo/README"), "readme").unwrap();
        std::os::unix::fs::symlink("foo", root.join("usr/bin/foo-alias")).unwrap();
    }

    #[test]
    fn test_manifest_sorted_files_and_symlinks() {
        let tmp = TempDir::new().unwrap();
        stage_with_files(tmp.path());
        assert_eq!(
            manifest_entries(tmp.path()).unwrap(),
            vec![
                "usr/bin/foo",
                "usr/bin/foo-alias",
                "usr/share/doc/foo/README"
            ]
        );
    }

    #[test]
    fn test_create_locate_extract() {
        let tmp = TempDir::new().unwrap();
        let stage = tmp.path().join("stage");
        stage_with_files(&stage);
        let mut recipe = Recipe::new("foo", "1.0", "foo.tar.gz");
        recipe.raw = "name=foo\nversion=1.0\nsource=foo.tar.gz\n".to_string();

        let pkg_dir = tmp.path().join("pkgs");
        let artifact = BuildArtifact::create(&pkg_dir, &recipe, &stage).unwrap();
        assert_eq!(artifact.archive, pkg_dir.join("foo-1.0.tar.gz"));
        assert_eq!(BuildArtifact::locate(&pkg_dir, "foo", "1.0"), Some(artifact.clone()));
        assert!(BuildArtifact::locate(&pkg_dir, "foo", "2.0").is_none());
        assert_eq!(fs::read_to_string(&artifact.meta).unwrap(), recipe.raw);

        let root = tmp.path().join("root");
        artifact.extract_to(&root).unwrap();
        assert!(root.join("usr/bin/foo").is_file());
        assert!(root.join("usr/bin/foo-alias").is_symlink());
        assert_eq!(artifact.read_manifest().unwrap().len(), 3);
    }

    #[test]
    fn test_manifest_idempotent() {
        let tmp = TempDir::new().unwrap();
        let stage = tmp.path().join("stage");
        stage_with_files(&stage);
        let recipe = Recipe::new("foo", "1.0", "foo.tar.gz");

        let pkg_dir = tmp.path().join("pkgs");
        let first = BuildArtifact::create(&pkg_dir, &recipe, &stage).unwrap();
        let first_manifest = fs::read(&first.manifest).unwrap();
        let second = BuildArtifact::create(&pkg_dir, &recipe, &stage).unwrap();
        assert_eq!(fs::read(&second.manifest).unwrap(), first_manifest);
    }

    #[test]
    fn test_empty_stage_fails_package() {
        let tmp = TempDir::new().unwrap();
        let stage = tmp.path().join("stage");
        fs::create_dir_all(stage.join("usr/bin")).unwrap();
        let recipe = Recipe::new("foo", "1.0", "foo.tar.gz");

        match BuildArtifact::create(&tmp.path().join("pkgs"), &recipe, &stage) {
            Err(Error::BuildCommandFailed { stage, code, .. }) => {
                assert_eq!(stage, "package");
                assert_eq!(code, 0);
            }
            other => panic!("expected BuildCommandFailed, got {:?}", other),
        }
    }
}
