// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.
//!
//! Every test gets a private layout (repo, caches, state, root) under a
//! temporary directory, with sandbox isolation off so builds run as plain
//! host processes.

#![allow(dead_code)]

use flate2::Compression;
use flate2::write::GzEncoder;
use ibuild::config::Isolation;
use ibuild::{Config, TransactionManager};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A throwaway ibuild installation
pub struct TestEnv {
    pub dir: TempDir,
    pub config: Config,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::with_base_dir(dir.path());
        config.sandbox.isolation = Isolation::None;
        config.build.jobs = 1;
        config.build.timeout_secs = 60;
        config.hooks.timeout_secs = 30;
        config.ensure_dirs().unwrap();
        fs::create_dir_all(&config.paths.repo_dir).unwrap();
        Self { dir, config }
    }

    pub fn manager(&self) -> TransactionManager {
        TransactionManager::new(&self.config).unwrap()
    }

    pub fn root(&self) -> &Path {
        &self.config.paths.root
    }

    pub fn pkg_dir(&self) -> &Path {
        &self.config.paths.pkg_dir
    }

    pub fn package_dir(&self, name: &str) -> PathBuf {
        self.config.paths.repo_dir.join(name)
    }

    /// Write a recipe whose source installs `usr/share/<name>/hello.txt`
    ///
    /// The file contains `<name> <version>`. `extra` is appended verbatim
    /// to the record.
    pub fn add_recipe(&self, name: &str, version: &str, extra: &str) -> PathBuf {
        let dir = self.package_dir(name);
        fs::create_dir_all(&dir).unwrap();

        let tarball = format!("{}-{}.tar.gz", name, version);
        write_source_tarball(
            &dir.join(&tarball),
            &format!("{}-{}", name, version),
            &[("hello.txt", format!("{} {}\n", name, version).as_str())],
        );

        let install = format!(
            "mkdir -p \"$DESTDIR/usr/share/{0}\" && cp hello.txt \"$DESTDIR/usr/share/{0}/hello.txt\"",
            name
        );
        let record = format!(
            "name={}\nversion={}\nsource={}\ninstall={}\n{}",
            name, version, tarball, install, extra
        );
        let path = dir.join(format!("{}.meta", name));
        fs::write(&path, record).unwrap();
        path
    }

    /// Content of the file a test package installs, if present
    pub fn installed_hello(&self, name: &str) -> Option<String> {
        fs::read_to_string(self.root().join(format!("usr/share/{}/hello.txt", name)))
            .ok()
            .map(|s| s.trim().to_string())
    }

    /// Sandbox directories currently on disk (lock files aside)
    pub fn sandbox_entries(&self) -> usize {
        fs::read_dir(&self.config.paths.sandbox_dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.path().is_dir())
                    .count()
            })
            .unwrap_or(0)
    }
}

/// Write a gzip tarball with every file under `top/`
pub fn write_source_tarball(path: &Path, top: &str, files: &[(&str, &str)]) {
    let file = fs::File::create(path).unwrap();
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("{}/{}", top, name), content.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

/// `sha256:<hex>` of a file
pub fn sha256_of(path: &Path) -> String {
    let data = fs::read(path).unwrap();
    format!("sha256:{}", hex::encode(Sha256::digest(&data)))
}
