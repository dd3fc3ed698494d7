// src/recipe/kitchen/archive.rs

//! Archive and source file utilities for the Kitchen

use crate::error::{Error, Result};
use crate::filesystem::path::sanitize_path;
use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// Whether a source location must be downloaded
pub fn is_remote(url: &str) -> bool {
    ["http://", "https://", "ftp://"]
        .iter()
        .any(|scheme| url.starts_with(scheme))
}

/// Download a file from a URL
pub fn download_file(url: &str, dest: &Path) -> Result<()> {
    let output = Command::new("curl")
        .arg("-fsSL")
        .arg("-o")
        .arg(dest)
        .arg(url)
        .output()
        .map_err(|e| Error::DownloadError(format!("curl failed: {}", e)))?;

    if !output.status.success() {
        return Err(Error::DownloadError(format!(
            "Failed to download {}: {}",
            url,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(())
}

/// Hex SHA-256 of a file's contents
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Extract `archive` into `dest`
///
/// `name` is the original file name; cached sources are stored under their
/// digest and carry no extension of their own. Gzip and plain tarballs are
/// unpacked in-process with every entry path sanitized; xz, bzip2 and zstd
/// go through the `tar` executable; anything else is copied as-is.
pub fn extract_archive(archive: &Path, name: &str, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;

    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        let reader = GzDecoder::new(BufReader::new(File::open(archive)?));
        unpack_tar(reader, dest)
    } else if name.ends_with(".tar") {
        unpack_tar(BufReader::new(File::open(archive)?), dest)
    } else if let Some(flag) = external_tar_flag(name) {
        let output = Command::new("tar")
            .arg(flag)
            .arg("-xf")
            .arg(archive)
            .arg("-C")
            .arg(dest)
            .output()
            .map_err(|e| Error::IoError(format!("tar failed: {}", e)))?;

        if !output.status.success() {
            return Err(Error::IoError(format!(
                "Failed to extract {}: {}",
                name,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    } else {
        debug!("{} is not an archive, copying", name);
        fs::copy(archive, dest.join(name))?;
        Ok(())
    }
}

fn external_tar_flag(name: &str) -> Option<&'static str> {
    if name.ends_with(".tar.xz") || name.ends_with(".txz") {
        Some("-J")
    } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") {
        Some("-j")
    } else if name.ends_with(".tar.zst") {
        Some("--zstd")
    } else {
        None
    }
}

/// Unpack a tar stream under `dest`, rejecting entries that escape it
pub fn unpack_tar<R: Read>(reader: R, dest: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let raw = entry.path()?.into_owned();
        if raw.as_os_str().is_empty() || raw == Path::new(".") || raw == Path::new("./") {
            continue;
        }
        sanitize_path(&raw)?;
        if !entry.unpack_in(dest)? {
            return Err(Error::PathTraversal(raw.display().to_string()));
        }
    }
    Ok(())
}

/// Apply a patch inside the source directory
///
/// Returns the failure reason; the caller attaches package and patch name.
pub fn apply_patch(source_dir: &Path, patch_path: &Path) -> std::result::Result<(), String> {
    let output = Command::new("patch")
        .arg("-p1")
        .arg("-i")
        .arg(patch_path)
        .current_dir(source_dir)
        .output()
        .map_err(|e| format!("failed to run patch: {}", e))?;

    if !output.status.success() {
        let mut reason = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            reason.push_str(stderr.trim());
        }
        return Err(format!(
            "exit code {}: {}",
            output.status.code().unwrap_or(-1),
            reason
        ));
    }

    Ok(())
}

/// Copy a local source (plain path or `file://`) into place
pub fn copy_local(src: &Path, dest: &Path) -> Result<()> {
    fs::copy(src, dest).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => {
            Error::DownloadError(format!("Source not found: {}", src.display()))
        }
        _ => Error::DownloadError(format!("Failed to copy {}: {}", src.display(), e)),
    })?;
    Ok(())
}
