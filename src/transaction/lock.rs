// src/transaction/lock.rs

//! Advisory file locks and the transaction id counter
//!
//! Install, remove and upgrade of a package hold `locks/<name>.lock`
//! exclusively for their whole duration. Transaction ids come from the
//! `next-id` counter file, updated under its own lock.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Lock attempts before giving up
///
/// Waits 0ms, 100ms, 200ms, 400ms, 800ms between tries (about 1.5s total).
const MAX_RETRIES: u32 = 5;

/// Exclusive lock on an open file, retried with exponential backoff
fn lock_with_retry(file: &File, what: &str) -> Result<()> {
    let mut last_error = None;

    for attempt in 0..MAX_RETRIES {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(()),
            Err(e) => {
                last_error = Some(e);
                if attempt < MAX_RETRIES - 1 {
                    std::thread::sleep(Duration::from_millis(100 * (1 << attempt)));
                }
            }
        }
    }

    Err(Error::LockError(format!(
        "Failed to lock {} after {} retries. Another operation may be in progress: {}",
        what,
        MAX_RETRIES,
        last_error.map(|e| e.to_string()).unwrap_or_default()
    )))
}

/// Held lock on one package name; released on drop
#[derive(Debug)]
pub struct PackageLock {
    name: String,
    path: PathBuf,
    file: File,
}

impl PackageLock {
    /// Acquire `<lock_dir>/<name>.lock`
    pub fn acquire(lock_dir: &Path, name: &str) -> Result<Self> {
        fs::create_dir_all(lock_dir)?;
        let path = lock_dir.join(format!("{}.lock", name));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        lock_with_retry(&file, &format!("package {}", name))?;
        debug!("Locked {}", name);

        Ok(Self {
            name: name.to_string(),
            path,
            file,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PackageLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Next transaction id from `<txn_dir>/next-id`
///
/// Ids start at 1 and only grow.
pub fn next_transaction_id(txn_dir: &Path) -> Result<u64> {
    fs::create_dir_all(txn_dir)?;
    let path = txn_dir.join("next-id");
    let mut file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(&path)?;

    lock_with_retry(&file, "transaction counter")?;

    let result = (|| -> Result<u64> {
        let mut content = String::new();
        file.read_to_string(&mut content)?;
        let id = match content.trim() {
            "" => 1,
            s => s
                .parse::<u64>()
                .map_err(|e| Error::ParseError(format!("{}: {}", path.display(), e)))?,
        };

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        writeln!(file, "{}", id + 1)?;
        file.sync_data()?;
        Ok(id)
    })();

    let _ = FileExt::unlock(&file);
    result
}
