// src/transaction/journal.rs

//! Append-only transaction journal
//!
//! Every transaction records its progress as single lines with a CRC32
//! checksum for integrity verification.
//!
//! Format: `{crc32_hex}|{json}\n`
//!
//! Journals of transactions that committed or rolled back cleanly move to
//! `archive/`; a journal left in place belongs to a transaction that was
//! interrupted or failed to roll back.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// A record in the transaction journal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JournalRecord {
    /// Transaction started
    Begin {
        txn: u64,
        operation: String,
        packages: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// Prior state of a package saved before it was touched
    Snapshot {
        package: String,
        /// Installed version at snapshot time, `None` when absent
        prior_version: Option<String>,
        snapshot_dir: PathBuf,
    },

    /// A package step completed
    Applied { package: String, version: String },

    /// A package step failed
    Failed { package: String, error: String },

    /// A package was restored to its snapshot
    RolledBack { package: String },

    /// A package could not be restored
    RollbackFailed { package: String, error: String },

    /// Transaction complete
    Committed { duration_ms: u64 },

    /// Kept snapshots were reinstalled by a later manual rollback
    Recovered { packages: Vec<String> },
}

impl JournalRecord {
    /// Whether this record ends a transaction
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Committed { .. } | Self::RollbackFailed { .. } | Self::Recovered { .. }
        )
    }
}

/// Append-only transaction journal
pub struct TransactionJournal {
    path: PathBuf,
    file: File,
    txn: u64,
}

impl TransactionJournal {
    /// Create a new journal for a transaction
    pub fn create(journal_dir: &Path, txn: u64) -> Result<Self> {
        fs::create_dir_all(journal_dir)?;

        let path = journal_dir.join(journal_file_name(txn));
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)?;

        Ok(Self { path, file, txn })
    }

    /// Open an existing journal
    pub fn open(path: PathBuf) -> Result<Self> {
        let txn = txn_from_path(&path)
            .ok_or_else(|| Error::IoError(format!("Invalid journal filename: {}", path.display())))?;
        let file = OpenOptions::new().append(true).open(&path)?;
        Ok(Self { path, file, txn })
    }

    pub fn txn(&self) -> u64 {
        self.txn
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record and fsync it
    pub fn write(&mut self, record: JournalRecord) -> Result<()> {
        let json = serde_json::to_string(&record)
            .map_err(|e| Error::IoError(format!("Failed to serialize journal record: {}", e)))?;
        let crc = crc32fast::hash(json.as_bytes());
        writeln!(self.file, "{:08x}|{}", crc, json)?;
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Read all valid records from journal
    pub fn read_all(&self) -> Result<Vec<JournalRecord>> {
        read_records(&self.path)
    }

    /// Move the journal to `archive/` after the transaction completed
    pub fn archive(self) -> Result<PathBuf> {
        let archive_dir = self
            .path
            .parent()
            .unwrap_or(Path::new("."))
            .join("archive");
        fs::create_dir_all(&archive_dir)?;

        let archive_path = archive_dir.join(journal_file_name(self.txn));
        fs::rename(&self.path, &archive_path)?;
        Ok(archive_path)
    }
}

fn journal_file_name(txn: u64) -> String {
    format!("txn-{}.journal", txn)
}

fn txn_from_path(path: &Path) -> Option<u64> {
    path.file_stem()?
        .to_str()?
        .strip_prefix("txn-")?
        .parse()
        .ok()
}

/// Read the valid prefix of a journal file
///
/// Reading stops at the first corrupted line.
pub fn read_records(path: &Path) -> Result<Vec<JournalRecord>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.is_empty() {
            continue;
        }

        let Some((crc_hex, json)) = line.split_once('|') else {
            warn!("Malformed journal line {}: missing delimiter", line_num + 1);
            break;
        };

        let expected_crc = u32::from_str_radix(crc_hex, 16).ok();
        let actual_crc = crc32fast::hash(json.as_bytes());
        if expected_crc != Some(actual_crc) {
            warn!(
                "CRC mismatch at line {} of {}",
                line_num + 1,
                path.display()
            );
            break;
        }

        let record: JournalRecord = serde_json::from_str(json).map_err(|e| {
            Error::IoError(format!(
                "Failed to parse journal record at line {}: {}",
                line_num + 1,
                e
            ))
        })?;
        records.push(record);
    }

    Ok(records)
}

/// One journal as listed by `history`
#[derive(Debug, Clone)]
pub struct JournalSummary {
    pub txn: u64,
    pub path: PathBuf,
    /// Moved to `archive/` after completing
    pub archived: bool,
    pub records: Vec<JournalRecord>,
}

impl JournalSummary {
    /// Operation name from the `Begin` record
    pub fn operation(&self) -> Option<&str> {
        self.records.iter().find_map(|r| match r {
            JournalRecord::Begin { operation, .. } => Some(operation.as_str()),
            _ => None,
        })
    }

    /// Human-readable outcome
    pub fn outcome(&self) -> &'static str {
        let rolled_back = self
            .records
            .iter()
            .any(|r| matches!(r, JournalRecord::RolledBack { .. }));
        let rollback_failed = self
            .records
            .iter()
            .any(|r| matches!(r, JournalRecord::RollbackFailed { .. }));
        match self.records.last() {
            Some(JournalRecord::Recovered { .. }) => "recovered",
            _ if rollback_failed => "rollback failed",
            Some(JournalRecord::Committed { .. }) => "committed",
            _ if rolled_back && self.archived => "rolled back",
            _ if self.archived => "aborted",
            _ => "incomplete",
        }
    }
}

/// Every live and archived journal, ordered by transaction id
pub fn list_journals(journal_dir: &Path) -> Result<Vec<JournalSummary>> {
    let mut summaries = Vec::new();
    for (dir, archived) in [(journal_dir.to_path_buf(), false), (journal_dir.join("archive"), true)] {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(txn) = txn_from_path(&path) else {
                continue;
            };
            summaries.push(JournalSummary {
                txn,
                records: read_records(&path)?,
                path,
                archived,
            });
        }
    }
    summaries.sort_by_key(|s| s.txn);
    Ok(summaries)
}

/// Live journals with no terminal record
pub fn find_incomplete_journals(journal_dir: &Path) -> Result<Vec<PathBuf>> {
    Ok(list_journals(journal_dir)?
        .into_iter()
        .filter(|s| !s.archived && !s.records.iter().any(JournalRecord::is_terminal))
        .map(|s| s.path)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn begin(txn: u64) -> JournalRecord {
        JournalRecord::Begin {
            txn,
            operation: "install".to_string(),
            packages: vec!["foo".to_string()],
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_journal_create_and_write() {
        let temp_dir = TempDir::new().unwrap();
        let mut journal = TransactionJournal::create(temp_dir.path(), 7).unwrap();
        assert!(journal.path().ends_with("txn-7.journal"));

        journal.write(begin(7)).unwrap();
        journal
            .write(JournalRecord::Applied {
                package: "foo".to_string(),
                version: "1.0".to_string(),
            })
            .unwrap();

        let records = journal.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert!(matches!(records[0], JournalRecord::Begin { txn: 7, .. }));
    }

    #[test]
    fn test_journal_crc_verification() {
        let temp_dir = TempDir::new().unwrap();
        let mut journal = TransactionJournal::create(temp_dir.path(), 1).unwrap();
        journal.write(begin(1)).unwrap();
        journal
            .write(JournalRecord::Committed { duration_ms: 5 })
            .unwrap();

        // Corrupt the second record
        let content = fs::read_to_string(journal.path()).unwrap();
        let corrupted = content.replacen("\"duration_ms\":5", "\"duration_ms\":6", 1);
        fs::write(journal.path(), corrupted).unwrap();

        let records = journal.read_all().unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_archive_and_history() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();

        let mut done = TransactionJournal::create(dir, 1).unwrap();
        done.write(begin(1)).unwrap();
        done.write(JournalRecord::Committed { duration_ms: 1 }).unwrap();
        done.archive().unwrap();

        let mut live = TransactionJournal::create(dir, 2).unwrap();
        live.write(begin(2)).unwrap();

        let history = list_journals(dir).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].archived);
        assert_eq!(history[0].outcome(), "committed");
        assert_eq!(history[1].outcome(), "incomplete");
        assert_eq!(history[1].operation(), Some("install"));

        assert_eq!(find_incomplete_journals(dir).unwrap(), vec![live.path().to_path_buf()]);
    }

    #[test]
    fn test_reopen_appends() {
        let temp_dir = TempDir::new().unwrap();
        let path = {
            let mut journal = TransactionJournal::create(temp_dir.path(), 3).unwrap();
            journal.write(begin(3)).unwrap();
            journal.path().to_path_buf()
        };
        let mut journal = TransactionJournal::open(path).unwrap();
        assert_eq!(journal.txn(), 3);
        journal
            .write(JournalRecord::RollbackFailed {
                package: "foo".to_string(),
                error: "boom".to_string(),
            })
            .unwrap();
        assert!(journal.read_all().unwrap()[1].is_terminal());
    }
}
