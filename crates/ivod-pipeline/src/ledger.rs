//! Failure ledger
//!
//! Append-only UTF-8 text file, one failure event per line:
//! `<ivod_id>,<phase>,<YYYY-MM-DD HH:MM:SS>`. The ledger is the canonical
//! list of per-record failures and is what the Fix workflow consumes.

use ivod_core::taipei_now;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Workflow phase that recorded the failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePhase {
    Processing,
    Incremental,
    Retry,
    FixRetry,
    ManualFix,
    General,
}

impl FailurePhase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Incremental => "incremental",
            Self::Retry => "retry",
            Self::FixRetry => "fix_retry",
            Self::ManualFix => "manual_fix",
            Self::General => "general",
        }
    }
}

impl fmt::Display for FailurePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct FailureLedger {
    path: PathBuf,
}

impl FailureLedger {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one failure event; each append is a single write
    ///
    /// # Errors
    /// Returns `io::Error` if the file cannot be opened or written
    pub fn append(&self, ivod_id: i64, phase: FailurePhase) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let timestamp = taipei_now().format("%Y-%m-%d %H:%M:%S");
        let line = format!("{ivod_id},{phase},{timestamp}\n");
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())
    }

    /// Deduplicated ids in first-seen order; malformed lines are skipped
    /// with a warning, a missing file reads as empty
    ///
    /// # Errors
    /// Returns `io::Error` if an existing file cannot be read
    pub fn read_ids(&self) -> io::Result<Vec<i64>> {
        if !self.path.exists() {
            warn!("Failure ledger does not exist: {}", self.path.display());
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        let mut seen = std::collections::HashSet::new();
        let mut ids = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let first = line.split(',').next().unwrap_or_default();
            match first.parse::<i64>() {
                Ok(id) => {
                    if seen.insert(id) {
                        ids.push(id);
                    }
                }
                Err(_) => warn!("Skipping malformed ledger line {line:?}"),
            }
        }
        Ok(ids)
    }

    /// Drop every line whose first field equals `ivod_id` and rewrite
    ///
    /// # Errors
    /// Returns `io::Error` if the file cannot be read or rewritten
    pub fn remove(&self, ivod_id: i64) -> io::Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let content = fs::read_to_string(&self.path)?;
        let target = ivod_id.to_string();
        let kept: String = content
            .lines()
            .filter(|line| {
                let line = line.trim();
                !line.is_empty() && line.split(',').next() != Some(target.as_str())
            })
            .fold(String::new(), |mut acc, line| {
                acc.push_str(line);
                acc.push('\n');
                acc
            });
        fs::write(&self.path, kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn appended_lines_carry_id_phase_and_timestamp() {
        let dir = tempdir().unwrap();
        let ledger = FailureLedger::new(dir.path().join("failed_ivods.txt"));
        ledger.append(159_939, FailurePhase::Processing).unwrap();
        ledger.append(200, FailurePhase::FixRetry).unwrap();

        let content = fs::read_to_string(ledger.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("159939,processing,"));
        assert!(lines[1].starts_with("200,fix_retry,"));
        let timestamp = lines[0].split(',').nth(2).unwrap();
        assert_eq!(timestamp.len(), "2024-03-06 12:00:00".len());
    }

    #[test]
    fn read_ids_deduplicates_and_skips_malformed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("failed_ivods.txt");
        fs::write(
            &path,
            "100,processing,2024-03-06 12:00:00\n\
             garbage line\n\
             200,retry,2024-03-06 12:00:01\n\
             100,fix_retry,2024-03-06 12:00:02\n\
             \n",
        )
        .unwrap();

        let ledger = FailureLedger::new(&path);
        assert_eq!(ledger.read_ids().unwrap(), vec![100, 200]);
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempdir().unwrap();
        let ledger = FailureLedger::new(dir.path().join("nope.txt"));
        assert!(ledger.read_ids().unwrap().is_empty());
    }

    #[test]
    fn remove_filters_only_the_target_id() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("failed_ivods.txt");
        fs::write(
            &path,
            "100,processing,2024-03-06 12:00:00\n\
             200,retry,2024-03-06 12:00:01\n\
             100,retry,2024-03-06 12:00:02\n",
        )
        .unwrap();

        let ledger = FailureLedger::new(&path);
        ledger.remove(100).unwrap();
        assert_eq!(ledger.read_ids().unwrap(), vec![200]);

        // removing an absent id leaves the file unchanged
        ledger.remove(999).unwrap();
        assert_eq!(ledger.read_ids().unwrap(), vec![200]);
    }
}
