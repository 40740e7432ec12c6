//! Backup and restore
//!
//! Dumps the whole table into a portable JSON envelope and restores it,
//! preserving each record's original `last_updated`.

use color_eyre::eyre::{Result, WrapErr, bail};
use ivod_core::{IvodTranscript, taipei_now};
use ivod_db::Store;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info};

pub const BACKUP_VERSION: &str = "1.0";

#[derive(Debug, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub backup_time: String,
    pub db_backend: String,
    pub record_count: usize,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BackupFile {
    pub metadata: BackupMetadata,
    pub data: Vec<IvodTranscript>,
}

/// Dump every record to `file`, or to an auto-named file under `backup/`
///
/// # Errors
/// Returns an error when the store is empty or the file cannot be written
pub async fn run_backup(store: &Store, file: Option<PathBuf>) -> Result<PathBuf> {
    let records = store.fetch_all().await?;
    if records.is_empty() {
        bail!("no records to back up");
    }

    let path = file.unwrap_or_else(|| {
        PathBuf::from(format!(
            "backup/ivod_backup_{}.json",
            taipei_now().format("%Y%m%d_%H%M%S")
        ))
    });
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let backup = BackupFile {
        metadata: BackupMetadata {
            backup_time: taipei_now().to_rfc3339(),
            db_backend: store.backend_name().to_owned(),
            record_count: records.len(),
            version: BACKUP_VERSION.to_owned(),
        },
        data: records,
    };

    let out = fs::File::create(&path)
        .wrap_err_with(|| format!("cannot create backup file {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(out), &backup)?;
    info!(
        "Backed up {} records to {}",
        backup.metadata.record_count,
        path.display()
    );
    Ok(path)
}

/// Restore a backup file into the store
///
/// Missing table and pre-existing rows each require their force flag, or
/// an interactive confirmation. Records keep the `last_updated` they were
/// backed up with.
///
/// # Errors
/// Returns an error on an unreadable or malformed backup file, a declined
/// confirmation, or a database failure
pub async fn run_restore(
    store: &Store,
    path: &Path,
    force_create: bool,
    force_clear: bool,
) -> Result<()> {
    let raw = fs::read_to_string(path)
        .wrap_err_with(|| format!("cannot read backup file {}", path.display()))?;
    let backup: BackupFile = serde_json::from_str(&raw).wrap_err("malformed backup file")?;
    info!(
        "Backup from {} ({} backend, {} records, version {})",
        backup.metadata.backup_time,
        backup.metadata.db_backend,
        backup.metadata.record_count,
        backup.metadata.version
    );

    if !store.exists_table().await? {
        if !force_create && !confirm("Table ivod_transcripts does not exist. Create it?")? {
            bail!("restore cancelled: table does not exist");
        }
        store.ensure_table().await?;
        info!("Created table ivod_transcripts");
    }

    let existing = store.count().await?;
    if existing > 0 {
        if !force_clear && !confirm(&format!("Database holds {existing} records. Clear them?"))? {
            bail!("restore cancelled: existing data kept");
        }
        store.delete_all().await?;
        info!("Cleared {existing} existing records");
    }

    let mut session = store.session().await?;
    let mut restored = 0usize;
    let mut errors = 0usize;
    for rec in &backup.data {
        match session.insert(rec).await {
            Ok(()) => restored += 1,
            Err(e) => {
                error!("Restoring ivod {} failed: {e}", rec.ivod_id);
                errors += 1;
            }
        }
    }
    session.commit().await?;
    session.close().await?;
    info!("Restore finished: {restored} restored, {errors} errors");
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} (y/N): ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(matches!(line.trim().to_lowercase().as_str(), "y" | "yes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use ivod_core::{TranscriptStatus, taipei_tz};
    use tempfile::tempdir;

    fn record(ivod_id: i64) -> IvodTranscript {
        let tz = taipei_tz();
        IvodTranscript {
            ivod_id,
            ivod_url: format!("https://ivod.ly.gov.tw/Play/Clip/300K/{ivod_id}"),
            date: NaiveDate::from_ymd_opt(2024, 3, 6).unwrap(),
            meeting_code: Some("委員會-11-1-22".to_owned()),
            meeting_code_str: None,
            category: None,
            video_type: None,
            video_start: None,
            video_end: None,
            video_length: None,
            video_url: None,
            title: Some("院會".to_owned()),
            speaker_name: None,
            meeting_time: tz.with_ymd_and_hms(2024, 3, 6, 9, 0, 0).unwrap(),
            meeting_name: None,
            committee_names: vec!["內政委員會".to_owned()],
            ai_transcript: "text".to_owned(),
            ai_status: TranscriptStatus::Success,
            ai_retries: 0,
            ly_transcript: String::new(),
            ly_status: TranscriptStatus::Failed,
            ly_retries: 2,
            last_updated: tz.with_ymd_and_hms(2024, 3, 7, 1, 30, 0).unwrap(),
        }
    }

    async fn seeded_store(ids: &[i64]) -> Store {
        let store = Store::connect("sqlite::memory:").await.unwrap();
        store.ensure_table().await.unwrap();
        let mut session = store.session().await.unwrap();
        for id in ids {
            session.insert(&record(*id)).await.unwrap();
        }
        session.commit().await.unwrap();
        session.close().await.unwrap();
        store
    }

    #[tokio::test]
    async fn backup_then_restore_reproduces_the_table() {
        let dir = tempdir().unwrap();
        let source = seeded_store(&[1, 2, 3]).await;
        let path = run_backup(&source, Some(dir.path().join("backup.json")))
            .await
            .unwrap();

        let target = Store::connect("sqlite::memory:").await.unwrap();
        target.ensure_table().await.unwrap();
        run_restore(&target, &path, true, true).await.unwrap();

        assert_eq!(target.count().await.unwrap(), 3);
        let original = source.fetch_all().await.unwrap();
        let restored = target.fetch_all().await.unwrap();
        // field-wise equality, last_updated included
        assert_eq!(original, restored);
    }

    #[tokio::test]
    async fn backup_envelope_carries_metadata() {
        let dir = tempdir().unwrap();
        let store = seeded_store(&[10]).await;
        let path = run_backup(&store, Some(dir.path().join("backup.json")))
            .await
            .unwrap();

        let backup: BackupFile =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(backup.metadata.db_backend, "sqlite");
        assert_eq!(backup.metadata.record_count, 1);
        assert_eq!(backup.metadata.version, BACKUP_VERSION);
        assert_eq!(backup.data.len(), 1);
    }

    #[tokio::test]
    async fn empty_store_refuses_to_back_up() {
        let store = Store::connect("sqlite::memory:").await.unwrap();
        store.ensure_table().await.unwrap();
        assert!(run_backup(&store, None).await.is_err());
    }

    #[tokio::test]
    async fn malformed_backup_file_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{\"data\": []}").unwrap();
        let store = seeded_store(&[]).await;
        assert!(run_restore(&store, &path, true, true).await.is_err());
    }
}
