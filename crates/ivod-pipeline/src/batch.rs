//! Transactional batch processor
//!
//! Buffers assembled records, applies each full batch in arrival order
//! through the session's open transaction, and commits every
//! `commit_interval` batches. A bad record is logged and counted, never
//! fatal; a failed commit rolls the batch back and propagates.

use ivod_core::IvodTranscript;
use ivod_db::{DbError, StoreSession};
use tracing::{debug, error};

#[derive(Debug, Default, Clone, Copy)]
pub struct BatchStats {
    pub processed: usize,
    pub errors: usize,
    pub batches: usize,
}

pub struct BatchProcessor<'a> {
    session: &'a mut StoreSession,
    batch_size: usize,
    commit_interval: usize,
    buffer: Vec<(IvodTranscript, Option<i64>)>,
    stats: BatchStats,
}

impl<'a> BatchProcessor<'a> {
    #[must_use]
    pub fn new(session: &'a mut StoreSession, batch_size: usize, commit_interval: usize) -> Self {
        Self {
            session,
            batch_size: batch_size.max(1),
            commit_interval: commit_interval.max(1),
            buffer: Vec::new(),
            stats: BatchStats::default(),
        }
    }

    #[must_use]
    pub const fn stats(&self) -> BatchStats {
        self.stats
    }

    /// Reads through the session's transaction, so writes from earlier
    /// processed batches are visible before commit
    ///
    /// # Errors
    /// Returns `DbError` if the query fails
    pub async fn get(&mut self, ivod_id: i64) -> Result<Option<IvodTranscript>, DbError> {
        self.session.get(ivod_id).await
    }

    /// Append a record; processes the batch once `batch_size` is buffered
    ///
    /// With `update_id` set, the record overwrites that row when it exists
    /// at processing time and is inserted otherwise.
    ///
    /// # Errors
    /// Returns `DbError` only on commit failure; per-record errors are
    /// counted and logged
    pub async fn add(
        &mut self,
        record: IvodTranscript,
        update_id: Option<i64>,
    ) -> Result<(), DbError> {
        self.buffer.push((record, update_id));
        if self.buffer.len() >= self.batch_size {
            self.process_batch().await?;
        }
        Ok(())
    }

    async fn process_batch(&mut self) -> Result<(), DbError> {
        let items = std::mem::take(&mut self.buffer);
        for (record, update_id) in items {
            let ivod_id = record.ivod_id;
            let result = match update_id {
                Some(id) => match self.session.get(id).await {
                    Ok(Some(_)) => self.session.update(&record).await,
                    Ok(None) => self.session.insert(&record).await,
                    Err(e) => Err(e),
                },
                None => self.session.upsert(&record).await.map(|_| ()),
            };
            match result {
                Ok(()) => self.stats.processed += 1,
                Err(e) => {
                    error!("Failed to persist ivod {ivod_id}: {e}");
                    self.stats.errors += 1;
                }
            }
        }
        self.stats.batches += 1;
        if self.stats.batches % self.commit_interval == 0 {
            self.commit_or_rollback().await?;
            debug!("Committed after {} batches", self.stats.batches);
        }
        Ok(())
    }

    async fn commit_or_rollback(&mut self) -> Result<(), DbError> {
        if let Err(e) = self.session.commit().await {
            self.session.rollback().await.ok();
            return Err(e);
        }
        Ok(())
    }

    /// Process the residual buffer and run the final commit
    ///
    /// # Errors
    /// Returns `DbError` on commit failure after rolling back
    pub async fn flush(&mut self) -> Result<(), DbError> {
        if !self.buffer.is_empty() {
            self.process_batch().await?;
        }
        self.commit_or_rollback().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ivod_core::{TranscriptStatus, taipei_now, taipei_tz};
    use ivod_db::Store;

    fn record(ivod_id: i64) -> IvodTranscript {
        use chrono::TimeZone;
        let tz = taipei_tz();
        IvodTranscript {
            ivod_id,
            ivod_url: format!("https://ivod.ly.gov.tw/Play/Clip/300K/{ivod_id}"),
            date: NaiveDate::from_ymd_opt(2024, 3, 6).unwrap(),
            meeting_code: None,
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
            committee_names: Vec::new(),
            ai_transcript: "text".to_owned(),
            ai_status: TranscriptStatus::Success,
            ai_retries: 0,
            ly_transcript: "text".to_owned(),
            ly_status: TranscriptStatus::Success,
            ly_retries: 0,
            last_updated: taipei_now(),
        }
    }

    async fn store() -> Store {
        let store = Store::connect("sqlite::memory:").await.unwrap();
        store.ensure_table().await.unwrap();
        store
    }

    #[tokio::test]
    async fn buffers_until_batch_size_then_processes() {
        let store = store().await;
        let mut session = store.session().await.unwrap();
        let mut batch = BatchProcessor::new(&mut session, 3, 1);

        batch.add(record(1), None).await.unwrap();
        batch.add(record(2), None).await.unwrap();
        assert_eq!(batch.stats().processed, 0);

        batch.add(record(3), None).await.unwrap();
        assert_eq!(batch.stats().processed, 3);
        assert_eq!(batch.stats().batches, 1);

        batch.flush().await.unwrap();
        drop(batch);
        session.close().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn flush_processes_the_residual_buffer() {
        let store = store().await;
        let mut session = store.session().await.unwrap();
        let mut batch = BatchProcessor::new(&mut session, 100, 10);

        batch.add(record(1), None).await.unwrap();
        batch.add(record(2), None).await.unwrap();
        assert_eq!(batch.stats().processed, 0);

        batch.flush().await.unwrap();
        assert_eq!(batch.stats().processed, 2);
        drop(batch);
        session.close().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn later_write_wins_within_one_buffer() {
        let store = store().await;
        let mut session = store.session().await.unwrap();
        let mut batch = BatchProcessor::new(&mut session, 100, 10);

        batch.add(record(7), None).await.unwrap();
        let mut updated = record(7);
        updated.ly_transcript = "amended".to_owned();
        batch.add(updated, Some(7)).await.unwrap();
        batch.flush().await.unwrap();
        drop(batch);
        session.close().await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let stored = store.get(7).await.unwrap().unwrap();
        assert_eq!(stored.ly_transcript, "amended");
    }

    #[tokio::test]
    async fn update_id_for_a_missing_row_falls_back_to_insert() {
        let store = store().await;
        let mut session = store.session().await.unwrap();
        let mut batch = BatchProcessor::new(&mut session, 100, 10);

        batch.add(record(42), Some(42)).await.unwrap();
        batch.flush().await.unwrap();
        assert_eq!(batch.stats().processed, 1);
        assert_eq!(batch.stats().errors, 0);
        drop(batch);
        session.close().await.unwrap();

        assert!(store.get(42).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn reprocessing_a_committed_id_does_not_duplicate() {
        let store = store().await;
        let mut session = store.session().await.unwrap();
        session.insert(&record(9)).await.unwrap();
        session.commit().await.unwrap();

        let mut batch = BatchProcessor::new(&mut session, 2, 1);
        // re-processing a committed id takes the update path, no duplicate row
        batch.add(record(9), None).await.unwrap();
        batch.add(record(10), None).await.unwrap();
        batch.flush().await.unwrap();
        assert_eq!(batch.stats().processed, 2);
        assert_eq!(batch.stats().errors, 0);
        drop(batch);
        session.close().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
    }
}
