//! Retry: re-run failed transcripts, stopping a kind after three
//! consecutive failing calendar dates
//!
//! The upstream's typical failure mode is a whole-day outage of the speech
//! page, so the breaker counts days rather than items: many failing items
//! on one date advance it by a single step.

use chrono::NaiveDate;
use color_eyre::eyre::Result;
use ivod_core::{IvodTranscript, TranscriptKind, TranscriptStatus};
use tracing::{debug, error, info, warn};

use super::{WorkflowContext, align_after};
use crate::aligner::AlignSelector;
use crate::assembler::process_ivod;
use crate::batch::BatchProcessor;
use crate::ledger::FailurePhase;

const BATCH_SIZE: usize = 20;
const STOP_AFTER: u32 = 3;

#[derive(Debug, Default)]
struct KindBreaker {
    last_date: Option<NaiveDate>,
    consecutive: u32,
    failing_dates: Vec<NaiveDate>,
    stopped: bool,
}

impl KindBreaker {
    const fn stopped(&self) -> bool {
        self.stopped
    }

    fn record_success(&mut self, date: NaiveDate) {
        self.consecutive = 0;
        self.failing_dates.clear();
        self.last_date = Some(date);
    }

    fn record_failure(&mut self, kind: TranscriptKind, date: NaiveDate) {
        match self.last_date {
            // one step per calendar date
            Some(last) if date == last => {}
            Some(last) if (date - last).num_days() <= 1 => {
                self.consecutive += 1;
                self.failing_dates.push(date);
            }
            _ => {
                self.consecutive = 1;
                self.failing_dates = vec![date];
            }
        }
        self.last_date = Some(date);
        if self.consecutive >= STOP_AFTER && !self.stopped {
            self.stopped = true;
            let recent = &self.failing_dates[self.failing_dates.len().saturating_sub(3)..];
            warn!("Stopping {kind} retries after consecutive failing dates {recent:?}");
        }
    }
}

/// # Errors
/// Returns an error on database commit failure; per-record failures are
/// ledgered, counted by the breaker and skipped
pub async fn run_retry(ctx: &WorkflowContext) -> Result<()> {
    let max_retries = ctx.config.crawler.max_retries;
    let ai_failed = ctx
        .store
        .query_failed(TranscriptKind::Ai, max_retries)
        .await?;
    let ly_failed = ctx
        .store
        .query_failed(TranscriptKind::Ly, max_retries)
        .await?;
    info!(
        "Retrying {} ai and {} ly failures",
        ai_failed.len(),
        ly_failed.len()
    );

    let mut items: Vec<(TranscriptKind, IvodTranscript)> = ai_failed
        .into_iter()
        .map(|row| (TranscriptKind::Ai, row))
        .chain(ly_failed.into_iter().map(|row| (TranscriptKind::Ly, row)))
        .collect();
    items.sort_by_key(|(_, row)| (row.date, row.ivod_id));

    let mut ai_breaker = KindBreaker::default();
    let mut ly_breaker = KindBreaker::default();

    let mut session = ctx.store.session().await?;
    let mut batch = BatchProcessor::new(
        &mut session,
        BATCH_SIZE,
        ctx.config.crawler.commit_interval,
    );
    let mut reprocessed = Vec::new();

    for (kind, row) in items {
        let breaker = match kind {
            TranscriptKind::Ai => &mut ai_breaker,
            TranscriptKind::Ly => &mut ly_breaker,
        };
        if breaker.stopped() {
            debug!("Skipping ivod {} ({kind} retries stopped)", row.ivod_id);
            continue;
        }

        match process_ivod(&ctx.fetcher, row.ivod_id, Some(&row)).await {
            Ok(rec) => {
                let still_failed = rec.status(kind) == TranscriptStatus::Failed;
                batch.add(rec, Some(row.ivod_id)).await?;
                reprocessed.push(row.ivod_id);
                if still_failed {
                    breaker.record_failure(kind, row.date);
                } else {
                    breaker.record_success(row.date);
                }
            }
            Err(e) => {
                error!("Retrying ivod {} failed: {e}", row.ivod_id);
                if let Err(io) = ctx.ledger.append(row.ivod_id, FailurePhase::Retry) {
                    warn!("Could not record failure for ivod {}: {io}", row.ivod_id);
                }
                breaker.record_failure(kind, row.date);
            }
        }
    }

    batch.flush().await?;
    let stats = batch.stats();
    drop(batch);
    session.close().await?;
    info!(
        "Retry finished: {} processed, {} errors",
        stats.processed, stats.errors
    );

    if !reprocessed.is_empty() {
        align_after(&ctx.config, &ctx.store, AlignSelector::Ids(reprocessed)).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, day).unwrap()
    }

    #[test]
    fn three_consecutive_failing_dates_stop_the_kind() {
        let mut breaker = KindBreaker::default();
        breaker.record_failure(TranscriptKind::Ly, d(1));
        assert!(!breaker.stopped());
        breaker.record_failure(TranscriptKind::Ly, d(2));
        assert!(!breaker.stopped());
        breaker.record_failure(TranscriptKind::Ly, d(3));
        assert!(breaker.stopped());
    }

    #[test]
    fn a_gap_resets_the_run() {
        let mut breaker = KindBreaker::default();
        breaker.record_failure(TranscriptKind::Ly, d(1));
        breaker.record_failure(TranscriptKind::Ly, d(2));
        breaker.record_failure(TranscriptKind::Ly, d(10));
        assert!(!breaker.stopped());
        breaker.record_failure(TranscriptKind::Ly, d(11));
        breaker.record_failure(TranscriptKind::Ly, d(12));
        assert!(breaker.stopped());
    }

    #[test]
    fn many_failures_on_one_date_count_as_one_step() {
        let mut breaker = KindBreaker::default();
        breaker.record_failure(TranscriptKind::Ly, d(1));
        breaker.record_failure(TranscriptKind::Ly, d(1));
        breaker.record_failure(TranscriptKind::Ly, d(1));
        assert!(!breaker.stopped());
        breaker.record_failure(TranscriptKind::Ly, d(2));
        breaker.record_failure(TranscriptKind::Ly, d(3));
        assert!(breaker.stopped());
    }

    #[test]
    fn success_resets_the_count() {
        let mut breaker = KindBreaker::default();
        breaker.record_failure(TranscriptKind::Ly, d(1));
        breaker.record_failure(TranscriptKind::Ly, d(2));
        breaker.record_success(d(3));
        breaker.record_failure(TranscriptKind::Ly, d(4));
        breaker.record_failure(TranscriptKind::Ly, d(5));
        assert!(!breaker.stopped());
        breaker.record_failure(TranscriptKind::Ly, d(6));
        assert!(breaker.stopped());
    }
}
