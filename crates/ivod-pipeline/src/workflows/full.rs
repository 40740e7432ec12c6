//! Full crawl: every date in the requested range, every id per date

use chrono::NaiveDate;
use color_eyre::eyre::Result;
use ivod_core::{date_range, taipei_now};
use ivod_db::DbError;
use tracing::{debug, error, info, warn};

use super::{WorkflowContext, align_after};
use crate::aligner::AlignSelector;
use crate::assembler::process_ivod;
use crate::batch::BatchProcessor;
use crate::ledger::FailurePhase;

/// The catalog holds nothing before this date
#[expect(clippy::expect_used)]
fn default_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 2, 1).expect("2024-02-01 is a valid date")
}

fn clamp_start(input: Option<&str>, default_start: NaiveDate) -> NaiveDate {
    input.map_or(default_start, |raw| match raw.parse::<NaiveDate>() {
        Ok(date) if date < default_start => {
            warn!("Start date {raw} predates {default_start}, using {default_start}");
            default_start
        }
        Ok(date) => date,
        Err(_) => {
            warn!("Malformed start date {raw:?}, using {default_start}");
            default_start
        }
    })
}

fn clamp_end(input: Option<&str>, today: NaiveDate) -> NaiveDate {
    input.map_or(today, |raw| match raw.parse::<NaiveDate>() {
        Ok(date) if date > today => {
            warn!("End date {raw} is in the future, using {today}");
            today
        }
        Ok(date) => date,
        Err(_) => {
            warn!("Malformed end date {raw:?}, using {today}");
            today
        }
    })
}

/// Crawl `[start, end]` inclusive, upserting every record
///
/// # Errors
/// Returns an error on database commit failure; per-record failures are
/// ledgered and skipped
pub async fn run_full(
    ctx: &WorkflowContext,
    start_date: Option<&str>,
    end_date: Option<&str>,
) -> Result<()> {
    let today = taipei_now().date_naive();
    let start = clamp_start(start_date, default_start());
    let end = clamp_end(end_date, today);
    info!("Full crawl from {start} to {end}");

    let mut session = ctx.store.session().await?;
    let mut batch = BatchProcessor::new(
        &mut session,
        ctx.config.crawler.batch_size,
        ctx.config.crawler.commit_interval,
    );

    for date in date_range(start, end) {
        let ids = match ctx.fetcher.list_ids(date).await {
            Ok(ids) => ids,
            Err(e) => {
                error!("Listing {date} failed: {e}");
                continue;
            }
        };
        if ids.is_empty() {
            debug!("No records on {date}");
            continue;
        }
        info!("{date}: {} records", ids.len());
        for ivod_id in ids {
            process_one(ctx, &mut batch, ivod_id).await?;
        }
    }

    batch.flush().await?;
    let stats = batch.stats();
    drop(batch);
    session.close().await?;
    info!(
        "Full crawl finished: {} processed, {} errors",
        stats.processed, stats.errors
    );

    align_after(&ctx.config, &ctx.store, AlignSelector::Full).await;
    Ok(())
}

async fn process_one(
    ctx: &WorkflowContext,
    batch: &mut BatchProcessor<'_>,
    ivod_id: i64,
) -> Result<(), DbError> {
    debug!("Processing ivod {ivod_id}");
    let existing = batch.get(ivod_id).await?;
    match process_ivod(&ctx.fetcher, ivod_id, existing.as_ref()).await {
        Ok(rec) => batch.add(rec, existing.map(|_| ivod_id)).await,
        Err(e) => {
            error!("Processing ivod {ivod_id} failed: {e}");
            if let Err(io) = ctx.ledger.append(ivod_id, FailurePhase::Processing) {
                warn!("Could not record failure for ivod {ivod_id}: {io}");
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn start_before_catalog_epoch_is_clamped() {
        assert_eq!(clamp_start(Some("2023-12-31"), default_start()), d(2024, 2, 1));
        assert_eq!(clamp_start(Some("2024-03-06"), default_start()), d(2024, 3, 6));
        assert_eq!(clamp_start(None, default_start()), d(2024, 2, 1));
    }

    #[test]
    fn malformed_dates_fall_back_to_defaults() {
        assert_eq!(clamp_start(Some("garbage"), default_start()), d(2024, 2, 1));
        assert_eq!(clamp_end(Some("06-03-2024"), d(2024, 6, 1)), d(2024, 6, 1));
    }

    #[test]
    fn end_after_today_is_clamped_to_today() {
        let today = d(2024, 6, 1);
        assert_eq!(clamp_end(Some("2030-01-01"), today), today);
        assert_eq!(clamp_end(Some("2024-05-05"), today), d(2024, 5, 5));
        assert_eq!(clamp_end(None, today), today);
    }
}
