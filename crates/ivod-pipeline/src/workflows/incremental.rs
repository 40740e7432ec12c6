//! Incremental update: union of the last two weeks of ids, filling
//! missing transcripts on known records

use chrono::Duration;
use color_eyre::eyre::Result;
use ivod_core::{TranscriptKind, date_range, taipei_now};
use std::collections::BTreeSet;
use tracing::{error, info, warn};

use super::{WorkflowContext, align_after};
use crate::aligner::AlignSelector;
use crate::assembler::process_ivod;
use crate::batch::BatchProcessor;
use crate::ledger::FailurePhase;

const BATCH_SIZE: usize = 50;
const LOOKBACK_DAYS: i64 = 14;
const ALIGN_WINDOW_DAYS: i64 = 7;

/// # Errors
/// Returns an error on database commit failure; per-record failures are
/// ledgered and skipped
pub async fn run_incremental(ctx: &WorkflowContext) -> Result<()> {
    let today = taipei_now().date_naive();
    let start = today - Duration::days(LOOKBACK_DAYS);

    let mut ids = BTreeSet::new();
    for date in date_range(start, today) {
        match ctx.fetcher.list_ids(date).await {
            Ok(day_ids) => ids.extend(day_ids),
            Err(e) => warn!("Listing {date} failed: {e}"),
        }
    }
    info!("Incremental update over {} candidate ids", ids.len());

    let mut session = ctx.store.session().await?;
    let mut batch = BatchProcessor::new(
        &mut session,
        BATCH_SIZE,
        ctx.config.crawler.commit_interval,
    );

    for ivod_id in ids {
        let Some(existing) = batch.get(ivod_id).await? else {
            match process_ivod(&ctx.fetcher, ivod_id, None).await {
                Ok(rec) => {
                    batch.add(rec, None).await?;
                    info!("Added ivod {ivod_id}");
                }
                Err(e) => {
                    error!("Adding ivod {ivod_id} failed: {e}");
                    record_failure(ctx, ivod_id);
                }
            }
            continue;
        };

        let ai_missing = existing.ai_transcript.is_empty();
        let ly_missing = existing.ly_transcript.is_empty();
        if !ai_missing && !ly_missing {
            continue;
        }

        // one reassembly covers both missing transcripts
        match process_ivod(&ctx.fetcher, ivod_id, Some(&existing)).await {
            Ok(fresh) => {
                let mut updated = existing;
                if ai_missing {
                    updated.copy_transcript_from(&fresh, TranscriptKind::Ai);
                    info!("Filled ai transcript for ivod {ivod_id}");
                }
                if ly_missing {
                    updated.copy_transcript_from(&fresh, TranscriptKind::Ly);
                    info!("Filled ly transcript for ivod {ivod_id}");
                }
                updated.last_updated = fresh.last_updated;
                batch.add(updated, Some(ivod_id)).await?;
            }
            Err(e) => {
                error!("Updating ivod {ivod_id} failed: {e}");
                record_failure(ctx, ivod_id);
            }
        }
    }

    batch.flush().await?;
    let stats = batch.stats();
    drop(batch);
    session.close().await?;
    info!(
        "Incremental update finished: {} processed, {} errors",
        stats.processed, stats.errors
    );

    align_after(
        &ctx.config,
        &ctx.store,
        AlignSelector::Recent(Duration::days(ALIGN_WINDOW_DAYS)),
    )
    .await;
    Ok(())
}

fn record_failure(ctx: &WorkflowContext, ivod_id: i64) {
    if let Err(io) = ctx.ledger.append(ivod_id, FailurePhase::Incremental) {
        warn!("Could not record failure for ivod {ivod_id}: {io}");
    }
}
