//! Fix: reprocess an explicit id list or the failure ledger

use color_eyre::eyre::Result;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{error, info, warn};

use super::{WorkflowContext, align_after};
use crate::aligner::AlignSelector;
use crate::assembler::process_ivod;
use crate::batch::BatchProcessor;
use crate::ledger::{FailureLedger, FailurePhase};

const BATCH_SIZE: usize = 30;

/// Where the ids to fix come from
pub enum FixSource {
    /// Explicit ids, e.g. from the command line
    Ids(Vec<i64>),
    /// A failure ledger file; ids are removed from it as they succeed
    Ledger(PathBuf),
}

/// # Errors
/// Returns an error on database commit failure; per-record failures are
/// re-ledgered with phase `fix_retry` and skipped
pub async fn run_fix(ctx: &WorkflowContext, source: FixSource) -> Result<()> {
    let (targets, removal_ledger) = match source {
        FixSource::Ids(ids) => {
            let mut seen = HashSet::new();
            let deduped: Vec<i64> = ids.into_iter().filter(|id| seen.insert(*id)).collect();
            (deduped, None)
        }
        FixSource::Ledger(path) => {
            let ledger = FailureLedger::new(path);
            let ids = ledger.read_ids()?;
            (ids, Some(ledger))
        }
    };
    if targets.is_empty() {
        info!("No records to fix");
        return Ok(());
    }
    info!("Fixing {} records", targets.len());

    let mut session = ctx.store.session().await?;
    let mut batch = BatchProcessor::new(
        &mut session,
        BATCH_SIZE,
        ctx.config.crawler.commit_interval,
    );
    let mut fixed = Vec::new();
    let mut failed = 0usize;

    for ivod_id in targets {
        let existing = batch.get(ivod_id).await?;
        match process_ivod(&ctx.fetcher, ivod_id, existing.as_ref()).await {
            Ok(rec) => {
                batch.add(rec, existing.map(|_| ivod_id)).await?;
                if let Some(ledger) = &removal_ledger {
                    if let Err(io) = ledger.remove(ivod_id) {
                        warn!("Could not remove ivod {ivod_id} from ledger: {io}");
                    }
                }
                fixed.push(ivod_id);
            }
            Err(e) => {
                error!("Fixing ivod {ivod_id} failed: {e}");
                failed += 1;
                if let Err(io) = ctx.ledger.append(ivod_id, FailurePhase::FixRetry) {
                    warn!("Could not record failure for ivod {ivod_id}: {io}");
                }
            }
        }
    }

    batch.flush().await?;
    drop(batch);
    session.close().await?;
    info!("Fix finished: {} fixed, {failed} failed", fixed.len());

    if !fixed.is_empty() {
        align_after(&ctx.config, &ctx.store, AlignSelector::Ids(fixed)).await;
    }
    Ok(())
}
