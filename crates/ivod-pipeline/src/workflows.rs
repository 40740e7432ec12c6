//! Workflow orchestration
//!
//! The four workflows share one prelude: validated config, a connected
//! Store with the schema ensured, a Fetcher and the failure ledger. Every
//! per-record failure is logged, written to the ledger and skipped; only
//! database commit failures abort a run. Each workflow finishes with a
//! batch flush and, when the search index is reachable, one alignment.

mod fix;
mod full;
mod incremental;
mod retry;

pub use fix::{FixSource, run_fix};
pub use full::run_full;
pub use incremental::run_incremental;
pub use retry::run_retry;

use color_eyre::eyre::Result;
use ivod_db::Store;
use tracing::{info, warn};

use crate::aligner::{AlignSelector, IndexAligner};
use crate::config::Config;
use crate::fetcher::IvodFetcher;
use crate::ledger::FailureLedger;

/// Shared state built by the workflow prelude
pub struct WorkflowContext {
    pub config: Config,
    pub store: Store,
    pub fetcher: IvodFetcher,
    pub ledger: FailureLedger,
}

impl WorkflowContext {
    /// Connect the Store, ensure the schema, build the Fetcher
    ///
    /// # Errors
    /// Returns an error before any fetch when the database or
    /// configuration is unusable
    pub async fn initialize(config: Config) -> Result<Self> {
        let url = config.database.url(config.environment);
        let store = Store::connect(&url).await?;
        if !store.exists_table().await? {
            info!("Table ivod_transcripts missing, creating it");
        }
        store.ensure_table().await?;
        info!(
            "Database ready ({}, {} records)",
            store.backend_name(),
            store.count().await?
        );

        let fetcher = IvodFetcher::new(&config.crawler)?;
        let ledger = FailureLedger::new(&config.crawler.error_log_path);
        Ok(Self {
            config,
            store,
            fetcher,
            ledger,
        })
    }
}

/// End-of-workflow alignment; unavailability is informational, never fatal
pub(crate) async fn align_after(config: &Config, store: &Store, selector: AlignSelector) {
    if !config.elasticsearch.enable_elasticsearch {
        info!("Search indexing disabled, skipping alignment");
        return;
    }
    let aligner = match IndexAligner::from_config(&config.elasticsearch, config.environment) {
        Ok(aligner) => aligner,
        Err(e) => {
            warn!("Could not build search index client: {e}");
            return;
        }
    };
    if !aligner.ping().await {
        info!(
            "Search index unreachable at {}, skipping alignment",
            config.elasticsearch.base_url()
        );
        return;
    }
    if let Err(e) = aligner.ensure_index().await {
        warn!("Could not ensure search index: {e}");
        return;
    }
    match aligner.align(store, &selector).await {
        Ok(stats) if stats.errors == 0 => info!(
            "Search index aligned: {} updated, {} skipped",
            stats.updated, stats.skipped
        ),
        Ok(stats) => warn!(
            "Search index aligned with {} errors ({} updated, {} skipped)",
            stats.errors, stats.updated, stats.skipped
        ),
        Err(e) => warn!("Search index alignment failed: {e}"),
    }
}

/// Manual alignment run (the `es` command)
///
/// Returns `Ok(false)` when the index is unreachable or any document
/// failed to index; disabled indexing is expected behavior and succeeds.
///
/// # Errors
/// Returns an error if the Store query or index creation fails
pub async fn run_es(config: &Config, store: &Store, selector: AlignSelector) -> Result<bool> {
    if !config.elasticsearch.enable_elasticsearch {
        info!("Search indexing disabled, skipping alignment");
        return Ok(true);
    }
    let aligner = IndexAligner::from_config(&config.elasticsearch, config.environment)?;
    if !aligner.ping().await {
        warn!(
            "Search index unreachable at {}",
            config.elasticsearch.base_url()
        );
        return Ok(false);
    }
    aligner.ensure_index().await?;
    let stats = aligner.align(store, &selector).await?;
    info!(
        "Alignment finished: {} updated, {} skipped, {} errors",
        stats.updated, stats.skipped, stats.errors
    );
    Ok(stats.errors == 0)
}
