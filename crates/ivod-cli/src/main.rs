use chrono::Duration;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use ivod_core::taipei_now;
use ivod_db::Store;
use ivod_pipeline::aligner::AlignSelector;
use ivod_pipeline::backup;
use ivod_pipeline::config::{Config, CrawlerConfig};
use ivod_pipeline::ledger::FailureLedger;
use ivod_pipeline::workflows::{self, FixSource, WorkflowContext};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use tracing::{error, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

#[derive(Parser)]
#[command(name = "ivod")]
#[command(about = "Crawl, reconcile and index legislative IVOD transcripts")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl the full catalog over a date range
    Full {
        /// Start date (YYYY-MM-DD), clamped to the catalog epoch
        #[arg(long)]
        start_date: Option<String>,

        /// End date (YYYY-MM-DD), clamped to today
        #[arg(long)]
        end_date: Option<String>,
    },

    /// Fill missing transcripts for the last two weeks of records
    Incremental,

    /// Re-run failed transcripts with circuit breaking
    Retry,

    /// Reprocess explicit ids or the failure ledger
    Fix {
        /// Single id to reprocess
        #[arg(long, conflicts_with_all = ["file", "error_log"])]
        ivod_id: Option<i64>,

        /// Ledger file to read ids from
        #[arg(long, conflicts_with = "error_log")]
        file: Option<PathBuf>,

        /// Alternate path for the failure ledger
        #[arg(long)]
        error_log: Option<PathBuf>,
    },

    /// Align the search index with the store
    Es {
        /// Compare every record in the store
        #[arg(long, conflicts_with_all = ["ivod_ids", "ivod_ids_file"])]
        full: bool,

        /// Explicit ids to align
        #[arg(long, num_args = 1.., conflicts_with = "ivod_ids_file")]
        ivod_ids: Vec<i64>,

        /// File of ids to align, one per line
        #[arg(long)]
        ivod_ids_file: Option<PathBuf>,
    },

    /// Dump the table to a JSON backup file
    Backup {
        /// Backup file path (auto-named under backup/ when omitted)
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Restore the table from a JSON backup file
    Restore {
        /// Backup file path
        backup_file: PathBuf,

        /// Create the table without asking
        #[arg(long)]
        force_create: bool,

        /// Clear existing data without asking
        #[arg(long)]
        force_clear: bool,

        /// Imply both force flags
        #[arg(long)]
        force_all: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = color_eyre::install() {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = init_logging(&config.crawler) {
        eprintln!("Could not initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    tokio::select! {
        result = run_command(cli.command, config) => match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("{e:?}");
                ExitCode::FAILURE
            }
        },
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted");
            ExitCode::from(130)
        }
    }
}

async fn run_command(command: Commands, config: Config) -> Result<()> {
    match command {
        Commands::Full {
            start_date,
            end_date,
        } => {
            let ctx = WorkflowContext::initialize(config).await?;
            workflows::run_full(&ctx, start_date.as_deref(), end_date.as_deref()).await
        }

        Commands::Incremental => {
            let ctx = WorkflowContext::initialize(config).await?;
            workflows::run_incremental(&ctx).await
        }

        Commands::Retry => {
            let ctx = WorkflowContext::initialize(config).await?;
            workflows::run_retry(&ctx).await
        }

        Commands::Fix {
            ivod_id,
            file,
            error_log,
        } => {
            let source = if let Some(id) = ivod_id {
                FixSource::Ids(vec![id])
            } else if let Some(path) = file.or(error_log) {
                FixSource::Ledger(path)
            } else {
                FixSource::Ledger(PathBuf::from(&config.crawler.error_log_path))
            };
            let ctx = WorkflowContext::initialize(config).await?;
            workflows::run_fix(&ctx, source).await
        }

        Commands::Es {
            full,
            ivod_ids,
            ivod_ids_file,
        } => {
            let selector = if full {
                AlignSelector::Full
            } else if !ivod_ids.is_empty() {
                AlignSelector::Ids(ivod_ids)
            } else if let Some(path) = ivod_ids_file {
                AlignSelector::Ids(FailureLedger::new(path).read_ids()?)
            } else {
                AlignSelector::Recent(Duration::days(7))
            };
            let store = connect(&config).await?;
            if workflows::run_es(&config, &store, selector).await? {
                Ok(())
            } else {
                Err(eyre!("search index alignment failed"))
            }
        }

        Commands::Backup { file } => {
            let store = connect(&config).await?;
            let path = backup::run_backup(&store, file).await?;
            println!("Backup written to {}", path.display());
            Ok(())
        }

        Commands::Restore {
            backup_file,
            force_create,
            force_clear,
            force_all,
        } => {
            let store = connect(&config).await?;
            backup::run_restore(
                &store,
                &backup_file,
                force_create || force_all,
                force_clear || force_all,
            )
            .await
        }
    }
}

async fn connect(config: &Config) -> Result<Store> {
    Ok(Store::connect(&config.database.url(config.environment)).await?)
}

/// Terminal sees WARN and above; the daily log file receives INFO and
/// above, filterable through `RUST_LOG`
fn init_logging(cfg: &CrawlerConfig) -> Result<()> {
    let log_dir = Path::new(&cfg.log_path);
    std::fs::create_dir_all(log_dir)?;
    let file_name = format!("crawler_{}.log", taipei_now().format("%Y%m%d"));
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(file_name))?;

    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .with_filter(file_filter),
        )
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(LevelFilter::WARN),
        )
        .init();
    Ok(())
}
