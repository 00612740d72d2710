//! mediavec - media ingestion and embedding tool

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use futures::FutureExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use mediavec_common::error_log::ErrorLog;
use mediavec_common::logging::{init_logging, LogConfig, LogLevel};
use mediavec_common::types::Locator;
use mediavec_ingest::config::Config;
use mediavec_ingest::embedding::{credentials, EmbeddingClient};
use mediavec_ingest::framework::{JobOrchestrator, OrchestratorReport, PipelineReport, TaskRunner};
use mediavec_ingest::store::{PgVectorStore, S3MediaStore};
use mediavec_ingest::worker::{self, ProcessRunner};
use mediavec_ingest::{db, jobs};

#[derive(Parser, Debug)]
#[command(name = "mediavec")]
#[command(author, version, about = "Media ingestion and embedding tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import TSV files of `image_url<TAB>description` rows
    Import {
        /// Input files, processed in batches in the given order
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Files imported at once
        #[arg(short, long, env = "INGEST_JOB_PARALLELISM")]
        parallelism: Option<usize>,

        /// Rows in flight per file
        #[arg(short, long, env = "INGEST_IMPORT_CONCURRENCY")]
        concurrency: Option<usize>,

        /// How each file job is isolated
        #[arg(long, value_enum, default_value_t = Isolation::Process)]
        isolation: Isolation,
    },

    /// Compute embeddings for every stored image that has none
    EmbedImages {
        /// Records in flight
        #[arg(short, long, env = "INGEST_RECORD_CONCURRENCY")]
        concurrency: Option<usize>,
    },

    /// Embed one video and store a row per segment
    EmbedVideo {
        /// Bucket locator, e.g. gs://bucket/BigBuckBunny.mp4
        locator: String,

        /// Description stored on every segment row (defaults to the file stem)
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Apply database migrations
    Migrate,

    /// Run one import job from a JSON payload on stdin
    #[command(hide = true)]
    Worker,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Isolation {
    /// One child process per file
    Process,
    /// One tokio task per file
    Task,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let worker_mode = matches!(cli.command, Command::Worker);

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let mut log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("mediavec")
        .filter_directives("sqlx=warn,aws_smithy_runtime=warn,aws_config=warn")
        .build()
        .merge_env()?;

    // Worker stdout carries the completion message
    if worker_mode {
        log_config.output = log_config.output.off_stdout();
    }

    init_logging(&log_config)?;

    let config = Config::load().context("Failed to load configuration")?;

    match cli.command {
        Command::Import {
            files,
            parallelism,
            concurrency,
            isolation,
        } => {
            let parallelism = parallelism.unwrap_or(config.pipeline.job_parallelism);
            let concurrency = concurrency.unwrap_or(config.pipeline.import_concurrency);
            let report = run_import(&config, files, parallelism, concurrency, isolation).await?;
            print_import_summary(&report);
        },
        Command::EmbedImages { concurrency } => {
            let concurrency = concurrency.unwrap_or(config.pipeline.record_concurrency);
            let error_log = ErrorLog::open(&config.pipeline.error_log)?;
            let vectors = vector_store(&config).await?;
            let client = Arc::new(embedding_client(&config)?);

            let report =
                jobs::embed_pending_images(client, vectors, concurrency, Some(error_log)).await?;
            print_report(&report);
        },
        Command::EmbedVideo {
            locator,
            description,
        } => {
            let locator = Locator::parse(&locator)?;
            let error_log = ErrorLog::open(&config.pipeline.error_log)?;
            let vectors = vector_store(&config).await?;
            let client = Arc::new(embedding_client(&config)?);

            let report =
                jobs::embed_video(locator, description, client, vectors, Some(error_log)).await?;
            print_report(&report);
            if report.committed == 0 {
                anyhow::bail!(
                    "Video embedding failed, see {}",
                    config.pipeline.error_log.display()
                );
            }
        },
        Command::Migrate => {
            let pool = db::create_pool(&config.database).await?;
            db::run_migrations(&pool).await?;
        },
        Command::Worker => {
            let completed = worker::serve_one(tokio::io::stdin(), tokio::io::stdout(), |payload| async move {
                let error_log = ErrorLog::open(&config.pipeline.error_log)?;
                let objects = media_store(&config).await?;
                let vectors = vector_store(&config).await?;
                let report = jobs::import_file(
                    &payload.job.source,
                    objects,
                    vectors,
                    payload.import_concurrency,
                    Some(error_log),
                )
                .await?;
                Ok::<_, anyhow::Error>(report)
            })
            .await?;

            if !completed {
                anyhow::bail!("Worker job failed");
            }
            return Ok(());
        },
    }

    info!("Done");
    Ok(())
}

async fn run_import(
    config: &Config,
    files: Vec<PathBuf>,
    parallelism: usize,
    concurrency: usize,
    isolation: Isolation,
) -> Result<OrchestratorReport> {
    let error_log = ErrorLog::open(&config.pipeline.error_log)?;
    let orchestrator = JobOrchestrator::new(parallelism)?.with_error_log(error_log.clone());
    let import_jobs = jobs::import_jobs(files.as_slice());

    info!(
        files = import_jobs.len(),
        parallelism,
        concurrency,
        isolation = ?isolation,
        "Starting import"
    );

    let report = match isolation {
        Isolation::Process => {
            let runner = ProcessRunner::current_exe(concurrency)
                .context("Failed to locate the mediavec executable")?;
            orchestrator.run(import_jobs, &runner).await?
        },
        Isolation::Task => {
            let objects = media_store(config).await?;
            let vectors = vector_store(config).await?;
            let runner = TaskRunner::new(move |job| {
                let objects = Arc::clone(&objects);
                let vectors = Arc::clone(&vectors);
                let error_log = error_log.clone();
                async move {
                    let report =
                        jobs::import_file(&job.source, objects, vectors, concurrency, Some(error_log))
                            .await?;
                    Ok::<_, anyhow::Error>(report)
                }
                .boxed()
            });
            orchestrator.run(import_jobs, &runner).await?
        },
    };

    Ok(report)
}

async fn media_store(config: &Config) -> Result<Arc<S3MediaStore>> {
    let timeout = Duration::from_secs(config.pipeline.fetch_timeout_secs);
    let store = S3MediaStore::from_env(&config.storage, timeout)
        .await
        .context("Failed to initialize media store")?;
    Ok(Arc::new(store))
}

async fn vector_store(config: &Config) -> Result<Arc<PgVectorStore>> {
    let pool = db::create_pool(&config.database)
        .await
        .context("Failed to connect to database")?;
    Ok(Arc::new(PgVectorStore::new(pool)))
}

fn embedding_client(config: &Config) -> Result<EmbeddingClient> {
    let credentials = credentials::from_config(&config.embedding);
    EmbeddingClient::from_config(&config.embedding, credentials)
        .context("Failed to create embedding client")
}

fn print_report(report: &PipelineReport) {
    println!(
        "{}: {} committed, {} failed, {} skipped, {} rows written in {:.1}s",
        report.name,
        report.committed,
        report.failed,
        report.skipped,
        report.rows_written,
        report.elapsed_ms as f64 / 1000.0
    );
}

fn print_import_summary(report: &OrchestratorReport) {
    for failure in report.failures() {
        warn!(job = %failure.job_id, status = ?failure.status, "Job did not complete");
    }

    let totals = report.totals();
    println!(
        "Run {}: {} of {} files imported in {} batches",
        report.run_id,
        report.succeeded(),
        report.outcomes.len(),
        report.batches
    );
    print_report(&totals);
}
