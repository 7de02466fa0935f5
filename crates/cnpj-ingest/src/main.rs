//! CNPJ Ingest - bulk loader for the Receita Federal open CNPJ data

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cnpj_common::logging::{init_logging, LogConfig, LogLevel};
use cnpj_ingest::config::EtlConfig;
use cnpj_ingest::pipeline::Pipeline;
use cnpj_ingest::progress::Progress;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "cnpj-ingest")]
#[command(author, version, about = "Bulk ETL for the Receita Federal CNPJ open data")]
struct Cli {
    /// What to run; defaults to a full run
    #[command(subcommand)]
    command: Option<Command>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Download, extract, recreate tables, load everything and build indexes
    Run,

    /// Build missing indexes on already loaded tables
    Indexes,

    /// Download and extract archives without touching the database
    Download,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("cnpj-ingest")
        .filter_directives("sqlx=warn,hyper=info,reqwest=info")
        .build()
        .merge_env()
        .context("Invalid LOG_* setting")?;

    let _guard = init_logging(&log_config)?;

    let config = EtlConfig::from_env().context("Failed to load configuration")?;
    info!(
        output = %config.paths.output_dir.display(),
        extracted = %config.paths.extracted_dir.display(),
        database = ?config.database,
        "Configuration loaded"
    );

    let pipeline = Pipeline::new(config, Progress::new());
    let result = execute(&pipeline, cli.command.unwrap_or(Command::Run)).await;
    if let Err(e) = &result {
        error!(error = %format!("{:#}", e), "ETL aborted");
    }
    result
}

async fn execute(pipeline: &Pipeline, command: Command) -> Result<()> {
    match command {
        Command::Run => {
            info!("Starting full ETL run");
            let summary = pipeline.run().await.context("ETL run failed")?;
            if !summary.data_complete() {
                anyhow::bail!("data load incomplete");
            }
            if !summary.indexes.is_complete() {
                anyhow::bail!("data loaded but indexes incomplete; run `cnpj-ingest indexes`");
            }
        },
        Command::Indexes => {
            info!("Resuming index creation");
            let report = pipeline
                .resume_indexes()
                .await
                .context("Index resume failed")?;
            for (name, status) in &report.entries {
                info!(index = name, "{}", status);
            }
            if !report.is_complete() {
                anyhow::bail!("{} indexes still missing", report.failed().len() + report.skipped().len());
            }
        },
        Command::Download => {
            info!("Downloading and extracting archives");
            let sources = pipeline.acquire_sources().await.context("Download failed")?;
            info!(
                available = sources.fetch.available(),
                listed = sources.listed,
                extracted_files = sources.extraction.files().len(),
                classified = sources.classified.len(),
                "Sources ready"
            );
        },
    }
    Ok(())
}
