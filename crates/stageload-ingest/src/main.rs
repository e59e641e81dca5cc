//! Stageload - incremental flat-file loader

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use stageload_common::checksum::ExpectedChecksum;
use stageload_common::logging::{init_logging, LogConfig, LogLevel};
use stageload_common::types::Schema;
use stageload_ingest::config::{parse_delimiter, split_columns};
use stageload_ingest::{
    extract, merge_with_retry, source_for, DuplicatePolicy, ExtractOptions, Loader, LoaderConfig,
    MemoryTarget, MergeResult, RetryPolicy, TargetConfig, TargetStore,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "stageload")]
#[command(author, version, about = "Idempotent incremental loader for flat files")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract, stage and merge one source
    Load {
        /// File path or http(s) URL
        location: String,

        #[command(flatten)]
        load: LoadArgs,

        #[command(flatten)]
        target: TargetArgs,

        /// Stop merging (between chunks) after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Expected digest of the raw source file, as `sha256:<hex>` or `sha512:<hex>`
        #[arg(long)]
        checksum: Option<ExpectedChecksum>,
    },

    /// Load every matching file in a directory, in lexical order
    Backfill {
        /// Directory to scan
        dir: String,

        /// File name suffixes to include
        #[arg(long = "suffix", default_values_t = [".csv".to_string(), ".csv.gz".to_string()])]
        suffixes: Vec<String>,

        #[command(flatten)]
        load: LoadArgs,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Extract and stage without merging; prints staged rows as JSON lines
    Stage {
        location: String,

        #[command(flatten)]
        load: LoadArgs,
    },

    /// Validate a schema file and print it as JSON
    Schema {
        path: String,
    },
}

#[derive(Args, Debug)]
struct LoadArgs {
    /// Schema file (YAML or JSON)
    #[arg(short, long, env = "STAGELOAD_SCHEMA")]
    schema: String,

    /// Comma-separated fingerprint columns (default: all columns)
    #[arg(short, long)]
    fingerprint: Option<String>,

    /// Intra-batch duplicate handling: last-write-wins or reject
    #[arg(long)]
    duplicates: Option<DuplicatePolicy>,

    /// Rows per merge chunk
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Read at most this many rows per source
    #[arg(long)]
    max_rows: Option<usize>,

    /// CSV field delimiter: one ASCII character, or `tab`
    #[arg(long, value_parser = parse_delimiter_arg)]
    delimiter: Option<u8>,

    /// Merge retries after an interrupted chunk
    #[arg(long)]
    max_retries: Option<u32>,
}

impl LoadArgs {
    fn loader_config(&self) -> Result<LoaderConfig> {
        let mut config = LoaderConfig::from_env()?;
        if let Some(ref columns) = self.fingerprint {
            config.fingerprint_columns = split_columns(columns);
        }
        if let Some(policy) = self.duplicates {
            config.duplicate_policy = policy;
        }
        if let Some(size) = self.chunk_size {
            config.merge_chunk_size = size;
        }
        if let Some(max) = self.max_rows {
            config.max_rows = (max > 0).then_some(max);
        }
        if let Some(delimiter) = self.delimiter {
            config.delimiter = delimiter;
        }
        if let Some(retries) = self.max_retries {
            config.max_retries = retries;
        }
        config.validate()?;
        Ok(config)
    }

    fn schema(&self) -> Result<Arc<Schema>> {
        let schema = Schema::from_file(&self.schema)
            .with_context(|| format!("Failed to load schema from {}", self.schema))?;
        Ok(Arc::new(schema))
    }
}

#[derive(Args, Debug)]
struct TargetArgs {
    /// Postgres target; the in-memory target is used when absent
    #[arg(long)]
    database_url: Option<String>,

    /// Target table name
    #[arg(long)]
    table: Option<String>,
}

impl TargetArgs {
    fn target_config(&self) -> Result<TargetConfig> {
        let mut config = TargetConfig::from_env()?;
        if let Some(ref url) = self.database_url {
            config.database_url = Some(url.clone());
        }
        if let Some(ref table) = self.table {
            config.table = table.clone();
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("stageload")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    match cli.command {
        Command::Load {
            location,
            load,
            target,
            timeout_secs,
            checksum,
        } => run_load(&location, &load, &target, timeout_secs, checksum).await,
        Command::Backfill {
            dir,
            suffixes,
            load,
            target,
        } => run_backfill(&dir, &suffixes, &load, &target).await,
        Command::Stage { location, load } => run_stage(&location, &load).await,
        Command::Schema { path } => {
            let schema = Schema::from_file(&path)
                .with_context(|| format!("Invalid schema file {}", path))?;
            println!("{}", serde_json::to_string_pretty(&schema)?);
            Ok(())
        },
    }
}

async fn run_load(
    location: &str,
    args: &LoadArgs,
    target_args: &TargetArgs,
    timeout_secs: Option<u64>,
    checksum: Option<ExpectedChecksum>,
) -> Result<()> {
    let loader = Loader::new(args.loader_config()?)?;
    let schema = args.schema()?;
    let target = open_target(&target_args.target_config()?, &schema).await?;
    let source = source_for(location);

    let extract_options = ExtractOptions {
        expected_checksum: checksum,
        ..loader.config().extract_options()
    };
    let batch = extract(source.as_ref(), location, schema, &extract_options).await?;
    let staging = loader.stage(&batch)?;

    let mut options = loader.config().merge_options().with_cancel(cancel_on_ctrl_c());
    if let Some(secs) = timeout_secs {
        options = options.with_deadline(tokio::time::Instant::now() + Duration::from_secs(secs));
    }

    let merged = loader
        .merge_from(&staging, target.as_ref(), 0, Some(&options))
        .await
        .with_context(|| format!("Failed to merge {}", location))?;

    let summary = serde_json::json!({
        "batch_id": batch.id(),
        "source": batch.source(),
        "source_checksum": batch.source_checksum(),
        "rows_extracted": batch.len(),
        "rows_staged": staging.len(),
        "duplicates_collapsed": staging.duplicates_collapsed(),
        "rows_inserted": merged.rows_inserted,
        "rows_skipped": merged.rows_skipped,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn run_backfill(
    dir: &str,
    suffixes: &[String],
    args: &LoadArgs,
    target_args: &TargetArgs,
) -> Result<()> {
    let loader = Loader::new(args.loader_config()?)?;
    let schema = args.schema()?;
    let target = open_target(&target_args.target_config()?, &schema).await?;
    let source = source_for(dir);

    let locations: Vec<String> = source
        .list(dir)
        .await?
        .into_iter()
        .filter(|loc| suffixes.iter().any(|s| loc.ends_with(s.as_str())))
        .collect();

    if locations.is_empty() {
        warn!(dir, ?suffixes, "No matching files to backfill");
        return Ok(());
    }
    info!(dir, files = locations.len(), "Starting backfill");

    let policy = RetryPolicy::new(loader.config().max_retries, loader.config().retry_backoff());
    let options = loader.config().merge_options().with_cancel(cancel_on_ctrl_c());
    let progress = progress_bar(locations.len() as u64, "Backfilling")?;
    let mut total = MergeResult::default();

    for location in &locations {
        progress.set_message(location.clone());

        let batch = loader
            .extract(source.as_ref(), location, Arc::clone(&schema))
            .await
            .with_context(|| format!("Failed to extract {}", location))?;
        let staging = loader.stage(&batch)?;
        let merged = merge_with_retry(&staging, target.as_ref(), &options, &policy)
            .await
            .with_context(|| format!("Failed to merge {}", location))?;

        info!(
            location = %location,
            inserted = merged.rows_inserted,
            skipped = merged.rows_skipped,
            "File loaded"
        );
        total += merged;
        progress.inc(1);
    }

    progress.finish_with_message("Backfill complete");

    let summary = serde_json::json!({
        "files": locations.len(),
        "rows_inserted": total.rows_inserted,
        "rows_skipped": total.rows_skipped,
        "target_rows": target.len().await?,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn run_stage(location: &str, args: &LoadArgs) -> Result<()> {
    let loader = Loader::new(args.loader_config()?)?;
    let source = source_for(location);

    let batch = loader.extract(source.as_ref(), location, args.schema()?).await?;
    let staging = loader.stage(&batch)?;

    for staged in staging.rows() {
        println!("{}", serde_json::to_string(staged)?);
    }
    info!(
        staged = staging.len(),
        duplicates_collapsed = staging.duplicates_collapsed(),
        "Dry run complete, nothing merged"
    );
    Ok(())
}

#[cfg(feature = "database")]
async fn open_target(config: &TargetConfig, schema: &Schema) -> Result<Box<dyn TargetStore>> {
    use sqlx::postgres::PgPoolOptions;
    use stageload_ingest::PostgresTarget;

    let Some(ref url) = config.database_url else {
        return Ok(memory_target());
    };

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(url)
        .await
        .context("Failed to connect to database")?;

    let target = PostgresTarget::new(pool, config.table.clone(), schema.clone())?;
    target.ensure_table().await?;
    Ok(Box::new(target))
}

#[cfg(not(feature = "database"))]
async fn open_target(config: &TargetConfig, _schema: &Schema) -> Result<Box<dyn TargetStore>> {
    if config.database_url.is_some() {
        anyhow::bail!("a database URL was given but stageload was built without the `database` feature");
    }
    Ok(memory_target())
}

fn memory_target() -> Box<dyn TargetStore> {
    warn!("No database configured; loading into an in-memory table that is discarded on exit");
    Box::new(MemoryTarget::new())
}

fn parse_delimiter_arg(raw: &str) -> std::result::Result<u8, String> {
    parse_delimiter(raw).map_err(|e| e.to_string())
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current chunk");
            child.cancel();
        }
    });
    token
}

fn progress_bar(total: u64, message: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-"),
    );
    pb.set_message(message.to_string());
    Ok(pb)
}
