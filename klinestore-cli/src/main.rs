//! Klinestore CLI: ingest, normalize and query commands.
//!
//! Commands:
//! - `ingest`: pivot raw per-symbol CSVs into field partitions for a date range
//! - `normalize`: rewrite partitions with right-open intervals and frequency labels
//! - `query`: load one field over a date range, with optional SQL filter
//! - `fields`: list the fields present in the store

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use klinestore_core::data::{
    parse_date, KlineField, KlineInterval, LoadOptions, PartitionNormalizer, PartitionStore,
};
use klinestore_core::{Ingestor, StoreConfig, TracingProgress};
use polars::prelude::*;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "klinestore",
    about = "Ingest kline CSVs into a field-partitioned Parquet store and query it",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML config file. Without it, configuration comes from the environment (and `.env`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). RUST_LOG overrides it.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest raw CSVs for every day in [START, END].
    Ingest {
        /// First day (YYYYMMDD or YYYY-MM-DD).
        start: String,

        /// Last day, inclusive.
        end: String,

        /// Kline interval directory to read (e.g. 1h, 12h). Defaults to the configured one.
        interval: Option<String>,

        /// Only ingest these fields (comma separated).
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,

        /// Print the run summary as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Normalize existing partitions for every day in [START, END].
    Normalize {
        start: String,

        end: String,

        /// Fields to normalize (comma separated). Defaults to all fields.
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,

        /// Print the run summary as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Load one field over a date range.
    Query {
        #[arg(long)]
        start: String,

        #[arg(long)]
        end: String,

        /// Field name (e.g. close, volume).
        #[arg(long)]
        field: String,

        /// Columns to keep (comma separated).
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,

        /// SQL boolean expression, e.g. '"BTCUSDT" > 40000'.
        #[arg(long = "where")]
        predicate: Option<String>,

        /// Skip sorting by (open_time, close_time).
        #[arg(long, default_value_t = false)]
        no_order: bool,

        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// List fields present in the store.
    Fields,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Csv,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter(&cli.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(cli.config)?;
    tracing::debug!(
        raw_data_root = %config.raw_data_root.display(),
        store_root = %config.store_root.display(),
        "configuration loaded"
    );

    match cli.command {
        Commands::Ingest {
            start,
            end,
            interval,
            fields,
            json,
        } => run_ingest(&config, &start, &end, interval, &fields, json),
        Commands::Normalize {
            start,
            end,
            fields,
            json,
        } => run_normalize(&config, &start, &end, &fields, json),
        Commands::Query {
            start,
            end,
            field,
            columns,
            predicate,
            no_order,
            format,
        } => run_query(&config, &start, &end, &field, columns, predicate, no_order, format),
        Commands::Fields => run_fields(&config),
    }
}

/// The `klinestore` target prefix also matches `klinestore_core` and `klinestore_cli`.
fn default_filter(level: &str) -> String {
    format!("klinestore={level}")
}

fn load_config(path: Option<PathBuf>) -> Result<StoreConfig> {
    match path {
        Some(path) => StoreConfig::from_file(&path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => StoreConfig::from_env().context("loading config from environment"),
    }
}

fn parse_fields(names: &[String]) -> Result<Vec<KlineField>> {
    if names.is_empty() {
        return Ok(KlineField::ALL.to_vec());
    }
    Ok(names
        .iter()
        .map(|n| n.parse::<KlineField>())
        .collect::<Result<Vec<_>, _>>()?)
}

fn run_ingest(
    config: &StoreConfig,
    start: &str,
    end: &str,
    interval: Option<String>,
    fields: &[String],
    json: bool,
) -> Result<()> {
    let start = parse_date(start)?;
    let end = parse_date(end)?;
    let interval: KlineInterval = match interval {
        Some(s) => s.parse()?,
        None => config.interval.clone(),
    };

    let ingestor = Ingestor::new(config).with_fields(&parse_fields(fields)?);
    let summary = ingestor.run(start, end, &interval, &TracingProgress)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "Ingested {} day(s) ({} without data): {} file(s), {} partition(s), {} row(s)",
            summary.days,
            summary.empty_days,
            summary.files,
            summary.partitions_written,
            summary.rows_written
        );
    }
    Ok(())
}

fn run_normalize(
    config: &StoreConfig,
    start: &str,
    end: &str,
    fields: &[String],
    json: bool,
) -> Result<()> {
    let start = parse_date(start)?;
    let end = parse_date(end)?;

    let normalizer = PartitionNormalizer::new(config.layout());
    let summary = normalizer.normalize_range(start, end, &parse_fields(fields)?)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "Normalized {} partition(s), {} row(s); {} missing",
            summary.partitions, summary.rows, summary.missing
        );
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_query(
    config: &StoreConfig,
    start: &str,
    end: &str,
    field: &str,
    columns: Vec<String>,
    predicate: Option<String>,
    no_order: bool,
    format: OutputFormat,
) -> Result<()> {
    let mut opts = LoadOptions::default();
    if !columns.is_empty() {
        opts = opts.columns(columns);
    }
    if let Some(predicate) = predicate {
        opts = opts.predicate(predicate);
    }
    if no_order {
        opts = opts.unordered();
    }

    let store = PartitionStore::new(config.layout());
    let mut df = store.load(start, end, field, &opts)?;

    match format {
        OutputFormat::Table => println!("{df}"),
        OutputFormat::Csv => {
            CsvWriter::new(std::io::stdout().lock())
                .include_header(true)
                .finish(&mut df)
                .context("writing CSV to stdout")?;
        }
    }
    Ok(())
}

fn run_fields(config: &StoreConfig) -> Result<()> {
    let store = PartitionStore::new(config.layout());
    let fields = store.list_fields()?;
    if fields.is_empty() {
        println!("No partitions under {}", config.store_root.display());
    }
    for field in fields {
        println!("{field}");
    }
    Ok(())
}
