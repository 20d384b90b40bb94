//! Klinestore Core: kline CSV ingestion into a field-partitioned Parquet store.
//!
//! Raw exchange dumps hold one CSV per symbol per day. This crate reshapes
//! them into one wide table per (day, field), with a column per symbol:
//! - Partition locator (raw CSVs of one day and interval)
//! - Field pivoter (per-symbol rows into per-field wide tables)
//! - Partition merger (idempotent read-modify-write with dedup)
//! - Partition normalizer (right-open intervals and frequency labels)
//! - Partition store (range queries with SQL predicates and projection)

pub mod config;
pub mod data;
pub mod pipeline;

pub use config::StoreConfig;
pub use data::StoreError;
pub use pipeline::{IngestProgress, IngestSummary, Ingestor, NoProgress, TracingProgress};
