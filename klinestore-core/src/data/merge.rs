//! Read-modify-write merge of a pivoted field table into its partition file.
//!
//! Old and new rows are unioned diagonally, so symbols that appear for the
//! first time simply add a column. The dedup policy decides what "same row"
//! means; the default collapses rows on the time keys.

use super::dates::partition_key;
use super::error::StoreError;
use super::field::KlineField;
use super::normalize::normalize_frame;
use super::partition::{read_partition, write_partition_atomic, PartitionLayout};
use super::schema::{KeyEncoding, PartitionSchema, CLOSE_TIME, KEY_COLUMNS, OPEN_TIME};
use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Which rows count as duplicates when old and new data meet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// One row per `(open_time, close_time)`. Per column the newest non-null
    /// value wins, older values fill the gaps.
    #[default]
    Key,
    /// Only exact full-row duplicates collapse.
    Row,
}

impl FromStr for DedupPolicy {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "key" => Ok(DedupPolicy::Key),
            "row" => Ok(DedupPolicy::Row),
            other => Err(StoreError::Config(format!(
                "unknown dedup policy '{other}'. Valid: key, row"
            ))),
        }
    }
}

/// What a single merge did to its partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub path: PathBuf,
    pub rows_before: usize,
    pub rows_incoming: usize,
    pub rows_after: usize,
}

pub struct PartitionMerger {
    layout: PartitionLayout,
    policy: DedupPolicy,
}

impl PartitionMerger {
    pub fn new(layout: PartitionLayout, policy: DedupPolicy) -> Self {
        Self { layout, policy }
    }

    pub fn policy(&self) -> DedupPolicy {
        self.policy
    }

    /// Merge `incoming` into the `(date, field)` partition and write it back.
    pub fn merge(
        &self,
        date: NaiveDate,
        field: KlineField,
        incoming: DataFrame,
    ) -> Result<MergeOutcome, StoreError> {
        let path = self
            .layout
            .partition_path(&partition_key(date), field.as_str());

        let existing = if path.exists() {
            Some(read_partition(&path)?)
        } else {
            None
        };
        let rows_before = existing.as_ref().map_or(0, DataFrame::height);
        let rows_incoming = incoming.height();

        let mut merged = merge_frames(existing, incoming, self.policy, &path)?;
        write_partition_atomic(&mut merged, &path)?;

        Ok(MergeOutcome {
            path,
            rows_before,
            rows_incoming,
            rows_after: merged.height(),
        })
    }
}

/// Combine an existing partition (if any) with new rows, sorted by the keys.
pub fn merge_frames(
    existing: Option<DataFrame>,
    incoming: DataFrame,
    policy: DedupPolicy,
    origin: &Path,
) -> Result<DataFrame, StoreError> {
    let frame_err = |e: PolarsError| StoreError::Frame(format!("merge {}: {e}", origin.display()));
    let incoming_encoding = PartitionSchema::validate_keys(&incoming.schema())
        .map_err(|e| StoreError::schema(origin, e))?;

    let (existing, target, normalized) = match existing {
        None => (None, PartitionSchema::key_dtype(), false),
        Some(df) => {
            let encoding = PartitionSchema::validate_keys(&df.schema())
                .map_err(|e| StoreError::schema(origin, e))?;
            let target = match encoding {
                KeyEncoding::RawMillis => PartitionSchema::key_dtype(),
                KeyEncoding::Timestamp(_) => df.column(OPEN_TIME).map_err(frame_err)?.dtype().clone(),
            };
            let normalized = PartitionSchema::is_normalized(&df.schema());
            let df = promote_keys(df, encoding, &target).map_err(frame_err)?;
            (Some(df), target, normalized)
        }
    };

    let mut incoming = promote_keys(incoming, incoming_encoding, &target).map_err(frame_err)?;
    if normalized {
        // Rounded keys on disk only line up with rounded incoming keys.
        incoming = normalize_frame(incoming, origin)?;
    }

    let mut combined = match existing {
        Some(old) => concat_lf_diagonal([old.lazy(), incoming.lazy()], UnionArgs::default())
            .map_err(frame_err)?,
        None => incoming.lazy(),
    };

    let deduped = match policy {
        DedupPolicy::Key => {
            let schema = combined.collect_schema().map_err(frame_err)?;
            let values: Vec<Expr> = PartitionSchema::value_columns(&schema)
                .into_iter()
                .map(|name| col(name).drop_nulls().last())
                .collect();
            combined
                .group_by_stable([col(OPEN_TIME), col(CLOSE_TIME)])
                .agg(values)
        }
        DedupPolicy::Row => combined.unique_stable(None, UniqueKeepStrategy::First),
    };

    deduped
        .sort(KEY_COLUMNS, SortMultipleOptions::default())
        .collect()
        .map_err(frame_err)
}

/// Cast the time keys to `target`, interpreting raw keys as epoch milliseconds.
fn promote_keys(
    df: DataFrame,
    encoding: KeyEncoding,
    target: &DataType,
) -> PolarsResult<DataFrame> {
    let exprs = KEY_COLUMNS.map(|key| {
        let expr = match encoding {
            KeyEncoding::RawMillis => col(key).cast(PartitionSchema::key_dtype()),
            KeyEncoding::Timestamp(_) => col(key),
        };
        expr.cast(target.clone())
    });
    df.lazy().with_columns(exprs).collect()
}
