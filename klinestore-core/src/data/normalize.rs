//! In-place normalization of merged partitions.
//!
//! Exchange dumps store the inclusive end of a candle (`00:59:59.999`). The
//! normalizer ceils `close_time` to the whole second (`01:00:00`), tags the
//! table as right-open and derives a `freq` label from the rounded interval.
//! Running it twice leaves a partition unchanged.

use super::dates::{date_range, partition_key};
use super::error::StoreError;
use super::field::KlineField;
use super::partition::{read_partition, write_partition_atomic, PartitionLayout};
use super::schema::{
    KeyEncoding, PartitionSchema, CLOSE_TIME, FREQ_COLUMN, HALF_OPEN_COLUMN, OPEN_TIME, RIGHT_OPEN,
};
use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

const SECS_PER_MINUTE: i64 = 60;
const SECS_PER_HOUR: i64 = 3_600;
const SECS_PER_DAY: i64 = 86_400;

/// Label an interval length: whole days, else hours, else minutes, else seconds.
pub fn frequency_label(seconds: i64) -> String {
    if seconds % SECS_PER_DAY == 0 {
        format!("{}d", seconds / SECS_PER_DAY)
    } else if seconds % SECS_PER_HOUR == 0 {
        format!("{}h", seconds / SECS_PER_HOUR)
    } else if seconds % SECS_PER_MINUTE == 0 {
        format!("{}m", seconds / SECS_PER_MINUTE)
    } else {
        format!("{seconds}s")
    }
}

/// Round a tick count up to the next whole second.
pub fn ceil_to_second(ticks: i64, ticks_per_second: i64) -> i64 {
    let rem = ticks.rem_euclid(ticks_per_second);
    if rem == 0 {
        ticks
    } else {
        ticks - rem + ticks_per_second
    }
}

/// Apply the normalization to a table. `origin` is only used in errors.
///
/// Raw millisecond keys are promoted to UTC timestamps on the way.
pub fn normalize_frame(mut df: DataFrame, origin: &Path) -> Result<DataFrame, StoreError> {
    let encoding = PartitionSchema::validate_keys(&df.schema())
        .map_err(|e| StoreError::schema(origin, e))?;
    let ticks = encoding.ticks_per_second();
    let frame_err = |e: PolarsError| StoreError::Frame(format!("normalize {}: {e}", origin.display()));

    let key_dtype = match encoding {
        KeyEncoding::RawMillis => PartitionSchema::key_dtype(),
        KeyEncoding::Timestamp(_) => df.column(OPEN_TIME).map_err(frame_err)?.dtype().clone(),
    };

    let open = physical_ticks(&df, OPEN_TIME).map_err(frame_err)?;
    let close = physical_ticks(&df, CLOSE_TIME)
        .map_err(frame_err)?
        .apply_values(|v| ceil_to_second(v, ticks));

    let labels: Vec<Option<String>> = open
        .iter()
        .zip(close.iter())
        .map(|(o, c)| match (o, c) {
            (Some(o), Some(c)) => Some(frequency_label((c - o) / ticks)),
            _ => None,
        })
        .collect();

    let open = open.into_series().cast(&key_dtype).map_err(frame_err)?;
    let close = close.into_series().cast(&key_dtype).map_err(frame_err)?;
    let height = df.height();

    df.with_column(open).map_err(frame_err)?;
    df.with_column(close).map_err(frame_err)?;
    df.with_column(Column::new(
        HALF_OPEN_COLUMN.into(),
        vec![RIGHT_OPEN; height],
    ))
    .map_err(frame_err)?;
    df.with_column(Column::new(FREQ_COLUMN.into(), labels))
        .map_err(frame_err)?;

    Ok(df)
}

/// Key column as raw ticks (epoch ms for raw keys, the timestamp's unit otherwise).
fn physical_ticks(df: &DataFrame, name: &str) -> PolarsResult<Int64Chunked> {
    let column = df.column(name)?.cast(&DataType::Int64)?;
    Ok(column.i64()?.clone())
}

/// Outcome of a normalization pass.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizeSummary {
    /// Partitions rewritten.
    pub partitions: usize,
    /// Rows across rewritten partitions.
    pub rows: usize,
    /// (date, field) pairs with no partition file.
    pub missing: usize,
}

/// Rewrites existing partitions of a date range in place.
pub struct PartitionNormalizer {
    layout: PartitionLayout,
}

impl PartitionNormalizer {
    pub fn new(layout: PartitionLayout) -> Self {
        Self { layout }
    }

    /// Normalize one partition. Returns the row count, or `None` if the file is absent.
    pub fn normalize_partition(
        &self,
        date_key: &str,
        field: KlineField,
    ) -> Result<Option<usize>, StoreError> {
        let path = self.layout.partition_path(date_key, field.as_str());
        if !path.exists() {
            return Ok(None);
        }
        let df = read_partition(&path)?;
        let mut normalized = normalize_frame(df, &path)?;
        write_partition_atomic(&mut normalized, &path)?;
        Ok(Some(normalized.height()))
    }

    /// Normalize every existing partition of `fields` in `[start, end]`.
    pub fn normalize_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        fields: &[KlineField],
    ) -> Result<NormalizeSummary, StoreError> {
        let dates = date_range(start, end)?;
        let mut summary = NormalizeSummary::default();

        for field in fields {
            for date in &dates {
                let key = partition_key(*date);
                match self.normalize_partition(&key, *field)? {
                    Some(rows) => {
                        summary.partitions += 1;
                        summary.rows += rows;
                    }
                    None => summary.missing += 1,
                }
            }
            tracing::info!(field = %field, start = %start, end = %end, "normalized field");
        }

        tracing::info!(
            partitions = summary.partitions,
            rows = summary.rows,
            missing = summary.missing,
            "normalization complete"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1704067200000; // 2024-01-01T00:00:00Z

    fn raw_frame() -> DataFrame {
        df!(
            OPEN_TIME => &[T0, T0 + 3_600_000],
            CLOSE_TIME => &[T0 + 3_599_999, T0 + 7_199_999],
            "BTCUSDT" => &[42_000.0, 42_100.0],
        )
        .unwrap()
    }

    #[test]
    fn labels_prefer_the_largest_whole_unit() {
        assert_eq!(frequency_label(86_400), "1d");
        assert_eq!(frequency_label(3 * 86_400), "3d");
        assert_eq!(frequency_label(4 * 3_600), "4h");
        assert_eq!(frequency_label(15 * 60), "15m");
        assert_eq!(frequency_label(37), "37s");
        assert_eq!(frequency_label(90), "90s");
        assert_eq!(frequency_label(36 * 3_600), "36h");
    }

    #[test]
    fn ceil_rounds_up_partial_seconds_only() {
        assert_eq!(ceil_to_second(T0 + 3_599_999, 1_000), T0 + 3_600_000);
        assert_eq!(ceil_to_second(T0 + 3_600_000, 1_000), T0 + 3_600_000);
        assert_eq!(ceil_to_second(1, 1_000_000_000), 1_000_000_000);
        assert_eq!(ceil_to_second(-1, 1_000), 0);
    }

    #[test]
    fn normalize_rounds_and_tags() {
        let df = normalize_frame(raw_frame(), Path::new("mem")).unwrap();

        assert_eq!(df.column(OPEN_TIME).unwrap().dtype(), &PartitionSchema::key_dtype());
        let close = df.column(CLOSE_TIME).unwrap().cast(&DataType::Int64).unwrap();
        assert_eq!(close.i64().unwrap().get(0), Some(T0 + 3_600_000));

        let freq = df.column(FREQ_COLUMN).unwrap();
        assert_eq!(freq.str().unwrap().get(0), Some("1h"));
        let tag = df.column(HALF_OPEN_COLUMN).unwrap();
        assert_eq!(tag.str().unwrap().get(1), Some(RIGHT_OPEN));
        assert_eq!(df.column("BTCUSDT").unwrap().f64().unwrap().get(1), Some(42_100.0));
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize_frame(raw_frame(), Path::new("mem")).unwrap();
        let twice = normalize_frame(once.clone(), Path::new("mem")).unwrap();
        assert!(once.equals_missing(&twice));
    }

    #[test]
    fn day_candles_get_day_label() {
        let df = df!(
            OPEN_TIME => &[T0],
            CLOSE_TIME => &[T0 + 86_399_999],
        )
        .unwrap();
        let df = normalize_frame(df, Path::new("mem")).unwrap();
        assert_eq!(df.column(FREQ_COLUMN).unwrap().str().unwrap().get(0), Some("1d"));
    }

    #[test]
    fn nanosecond_timestamps_keep_their_unit() {
        let ns = DataType::Datetime(TimeUnit::Nanoseconds, Some("UTC".into()));
        let t0 = T0 * 1_000_000;
        let df = DataFrame::new(vec![
            Column::new(OPEN_TIME.into(), &[t0]).cast(&ns).unwrap(),
            Column::new(CLOSE_TIME.into(), &[t0 + 14_399_999_999_999]).cast(&ns).unwrap(),
        ])
        .unwrap();

        let df = normalize_frame(df, Path::new("mem")).unwrap();
        assert_eq!(df.column(CLOSE_TIME).unwrap().dtype(), &ns);
        assert_eq!(df.column(FREQ_COLUMN).unwrap().str().unwrap().get(0), Some("4h"));
    }

    #[test]
    fn missing_keys_are_schema_errors() {
        let df = df!("BTCUSDT" => &[1.0]).unwrap();
        let err = normalize_frame(df, Path::new("2024-01-01/close.parquet")).unwrap_err();
        assert!(matches!(err, StoreError::Schema { .. }));
    }

    #[test]
    fn normalize_range_rewrites_existing_partitions_only() {
        let dir = tempfile::tempdir().unwrap();
        let layout = PartitionLayout::new(dir.path());
        let path = layout.partition_path("2024-01-01", "close");
        write_partition_atomic(&mut raw_frame(), &path).unwrap();

        let normalizer = PartitionNormalizer::new(layout);
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let summary = normalizer
            .normalize_range(start, end, &[KlineField::Close])
            .unwrap();

        assert_eq!(
            summary,
            NormalizeSummary {
                partitions: 1,
                rows: 2,
                missing: 1
            }
        );
        let back = read_partition(&path).unwrap();
        assert!(back.column(FREQ_COLUMN).is_ok());

        // Second pass is a no-op on content.
        normalizer
            .normalize_range(start, end, &[KlineField::Close])
            .unwrap();
        assert!(read_partition(&path).unwrap().equals_missing(&back));
    }
}
