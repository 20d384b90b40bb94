//! Range queries over the field-partitioned Parquet store.
//!
//! A query names one field and an inclusive date range. Every partition file
//! that exists in the range is scanned lazily; missing days are skipped, so
//! partial coverage is normal. Predicates are Polars SQL passed through as
//! the `WHERE` clause of a query over the table `partitions`.

use super::dates::date_keys;
use super::error::StoreError;
use super::partition::PartitionLayout;
use super::schema::{PartitionSchema, CLOSE_TIME, FREQ_COLUMN, HALF_OPEN_COLUMN, KEY_COLUMNS, OPEN_TIME};
use polars::prelude::*;
use polars::sql::SQLContext;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Table name the predicate is evaluated against.
pub const SQL_TABLE: &str = "partitions";

/// Options for [`PartitionStore::load`].
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Columns to keep; `None` keeps all.
    pub columns: Option<Vec<String>>,
    /// Polars SQL boolean expression, e.g. `"BTCUSDT" > 40000`.
    pub predicate: Option<String>,
    /// Sort by `(open_time, close_time)`.
    pub order_by_keys: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            columns: None,
            predicate: None,
            order_by_keys: true,
        }
    }
}

impl LoadOptions {
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn predicate(mut self, predicate: impl Into<String>) -> Self {
        self.predicate = Some(predicate.into());
        self
    }

    pub fn unordered(mut self) -> Self {
        self.order_by_keys = false;
        self
    }
}

/// Read side of the store.
#[derive(Debug, Clone)]
pub struct PartitionStore {
    layout: PartitionLayout,
}

impl PartitionStore {
    pub fn new(layout: PartitionLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &PartitionLayout {
        &self.layout
    }

    /// Existing partition files of `field` for the given date keys.
    pub fn paths_for<S: AsRef<str>>(&self, date_keys: &[S], field: &str) -> Vec<PathBuf> {
        self.layout.existing_paths(date_keys, field)
    }

    /// Load `field` over `[start, end]` with a fresh SQL context.
    pub fn load(
        &self,
        start: &str,
        end: &str,
        field: &str,
        opts: &LoadOptions,
    ) -> Result<DataFrame, StoreError> {
        let mut ctx = SQLContext::new();
        self.load_with(&mut ctx, start, end, field, opts)
    }

    /// Same as [`load`](Self::load) but without key ordering.
    pub fn query_field(
        &self,
        start: &str,
        end: &str,
        field: &str,
        columns: Option<Vec<String>>,
        predicate: Option<String>,
    ) -> Result<DataFrame, StoreError> {
        let opts = LoadOptions {
            columns,
            predicate,
            order_by_keys: false,
        };
        self.load(start, end, field, &opts)
    }

    /// Load through a caller-owned SQL context, re-registering [`SQL_TABLE`].
    pub fn load_with(
        &self,
        ctx: &mut SQLContext,
        start: &str,
        end: &str,
        field: &str,
        opts: &LoadOptions,
    ) -> Result<DataFrame, StoreError> {
        let dates = date_keys(start, end)?;
        if !self.layout.root().exists() {
            return Err(StoreError::NotFound {
                path: self.layout.root().to_path_buf(),
            });
        }
        let paths = self.paths_for(&dates, field);
        if paths.is_empty() {
            return Err(StoreError::NoData {
                field: field.to_string(),
                start: start.to_string(),
                end: end.to_string(),
            });
        }

        let mut lf = scan_partitions(&paths)?;

        if let Some(predicate) = &opts.predicate {
            ctx.register(SQL_TABLE, lf);
            lf = ctx
                .execute(&format!("SELECT * FROM {SQL_TABLE} WHERE {predicate}"))
                .map_err(|e| StoreError::Query(format!("predicate `{predicate}`: {e}")))?;
        }
        if opts.order_by_keys {
            lf = lf.sort(KEY_COLUMNS, SortMultipleOptions::default());
        }
        if let Some(columns) = &opts.columns {
            lf = lf.select(columns.iter().map(|c| col(c.as_str())).collect::<Vec<_>>());
        }

        let df = lf
            .collect()
            .map_err(|e| StoreError::Query(format!("field '{field}': {e}")))?;

        tracing::info!(
            start,
            end,
            field,
            partitions = paths.len(),
            rows = df.height(),
            cols = df.width(),
            predicate = opts.predicate.as_deref().unwrap_or(""),
            "loaded field"
        );
        Ok(df)
    }

    /// Field names present anywhere in the store (`{root}/*/{field}.parquet`).
    pub fn list_fields(&self) -> Result<BTreeSet<String>, StoreError> {
        let root = self.layout.root();
        let mut fields = BTreeSet::new();
        if !root.exists() {
            return Ok(fields);
        }

        for entry in fs::read_dir(root).map_err(|e| StoreError::io(root, e))? {
            let entry = entry.map_err(|e| StoreError::io(root, e))?;
            let date_dir = entry.path();
            if !date_dir.is_dir() {
                continue;
            }
            for file in fs::read_dir(&date_dir).map_err(|e| StoreError::io(&date_dir, e))? {
                let path = file.map_err(|e| StoreError::io(&date_dir, e))?.path();
                if !is_partition_file(&path) {
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    fields.insert(stem.to_string());
                }
            }
        }
        Ok(fields)
    }
}

/// Scan each partition and union them; days may carry different symbol sets.
fn scan_partitions(paths: &[PathBuf]) -> Result<LazyFrame, StoreError> {
    let mut scans = Vec::with_capacity(paths.len());
    for path in paths {
        let mut lf = LazyFrame::scan_parquet(path, ScanArgsParquet::default())
            .map_err(|e| StoreError::Parquet(format!("scan {}: {e}", path.display())))?;
        let schema = lf
            .collect_schema()
            .map_err(|e| StoreError::Parquet(format!("schema {}: {e}", path.display())))?;
        PartitionSchema::validate_keys(&schema).map_err(|e| StoreError::schema(path, e))?;
        // Days written in other time units are read back as UTC milliseconds.
        scans.push(lf.with_columns(
            KEY_COLUMNS.map(|key| col(key).cast(PartitionSchema::key_dtype())),
        ));
    }

    if scans.len() == 1 {
        return Ok(scans.remove(0));
    }
    concat_lf_diagonal(scans, UnionArgs::default())
        .map_err(|e| StoreError::Query(format!("union partitions: {e}")))
}

/// Index a loaded table by candle open: drops `close_time` and the
/// normalizer's derived columns, sorted by `open_time`.
pub fn time_indexed(df: DataFrame) -> Result<DataFrame, StoreError> {
    let keep: Vec<PlSmallStr> = df
        .get_column_names()
        .into_iter()
        .filter(|c| ![CLOSE_TIME, FREQ_COLUMN, HALF_OPEN_COLUMN].contains(&c.as_str()))
        .cloned()
        .collect();
    df.select(keep)
        .and_then(|df| df.sort([OPEN_TIME], SortMultipleOptions::default()))
        .map_err(|e| StoreError::Frame(format!("time index: {e}")))
}

fn is_partition_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("parquet")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::merge::{merge_frames, DedupPolicy};
    use crate::data::partition::write_partition_atomic;

    const T0: i64 = 1704067200000; // 2024-01-01T00:00:00Z
    const DAY: i64 = 86_400_000;

    fn seed(layout: &PartitionLayout, date_key: &str, field: &str, open: i64, symbol: &str, value: f64) {
        let raw = DataFrame::new(vec![
            Column::new(OPEN_TIME.into(), &[open]),
            Column::new(CLOSE_TIME.into(), &[open + 3_599_999]),
            Column::new(symbol.into(), &[value]),
        ])
        .unwrap();
        let path = layout.partition_path(date_key, field);
        let mut df = merge_frames(None, raw, DedupPolicy::Key, &path).unwrap();
        write_partition_atomic(&mut df, &path).unwrap();
    }

    fn store_with_gap() -> (tempfile::TempDir, PartitionStore) {
        let dir = tempfile::tempdir().unwrap();
        let layout = PartitionLayout::new(dir.path());
        seed(&layout, "2024-01-01", "close", T0, "BTCUSDT", 100.0);
        // 2024-01-02 intentionally missing
        seed(&layout, "2024-01-03", "close", T0 + 2 * DAY, "ETHUSDT", 300.0);
        seed(&layout, "2024-01-04", "close", T0 + 3 * DAY, "BTCUSDT", 400.0);
        seed(&layout, "2024-01-01", "volume", T0, "BTCUSDT", 7.0);
        (dir, PartitionStore::new(layout))
    }

    #[test]
    fn load_tolerates_gaps_and_unions_symbol_sets() {
        let (_dir, store) = store_with_gap();
        let df = store
            .load("2024-01-01", "2024-01-03", "close", &LoadOptions::default())
            .unwrap();

        assert_eq!(df.height(), 2);
        let btc = df.column("BTCUSDT").unwrap().f64().unwrap();
        let eth = df.column("ETHUSDT").unwrap().f64().unwrap();
        assert_eq!((btc.get(0), eth.get(0)), (Some(100.0), None));
        assert_eq!((btc.get(1), eth.get(1)), (None, Some(300.0)));
    }

    #[test]
    fn load_never_leaves_the_requested_range() {
        let (_dir, store) = store_with_gap();
        let df = store
            .load("2024-01-03", "2024-01-03", "close", &LoadOptions::default())
            .unwrap();
        assert_eq!(df.height(), 1);
        assert!(df.column("BTCUSDT").is_err());
    }

    #[test]
    fn no_partitions_is_no_data() {
        let (_dir, store) = store_with_gap();
        let err = store
            .load("2024-02-01", "2024-02-05", "close", &LoadOptions::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::NoData { .. }));
    }

    #[test]
    fn missing_store_root_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = PartitionStore::new(PartitionLayout::new(dir.path().join("absent")));
        let err = store
            .load("2024-01-01", "2024-01-02", "close", &LoadOptions::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn load_spans_days_stored_in_different_time_units() {
        let dir = tempfile::tempdir().unwrap();
        let layout = PartitionLayout::new(dir.path());
        let ns = DataType::Datetime(TimeUnit::Nanoseconds, Some("UTC".into()));
        let mut day1 = DataFrame::new(vec![
            Column::new(OPEN_TIME.into(), &[T0 * 1_000_000]).cast(&ns).unwrap(),
            Column::new(CLOSE_TIME.into(), &[(T0 + 3_599_999) * 1_000_000])
                .cast(&ns)
                .unwrap(),
            Column::new("BTCUSDT".into(), &[100.0]),
        ])
        .unwrap();
        write_partition_atomic(&mut day1, &layout.partition_path("2024-01-01", "close")).unwrap();
        seed(&layout, "2024-01-02", "close", T0 + DAY, "BTCUSDT", 200.0);

        let store = PartitionStore::new(layout);
        let df = store
            .load("2024-01-01", "2024-01-02", "close", &LoadOptions::default())
            .unwrap();

        assert_eq!(df.height(), 2);
        assert_eq!(df.column(OPEN_TIME).unwrap().dtype(), &PartitionSchema::key_dtype());
        let opens = df.column(OPEN_TIME).unwrap().cast(&DataType::Int64).unwrap();
        assert_eq!(opens.i64().unwrap().get(0), Some(T0));
        assert_eq!(opens.i64().unwrap().get(1), Some(T0 + DAY));
        let btc = df.column("BTCUSDT").unwrap().f64().unwrap();
        assert_eq!((btc.get(0), btc.get(1)), (Some(100.0), Some(200.0)));
    }

    #[test]
    fn reversed_range_is_config_error() {
        let (_dir, store) = store_with_gap();
        let err = store
            .load("2024-01-04", "2024-01-01", "close", &LoadOptions::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[test]
    fn predicate_and_projection_apply() {
        let (_dir, store) = store_with_gap();
        let opts = LoadOptions::default()
            .predicate("\"BTCUSDT\" > 150")
            .columns(["open_time", "BTCUSDT"]);
        let df = store.load("2024-01-01", "2024-01-04", "close", &opts).unwrap();

        assert_eq!(df.get_column_names_str(), vec!["open_time", "BTCUSDT"]);
        assert_eq!(df.height(), 1);
        assert_eq!(df.column("BTCUSDT").unwrap().f64().unwrap().get(0), Some(400.0));
    }

    #[test]
    fn ordering_survives_projection_without_keys() {
        let (_dir, store) = store_with_gap();
        let opts = LoadOptions::default().columns(["BTCUSDT"]);
        let df = store.load("2024-01-01", "2024-01-04", "close", &opts).unwrap();
        let btc = df.column("BTCUSDT").unwrap().f64().unwrap();
        assert_eq!(btc.get(0), Some(100.0));
        assert_eq!(btc.get(2), Some(400.0));
    }

    #[test]
    fn shared_context_is_reusable() {
        let (_dir, store) = store_with_gap();
        let mut ctx = SQLContext::new();
        let opts = LoadOptions::default().predicate("\"BTCUSDT\" IS NOT NULL");
        let a = store
            .load_with(&mut ctx, "2024-01-01", "2024-01-04", "close", &opts)
            .unwrap();
        let b = store
            .load_with(&mut ctx, "2024-01-01", "2024-01-01", "volume", &LoadOptions::default())
            .unwrap();
        assert_eq!(a.height(), 2);
        assert_eq!(b.height(), 1);
    }

    #[test]
    fn bad_predicate_is_query_error() {
        let (_dir, store) = store_with_gap();
        let opts = LoadOptions::default().predicate("NOT A PREDICATE (((");
        let err = store.load("2024-01-01", "2024-01-04", "close", &opts).unwrap_err();
        assert!(matches!(err, StoreError::Query(_)));
    }

    #[test]
    fn partition_without_keys_is_schema_error() {
        let (dir, store) = store_with_gap();
        let mut broken = df!("BTCUSDT" => &[1.0]).unwrap();
        let path = store.layout().partition_path("2024-01-05", "close");
        write_partition_atomic(&mut broken, &path).unwrap();

        let err = store
            .load("2024-01-05", "2024-01-05", "close", &LoadOptions::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::Schema { .. }));
        drop(dir);
    }

    #[test]
    fn list_fields_scans_date_directories() {
        let (_dir, store) = store_with_gap();
        let fields: Vec<String> = store.list_fields().unwrap().into_iter().collect();
        assert_eq!(fields, vec!["close", "volume"]);
    }

    #[test]
    fn list_fields_on_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = PartitionStore::new(PartitionLayout::new(dir.path().join("absent")));
        assert!(store.list_fields().unwrap().is_empty());
    }

    #[test]
    fn time_indexed_drops_close_time() {
        let (_dir, store) = store_with_gap();
        let df = store
            .load("2024-01-01", "2024-01-04", "close", &LoadOptions::default())
            .unwrap();
        let indexed = time_indexed(df).unwrap();
        assert_eq!(indexed.get_column_names_str()[0], "open_time");
        assert!(indexed.column(CLOSE_TIME).is_err());
    }
}
