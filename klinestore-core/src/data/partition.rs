//! On-disk partition addressing and Parquet I/O.
//!
//! Layout: `{store_root}/{YYYY-MM-DD}/{field}.parquet`
//!
//! Writes are atomic: the table goes to `{field}.parquet.tmp` first and is
//! renamed into place, so a crash mid-write leaves the previous partition
//! intact.

use super::error::StoreError;
use polars::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

/// Maps (date, field) to partition files under a store root.
#[derive(Debug, Clone)]
pub struct PartitionLayout {
    root: PathBuf,
}

impl PartitionLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for one calendar day: `{root}/{YYYY-MM-DD}/`
    pub fn date_dir(&self, date_key: &str) -> PathBuf {
        self.root.join(date_key)
    }

    /// Partition file for a date and field: `{root}/{YYYY-MM-DD}/{field}.parquet`
    pub fn partition_path(&self, date_key: &str, field: &str) -> PathBuf {
        self.date_dir(date_key)
            .join(format!("{}.parquet", field.to_lowercase()))
    }

    /// Partition files that exist for the given dates, in date order.
    pub fn existing_paths<S: AsRef<str>>(&self, date_keys: &[S], field: &str) -> Vec<PathBuf> {
        date_keys
            .iter()
            .map(|d| self.partition_path(d.as_ref(), field))
            .filter(|p| p.exists())
            .collect()
    }
}

/// Read a whole partition file.
pub fn read_partition(path: &Path) -> Result<DataFrame, StoreError> {
    let file = fs::File::open(path).map_err(|e| StoreError::io(path, e))?;
    ParquetReader::new(file)
        .finish()
        .map_err(|e| StoreError::Parquet(format!("read {}: {e}", path.display())))
}

/// Replace a partition file with `df`, creating parent directories.
pub fn write_partition_atomic(df: &mut DataFrame, path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }

    let tmp_path = path.with_extension("parquet.tmp");
    let file = fs::File::create(&tmp_path).map_err(|e| StoreError::io(&tmp_path, e))?;
    if let Err(e) = ParquetWriter::new(file).finish(df) {
        let _ = fs::remove_file(&tmp_path);
        return Err(StoreError::Parquet(format!(
            "write {}: {e}",
            tmp_path.display()
        )));
    }

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        StoreError::io(path, e)
    })
}
