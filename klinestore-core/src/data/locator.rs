//! Finds the raw per-symbol CSV files of one calendar-day partition.
//!
//! Expected raw layout: `{raw_root}/{SYMBOL}/{interval}/{SYMBOL}-{interval}-{YYYY-MM-DD}.csv`.
//! A day with zero matching files is a legitimate gap (holiday, late
//! listing), not an error.

use super::dates::partition_key;
use super::error::StoreError;
use super::field::KlineInterval;
use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};

pub struct PartitionLocator {
    raw_root: PathBuf,
}

impl PartitionLocator {
    pub fn new(raw_root: impl Into<PathBuf>) -> Self {
        Self {
            raw_root: raw_root.into(),
        }
    }

    pub fn raw_root(&self) -> &Path {
        &self.raw_root
    }

    /// All CSVs for `date` under a directory segment named `interval`, sorted.
    pub fn locate(
        &self,
        date: NaiveDate,
        interval: &KlineInterval,
    ) -> Result<Vec<PathBuf>, StoreError> {
        if !self.raw_root.exists() {
            return Err(StoreError::NotFound {
                path: self.raw_root.clone(),
            });
        }

        let suffix = format!("{}.csv", partition_key(date));
        let mut found = Vec::new();
        walk_csv_files(&self.raw_root, &mut found)?;

        let mut matched: Vec<PathBuf> = found
            .into_iter()
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(&suffix))
            })
            .filter(|path| self.has_interval_segment(path, interval))
            .collect();
        matched.sort();

        tracing::debug!(
            date = %date,
            interval = %interval,
            files = matched.len(),
            "located partition files"
        );
        Ok(matched)
    }

    /// Only directory segments below the root count, never the file name.
    fn has_interval_segment(&self, path: &Path, interval: &KlineInterval) -> bool {
        let relative = path.strip_prefix(&self.raw_root).unwrap_or(path);
        relative
            .parent()
            .map(|dir| {
                dir.components()
                    .any(|c| c.as_os_str() == interval.as_str())
            })
            .unwrap_or(false)
    }
}

fn walk_csv_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), StoreError> {
    let entries = fs::read_dir(dir).map_err(|e| StoreError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::io(dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| StoreError::io(&path, e))?;
        if file_type.is_dir() {
            walk_csv_files(&path, out)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some("csv") {
            out.push(path);
        }
    }
    Ok(())
}
