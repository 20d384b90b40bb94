//! Reshapes one day of per-symbol kline CSVs into one wide table per field.
//!
//! Each CSV contributes a single column (named after its symbol) to every
//! field table; rows are aligned on `(open_time, close_time)`.

use super::error::StoreError;
use super::field::{KlineField, RAW_CSV_COLUMNS};
use super::schema::{CLOSE_TIME, KEY_COLUMNS, OPEN_TIME};
use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// How symbol columns are aligned when their timestamps disagree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinPolicy {
    /// Full outer join: every symbol keeps its rows, gaps are null.
    #[default]
    Union,
    /// Inner join: a row survives only if every symbol has it.
    Intersect,
}

impl FromStr for JoinPolicy {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "union" | "outer" => Ok(JoinPolicy::Union),
            "intersect" | "inner" => Ok(JoinPolicy::Intersect),
            other => Err(StoreError::Config(format!(
                "unknown join policy '{other}'. Valid: union, intersect"
            ))),
        }
    }
}

/// Wide field tables for one calendar day.
#[derive(Debug)]
pub struct PivotedDay {
    pub date: NaiveDate,
    /// Symbols in the order their files were consumed.
    pub symbols: Vec<String>,
    pub tables: BTreeMap<KlineField, DataFrame>,
}

impl PivotedDay {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

pub struct FieldPivoter {
    policy: JoinPolicy,
    fields: Vec<KlineField>,
}

impl FieldPivoter {
    pub fn new(policy: JoinPolicy) -> Self {
        Self {
            policy,
            fields: KlineField::ALL.to_vec(),
        }
    }

    /// Restrict pivoting to a subset of fields.
    pub fn with_fields(mut self, fields: &[KlineField]) -> Self {
        self.fields = fields.to_vec();
        self
    }

    pub fn policy(&self) -> JoinPolicy {
        self.policy
    }

    /// Pivot the CSVs of one day. `files` would normally come from the locator.
    pub fn pivot(&self, date: NaiveDate, files: &[PathBuf]) -> Result<PivotedDay, StoreError> {
        let mut tables: BTreeMap<KlineField, DataFrame> = BTreeMap::new();
        let mut symbols = Vec::with_capacity(files.len());
        let mut seen = HashSet::new();

        for path in files {
            let symbol = symbol_from_path(path).ok_or_else(|| StoreError::Csv {
                path: path.clone(),
                message: "cannot derive symbol from path".into(),
            })?;
            if !seen.insert(symbol.clone()) {
                tracing::warn!(
                    symbol = %symbol,
                    path = %path.display(),
                    "symbol already pivoted for this day, skipping file"
                );
                continue;
            }

            let Some(raw) = read_raw_csv(path)? else {
                tracing::warn!(path = %path.display(), "empty csv, skipping");
                continue;
            };

            for field in &self.fields {
                let column = project_field(&raw, *field, &symbol).map_err(|e| StoreError::Csv {
                    path: path.clone(),
                    message: format!("field '{field}': {e}"),
                })?;
                let joined = match tables.remove(field) {
                    None => column,
                    Some(acc) => join_on_keys(acc, column, self.policy).map_err(|e| {
                        StoreError::Csv {
                            path: path.clone(),
                            message: format!("join '{field}': {e}"),
                        }
                    })?,
                };
                tables.insert(*field, joined);
            }
            symbols.push(symbol);
        }

        for table in tables.values_mut() {
            *table = sort_by_keys(std::mem::take(table))
                .map_err(|e| StoreError::Frame(format!("sort pivoted table: {e}")))?;
        }

        Ok(PivotedDay {
            date,
            symbols,
            tables,
        })
    }
}

/// Symbol directory sits two levels above the file: `{SYMBOL}/{interval}/{file}.csv`.
pub fn symbol_from_path(path: &Path) -> Option<String> {
    path.parent()?
        .parent()?
        .file_name()?
        .to_str()
        .map(str::to_string)
}

/// Header sniff result for a raw CSV.
struct Sniffed {
    has_header: bool,
    /// Column names as polars will see them (`column_N` without a header).
    columns: Vec<String>,
}

impl Sniffed {
    /// Canonical kline name of the `i`-th column.
    fn canonical(&self, i: usize) -> Option<&str> {
        if self.has_header {
            self.columns.get(i).map(String::as_str)
        } else {
            RAW_CSV_COLUMNS.get(i).copied()
        }
    }

    /// Fixed dtypes for every known column, so a long run of integer-looking
    /// cells cannot pin a float field to Int64.
    fn dtype_overrides(&self) -> Schema {
        self.columns
            .iter()
            .enumerate()
            .filter_map(|(i, name)| {
                let dtype = match self.canonical(i)? {
                    OPEN_TIME | CLOSE_TIME => DataType::Int64,
                    other => other.parse::<KlineField>().ok()?.dtype(),
                };
                Some(Field::new(name.as_str().into(), dtype))
            })
            .collect()
    }
}

/// Older exchange dumps have no header row; their first cell is an epoch integer.
fn sniff(path: &Path) -> Result<Option<Sniffed>, StoreError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| StoreError::Csv {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    let Some(first) = reader.records().next() else {
        return Ok(None);
    };
    let first = first.map_err(|e| StoreError::Csv {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let has_header = first
        .get(0)
        .map(|cell| cell.trim().parse::<i64>().is_err())
        .unwrap_or(true);

    let columns = if has_header {
        first.iter().map(|cell| cell.trim().to_string()).collect()
    } else {
        (1..=first.len()).map(|i| format!("column_{i}")).collect()
    };

    Ok(Some(Sniffed {
        has_header,
        columns,
    }))
}

fn read_raw_csv(path: &Path) -> Result<Option<DataFrame>, StoreError> {
    let Some(sniffed) = sniff(path)? else {
        return Ok(None);
    };
    let csv_err = |e: PolarsError| StoreError::Csv {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    let lf = LazyCsvReader::new(path)
        .with_has_header(sniffed.has_header)
        .with_dtype_overwrite(Some(Arc::new(sniffed.dtype_overrides())))
        .finish()
        .map_err(csv_err)?;

    let lf = if sniffed.has_header {
        lf
    } else {
        let named: Vec<Expr> = RAW_CSV_COLUMNS
            .iter()
            .take(sniffed.columns.len())
            .enumerate()
            .map(|(i, name)| col(format!("column_{}", i + 1)).alias(*name))
            .collect();
        lf.select(named)
    };

    lf.collect().map(Some).map_err(csv_err)
}

/// `[open_time, close_time, field]` with the field renamed to the symbol.
fn project_field(raw: &DataFrame, field: KlineField, symbol: &str) -> PolarsResult<DataFrame> {
    raw.clone()
        .lazy()
        .select([
            col(OPEN_TIME).cast(DataType::Int64),
            col(CLOSE_TIME).cast(DataType::Int64),
            col(field.as_str()).cast(field.dtype()).alias(symbol),
        ])
        .collect()
}

fn join_on_keys(acc: DataFrame, next: DataFrame, policy: JoinPolicy) -> PolarsResult<DataFrame> {
    let keys = [col(OPEN_TIME), col(CLOSE_TIME)];
    let args = match policy {
        JoinPolicy::Intersect => JoinArgs::new(JoinType::Inner),
        JoinPolicy::Union => {
            JoinArgs::new(JoinType::Full).with_coalesce(JoinCoalesce::CoalesceColumns)
        }
    };
    acc.lazy()
        .join(next.lazy(), keys.clone(), keys, args)
        .collect()
}

pub(crate) fn sort_by_keys(df: DataFrame) -> PolarsResult<DataFrame> {
    df.lazy()
        .sort(KEY_COLUMNS, SortMultipleOptions::default())
        .collect()
}
