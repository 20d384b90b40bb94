//! Calendar date parsing and inclusive range expansion.

use super::error::StoreError;
use chrono::NaiveDate;

/// Partition directory format.
pub const PARTITION_DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse `YYYY-MM-DD` or the compact `YYYYMMDD` form.
pub fn parse_date(s: &str) -> Result<NaiveDate, StoreError> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, PARTITION_DATE_FORMAT)
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y%m%d"))
        .map_err(|e| StoreError::Config(format!("malformed date '{s}': {e}")))
}

/// Partition directory name for a date.
pub fn partition_key(date: NaiveDate) -> String {
    date.format(PARTITION_DATE_FORMAT).to_string()
}

/// Every calendar date in `[start, end]`.
pub fn date_range(start: NaiveDate, end: NaiveDate) -> Result<Vec<NaiveDate>, StoreError> {
    if end < start {
        return Err(StoreError::Config(format!(
            "end date {end} must be >= start date {start}"
        )));
    }
    Ok(start.iter_days().take_while(|d| *d <= end).collect())
}

/// Same as [`date_range`], from strings, yielding partition keys.
pub fn date_keys(start: &str, end: &str) -> Result<Vec<String>, StoreError> {
    let dates = date_range(parse_date(start)?, parse_date(end)?)?;
    Ok(dates.into_iter().map(partition_key).collect())
}
