use polars::prelude::*;

/// Join keys shared by every field partition.
pub const OPEN_TIME: &str = "open_time";
pub const CLOSE_TIME: &str = "close_time";
pub const KEY_COLUMNS: [&str; 2] = [OPEN_TIME, CLOSE_TIME];

/// Columns attached by the normalizer.
pub const HALF_OPEN_COLUMN: &str = "half_open_interval";
pub const FREQ_COLUMN: &str = "freq";
pub const RIGHT_OPEN: &str = "right-open";

/// How the time keys of a table are currently encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEncoding {
    /// Epoch milliseconds straight from the CSV.
    RawMillis,
    /// Timestamps in the given unit.
    Timestamp(TimeUnit),
}

impl KeyEncoding {
    /// Ticks of this encoding per second.
    pub fn ticks_per_second(self) -> i64 {
        match self {
            KeyEncoding::RawMillis | KeyEncoding::Timestamp(TimeUnit::Milliseconds) => 1_000,
            KeyEncoding::Timestamp(TimeUnit::Microseconds) => 1_000_000,
            KeyEncoding::Timestamp(TimeUnit::Nanoseconds) => 1_000_000_000,
        }
    }
}

/// Expected layout of a field partition table.
pub struct PartitionSchema;

impl PartitionSchema {
    /// Storage type of the time keys after the first write.
    pub fn key_dtype() -> DataType {
        DataType::Datetime(TimeUnit::Milliseconds, Some("UTC".into()))
    }

    /// Check that both time keys exist and share a supported encoding.
    pub fn validate_keys(schema: &Schema) -> Result<KeyEncoding, SchemaError> {
        let mut encoding = None;
        for key in KEY_COLUMNS {
            let dtype = schema
                .get(key)
                .ok_or_else(|| SchemaError::MissingColumn(key.to_string()))?;
            let this = match dtype {
                DataType::Int64 => KeyEncoding::RawMillis,
                DataType::Datetime(unit, _) => KeyEncoding::Timestamp(*unit),
                other => {
                    return Err(SchemaError::TypeMismatch {
                        column: key.to_string(),
                        expected: Self::key_dtype(),
                        actual: other.clone(),
                    })
                }
            };
            match encoding {
                None => encoding = Some(this),
                Some(prev) if prev != this => {
                    return Err(SchemaError::TypeMismatch {
                        column: key.to_string(),
                        expected: schema.get(OPEN_TIME).cloned().unwrap_or(DataType::Null),
                        actual: dtype.clone(),
                    })
                }
                Some(_) => {}
            }
        }
        encoding.ok_or_else(|| SchemaError::MissingColumn(OPEN_TIME.to_string()))
    }

    /// Whether the normalizer has already run over this table.
    pub fn is_normalized(schema: &Schema) -> bool {
        schema.contains(HALF_OPEN_COLUMN)
    }

    /// Non-key columns in table order (symbols, plus derived columns if normalized).
    pub fn value_columns(schema: &Schema) -> Vec<PlSmallStr> {
        schema
            .iter_names()
            .filter(|name| !KEY_COLUMNS.contains(&name.as_str()))
            .cloned()
            .collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Type mismatch in column {column}: expected {expected:?}, got {actual:?}")]
    TypeMismatch {
        column: String,
        expected: DataType,
        actual: DataType,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(open: Column, close: Column) -> DataFrame {
        DataFrame::new(vec![
            open,
            close,
            Column::new("BTCUSDT".into(), &[42_000.0]),
        ])
        .unwrap()
    }

    #[test]
    fn raw_millis_keys_are_accepted() {
        let df = keys(
            Column::new(OPEN_TIME.into(), &[1704067200000i64]),
            Column::new(CLOSE_TIME.into(), &[1704070799999i64]),
        );
        let encoding = PartitionSchema::validate_keys(&df.schema()).unwrap();
        assert_eq!(encoding, KeyEncoding::RawMillis);
        assert_eq!(encoding.ticks_per_second(), 1_000);
    }

    #[test]
    fn utc_timestamp_keys_are_accepted() {
        let open = Column::new(OPEN_TIME.into(), &[1704067200000i64])
            .cast(&PartitionSchema::key_dtype())
            .unwrap();
        let close = Column::new(CLOSE_TIME.into(), &[1704070799999i64])
            .cast(&PartitionSchema::key_dtype())
            .unwrap();
        let df = keys(open, close);
        assert_eq!(
            PartitionSchema::validate_keys(&df.schema()).unwrap(),
            KeyEncoding::Timestamp(TimeUnit::Milliseconds)
        );
    }

    #[test]
    fn missing_close_time_is_rejected() {
        let df = DataFrame::new(vec![
            Column::new(OPEN_TIME.into(), &[1i64]),
            Column::new("ETHUSDT".into(), &[2_300.0]),
        ])
        .unwrap();
        let err = PartitionSchema::validate_keys(&df.schema()).unwrap_err();
        assert!(matches!(err, SchemaError::MissingColumn(ref c) if c == CLOSE_TIME));
    }

    #[test]
    fn string_keys_are_rejected() {
        let df = keys(
            Column::new(OPEN_TIME.into(), &["2024-01-01"]),
            Column::new(CLOSE_TIME.into(), &["2024-01-01"]),
        );
        let err = PartitionSchema::validate_keys(&df.schema()).unwrap_err();
        assert!(matches!(err, SchemaError::TypeMismatch { .. }));
    }

    #[test]
    fn value_columns_skip_keys() {
        let df = keys(
            Column::new(OPEN_TIME.into(), &[1i64]),
            Column::new(CLOSE_TIME.into(), &[2i64]),
        );
        let values = PartitionSchema::value_columns(&df.schema());
        assert_eq!(values, vec![PlSmallStr::from("BTCUSDT")]);
        assert!(!PartitionSchema::is_normalized(&df.schema()));
    }
}
