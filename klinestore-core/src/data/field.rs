//! Measurement fields and kline interval tags.

use super::error::StoreError;
use polars::prelude::DataType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One measurement channel of a kline, pivoted into its own partition file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KlineField {
    Open,
    High,
    Low,
    Close,
    Volume,
    QuoteVolume,
    Count,
    TakerBuyVolume,
    TakerBuyQuoteVolume,
}

impl KlineField {
    pub const ALL: [KlineField; 9] = [
        KlineField::Open,
        KlineField::High,
        KlineField::Low,
        KlineField::Close,
        KlineField::Volume,
        KlineField::QuoteVolume,
        KlineField::Count,
        KlineField::TakerBuyVolume,
        KlineField::TakerBuyQuoteVolume,
    ];

    /// Column name in the raw CSV, also the partition file stem.
    pub fn as_str(self) -> &'static str {
        match self {
            KlineField::Open => "open",
            KlineField::High => "high",
            KlineField::Low => "low",
            KlineField::Close => "close",
            KlineField::Volume => "volume",
            KlineField::QuoteVolume => "quote_volume",
            KlineField::Count => "count",
            KlineField::TakerBuyVolume => "taker_buy_volume",
            KlineField::TakerBuyQuoteVolume => "taker_buy_quote_volume",
        }
    }

    /// Storage type of every symbol column of this field.
    pub fn dtype(self) -> DataType {
        match self {
            KlineField::Count => DataType::Int64,
            _ => DataType::Float64,
        }
    }
}

impl fmt::Display for KlineField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KlineField {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        KlineField::ALL
            .into_iter()
            .find(|f| f.as_str() == wanted)
            .ok_or_else(|| StoreError::Config(format!("unknown field '{s}'")))
    }
}

/// Positional column names of a headerless exchange dump.
pub const RAW_CSV_COLUMNS: [&str; 12] = [
    "open_time",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "close_time",
    "quote_volume",
    "count",
    "taker_buy_volume",
    "taker_buy_quote_volume",
    "ignore",
];

const KNOWN_INTERVALS: [&str; 16] = [
    "1s", "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "12h", "1d", "3d", "1w",
    "1mo",
];

/// Kline frequency tag, matching a directory segment of the raw tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KlineInterval(String);

impl KlineInterval {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for KlineInterval {
    fn default() -> Self {
        KlineInterval("12h".to_string())
    }
}

impl fmt::Display for KlineInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for KlineInterval {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if KNOWN_INTERVALS.contains(&s) {
            Ok(KlineInterval(s.to_string()))
        } else {
            Err(StoreError::Config(format!(
                "unknown kline interval '{s}'. Valid: {}",
                KNOWN_INTERVALS.join(", ")
            )))
        }
    }
}

impl TryFrom<String> for KlineInterval {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<KlineInterval> for String {
    fn from(value: KlineInterval) -> Self {
        value.0
    }
}
