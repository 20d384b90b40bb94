//! Store configuration, populated once at startup and passed by reference.
//!
//! Sources: a TOML file, or environment variables (with `.env` support).
//! The legacy `DATA_PATH` / `PQ_DATA_PATH` variables are honoured when the
//! `KLINESTORE_*` ones are absent.

use crate::data::{DedupPolicy, JoinPolicy, KlineInterval, PartitionLayout, StoreError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_RAW_DATA_ROOT: &str = "KLINESTORE_RAW_DATA_ROOT";
pub const ENV_STORE_ROOT: &str = "KLINESTORE_STORE_ROOT";
pub const ENV_INTERVAL: &str = "KLINESTORE_INTERVAL";
pub const ENV_JOIN_POLICY: &str = "KLINESTORE_JOIN_POLICY";
pub const ENV_DEDUP_POLICY: &str = "KLINESTORE_DEDUP_POLICY";

const LEGACY_DATA_PATH: &str = "DATA_PATH";
const LEGACY_PQ_DATA_PATH: &str = "PQ_DATA_PATH";
/// Where the exchange dump tool puts USD-M futures daily klines under `DATA_PATH`.
const LEGACY_KLINES_SUBDIR: &str = "futures/um/daily/klines";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root of the raw per-symbol CSV tree.
    pub raw_data_root: PathBuf,
    /// Root of the partitioned Parquet store.
    pub store_root: PathBuf,
    /// Default kline interval to ingest.
    #[serde(default)]
    pub interval: KlineInterval,
    #[serde(default)]
    pub join_policy: JoinPolicy,
    #[serde(default)]
    pub dedup_policy: DedupPolicy,
}

impl StoreConfig {
    pub fn new(raw_data_root: impl Into<PathBuf>, store_root: impl Into<PathBuf>) -> Self {
        Self {
            raw_data_root: raw_data_root.into(),
            store_root: store_root.into(),
            interval: KlineInterval::default(),
            join_policy: JoinPolicy::default(),
            dedup_policy: DedupPolicy::default(),
        }
    }

    /// Load from the process environment, reading `.env` first if present.
    pub fn from_env() -> Result<Self, StoreError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, StoreError> {
        let raw_data_root = lookup(ENV_RAW_DATA_ROOT)
            .map(PathBuf::from)
            .or_else(|| lookup(LEGACY_DATA_PATH).map(|p| Path::new(&p).join(LEGACY_KLINES_SUBDIR)))
            .ok_or_else(|| {
                StoreError::Config(format!("{ENV_RAW_DATA_ROOT} (or {LEGACY_DATA_PATH}) is not set"))
            })?;
        let store_root = lookup(ENV_STORE_ROOT)
            .or_else(|| lookup(LEGACY_PQ_DATA_PATH))
            .map(PathBuf::from)
            .ok_or_else(|| {
                StoreError::Config(format!("{ENV_STORE_ROOT} (or {LEGACY_PQ_DATA_PATH}) is not set"))
            })?;

        let mut config = Self::new(raw_data_root, store_root);
        if let Some(interval) = lookup(ENV_INTERVAL) {
            config.interval = interval.parse()?;
        }
        if let Some(policy) = lookup(ENV_JOIN_POLICY) {
            config.join_policy = policy.parse()?;
        }
        if let Some(policy) = lookup(ENV_DEDUP_POLICY) {
            config.dedup_policy = policy.parse()?;
        }
        Ok(config)
    }

    /// Load from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, StoreError> {
        let content = std::fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
        Self::from_toml(&content)
    }

    /// Parse from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, StoreError> {
        toml::from_str(content).map_err(|e| StoreError::Config(format!("parse config TOML: {e}")))
    }

    pub fn layout(&self) -> PartitionLayout {
        PartitionLayout::new(&self.store_root)
    }
}
