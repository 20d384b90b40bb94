//! Kline ingestion and the field-partitioned Parquet store

pub mod dates;
pub mod error;
pub mod field;
pub mod locator;
pub mod merge;
pub mod normalize;
pub mod partition;
pub mod pivot;
pub mod schema;
pub mod store;

pub use dates::{date_keys, date_range, parse_date, partition_key};
pub use error::StoreError;
pub use field::{KlineField, KlineInterval};
pub use locator::PartitionLocator;
pub use merge::{DedupPolicy, MergeOutcome, PartitionMerger};
pub use normalize::{NormalizeSummary, PartitionNormalizer};
pub use partition::PartitionLayout;
pub use pivot::{FieldPivoter, JoinPolicy, PivotedDay};
pub use schema::{PartitionSchema, SchemaError};
pub use store::{time_indexed, LoadOptions, PartitionStore};
