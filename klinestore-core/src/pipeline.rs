//! Ingestion orchestrator: locate → pivot → merge, one calendar day at a time.

use crate::config::StoreConfig;
use crate::data::{
    date_range, FieldPivoter, KlineField, KlineInterval, MergeOutcome, PartitionLocator,
    PartitionMerger, StoreError,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Progress callback for ingestion runs.
pub trait IngestProgress: Send {
    /// Called before a day is pivoted, with the number of raw files found.
    fn on_day_start(&self, date: NaiveDate, files: usize);

    /// Called after each field partition is written.
    fn on_partition_merged(&self, date: NaiveDate, field: KlineField, outcome: &MergeOutcome);

    /// Called when a day is fully merged (or skipped as a gap).
    fn on_day_complete(&self, date: NaiveDate, partitions: usize);

    /// Called when the whole range is done.
    fn on_batch_complete(&self, summary: &IngestSummary);
}

/// Progress reporter that emits structured log events.
pub struct TracingProgress;

impl IngestProgress for TracingProgress {
    fn on_day_start(&self, date: NaiveDate, files: usize) {
        tracing::info!(date = %date, files, "ingesting day");
    }

    fn on_partition_merged(&self, date: NaiveDate, field: KlineField, outcome: &MergeOutcome) {
        tracing::debug!(
            date = %date,
            field = %field,
            path = %outcome.path.display(),
            rows_before = outcome.rows_before,
            rows_incoming = outcome.rows_incoming,
            rows_after = outcome.rows_after,
            "partition merged"
        );
    }

    fn on_day_complete(&self, date: NaiveDate, partitions: usize) {
        if partitions == 0 {
            tracing::warn!(date = %date, "no raw files for day, skipped");
        } else {
            tracing::info!(date = %date, partitions, "day complete");
        }
    }

    fn on_batch_complete(&self, summary: &IngestSummary) {
        tracing::info!(
            days = summary.days,
            empty_days = summary.empty_days,
            files = summary.files,
            partitions = summary.partitions_written,
            rows = summary.rows_written,
            "ingest complete"
        );
    }
}

/// Silent reporter.
pub struct NoProgress;

impl IngestProgress for NoProgress {
    fn on_day_start(&self, _date: NaiveDate, _files: usize) {}
    fn on_partition_merged(&self, _date: NaiveDate, _field: KlineField, _outcome: &MergeOutcome) {}
    fn on_day_complete(&self, _date: NaiveDate, _partitions: usize) {}
    fn on_batch_complete(&self, _summary: &IngestSummary) {}
}

/// Totals for an ingestion run.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    /// Days in the requested range.
    pub days: usize,
    /// Days with no raw files (or only empty ones).
    pub empty_days: usize,
    /// Raw CSV files consumed.
    pub files: usize,
    pub partitions_written: usize,
    /// Rows across written partitions after merging.
    pub rows_written: usize,
}

pub struct Ingestor {
    locator: PartitionLocator,
    pivoter: FieldPivoter,
    merger: PartitionMerger,
}

impl Ingestor {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            locator: PartitionLocator::new(&config.raw_data_root),
            pivoter: FieldPivoter::new(config.join_policy),
            merger: PartitionMerger::new(config.layout(), config.dedup_policy),
        }
    }

    /// Only ingest the given fields.
    pub fn with_fields(self, fields: &[KlineField]) -> Self {
        Self {
            pivoter: self.pivoter.with_fields(fields),
            ..self
        }
    }

    /// Ingest one day. Returns the merge outcome of every partition written.
    pub fn ingest_day(
        &self,
        date: NaiveDate,
        interval: &KlineInterval,
        progress: &dyn IngestProgress,
    ) -> Result<Vec<(KlineField, MergeOutcome)>, StoreError> {
        let files = self.locator.locate(date, interval)?;
        self.ingest_located(date, &files, progress)
    }

    /// Ingest every day in `[start, end]`. Gaps are skipped; the first error aborts.
    pub fn run(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        interval: &KlineInterval,
        progress: &dyn IngestProgress,
    ) -> Result<IngestSummary, StoreError> {
        let dates = date_range(start, end)?;
        let mut summary = IngestSummary {
            days: dates.len(),
            ..IngestSummary::default()
        };

        for date in dates {
            let files = self.locator.locate(date, interval)?;
            summary.files += files.len();
            let outcomes = self.ingest_located(date, &files, progress)?;
            if outcomes.is_empty() {
                summary.empty_days += 1;
            }
            summary.partitions_written += outcomes.len();
            summary.rows_written += outcomes.iter().map(|(_, o)| o.rows_after).sum::<usize>();
        }

        progress.on_batch_complete(&summary);
        Ok(summary)
    }

    fn ingest_located(
        &self,
        date: NaiveDate,
        files: &[PathBuf],
        progress: &dyn IngestProgress,
    ) -> Result<Vec<(KlineField, MergeOutcome)>, StoreError> {
        progress.on_day_start(date, files.len());

        let pivoted = self.pivoter.pivot(date, files)?;
        let mut outcomes = Vec::with_capacity(pivoted.tables.len());
        for (field, table) in pivoted.tables {
            let outcome = self.merger.merge(date, field, table)?;
            progress.on_partition_merged(date, field, &outcome);
            outcomes.push((field, outcome));
        }

        progress.on_day_complete(date, outcomes.len());
        Ok(outcomes)
    }
}
