//! Batch loading into the analytical store.
//!
//! The pipeline hands size-bounded batches to a `BulkLoader`, which wraps a
//! `BatchSink` with the retry policy. `PgSink` is the production sink;
//! `MemorySink` backs dry runs and tests, and gives its bulk path the same
//! serialize-through-the-exchange-format semantics as the real one.

pub mod database;
pub mod exchange;
pub mod postgres;
pub mod retry;

use serde::{Deserialize, Serialize};

use crate::error::ConvertError;
use crate::model::{DimensionRows, FactRow};

// Re-export key types
pub use database::{Database, DatabaseConfig, Pool, PooledConnection};
pub use postgres::PgSink;
pub use retry::{RetryPolicy, Sleeper, ThreadSleeper};

/// How fact batches are committed to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    /// Row-by-row inserts. The simple reference path.
    Row,
    /// CSV exchange file plus one bulk-copy per relation per batch.
    Bulk,
}

impl Default for LoadMode {
    fn default() -> Self {
        LoadMode::Bulk
    }
}

/// One size-bounded unit of load work: the dimension rows interned since
/// the previous batch, plus the fact rows of a contiguous geography range.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub dimensions: DimensionRows,
    pub facts: Vec<FactRow>,
    pub first_geography: String,
    pub last_geography: String,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty() && self.facts.is_empty()
    }
}

/// Target-store abstraction the pipeline writes through.
pub trait BatchSink {
    /// Create the target relations if they do not exist.
    fn ensure_schema(&mut self) -> Result<(), ConvertError>;

    /// Commit one batch atomically, dimensions before facts.
    fn commit(&mut self, batch: &Batch, mode: LoadMode) -> Result<(), ConvertError>;

    /// All dimension rows currently in the store, ordered by ID. Used to
    /// re-seed the registry when resuming.
    fn fetch_dimensions(&mut self) -> Result<DimensionRows, ConvertError>;

    /// Remove fact rows committed past the checkpoint cursor (a crash can
    /// land a batch without its checkpoint).
    fn delete_facts_after(&mut self, geography_id: i32) -> Result<(), ConvertError>;

    /// Build indexes and analytical views; marks the store consumable.
    fn finalize(&mut self) -> Result<(), ConvertError>;
}

/// In-memory sink for dry runs and tests.
///
/// `fail_next_commits` injects transient commit failures for retry tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub dimensions: DimensionRows,
    pub facts: Vec<FactRow>,
    pub schema_ready: bool,
    pub finalized: bool,
    pub commits: u64,
    pub fail_next_commits: u32,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BatchSink for MemorySink {
    fn ensure_schema(&mut self) -> Result<(), ConvertError> {
        self.schema_ready = true;
        Ok(())
    }

    fn commit(&mut self, batch: &Batch, mode: LoadMode) -> Result<(), ConvertError> {
        if self.fail_next_commits > 0 {
            self.fail_next_commits -= 1;
            return Err(ConvertError::Database(
                "injected transient failure".to_string(),
            ));
        }
        let dims = &batch.dimensions;
        self.dimensions.scenarios.extend(dims.scenarios.iter().cloned());
        self.dimensions.periods.extend(dims.periods.iter().cloned());
        self.dimensions.geographies.extend(dims.geographies.iter().cloned());
        self.dimensions.landuses.extend(dims.landuses.iter().cloned());

        match mode {
            LoadMode::Row => self.facts.extend(batch.facts.iter().cloned()),
            LoadMode::Bulk => {
                // Round-trip through the exchange rendering, as COPY does
                for row in &batch.facts {
                    let line = exchange::fact_record(row);
                    let parsed = exchange::parse_fact_record(&line).ok_or_else(|| {
                        ConvertError::Database(format!("unreadable exchange record: {}", line))
                    })?;
                    self.facts.push(parsed);
                }
            }
        }
        self.commits += 1;
        Ok(())
    }

    fn fetch_dimensions(&mut self) -> Result<DimensionRows, ConvertError> {
        Ok(self.dimensions.clone())
    }

    fn delete_facts_after(&mut self, geography_id: i32) -> Result<(), ConvertError> {
        self.facts.retain(|f| f.geography_id <= geography_id);
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), ConvertError> {
        self.finalized = true;
        Ok(())
    }
}

/// A batch whose retries were exhausted: recorded, never silently dropped.
#[derive(Debug, Clone, Serialize)]
pub struct FailedBatch {
    pub first_geography: String,
    pub last_geography: String,
    pub fact_rows: usize,
    pub error: String,
}

/// Commits batches through a sink with retry/backoff, recording batches
/// whose retries are exhausted so the run can continue past them.
pub struct BulkLoader<'a, S: BatchSink> {
    sink: &'a mut S,
    mode: LoadMode,
    retry: RetryPolicy,
    sleeper: Box<dyn Sleeper>,
    failed: Vec<FailedBatch>,
}

impl<'a, S: BatchSink> BulkLoader<'a, S> {
    pub fn new(sink: &'a mut S, mode: LoadMode, retry: RetryPolicy) -> Self {
        Self {
            sink,
            mode,
            retry,
            sleeper: Box::new(ThreadSleeper),
            failed: Vec::new(),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Box<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Commit one batch. Returns true if it landed; false if retries were
    /// exhausted and the batch was recorded as failed.
    pub fn commit_batch(&mut self, batch: &Batch) -> bool {
        if batch.is_empty() {
            return true;
        }
        let result = self
            .retry
            .run(self.sleeper.as_ref(), || self.sink.commit(batch, self.mode));
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    first = %batch.first_geography,
                    last = %batch.last_geography,
                    facts = batch.facts.len(),
                    "batch failed after retries: {}",
                    e
                );
                self.failed.push(FailedBatch {
                    first_geography: batch.first_geography.clone(),
                    last_geography: batch.last_geography.clone(),
                    fact_rows: batch.facts.len(),
                    error: e.to_string(),
                });
                false
            }
        }
    }

    pub fn failed_batches(&self) -> &[FailedBatch] {
        &self.failed
    }

    pub fn take_failed(&mut self) -> Vec<FailedBatch> {
        std::mem::take(&mut self.failed)
    }
}
