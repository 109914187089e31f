//! # Landflow: Land-Use Transition ETL
//!
//! Landflow converts very large, deeply nested land-use transition
//! projection documents (per geography, per scenario, per time period, per
//! category pair) into a normalized, query-optimized star schema in
//! PostgreSQL: one fact relation and four dimension relations, plus
//! indexes and precomputed analytical views.
//!
//! ## Features
//!
//! - **Streaming parse**: one geography record in memory at a time, no
//!   matter how many millions of lines the input has
//! - **Dimension interning**: natural keys deduplicated into stable
//!   surrogate IDs, assigned in first-seen order
//! - **Conservation validation**: per-group area checks with configurable
//!   warn and exclude thresholds
//! - **Bulk loading**: CSV exchange files plus PostgreSQL `COPY`, an order
//!   of magnitude faster than per-row inserts, with a row-by-row reference
//!   path kept value-equivalent
//! - **Checkpointed resume**: interruption never costs the committed prefix
//!
//! ## Example
//!
//! ```ignore
//! use landflow::{run_conversion, ConvertConfig, LogProgressSink, PgSink};
//! use std::sync::atomic::AtomicBool;
//!
//! let config = ConvertConfig {
//!     input: vec!["projections.jsonl".into()],
//!     ..Default::default()
//! };
//! let mut sink = PgSink::connect("postgres://localhost/landuse")?;
//! let report = run_conversion(&config, &mut sink, &LogProgressSink, &AtomicBool::new(false))?;
//! println!("{}", report.outcome);
//! ```
//!
//! Surrogate IDs are stable within a run (and across a checkpointed
//! resume), but not across independent runs; downstream consumers must
//! join through natural keys if they persist anything.

// Core modules
pub mod assembler;
pub mod config;
pub mod ddl;
pub mod error;
pub mod model;
pub mod parser;
pub mod registry;
pub mod validator;

// Target-store schema and loading
pub mod checkpoint;
pub mod loader;
pub mod pipeline;
pub mod schema;

// Re-export key types
pub use assembler::{AssembledGroup, FactAssembler, RowCheck};
pub use checkpoint::{
    ConversionState, LogProgressSink, ProgressSink, ProgressSnapshot, ProgressTracker,
};
pub use config::ConvertConfig;
pub use error::ConvertError;
pub use loader::{
    Batch, BatchSink, BulkLoader, Database, DatabaseConfig, FailedBatch, LoadMode, MemorySink,
    PgSink, RetryPolicy, Sleeper, ThreadSleeper,
};
pub use model::{
    DimensionRows, FactRow, GeographyRecord, GeographyRow, LandUseRow, ScenarioRow,
    TimePeriodRow, TransitionType,
};
pub use parser::GeographyStream;
pub use pipeline::{run_conversion, RunOutcome, RunReport};
pub use registry::DimensionRegistry;
pub use validator::{GroupOutcome, GroupVerdict, RunStats, Validator};
