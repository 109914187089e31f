//! The staged conversion pipeline.
//!
//! A parser thread streams geography records into a bounded channel; the
//! driving thread assembles, validates, batches, loads, and checkpoints.
//! The bounded channel is the backpressure point: when the loader lags,
//! the parser blocks on send instead of buffering, which is what keeps
//! memory flat against tens of millions of input lines.
//!
//! The dimension registry lives only on the consuming side, so interning
//! has a single writer by construction.

use crossbeam_channel::bounded;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::assembler::FactAssembler;
use crate::checkpoint::{ConversionState, ProgressSink, ProgressSnapshot, ProgressTracker};
use crate::config::ConvertConfig;
use crate::error::ConvertError;
use crate::loader::{Batch, BatchSink, BulkLoader, FailedBatch};
use crate::model::GeographyRecord;
use crate::parser::GeographyStream;
use crate::registry::DimensionRegistry;
use crate::validator::{GroupVerdict, RunStats, Validator};

/// Overall result the operator judges the output by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    CompletedClean,
    CompletedWithWarnings,
    /// Output exists but is incomplete: failed groups or failed batches
    CompletedWithErrors,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::CompletedClean => write!(f, "completed clean"),
            RunOutcome::CompletedWithWarnings => write!(f, "completed with warnings"),
            RunOutcome::CompletedWithErrors => write!(f, "completed with recorded errors"),
        }
    }
}

/// Terminal report of one conversion run.
#[derive(Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub state: ConversionState,
    pub stats: RunStats,
    pub failed_batches: Vec<FailedBatch>,
}

/// Run the full conversion against the given sink.
///
/// The stop flag is honored at geography boundaries, never mid-batch: a
/// cancelled run flushes and checkpoints what it has, so a later resume
/// picks up after the committed prefix.
pub fn run_conversion<S: BatchSink>(
    config: &ConvertConfig,
    sink: &mut S,
    progress: &dyn ProgressSink,
    stop: &AtomicBool,
) -> Result<RunReport, ConvertError> {
    config.validate()?;
    let started = Instant::now();

    let mut tracker = match (&config.checkpoint_path, config.resume) {
        (Some(path), true) if path.exists() => {
            ProgressTracker::resume(path.clone(), &config.input)?
        }
        (path, resume) => {
            if resume {
                tracing::info!("no checkpoint found, starting from the beginning");
            }
            ProgressTracker::start(path.clone(), &config.input)
        }
    };

    sink.ensure_schema()?;

    // On resume, re-seed the registry from the store so surrogate IDs keep
    // their assignments, and drop facts a crash may have committed past
    // the cursor.
    let mut registry = DimensionRegistry::new();
    let resume_cursor = if config.resume {
        tracker.cursor().map(str::to_string)
    } else {
        None
    };
    if config.resume {
        registry.seed(sink.fetch_dimensions()?);
        if let Some(cursor) = &resume_cursor {
            let cursor_id = registry.geography_id(cursor).ok_or_else(|| {
                ConvertError::Checkpoint {
                    path: checkpoint_display(config),
                    reason: format!("cursor geography {} not present in the store", cursor),
                }
            })?;
            sink.delete_facts_after(cursor_id)?;
            tracing::info!(cursor = %cursor, "resuming after checkpoint");
        }
    }

    let stream = GeographyStream::open(&config.input)?.with_resume_cursor(resume_cursor);
    tracker.begin()?;

    let (tx, rx) = bounded::<Result<GeographyRecord, ConvertError>>(config.channel_capacity);
    let skipped = Arc::new(AtomicU64::new(0));
    let resume_pending = Arc::new(AtomicBool::new(false));
    let progress_every = config.progress_interval.max(1);

    let parser_skipped = Arc::clone(&skipped);
    let parser_resume_pending = Arc::clone(&resume_pending);

    std::thread::scope(move |scope| {
        scope.spawn(move || {
            let mut stream = stream;
            while let Some(item) = stream.next() {
                let is_fatal = item.is_err();
                parser_skipped.store(stream.skipped(), Ordering::Relaxed);
                // A closed channel means the consumer is done with us
                if tx.send(item).is_err() || is_fatal {
                    break;
                }
            }
            parser_skipped.store(stream.skipped(), Ordering::Relaxed);
            parser_resume_pending.store(stream.resume_pending(), Ordering::Relaxed);
        });

        let assembler = FactAssembler::new();
        let mut validator = Validator::new(config.tolerance, config.hard_threshold);
        let mut loader = BulkLoader::new(&mut *sink, config.load_mode, config.retry_policy());
        let mut stats = RunStats::default();
        let mut pending = Batch::default();
        let mut stopped = false;
        let mut run_error: Option<ConvertError> = None;

        for item in rx.iter() {
            let record = match item {
                Ok(record) => record,
                Err(fatal) => {
                    run_error = Some(fatal);
                    break;
                }
            };
            if stop.load(Ordering::Relaxed) {
                stopped = true;
                break;
            }

            stats.geographies_processed += 1;
            for group in assembler.assemble(&mut registry, &record) {
                stats.cells_skipped += group.cell_skips;
                stats.facts_emitted += group.facts.len() as u64;
                let outcome = validator.check_group(&group);
                stats.pairs_missing += outcome.missing_pairs as u64;
                match outcome.verdict {
                    GroupVerdict::Pass => stats.groups_passed += 1,
                    GroupVerdict::Warn => stats.groups_warned += 1,
                    GroupVerdict::Fail => {
                        stats.groups_failed += 1;
                        stats.facts_excluded += group.facts.len() as u64;
                        continue;
                    }
                }
                pending.facts.extend(group.facts);
            }
            if pending.first_geography.is_empty() {
                pending.first_geography = record.geography.clone();
            }
            pending.last_geography = record.geography.clone();
            stats.records_skipped = skipped.load(Ordering::Relaxed);

            // Batches close at geography boundaries only, so the cursor
            // always names a fully committed geography
            if pending.facts.len() >= config.batch_size {
                if let Err(e) =
                    flush_batch(&mut pending, &mut registry, &mut loader, &mut tracker, &mut stats)
                {
                    run_error = Some(e);
                    break;
                }
            }

            if stats.geographies_processed % progress_every == 0 {
                progress.on_snapshot(&snapshot(&tracker, &stats, started));
            }
        }

        // Unblock the parser before any early return; the scope joins it
        drop(rx);

        if let Some(err) = run_error {
            if let Err(e) = tracker.fail() {
                tracing::error!("could not persist failed state: {}", e);
            }
            return Err(err);
        }

        flush_batch(&mut pending, &mut registry, &mut loader, &mut tracker, &mut stats)?;

        stats.records_skipped = skipped.load(Ordering::Relaxed);
        stats.elapsed_secs = started.elapsed().as_secs_f64();
        let failed_batches = loader.take_failed();
        drop(loader);

        if resume_pending.load(Ordering::Relaxed) {
            tracing::warn!("resume cursor never found in the input; nothing was processed");
        }

        if stopped {
            tracing::info!("stop requested, leaving a resumable checkpoint");
        } else {
            sink.finalize()?;
            tracker.complete()?;
        }

        let outcome = if stats.has_errors() {
            RunOutcome::CompletedWithErrors
        } else if stats.has_warnings() {
            RunOutcome::CompletedWithWarnings
        } else {
            RunOutcome::CompletedClean
        };

        let report = RunReport {
            outcome,
            state: tracker.state(),
            stats,
            failed_batches,
        };
        progress.on_snapshot(&snapshot(&tracker, &report.stats, started));
        Ok(report)
    })
}

/// Drain newly interned dimension rows into the pending batch and commit
/// it. A committed batch advances the checkpoint cursor; a failed one
/// keeps its dimension rows for the next batch so later facts still find
/// their foreign keys.
fn flush_batch<S: BatchSink>(
    pending: &mut Batch,
    registry: &mut DimensionRegistry,
    loader: &mut BulkLoader<'_, S>,
    tracker: &mut ProgressTracker,
    stats: &mut RunStats,
) -> Result<(), ConvertError> {
    // Extend rather than assign: a previously failed batch may have left
    // dimension rows riding along in the pending batch
    let new_rows = registry.drain_new_rows();
    pending.dimensions.scenarios.extend(new_rows.scenarios);
    pending.dimensions.periods.extend(new_rows.periods);
    pending.dimensions.geographies.extend(new_rows.geographies);
    pending.dimensions.landuses.extend(new_rows.landuses);
    if pending.is_empty() {
        return Ok(());
    }
    if loader.commit_batch(pending) {
        stats.batches_committed += 1;
        stats.facts_loaded += pending.facts.len() as u64;
        tracker.record_batch(
            &pending.last_geography,
            stats.geographies_processed,
            stats.facts_loaded,
            stats.records_skipped,
        )?;
        *pending = Batch::default();
    } else {
        stats.batches_failed += 1;
        // Dimension rows ride along to the next batch; the cursor does
        // not advance past work that never landed
        let dimensions = std::mem::take(&mut pending.dimensions);
        *pending = Batch {
            dimensions,
            ..Default::default()
        };
    }
    Ok(())
}

fn snapshot(tracker: &ProgressTracker, stats: &RunStats, started: Instant) -> ProgressSnapshot {
    ProgressSnapshot {
        run_id: tracker.run_id(),
        state: tracker.state(),
        geographies_processed: stats.geographies_processed,
        facts_loaded: stats.facts_loaded,
        batches_committed: stats.batches_committed,
        elapsed_secs: started.elapsed().as_secs_f64(),
    }
}

fn checkpoint_display(config: &ConvertConfig) -> String {
    config
        .checkpoint_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "<none>".to_string())
}
