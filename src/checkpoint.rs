//! Durable checkpointing and progress reporting.
//!
//! The checkpoint is a small JSON document rewritten atomically (temp file
//! plus rename) after every committed batch. It records the last fully
//! committed geography as the resume cursor, so an interrupted multi-hour
//! conversion restarts after the committed prefix instead of from scratch.
//!
//! Progress snapshots are the liveness signal for an external supervisor;
//! this module only produces the snapshot data, the observer consuming it
//! is out of scope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::ConvertError;

/// Conversion lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionState {
    NotStarted,
    InProgress,
    Checkpointed,
    Completed,
    Failed,
}

/// Cumulative counters carried in the checkpoint file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointCounters {
    pub geographies: u64,
    pub facts_loaded: u64,
    pub batches: u64,
    pub records_skipped: u64,
}

/// The durable checkpoint document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: Uuid,
    pub input: Vec<String>,
    pub state: ConversionState,
    /// Last geography code whose rows are fully committed
    pub cursor: Option<String>,
    pub counters: CheckpointCounters,
    pub updated_at: DateTime<Utc>,
}

/// Tracks conversion progress and persists the checkpoint document.
///
/// With no checkpoint path the tracker still runs the state machine in
/// memory (used by dry runs), it just persists nothing.
pub struct ProgressTracker {
    path: Option<PathBuf>,
    checkpoint: Checkpoint,
    /// Counters carried over from the run being resumed; the checkpoint
    /// stays cumulative across interruptions.
    base: CheckpointCounters,
}

impl ProgressTracker {
    /// Start tracking a fresh run.
    pub fn start(path: Option<PathBuf>, input: &[PathBuf]) -> Self {
        Self {
            path,
            checkpoint: Checkpoint {
                run_id: Uuid::new_v4(),
                input: input_strings(input),
                state: ConversionState::NotStarted,
                cursor: None,
                counters: CheckpointCounters::default(),
                updated_at: Utc::now(),
            },
            base: CheckpointCounters::default(),
        }
    }

    /// Resume from an existing checkpoint file. The checkpoint must refer
    /// to the same input; resuming against different input would silently
    /// skip the wrong prefix.
    pub fn resume(path: PathBuf, input: &[PathBuf]) -> Result<Self, ConvertError> {
        let contents = fs::read_to_string(&path).map_err(|e| ConvertError::Checkpoint {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let checkpoint: Checkpoint =
            serde_json::from_str(&contents).map_err(|e| ConvertError::Checkpoint {
                path: path.display().to_string(),
                reason: format!("unreadable checkpoint: {}", e),
            })?;
        if checkpoint.input != input_strings(input) {
            return Err(ConvertError::Checkpoint {
                path: path.display().to_string(),
                reason: format!(
                    "checkpoint was written for input {:?}, not {:?}",
                    checkpoint.input,
                    input_strings(input)
                ),
            });
        }
        let base = checkpoint.counters.clone();
        Ok(Self {
            path: Some(path),
            checkpoint,
            base,
        })
    }

    /// Mark the run in progress and persist the initial state.
    pub fn begin(&mut self) -> Result<(), ConvertError> {
        self.checkpoint.state = ConversionState::InProgress;
        self.persist()
    }

    /// Record a committed batch: advance the cursor and counters, persist.
    ///
    /// The count arguments are this run's totals; a resumed run adds them
    /// on top of the interrupted run's counters.
    pub fn record_batch(
        &mut self,
        cursor: &str,
        geographies: u64,
        facts_loaded: u64,
        records_skipped: u64,
    ) -> Result<(), ConvertError> {
        self.checkpoint.state = ConversionState::Checkpointed;
        self.checkpoint.cursor = Some(cursor.to_string());
        self.checkpoint.counters.geographies = self.base.geographies + geographies;
        self.checkpoint.counters.facts_loaded = self.base.facts_loaded + facts_loaded;
        self.checkpoint.counters.records_skipped = self.base.records_skipped + records_skipped;
        self.checkpoint.counters.batches += 1;
        self.persist()
    }

    pub fn complete(&mut self) -> Result<(), ConvertError> {
        self.checkpoint.state = ConversionState::Completed;
        self.persist()
    }

    pub fn fail(&mut self) -> Result<(), ConvertError> {
        self.checkpoint.state = ConversionState::Failed;
        self.persist()
    }

    pub fn state(&self) -> ConversionState {
        self.checkpoint.state
    }

    pub fn cursor(&self) -> Option<&str> {
        self.checkpoint.cursor.as_deref()
    }

    pub fn run_id(&self) -> Uuid {
        self.checkpoint.run_id
    }

    pub fn counters(&self) -> &CheckpointCounters {
        &self.checkpoint.counters
    }

    fn persist(&mut self) -> Result<(), ConvertError> {
        self.checkpoint.updated_at = Utc::now();
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(&self.checkpoint).map_err(|e| {
            ConvertError::Checkpoint {
                path: path.display().to_string(),
                reason: e.to_string(),
            }
        })?;
        let tmp = path.with_extension("tmp");
        write_atomic(path, &tmp, &json).map_err(|e| ConvertError::Checkpoint {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

fn write_atomic(path: &Path, tmp: &Path, contents: &str) -> std::io::Result<()> {
    fs::write(tmp, contents)?;
    fs::rename(tmp, path)
}

fn input_strings(input: &[PathBuf]) -> Vec<String> {
    input.iter().map(|p| p.display().to_string()).collect()
}

/// One periodic progress observation.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub run_id: Uuid,
    pub state: ConversionState,
    pub geographies_processed: u64,
    pub facts_loaded: u64,
    pub batches_committed: u64,
    pub elapsed_secs: f64,
}

/// Observer for progress snapshots.
pub trait ProgressSink {
    fn on_snapshot(&self, snapshot: &ProgressSnapshot);
}

/// Default sink: structured log lines.
pub struct LogProgressSink;

impl ProgressSink for LogProgressSink {
    fn on_snapshot(&self, snapshot: &ProgressSnapshot) {
        tracing::info!(
            geographies = snapshot.geographies_processed,
            facts = snapshot.facts_loaded,
            batches = snapshot.batches_committed,
            elapsed_secs = format_args!("{:.1}", snapshot.elapsed_secs),
            "conversion progress"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn inputs() -> Vec<PathBuf> {
        vec![PathBuf::from("counties.jsonl")]
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.checkpoint.json");

        let mut tracker = ProgressTracker::start(Some(path.clone()), &inputs());
        tracker.begin().unwrap();
        tracker.record_batch("06037", 10, 250, 1).unwrap();

        let resumed = ProgressTracker::resume(path, &inputs()).unwrap();
        assert_eq!(resumed.state(), ConversionState::Checkpointed);
        assert_eq!(resumed.cursor(), Some("06037"));
        assert_eq!(resumed.counters().facts_loaded, 250);
        assert_eq!(resumed.counters().batches, 1);
        assert_eq!(resumed.run_id(), tracker.run_id());
    }

    #[test]
    fn test_rewrite_is_atomic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.checkpoint.json");

        let mut tracker = ProgressTracker::start(Some(path.clone()), &inputs());
        tracker.begin().unwrap();
        tracker.record_batch("06037", 1, 3, 0).unwrap();
        tracker.record_batch("06059", 2, 6, 0).unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_resumed_counters_stay_cumulative() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.checkpoint.json");

        let mut tracker = ProgressTracker::start(Some(path.clone()), &inputs());
        tracker.begin().unwrap();
        tracker.record_batch("06037", 10, 250, 1).unwrap();

        // The resumed run reports its own totals; the checkpoint keeps
        // counting from where the interrupted run stopped
        let mut resumed = ProgressTracker::resume(path.clone(), &inputs()).unwrap();
        resumed.record_batch("06059", 5, 100, 0).unwrap();

        let reloaded = ProgressTracker::resume(path, &inputs()).unwrap();
        assert_eq!(reloaded.counters().geographies, 15);
        assert_eq!(reloaded.counters().facts_loaded, 350);
        assert_eq!(reloaded.counters().records_skipped, 1);
        assert_eq!(reloaded.counters().batches, 2);
    }

    #[test]
    fn test_resume_rejects_different_input() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.checkpoint.json");

        let mut tracker = ProgressTracker::start(Some(path.clone()), &inputs());
        tracker.begin().unwrap();

        let other = vec![PathBuf::from("other.jsonl")];
        let result = ProgressTracker::resume(path, &other);
        assert!(matches!(result, Err(ConvertError::Checkpoint { .. })));
    }

    #[test]
    fn test_resume_missing_file_fails() {
        let result = ProgressTracker::resume(PathBuf::from("/nonexistent/cp.json"), &inputs());
        assert!(matches!(result, Err(ConvertError::Checkpoint { .. })));
    }

    #[test]
    fn test_state_machine_transitions() {
        let mut tracker = ProgressTracker::start(None, &inputs());
        assert_eq!(tracker.state(), ConversionState::NotStarted);
        tracker.begin().unwrap();
        assert_eq!(tracker.state(), ConversionState::InProgress);
        tracker.record_batch("06037", 1, 1, 0).unwrap();
        assert_eq!(tracker.state(), ConversionState::Checkpointed);
        tracker.complete().unwrap();
        assert_eq!(tracker.state(), ConversionState::Completed);
    }
}
