//! Checkpoint durability and progress-reporting tests, driven through the
//! full pipeline against the in-memory sink.
//!
//! These pin down the resumability contract: the cursor always names a
//! fully committed geography, the checkpoint document survives round
//! trips, counters stay cumulative across interruptions, and snapshots
//! arrive at the configured cadence.

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::{tempdir, NamedTempFile};

use landflow::checkpoint::Checkpoint;
use landflow::{
    run_conversion, ConversionState, ConvertConfig, MemorySink, ProgressSink, ProgressSnapshot,
};

fn shard(lines: &[String]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
    file.flush().unwrap();
    file
}

/// One county with two transition cells, so every geography contributes
/// exactly two fact rows.
fn county(code: &str) -> String {
    format!(
        r#"{{"geography": "{}", "scenarios": {{"LM": {{"periods": {{"2020-2030": {{"transitions": {{"forest": {{"forest": 800, "urban": 200, "total": 1000}}}}}}}}}}}}}}"#,
        code
    )
}

fn counties(n: usize) -> Vec<String> {
    (0..n).map(|i| county(&format!("{:05}", i))).collect()
}

fn config_for(input: Vec<PathBuf>) -> ConvertConfig {
    ConvertConfig {
        input,
        retry_base_delay_ms: 0,
        ..Default::default()
    }
}

fn read_checkpoint(path: &PathBuf) -> Checkpoint {
    let contents = std::fs::read_to_string(path).unwrap();
    serde_json::from_str(&contents).unwrap()
}

struct NullProgress;
impl ProgressSink for NullProgress {
    fn on_snapshot(&self, _snapshot: &ProgressSnapshot) {}
}

/// Records every snapshot it observes.
struct Recorder {
    snapshots: Mutex<Vec<ProgressSnapshot>>,
}
impl Recorder {
    fn new() -> Self {
        Self {
            snapshots: Mutex::new(Vec::new()),
        }
    }
}
impl ProgressSink for Recorder {
    fn on_snapshot(&self, snapshot: &ProgressSnapshot) {
        self.snapshots.lock().unwrap().push(snapshot.clone());
    }
}

/// Sets the stop flag once enough geographies have been processed.
struct StopAfter {
    stop: Arc<AtomicBool>,
    after: u64,
}
impl ProgressSink for StopAfter {
    fn on_snapshot(&self, snapshot: &ProgressSnapshot) {
        if snapshot.geographies_processed >= self.after {
            self.stop.store(true, Ordering::Relaxed);
        }
    }
}

fn not_stopped() -> AtomicBool {
    AtomicBool::new(false)
}

#[test]
fn test_completed_run_persists_final_checkpoint() {
    let file = shard(&counties(5));
    let dir = tempdir().unwrap();
    let path = dir.path().join("run.checkpoint.json");
    let config = ConvertConfig {
        batch_size: 4,
        checkpoint_path: Some(path.clone()),
        ..config_for(vec![file.path().to_path_buf()])
    };
    let mut sink = MemorySink::new();

    run_conversion(&config, &mut sink, &NullProgress, &not_stopped()).unwrap();

    // Two facts per geography against a batch size of four: flushes after
    // the second and fourth geography, then the final flush
    let checkpoint = read_checkpoint(&path);
    assert_eq!(checkpoint.state, ConversionState::Completed);
    assert_eq!(checkpoint.cursor.as_deref(), Some("00004"));
    assert_eq!(checkpoint.counters.geographies, 5);
    assert_eq!(checkpoint.counters.facts_loaded, 10);
    assert_eq!(checkpoint.counters.batches, 3);
}

#[test]
fn test_stop_leaves_cursor_on_committed_geography() {
    let file = shard(&counties(5));
    let dir = tempdir().unwrap();
    let path = dir.path().join("run.checkpoint.json");
    let stop = Arc::new(AtomicBool::new(false));
    let config = ConvertConfig {
        batch_size: 2,
        checkpoint_path: Some(path.clone()),
        progress_interval: 1,
        ..config_for(vec![file.path().to_path_buf()])
    };
    let mut sink = MemorySink::new();
    let watcher = StopAfter {
        stop: Arc::clone(&stop),
        after: 2,
    };

    let report = run_conversion(&config, &mut sink, &watcher, &stop).unwrap();

    assert_eq!(report.state, ConversionState::Checkpointed);
    assert!(!sink.finalized);

    let checkpoint = read_checkpoint(&path);
    assert_eq!(checkpoint.state, ConversionState::Checkpointed);
    // Every fact of the cursor geography is in the store
    assert_eq!(checkpoint.cursor.as_deref(), Some("00001"));
    assert_eq!(checkpoint.counters.facts_loaded, 4);
    assert_eq!(sink.facts.len(), 4);
}

#[test]
fn test_resume_across_shards_matches_uninterrupted_run() {
    let first = shard(&counties(3));
    let second: Vec<String> = (3..5).map(|i| county(&format!("{:05}", i))).collect();
    let second = shard(&second);
    let input = vec![first.path().to_path_buf(), second.path().to_path_buf()];
    let dir = tempdir().unwrap();
    let path = dir.path().join("run.checkpoint.json");

    // Stop one geography into the second shard
    let stop = Arc::new(AtomicBool::new(false));
    let config = ConvertConfig {
        batch_size: 2,
        checkpoint_path: Some(path.clone()),
        progress_interval: 1,
        ..config_for(input.clone())
    };
    let mut sink = MemorySink::new();
    let watcher = StopAfter {
        stop: Arc::clone(&stop),
        after: 4,
    };
    run_conversion(&config, &mut sink, &watcher, &stop).unwrap();
    assert_eq!(read_checkpoint(&path).cursor.as_deref(), Some("00003"));

    let resume_config = ConvertConfig {
        resume: true,
        ..config
    };
    let report = run_conversion(&resume_config, &mut sink, &NullProgress, &not_stopped()).unwrap();
    assert_eq!(report.state, ConversionState::Completed);
    assert_eq!(report.stats.geographies_processed, 1);
    assert!(sink.finalized);

    // The checkpoint keeps counting across the interruption
    let checkpoint = read_checkpoint(&path);
    assert_eq!(checkpoint.counters.geographies, 5);
    assert_eq!(checkpoint.counters.facts_loaded, 10);

    let mut reference = MemorySink::new();
    run_conversion(&config_for(input), &mut reference, &NullProgress, &not_stopped()).unwrap();
    assert_eq!(sink.facts, reference.facts);
    assert_eq!(sink.dimensions.geographies, reference.dimensions.geographies);
}

#[test]
fn test_snapshots_arrive_at_configured_cadence() {
    let file = shard(&counties(5));
    let config = ConvertConfig {
        progress_interval: 2,
        ..config_for(vec![file.path().to_path_buf()])
    };
    let mut sink = MemorySink::new();
    let recorder = Recorder::new();

    run_conversion(&config, &mut sink, &recorder, &not_stopped()).unwrap();

    let snapshots = recorder.snapshots.lock().unwrap();
    // Every second geography, plus the terminal snapshot
    let processed: Vec<u64> = snapshots.iter().map(|s| s.geographies_processed).collect();
    assert_eq!(processed, vec![2, 4, 5]);

    let last = snapshots.last().unwrap();
    assert_eq!(last.state, ConversionState::Completed);
    assert_eq!(last.facts_loaded, 10);
    assert_eq!(snapshots[0].run_id, last.run_id);
}
