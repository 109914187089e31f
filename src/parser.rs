//! Streaming parser for the nested input document.
//!
//! The input is JSON Lines: one geography record per line, one file or an
//! ordered set of shards. `GeographyStream` decodes records one line at a
//! time, so memory stays bounded no matter how many millions of lines the
//! document has.
//!
//! Failure policy: a top level that is not geography records at all is
//! fatal. A malformed record inside an otherwise valid document is skipped,
//! counted, and logged with shard and line context, and the stream
//! continues.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::ConvertError;
use crate::model::GeographyRecord;

/// Lazy, finite stream of geography records over one or more input shards.
pub struct GeographyStream {
    shards: Vec<PathBuf>,
    shard_idx: usize,
    reader: Option<BufReader<File>>,
    line_no: u64,
    resume_cursor: Option<String>,
    skipping: bool,
    skipped: u64,
    saw_payload: bool,
    done: bool,
}

impl GeographyStream {
    /// Open a stream over the given shards. The first shard is opened
    /// eagerly so an unreadable input fails before any work starts; later
    /// shards are opened as the stream reaches them.
    pub fn open(shards: &[PathBuf]) -> Result<Self, ConvertError> {
        if shards.is_empty() {
            return Err(ConvertError::Config("no input shards given".to_string()));
        }
        let first = File::open(&shards[0]).map_err(|e| ConvertError::FatalInput {
            path: shards[0].display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            shards: shards.to_vec(),
            shard_idx: 0,
            reader: Some(BufReader::new(first)),
            line_no: 0,
            resume_cursor: None,
            skipping: false,
            skipped: 0,
            saw_payload: false,
            done: false,
        })
    }

    /// Resume after a checkpoint: skip every record up to and including the
    /// geography code recorded as the cursor.
    pub fn with_resume_cursor(mut self, cursor: Option<String>) -> Self {
        self.skipping = cursor.is_some();
        self.resume_cursor = cursor;
        self
    }

    /// Number of malformed records skipped so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// True while a resume cursor was requested but not yet found in the
    /// input. If still true at end of stream, the checkpoint does not match
    /// this input.
    pub fn resume_pending(&self) -> bool {
        self.skipping
    }

    fn current_shard(&self) -> &Path {
        &self.shards[self.shard_idx.min(self.shards.len() - 1)]
    }

    fn record_skip(&mut self, reason: &str) {
        self.skipped += 1;
        tracing::warn!(
            shard = %self.current_shard().display(),
            line = self.line_no,
            "record skipped: {}",
            reason
        );
    }
}

impl Iterator for GeographyStream {
    type Item = Result<GeographyRecord, ConvertError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if self.reader.is_none() {
                if self.shard_idx >= self.shards.len() {
                    self.done = true;
                    return None;
                }
                match File::open(&self.shards[self.shard_idx]) {
                    Ok(file) => {
                        self.reader = Some(BufReader::new(file));
                        self.line_no = 0;
                    }
                    Err(e) => {
                        self.done = true;
                        return Some(Err(ConvertError::FatalInput {
                            path: self.shards[self.shard_idx].display().to_string(),
                            reason: e.to_string(),
                        }));
                    }
                }
            }
            let Some(reader) = self.reader.as_mut() else {
                continue;
            };

            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) => {
                    // End of this shard, move on to the next one
                    self.reader = None;
                    self.shard_idx += 1;
                    continue;
                }
                Ok(_) => self.line_no += 1,
                Err(e) => {
                    self.done = true;
                    return Some(Err(ConvertError::FatalInput {
                        path: self.current_shard().display().to_string(),
                        reason: format!("read failed at line {}: {}", self.line_no + 1, e),
                    }));
                }
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<GeographyRecord>(trimmed) {
                Ok(record) if !record.geography.trim().is_empty() => {
                    self.saw_payload = true;
                    if self.skipping {
                        if self.resume_cursor.as_deref() == Some(record.geography.as_str()) {
                            self.skipping = false;
                        }
                        continue;
                    }
                    return Some(Ok(record));
                }
                Ok(_) => {
                    self.saw_payload = true;
                    self.record_skip("record has no geography code");
                }
                Err(e) => {
                    if !self.saw_payload && self.shard_idx == 0 && !trimmed.starts_with('{') {
                        self.done = true;
                        return Some(Err(ConvertError::FatalInput {
                            path: self.current_shard().display().to_string(),
                            reason: format!("input is not a geography record document: {}", e),
                        }));
                    }
                    self.saw_payload = true;
                    self.record_skip(&format!("invalid record: {}", e));
                }
            }
        }
    }
}
