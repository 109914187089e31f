//! Conversion configuration: defaults, YAML loading, validation.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConvertError;
use crate::loader::{LoadMode, RetryPolicy};

/// Everything the conversion core is told by its caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertConfig {
    /// Input document, one file or an ordered list of shards
    pub input: Vec<PathBuf>,
    /// Target store URL; falls back to DATABASE_URL when unset
    pub database_url: Option<String>,
    /// Fact rows per batch
    pub batch_size: usize,
    pub load_mode: LoadMode,
    /// Relative conservation mismatch that still passes
    pub tolerance: f64,
    /// Relative mismatch beyond which a group's rows are excluded
    pub hard_threshold: f64,
    /// Checkpoint file; None disables durable progress
    pub checkpoint_path: Option<PathBuf>,
    /// Resume after the checkpoint cursor instead of starting over
    pub resume: bool,
    /// Emit a progress snapshot every this many geographies
    pub progress_interval: u64,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_multiplier: f64,
    /// Bounded parser-to-assembler queue capacity, in records
    pub channel_capacity: usize,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            input: Vec::new(),
            database_url: None,
            batch_size: 50_000,
            load_mode: LoadMode::Bulk,
            tolerance: 0.01,
            hard_threshold: 0.05,
            checkpoint_path: None,
            resume: false,
            progress_interval: 500,
            retry_max_attempts: 5,
            retry_base_delay_ms: 500,
            retry_multiplier: 2.0,
            channel_capacity: 64,
        }
    }
}

impl ConvertConfig {
    /// Load configuration from a YAML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConvertError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            ConvertError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        serde_yaml::from_str(&contents).map_err(|e| {
            ConvertError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Check the configuration before any work starts.
    pub fn validate(&self) -> Result<(), ConvertError> {
        if self.input.is_empty() {
            return Err(ConvertError::Config("no input shards given".to_string()));
        }
        if self.batch_size == 0 {
            return Err(ConvertError::Config("batch_size must be positive".to_string()));
        }
        if !(0.0..1.0).contains(&self.tolerance) {
            return Err(ConvertError::Config(format!(
                "tolerance {} must be in [0, 1)",
                self.tolerance
            )));
        }
        if self.hard_threshold < self.tolerance {
            return Err(ConvertError::Config(format!(
                "hard_threshold {} must be at least tolerance {}",
                self.hard_threshold, self.tolerance
            )));
        }
        if self.retry_max_attempts == 0 {
            return Err(ConvertError::Config(
                "retry_max_attempts must be positive".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(ConvertError::Config(
                "channel_capacity must be positive".to_string(),
            ));
        }
        if self.resume && self.checkpoint_path.is_none() {
            return Err(ConvertError::Config(
                "resume requires a checkpoint_path".to_string(),
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            multiplier: self.retry_multiplier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn valid() -> ConvertConfig {
        ConvertConfig {
            input: vec![PathBuf::from("counties.jsonl")],
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_validate() {
        let config = valid();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch_size, 50_000);
        assert_eq!(config.load_mode, LoadMode::Bulk);
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let config = ConvertConfig {
            tolerance: 0.05,
            hard_threshold: 0.01,
            ..valid()
        };
        assert!(matches!(config.validate(), Err(ConvertError::Config(_))));
    }

    #[test]
    fn test_rejects_resume_without_checkpoint() {
        let config = ConvertConfig {
            resume: true,
            ..valid()
        };
        assert!(matches!(config.validate(), Err(ConvertError::Config(_))));
    }

    #[test]
    fn test_load_from_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "input:\n  - counties.jsonl\nbatch_size: 1000\nload_mode: row\ntolerance: 0.02\nhard_threshold: 0.1"
        )
        .unwrap();
        file.flush().unwrap();

        let config = ConvertConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.load_mode, LoadMode::Row);
        assert!((config.tolerance - 0.02).abs() < 1e-12);
        // Unspecified fields keep their defaults
        assert_eq!(config.channel_capacity, 64);
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = ConvertConfig {
            retry_max_attempts: 3,
            retry_base_delay_ms: 100,
            retry_multiplier: 3.0,
            ..valid()
        };
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_for(2), Duration::from_millis(300));
    }
}
