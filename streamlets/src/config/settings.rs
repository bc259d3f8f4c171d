//! Streamlet runtime settings.

use crate::commit::RetryConfig;
use crate::errors::{Result, StreamletError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Environment variable overriding [`StreamletSettings::reset_position`].
pub const ENV_RESET_POSITION: &str = "STREAMLETS_RESET_POSITION";
/// Environment variable overriding [`CommitterSettings::max_batch_size`].
pub const ENV_MAX_BATCH_SIZE: &str = "STREAMLETS_MAX_BATCH_SIZE";
/// Environment variable overriding [`CommitterSettings::max_batch_interval_ms`].
pub const ENV_MAX_BATCH_INTERVAL_MS: &str = "STREAMLETS_MAX_BATCH_INTERVAL_MS";

/// Where a source starts reading when it has no committed offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetPosition {
    /// From the first retained position of each partition.
    Earliest,
    /// From the end of each partition; only records appended later are seen.
    #[default]
    Latest,
}

impl fmt::Display for ResetPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Earliest => write!(f, "earliest"),
            Self::Latest => write!(f, "latest"),
        }
    }
}

impl FromStr for ResetPosition {
    type Err = StreamletError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "earliest" => Ok(Self::Earliest),
            "latest" => Ok(Self::Latest),
            other => Err(StreamletError::Config(format!("unknown reset position '{other}'"))),
        }
    }
}

/// Which aggregate rows are emitted per micro-batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Only rows that did not exist before the batch.
    #[default]
    Append,
    /// Rows changed by the batch.
    Update,
    /// Every row of the aggregate state.
    Complete,
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Append => write!(f, "append"),
            Self::Update => write!(f, "update"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// Batching policy of a committer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitterSettings {
    /// Flush once this many log positions are acknowledged.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Flush once the oldest pending record is this old, in milliseconds.
    #[serde(default = "default_max_batch_interval_ms")]
    pub max_batch_interval_ms: u64,
    /// Retry policy for failed commit calls.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_max_batch_size() -> usize {
    500
}

fn default_max_batch_interval_ms() -> u64 {
    1000
}

impl Default for CommitterSettings {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            max_batch_interval_ms: default_max_batch_interval_ms(),
            retry: RetryConfig::default(),
        }
    }
}

impl CommitterSettings {
    /// Creates committer settings with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the batch size trigger.
    #[must_use]
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Sets the batch interval trigger.
    #[must_use]
    pub fn with_max_batch_interval(mut self, interval: Duration) -> Self {
        self.max_batch_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Gets the batch interval as a Duration.
    #[must_use]
    pub fn max_batch_interval(&self) -> Duration {
        Duration::from_millis(self.max_batch_interval_ms)
    }
}

/// Settings applied to one streamlet instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamletSettings {
    /// Start position for sources without a committed offset.
    #[serde(default)]
    pub reset_position: ResetPosition,
    /// Committer batching policy.
    #[serde(default)]
    pub commit: CommitterSettings,
    /// Emission policy for aggregations.
    #[serde(default)]
    pub output_mode: OutputMode,
    /// Maximum records a source reads from the log per poll.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Grace period for draining on stop, in milliseconds.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

fn default_buffer_size() -> usize {
    256
}

fn default_drain_timeout_ms() -> u64 {
    5000
}

impl Default for StreamletSettings {
    fn default() -> Self {
        Self {
            reset_position: ResetPosition::default(),
            commit: CommitterSettings::default(),
            output_mode: OutputMode::default(),
            buffer_size: default_buffer_size(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

impl StreamletSettings {
    /// Creates settings with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses settings from a JSON document and validates them.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed JSON or invalid values.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reads settings from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Applies `STREAMLETS_*` overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if an override cannot be parsed.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if an override cannot be parsed.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_RESET_POSITION) {
            self.reset_position = raw.parse()?;
        }
        if let Some(raw) = lookup(ENV_MAX_BATCH_SIZE) {
            self.commit.max_batch_size = raw
                .trim()
                .parse()
                .map_err(|e| StreamletError::Config(format!("{ENV_MAX_BATCH_SIZE}: {e}")))?;
        }
        if let Some(raw) = lookup(ENV_MAX_BATCH_INTERVAL_MS) {
            self.commit.max_batch_interval_ms = raw
                .trim()
                .parse()
                .map_err(|e| StreamletError::Config(format!("{ENV_MAX_BATCH_INTERVAL_MS}: {e}")))?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`StreamletError::Config`] for zero-sized batches or buffers.
    pub fn validate(&self) -> Result<()> {
        if self.commit.max_batch_size == 0 {
            return Err(StreamletError::Config("commit.max_batch_size must be at least 1".into()));
        }
        if self.buffer_size == 0 {
            return Err(StreamletError::Config("buffer_size must be at least 1".into()));
        }
        Ok(())
    }

    /// Sets the reset position.
    #[must_use]
    pub fn with_reset_position(mut self, reset: ResetPosition) -> Self {
        self.reset_position = reset;
        self
    }

    /// Sets the committer settings.
    #[must_use]
    pub fn with_commit(mut self, commit: CommitterSettings) -> Self {
        self.commit = commit;
        self
    }

    /// Sets the aggregation output mode.
    #[must_use]
    pub fn with_output_mode(mut self, mode: OutputMode) -> Self {
        self.output_mode = mode;
        self
    }

    /// Sets the source read-ahead.
    #[must_use]
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Sets the drain grace period.
    #[must_use]
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Gets the drain grace period as a Duration.
    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = StreamletSettings::default();
        assert_eq!(settings.reset_position, ResetPosition::Latest);
        assert_eq!(settings.output_mode, OutputMode::Append);
        assert_eq!(settings.commit.max_batch_size, 500);
        assert_eq!(settings.commit.max_batch_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_from_json_partial() {
        let settings = StreamletSettings::from_json_str(
            r#"{"reset_position": "earliest", "commit": {"max_batch_size": 3}}"#,
        )
        .unwrap();
        assert_eq!(settings.reset_position, ResetPosition::Earliest);
        assert_eq!(settings.commit.max_batch_size, 3);
        assert_eq!(settings.commit.max_batch_interval_ms, 1000);
        assert_eq!(settings.buffer_size, 256);
    }

    #[test]
    fn test_zero_batch_rejected() {
        let err = StreamletSettings::from_json_str(r#"{"commit": {"max_batch_size": 0}}"#).unwrap_err();
        assert!(matches!(err, StreamletError::Config(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"output_mode": "update", "drain_timeout_ms": 250}}"#).unwrap();

        let settings = StreamletSettings::from_file(file.path()).unwrap();
        assert_eq!(settings.output_mode, OutputMode::Update);
        assert_eq!(settings.drain_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_RESET_POSITION, "Earliest"),
            (ENV_MAX_BATCH_SIZE, "7"),
            (ENV_MAX_BATCH_INTERVAL_MS, "20"),
        ]
        .into_iter()
        .collect();

        let settings = StreamletSettings::default()
            .with_overrides(|k| env.get(k).map(|v| (*v).to_string()))
            .unwrap();
        assert_eq!(settings.reset_position, ResetPosition::Earliest);
        assert_eq!(settings.commit.max_batch_size, 7);
        assert_eq!(settings.commit.max_batch_interval_ms, 20);
    }

    #[test]
    fn test_bad_override() {
        let result = StreamletSettings::default()
            .with_overrides(|k| (k == ENV_MAX_BATCH_SIZE).then(|| "many".to_string()));
        assert!(result.is_err());
    }
}
