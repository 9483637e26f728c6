//! Engine configuration
//!
//! Configuration is plain serde data with defaults for every field, so a YAML
//! file only needs to name the values it overrides:
//!
//! ```rust
//! use paddock::EngineConfig;
//!
//! let config = EngineConfig::from_yaml_str("retry:\n  max_attempts: 32\n").unwrap();
//! assert_eq!(config.retry.max_attempts, 32);
//! assert_eq!(config.lobby.max_players, 8);
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::{ProgressionError, Result};

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Retry policy for optimistic write conflicts inside the engine.
    pub retry: RetryPolicy,
    /// Upper bound on any single store call, in milliseconds.
    pub store_timeout_ms: u64,
    pub lobby: LobbyLimits,
    pub pipeline: PipelineConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            store_timeout_ms: 2_000,
            lobby: LobbyLimits::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate configuration from YAML text.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML configuration file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading engine configuration");
        let yaml = std::fs::read_to_string(path).map_err(|source| ProgressionError::ConfigFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Reject values that would make the engine unusable.
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(ProgressionError::config("retry.max_attempts", "must be at least 1"));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(ProgressionError::config(
                "retry.initial_backoff_ms",
                "must not exceed retry.max_backoff_ms",
            ));
        }
        if self.store_timeout_ms == 0 {
            return Err(ProgressionError::config("store_timeout_ms", "must be positive"));
        }
        if self.lobby.min_players < 2 || self.lobby.min_players > self.lobby.max_players {
            return Err(ProgressionError::config(
                "lobby",
                format!(
                    "player bounds {}..={} must satisfy 2 <= min <= max",
                    self.lobby.min_players, self.lobby.max_players
                ),
            ));
        }
        if self.lobby.max_players > 8 {
            return Err(ProgressionError::config("lobby.max_players", "must be at most 8"));
        }
        if self.lobby.max_name_len == 0 {
            return Err(ProgressionError::config("lobby.max_name_len", "must be positive"));
        }
        if self.pipeline.queue_depth == 0 || self.pipeline.max_in_flight == 0 {
            return Err(ProgressionError::config(
                "pipeline",
                "queue_depth and max_in_flight must be positive",
            ));
        }
        if self.pipeline.max_attempts == 0 {
            return Err(ProgressionError::config("pipeline.max_attempts", "must be at least 1"));
        }
        Ok(())
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

/// Exponential backoff policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 16, initial_backoff_ms: 1, max_backoff_ms: 50 }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): initial, 2x, 4x, ... capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let millis = self.initial_backoff_ms.saturating_mul(1 << shift).min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }
}

/// Lobby validation limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LobbyLimits {
    pub min_players: u8,
    pub max_players: u8,
    pub max_name_len: usize,
}

impl Default for LobbyLimits {
    fn default() -> Self {
        Self { min_players: 2, max_players: 8, max_name_len: 48 }
    }
}

/// Background submission pipeline settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Race completions buffered before senders wait.
    pub queue_depth: usize,
    /// Submissions processed concurrently.
    pub max_in_flight: usize,
    /// Attempts per completion for retryable failures.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_depth: 256,
            max_in_flight: 32,
            max_attempts: 5,
            initial_backoff_ms: 50,
            max_backoff_ms: 1_600,
        }
    }
}

impl PipelineConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff_ms: self.initial_backoff_ms,
            max_backoff_ms: self.max_backoff_ms,
        }
    }
}
