use std::{fs, path::Path, time::Duration as StdDuration};

use anyhow::{bail, Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};

pub const DEBUG_ENV_VAR: &str = "SENSOR_LOGGER_DEBUG";

/// How recovery derives the sample cursor of the chunk being resumed.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryMode {
    /// Sum the committed Batches of the chunk; cached counters are repaired
    /// when they disagree.
    #[default]
    RecomputeFromBatches,
    /// Take the Session's cached `current_sample_index` as-is.
    TrustCache,
}

/// Tunables for chunking, flushing and recovery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggerConfig {
    /// Wall-clock length of a chunk before it is finalized.
    pub chunk_duration_ms: u64,

    /// Buffered sample count that forces a flush from the sampler tick.
    pub flush_every_samples: usize,

    /// Period of the flush timer.
    pub flush_interval_ms: u64,

    /// Hard cap on buffered samples; past it the sampler backs off.
    pub max_buffered_samples: usize,

    /// Target rates a session may be started with.
    pub allowed_rates_hz: Vec<u32>,

    /// Window of the rolling achieved-rate estimate.
    pub achieved_rate_window_ms: u64,

    pub recovery_mode: RecoveryMode,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            chunk_duration_ms: 30 * 60 * 1000,
            flush_every_samples: 500,
            flush_interval_ms: 3_000,
            max_buffered_samples: 20_000,
            allowed_rates_hz: vec![5, 50, 100],
            achieved_rate_window_ms: 2_000,
            recovery_mode: RecoveryMode::RecomputeFromBatches,
        }
    }
}

impl LoggerConfig {
    /// Read a JSON config file. A missing file gives defaults; an unreadable
    /// body is logged and also gives defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            match serde_json::from_str(&contents) {
                Ok(config) => config,
                Err(err) => {
                    warn!(
                        "Ignoring malformed config {} ({err}); using defaults",
                        path.display()
                    );
                    Self::default()
                }
            }
        } else {
            Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    /// `SENSOR_LOGGER_DEBUG=1` shortens chunks to a minute and flushes every
    /// second, which makes rollover observable by hand.
    pub fn apply_env_overrides(mut self) -> Self {
        let debug_mode = std::env::var(DEBUG_ENV_VAR)
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        if debug_mode {
            info!("{DEBUG_ENV_VAR} set; using 60s chunks and 1s flush interval");
            self.chunk_duration_ms = 60_000;
            self.flush_interval_ms = 1_000;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_duration_ms == 0 {
            bail!("chunk_duration_ms must be greater than zero");
        }
        if self.flush_interval_ms == 0 {
            bail!("flush_interval_ms must be greater than zero");
        }
        if self.flush_every_samples == 0 {
            bail!("flush_every_samples must be greater than zero");
        }
        if self.max_buffered_samples < self.flush_every_samples {
            bail!(
                "max_buffered_samples ({}) must be at least flush_every_samples ({})",
                self.max_buffered_samples,
                self.flush_every_samples
            );
        }
        if self.allowed_rates_hz.is_empty() || self.allowed_rates_hz.contains(&0) {
            bail!("allowed_rates_hz must list positive rates");
        }
        Ok(())
    }

    pub fn ensure_rate_allowed(&self, target_rate_hz: u32) -> Result<()> {
        if !self.allowed_rates_hz.contains(&target_rate_hz) {
            bail!(
                "unsupported target rate {target_rate_hz} Hz (allowed: {:?})",
                self.allowed_rates_hz
            );
        }
        Ok(())
    }

    pub fn chunk_duration(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(i64::try_from(self.chunk_duration_ms).unwrap_or(i64::MAX))
    }

    pub fn flush_interval(&self) -> StdDuration {
        StdDuration::from_millis(self.flush_interval_ms)
    }

    pub fn achieved_rate_window(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(
            i64::try_from(self.achieved_rate_window_ms).unwrap_or(i64::MAX),
        )
    }

    /// Sampler period for a target rate, never below one millisecond.
    pub fn sample_interval(target_rate_hz: u32) -> StdDuration {
        let rate = f64::from(target_rate_hz.max(1));
        let millis = (1000.0 / rate).round().max(1.0);
        StdDuration::from_millis(millis as u64)
    }
}
