// Copyright 2024-2026 Presage Contributors
// SPDX-License-Identifier: Apache-2.0

//! Core configuration: defaults, TOML files and environment overrides.
//!
//! Every value has a documented default. Files are parsed as TOML with
//! durations in milliseconds; `PRESAGE_*` environment variables override file
//! values. Invalid environment values fall back to the current value without
//! crashing, and numeric values are clamped to sane floors.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `PRESAGE_POOL_SIZE` | 0 | Scheduler workers (0 = one per CPU) |
//! | `PRESAGE_MAX_PENDING` | 256 | Queued tasks before `QueueFull` |
//! | `PRESAGE_TASK_TIMEOUT_MS` | 30000 | Default per-task timeout |
//! | `PRESAGE_TASK_RETRIES` | 0 | Default per-task retry budget |
//! | `PRESAGE_CACHE_ENABLED` | true | Response cache on/off |
//! | `PRESAGE_DEDUP_ENABLED` | true | In-flight deduplication on/off |
//! | `PRESAGE_CACHE_TTL_MS` | 300000 | Cached response lifetime |
//! | `PRESAGE_MAX_CACHE_ENTRIES` | 1000 | Cache capacity |
//! | `PRESAGE_BATCH_WINDOW_MS` | 50 | Batch window from first member |
//! | `PRESAGE_MAX_BATCH_SIZE` | 10 | Members per batch |
//! | `PRESAGE_BATCHABLE_ENDPOINTS` | (none) | Comma-separated endpoint list |
//! | `PRESAGE_SWEEP_INTERVAL_MS` | 60000 | Background cache sweep period |
//! | `PRESAGE_HISTORY_CAPACITY` | 1000 | Access events kept |
//! | `PRESAGE_COOCCURRENCE_WINDOW` | 5 | Recent accesses linked as co-occurring |
//! | `PRESAGE_MIN_CONFIDENCE` | 0.3 | Prediction confidence floor |
//! | `PRESAGE_MAX_PREDICTIONS` | 5 | Predictions returned per call |
//! | `PRESAGE_MAX_CONCURRENT_PREFETCH` | 2 | In-flight prefetches |
//! | `PRESAGE_PREFETCHED_TTL_MS` | 300000 | Window in which a prefetch can be hit |
//! | `PRESAGE_MAX_RETRIES` | 3 | Remote-effect retries per mutation |
//! | `PRESAGE_RETRY_DELAY_MS` | 1000 | Base backoff (multiplied by attempt) |
//! | `PRESAGE_UNDO_CAPACITY` | 50 | Undo/redo stack depth |
//! | `PRESAGE_OFFLINE_QUEUE` | true | Queue mutations while offline |
//! | `PRESAGE_TERMINAL_GRACE_MS` | 30000 | Settled records kept for correlation |
//! | `PRESAGE_SHUTDOWN_TIMEOUT_MS` | 30000 | Graceful shutdown budget |
//! | `PRESAGE_LOG_LEVEL` | presage_core=info | Log filter directive |
//! | `PRESAGE_LOG_FORMAT` | json | `json` or `pretty` |

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coordinator::CoordinatorConfig;
use crate::mutation::MutationConfig;
use crate::prefetch::PrefetchConfig;
use crate::scheduler::SchedulerConfig;
use crate::telemetry::{LogConfig, LogFormat};

/// Serde adapter storing a `Duration` as integer milliseconds.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
}

/// Configuration for every component of the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Budget for draining in-flight work on shutdown.
    #[serde(with = "duration_ms")]
    pub shutdown_timeout: Duration,
    pub scheduler: SchedulerConfig,
    pub coordinator: CoordinatorConfig,
    pub prefetch: PrefetchConfig,
    pub mutation: MutationConfig,
    pub logging: LogConfig,
}

impl CoreConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Parse a TOML document. Missing tables and keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(text)?;
        config.clamp();
        Ok(config)
    }

    /// Load a TOML file, then apply environment overrides.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.display().to_string(), source })?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env();
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Override fields from `PRESAGE_*` variables that are set and valid.
    pub fn apply_env(&mut self) {
        let s = &mut self.scheduler;
        s.pool_size = parse_usize("PRESAGE_POOL_SIZE", s.pool_size);
        s.max_pending = parse_usize("PRESAGE_MAX_PENDING", s.max_pending);
        s.default_timeout = parse_ms("PRESAGE_TASK_TIMEOUT_MS", s.default_timeout);
        s.default_retries = parse_u32("PRESAGE_TASK_RETRIES", s.default_retries);

        let c = &mut self.coordinator;
        c.cache_enabled = parse_bool("PRESAGE_CACHE_ENABLED", c.cache_enabled);
        c.dedup_enabled = parse_bool("PRESAGE_DEDUP_ENABLED", c.dedup_enabled);
        c.cache_ttl = parse_ms("PRESAGE_CACHE_TTL_MS", c.cache_ttl);
        c.max_cache_entries = parse_usize("PRESAGE_MAX_CACHE_ENTRIES", c.max_cache_entries);
        c.batch_window = parse_ms("PRESAGE_BATCH_WINDOW_MS", c.batch_window);
        c.max_batch_size = parse_usize("PRESAGE_MAX_BATCH_SIZE", c.max_batch_size);
        if let Ok(list) = std::env::var("PRESAGE_BATCHABLE_ENDPOINTS") {
            c.batchable_endpoints = list
                .split(',')
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(String::from)
                .collect();
        }
        c.sweep_interval = parse_ms("PRESAGE_SWEEP_INTERVAL_MS", c.sweep_interval);

        let p = &mut self.prefetch;
        p.history_capacity = parse_usize("PRESAGE_HISTORY_CAPACITY", p.history_capacity);
        p.cooccurrence_window = parse_usize("PRESAGE_COOCCURRENCE_WINDOW", p.cooccurrence_window);
        p.min_confidence = parse_f64("PRESAGE_MIN_CONFIDENCE", p.min_confidence);
        p.max_predictions = parse_usize("PRESAGE_MAX_PREDICTIONS", p.max_predictions);
        p.max_concurrent = parse_usize("PRESAGE_MAX_CONCURRENT_PREFETCH", p.max_concurrent);
        p.prefetched_ttl = parse_ms("PRESAGE_PREFETCHED_TTL_MS", p.prefetched_ttl);

        let m = &mut self.mutation;
        m.max_retries = parse_u32("PRESAGE_MAX_RETRIES", m.max_retries);
        m.retry_delay = parse_ms("PRESAGE_RETRY_DELAY_MS", m.retry_delay);
        m.undo_capacity = parse_usize("PRESAGE_UNDO_CAPACITY", m.undo_capacity);
        m.offline_queue_enabled = parse_bool("PRESAGE_OFFLINE_QUEUE", m.offline_queue_enabled);
        m.terminal_grace = parse_ms("PRESAGE_TERMINAL_GRACE_MS", m.terminal_grace);

        self.shutdown_timeout = parse_ms("PRESAGE_SHUTDOWN_TIMEOUT_MS", self.shutdown_timeout);
        if let Ok(level) = std::env::var("PRESAGE_LOG_LEVEL") {
            if !level.trim().is_empty() {
                self.logging.level = level;
            }
        }
        if let Ok(format) = std::env::var("PRESAGE_LOG_FORMAT") {
            match format.to_ascii_lowercase().as_str() {
                "json" => self.logging.format = LogFormat::Json,
                "pretty" => self.logging.format = LogFormat::Pretty,
                _ => {}
            }
        }

        self.clamp();
    }

    /// Pull out-of-range values back to their floors.
    fn clamp(&mut self) {
        self.scheduler.max_pending = self.scheduler.max_pending.max(1);
        self.scheduler.default_timeout = self.scheduler.default_timeout.max(Duration::from_millis(1));
        self.coordinator.max_cache_entries = self.coordinator.max_cache_entries.max(1);
        self.coordinator.max_batch_size = self.coordinator.max_batch_size.max(1);
        self.coordinator.sweep_interval = self.coordinator.sweep_interval.max(Duration::from_millis(10));
        self.prefetch.history_capacity = self.prefetch.history_capacity.max(1);
        self.prefetch.cooccurrence_window = self.prefetch.cooccurrence_window.max(1);
        self.prefetch.min_confidence = self.prefetch.min_confidence.clamp(0.0, 1.0);
        self.prefetch.max_concurrent = self.prefetch.max_concurrent.max(1);
        self.mutation.undo_capacity = self.mutation.undo_capacity.max(1);
        self.shutdown_timeout = self.shutdown_timeout.max(Duration::from_millis(1));
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(30),
            scheduler: SchedulerConfig::default(),
            coordinator: CoordinatorConfig::default(),
            prefetch: PrefetchConfig::default(),
            mutation: MutationConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u32` env var, returning `default` on missing or invalid.
fn parse_u32(key: &str, default: u32) -> u32 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u32>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a finite `f64` env var, returning `default` on missing or invalid.
fn parse_f64(key: &str, default: f64) -> f64 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<f64>().ok().filter(|v| v.is_finite()).unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a millisecond env var into a `Duration`.
fn parse_ms(key: &str, default: Duration) -> Duration {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u64>().map(Duration::from_millis).unwrap_or(default),
        Err(_) => default,
    }
}

/// Accepts `true/false`, `1/0`, `yes/no`, `on/off`.
fn parse_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}
