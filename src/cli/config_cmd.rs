// Copyright 2024-2026 Presage Contributors
// SPDX-License-Identifier: Apache-2.0

//! Config CLI subcommands: show, defaults, validate.

use std::time::Duration;

use crate::config::{ConfigError, CoreConfig};

/// Environment variable naming a TOML config file.
pub const CONFIG_PATH_ENV: &str = "PRESAGE_CONFIG";

/// Load from `path`, else from `PRESAGE_CONFIG`, else defaults. Environment
/// overrides apply in every case.
pub fn load(path: Option<&str>) -> Result<CoreConfig, ConfigError> {
    let from_env = std::env::var(CONFIG_PATH_ENV).ok();
    match path.or(from_env.as_deref()) {
        Some(p) => CoreConfig::load_file(p),
        None => Ok(CoreConfig::from_env()),
    }
}

/// Print the effective config as TOML.
pub fn run_show(path: Option<&str>) -> i32 {
    match load(path).and_then(|cfg| cfg.to_toml_string()) {
        Ok(text) => {
            print!("{text}");
            0
        }
        Err(e) => {
            eprintln!("Config error: {e}");
            2
        }
    }
}

/// Print the built-in defaults, ignoring files and environment.
pub fn run_defaults() -> i32 {
    match CoreConfig::default().to_toml_string() {
        Ok(text) => {
            print!("{text}");
            0
        }
        Err(e) => {
            eprintln!("Config error: {e}");
            2
        }
    }
}

/// Exit 0 when the effective config loads without warnings.
pub fn run_validate(path: Option<&str>) -> i32 {
    let cfg = match load(path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Config error: {e}");
            return 2;
        }
    };
    let warnings = validate(&cfg);
    for w in &warnings {
        eprintln!("WARNING: {w}");
    }
    if warnings.is_empty() {
        println!("Configuration is valid.");
        0
    } else {
        1
    }
}

/// Combinations that load fine but behave badly.
pub fn validate(cfg: &CoreConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    let c = &cfg.coordinator;

    if c.batch_window >= cfg.scheduler.default_timeout {
        warnings.push(format!(
            "batch window ({:?}) is not shorter than the task timeout ({:?})",
            c.batch_window, cfg.scheduler.default_timeout
        ));
    }
    if !c.batchable_endpoints.is_empty() && c.max_batch_size < 2 {
        warnings.push("batchable endpoints declared but max batch size is below 2".to_string());
    }
    if !(0.0..=1.0).contains(&cfg.prefetch.min_confidence) {
        warnings.push(format!(
            "prefetch min confidence {} is outside [0, 1]",
            cfg.prefetch.min_confidence
        ));
    }
    if cfg.prefetch.max_concurrent > cfg.scheduler.effective_pool_size() {
        warnings.push(format!(
            "{} concurrent prefetches can occupy every one of {} workers",
            cfg.prefetch.max_concurrent,
            cfg.scheduler.effective_pool_size()
        ));
    }
    let worst_backoff = backoff_total(cfg.mutation.retry_delay, cfg.mutation.max_retries);
    if worst_backoff > cfg.shutdown_timeout {
        warnings.push(format!(
            "worst-case retry backoff ({worst_backoff:?}) exceeds the shutdown timeout ({:?})",
            cfg.shutdown_timeout
        ));
    }
    warnings
}

/// Sum of `delay * n` for `n` in `1..=retries`.
fn backoff_total(delay: Duration, retries: u32) -> Duration {
    (1..=retries).map(|n| delay * n).sum()
}
