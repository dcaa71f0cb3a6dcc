//! Process configuration resolved from environment variables.
//!
//! A `.env` file in the working directory is loaded first (via `dotenvy`);
//! real environment variables win over it. Every value has a default, so
//! an empty environment yields a usable configuration.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use log::LevelFilter;
use runner_core::parse_log_level;
use runner_core::types::MAX_WORKERS_LIMIT;

use crate::pool::PoolOptions;

pub const DEFAULT_SCRIPTS_DIR: &str = "./sql";
pub const DEFAULT_DB_PATH: &str = "./bench.sqlite3";
pub const DEFAULT_LOG_FILE: &str = "runner.log";
pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub scripts_dir: PathBuf,
    pub database_path: PathBuf,
    /// Size of the shared worker pool and of the connection pool.
    pub max_workers: usize,
    pub acquire_timeout: Duration,
    pub busy_timeout: Duration,
    pub log_level: LevelFilter,
    pub log_file: Option<String>,
    /// `.env` file that was loaded, if any. Resolved before the logger
    /// exists, so callers log it once logging is up.
    pub env_file: Option<PathBuf>,
}

/// Four workers per CPU, never fewer than four.
pub fn default_max_workers() -> usize {
    let cpus = thread::available_parallelism().map_or(2, |n| n.get());
    (cpus * 4).max(4).min(MAX_WORKERS_LIMIT)
}

fn resolve_max_workers(value: Option<String>) -> usize {
    value
        .as_deref()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|&n| n >= 1)
        .map(|n| n.min(MAX_WORKERS_LIMIT))
        .unwrap_or_else(default_max_workers)
}

fn resolve_millis(value: Option<String>, default_ms: u64) -> Duration {
    let ms = value
        .as_deref()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default_ms);
    Duration::from_millis(ms)
}

fn resolve_log_level(value: Option<String>) -> LevelFilter {
    value
        .as_deref()
        .and_then(parse_log_level)
        .unwrap_or(LevelFilter::Info)
}

fn resolve_log_file(value: Option<String>) -> Option<String> {
    match value {
        Some(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        None => Some(DEFAULT_LOG_FILE.to_string()),
    }
}

fn resolve_path(value: Option<String>, default: &str) -> PathBuf {
    value
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}

impl Settings {
    /// Resolve from the process environment, after loading `.env`.
    pub fn from_env() -> Self {
        let env_file = dotenvy::dotenv().ok();
        Self {
            env_file,
            ..Self::from_lookup(|key| std::env::var(key).ok())
        }
    }

    /// Resolve using `lookup` for each variable name.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            scripts_dir: resolve_path(lookup("SCRIPTS_DIR"), DEFAULT_SCRIPTS_DIR),
            database_path: resolve_path(lookup("DB_PATH"), DEFAULT_DB_PATH),
            max_workers: resolve_max_workers(lookup("MAX_WORKERS")),
            acquire_timeout: resolve_millis(
                lookup("POOL_ACQUIRE_TIMEOUT_MS"),
                DEFAULT_ACQUIRE_TIMEOUT_MS,
            ),
            busy_timeout: resolve_millis(lookup("DB_BUSY_TIMEOUT_MS"), DEFAULT_BUSY_TIMEOUT_MS),
            log_level: resolve_log_level(lookup("RUNNER_LOG_LEVEL")),
            log_file: resolve_log_file(lookup("RUNNER_LOG_FILE")),
            env_file: None,
        }
    }

    /// Connection pool sized to match the worker pool.
    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            max_size: self.max_workers,
            acquire_timeout: self.acquire_timeout,
            busy_timeout: self.busy_timeout,
        }
    }
}
