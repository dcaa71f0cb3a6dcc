//! Domain types exchanged between the store, executor, scheduler and the
//! front ends that render reports.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::RunnerError;
use crate::stats::{AggregateStats, round_ms};

/// Hard ceiling on worker threads for a single benchmark run.
pub const MAX_WORKERS_LIMIT: usize = 1024;

/// File name of script `number` inside the scripts directory.
pub fn script_file_name(number: u32) -> String {
    format!("{number}.sql")
}

/// One numbered script on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptFile {
    pub number: u32,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// A single execution attempt of one script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub script_number: u32,
    pub transactional: bool,
}

impl ExecutionRequest {
    pub fn new(script_number: u32, transactional: bool) -> Self {
        Self {
            script_number,
            transactional,
        }
    }
}

/// Successful execution: which script ran and how long it took.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExecutionOutcome {
    pub script_number: u32,
    pub duration_ms: f64,
}

pub type ExecutionResult = Result<ExecutionOutcome, RunnerError>;

/// Parameters of one benchmark run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BenchmarkRequest {
    pub count_per_script: usize,
    pub transactional: bool,
    /// Use a dedicated pool of this many workers instead of the shared one.
    pub worker_override: Option<usize>,
}

impl BenchmarkRequest {
    pub fn new(count_per_script: usize, transactional: bool) -> Self {
        Self {
            count_per_script,
            transactional,
            worker_override: None,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.worker_override = Some(workers);
        self
    }

    /// Reject requests the scheduler cannot honour.
    pub fn validate(&self) -> crate::Result<()> {
        if self.count_per_script == 0 {
            return Err(RunnerError::InvalidRequest(
                "count per script must be at least 1".to_string(),
            ));
        }
        if let Some(workers) = self.worker_override {
            if workers == 0 || workers > MAX_WORKERS_LIMIT {
                return Err(RunnerError::InvalidRequest(format!(
                    "worker override must be within 1..={MAX_WORKERS_LIMIT}, got {workers}"
                )));
            }
        }
        Ok(())
    }
}

/// Durations and failures collected for one script during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerScriptReport {
    pub script_number: u32,
    pub script: String,
    pub durations_ms: Vec<f64>,
    pub count: usize,
    pub errors: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_error: Option<String>,
    pub stats: AggregateStats,
}

impl PerScriptReport {
    pub fn new(script_number: u32) -> Self {
        Self {
            script_number,
            script: script_file_name(script_number),
            durations_ms: Vec::new(),
            count: 0,
            errors: 0,
            first_error: None,
            stats: AggregateStats::default(),
        }
    }

    pub fn record_success(&mut self, duration_ms: f64) {
        self.durations_ms.push(duration_ms);
        self.count += 1;
    }

    pub fn record_failure(&mut self, error: &RunnerError) {
        self.errors += 1;
        if self.first_error.is_none() {
            self.first_error = Some(format!("{}: {error}", error.kind()));
        }
    }

    /// Compute stats once all results for the run are in.
    pub fn finalize(&mut self) {
        self.stats = AggregateStats::from_samples(&self.durations_ms);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Ok,
    Partial,
}

/// Echo of what a run was asked to do.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkConfig {
    pub scripts_dir: PathBuf,
    pub scripts: Vec<String>,
    pub count_per_script: usize,
    pub transactional: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkReport {
    pub status: RunStatus,
    pub total_tasks: usize,
    pub completed: usize,
    pub errors: usize,
    pub wall_time_ms: f64,
    pub workers_used: usize,
    pub config: BenchmarkConfig,
    pub per_script: BTreeMap<u32, PerScriptReport>,
}

impl BenchmarkReport {
    /// Assemble the final report. `per_script` entries must already be
    /// finalized.
    pub fn new(
        config: BenchmarkConfig,
        workers_used: usize,
        per_script: BTreeMap<u32, PerScriptReport>,
        wall_time_ms: f64,
    ) -> Self {
        let completed = per_script.values().map(|r| r.count).sum();
        let errors: usize = per_script.values().map(|r| r.errors).sum();
        let total_tasks = config.scripts.len() * config.count_per_script;
        Self {
            status: if errors == 0 {
                RunStatus::Ok
            } else {
                RunStatus::Partial
            },
            total_tasks,
            completed,
            errors,
            wall_time_ms: round_ms(wall_time_ms),
            workers_used,
            config,
            per_script,
        }
    }
}
