//! Benchmark scheduler: runs every script `count` times across a worker
//! pool and reduces the results into a [`BenchmarkReport`].
//!
//! The calling thread is the coordinator. It submits all `scripts x count`
//! tasks up front, then joins every handle; it never occupies a worker
//! slot, so dispatch can't deadlock on a saturated pool. A failing task
//! is counted (globally and against its script) and never cancels its
//! siblings.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use runner_core::types::{
    script_file_name, BenchmarkConfig, BenchmarkReport, BenchmarkRequest, ExecutionRequest,
    ExecutionResult, PerScriptReport, RunStatus,
};
use runner_core::{Result, RunnerError};

use crate::executor::ScriptExecutor;
use crate::workers::{TaskHandle, WorkerPool};

pub struct BenchmarkScheduler {
    executor: Arc<ScriptExecutor>,
    default_pool: Arc<WorkerPool>,
}

impl BenchmarkScheduler {
    pub fn new(executor: Arc<ScriptExecutor>, default_pool: Arc<WorkerPool>) -> Self {
        Self {
            executor,
            default_pool,
        }
    }

    /// Execute one benchmark run.
    ///
    /// Only setup problems are returned as errors: an invalid request, a
    /// missing scripts directory, or no scripts at all. Execution failures
    /// end up in the report, whose status is then `partial`.
    pub fn run(&self, request: &BenchmarkRequest) -> Result<BenchmarkReport> {
        request.validate()?;
        let store = self.executor.store();
        let scripts = store.discover_numbers()?;
        if scripts.is_empty() {
            return Err(RunnerError::NoScriptsFound(store.root().to_path_buf()));
        }
        let total_tasks = scripts
            .len()
            .checked_mul(request.count_per_script)
            .ok_or_else(|| {
                RunnerError::InvalidRequest(format!(
                    "{} script(s) x {} run(s) overflows the task count",
                    scripts.len(),
                    request.count_per_script
                ))
            })?;

        // A dedicated pool for an override lives only for this run.
        let mut local_pool = match request.worker_override {
            Some(workers) => Some(WorkerPool::new("bench-local", workers)?),
            None => None,
        };
        let pool: &WorkerPool = local_pool.as_ref().unwrap_or(self.default_pool.as_ref());
        let workers_used = pool.size();

        log::info!(
            "Benchmark: {} script(s) x {} run(s), {} workers, transactional={}",
            scripts.len(),
            request.count_per_script,
            workers_used,
            request.transactional
        );

        let started = Instant::now();
        let mut pending: Vec<(u32, TaskHandle<ExecutionResult>)> =
            Vec::with_capacity(total_tasks);
        for &number in &scripts {
            for _ in 0..request.count_per_script {
                let executor = Arc::clone(&self.executor);
                let exec_request = ExecutionRequest::new(number, request.transactional);
                pending.push((number, pool.submit(move || executor.execute(exec_request))));
            }
        }

        let mut per_script: BTreeMap<u32, PerScriptReport> = scripts
            .iter()
            .map(|&n| (n, PerScriptReport::new(n)))
            .collect();
        for (number, handle) in pending {
            // A panicked task surfaces as a worker error here.
            let result = handle.join().and_then(|r| r);
            let Some(entry) = per_script.get_mut(&number) else {
                continue;
            };
            match result {
                Ok(outcome) => entry.record_success(outcome.duration_ms),
                Err(e) => {
                    log::debug!("Task for {} failed: {e}", script_file_name(number));
                    entry.record_failure(&e);
                }
            }
        }
        let wall_time_ms = started.elapsed().as_secs_f64() * 1000.0;

        if let Some(pool) = local_pool.as_mut() {
            pool.shutdown();
        }

        for entry in per_script.values_mut() {
            entry.finalize();
        }

        let config = BenchmarkConfig {
            scripts_dir: store.root().to_path_buf(),
            scripts: scripts.iter().map(|&n| script_file_name(n)).collect(),
            count_per_script: request.count_per_script,
            transactional: request.transactional,
        };
        let report = BenchmarkReport::new(config, workers_used, per_script, wall_time_ms);

        match report.status {
            RunStatus::Ok => log::info!(
                "Benchmark finished: {} task(s) in {:.3} ms",
                report.completed,
                report.wall_time_ms
            ),
            RunStatus::Partial => log::warn!(
                "Benchmark finished with errors: {} of {} task(s) failed",
                report.errors,
                report.total_tasks
            ),
        }
        Ok(report)
    }
}
