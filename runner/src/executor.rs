//! Runs one script against one pooled connection and times it.

use std::sync::Arc;
use std::time::Instant;

use runner_core::stats::round_ms;
use runner_core::types::{ExecutionOutcome, ExecutionRequest, ExecutionResult};
use runner_core::RunnerError;

use crate::pool::{Checkout, ConnectionPool, DbConnection};
use crate::store::ScriptStore;

/// Executes scripts from a [`ScriptStore`] through a [`ConnectionPool`].
///
/// Never keeps a connection beyond a single call.
pub struct ScriptExecutor {
    store: Arc<ScriptStore>,
    pool: Arc<dyn ConnectionPool>,
}

impl ScriptExecutor {
    pub fn new(store: Arc<ScriptStore>, pool: Arc<dyn ConnectionPool>) -> Self {
        Self { store, pool }
    }

    pub fn store(&self) -> &Arc<ScriptStore> {
        &self.store
    }

    /// Run `request.script_number` once.
    ///
    /// With `transactional` the whole script runs in one transaction that is
    /// committed on success and rolled back on any error. Otherwise every
    /// statement commits as it executes. The connection's previous commit
    /// mode is restored before it goes back to the pool.
    ///
    /// The reported duration covers execution and commit, in milliseconds
    /// rounded to three decimals.
    pub fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        let number = request.script_number;
        let sql = self.store.load_content(number)?;

        let mut conn = Checkout::acquire(self.pool.as_ref())?;
        let prior_autocommit = conn.autocommit();
        conn.set_autocommit(!request.transactional)
            .map_err(|message| RunnerError::ExecutionFailed { number, message })?;

        let started = Instant::now();
        let outcome = run_script(&mut *conn, &sql, request.transactional);
        let elapsed = started.elapsed();

        if let Err(e) = conn.set_autocommit(prior_autocommit) {
            log::warn!("Could not restore autocommit={prior_autocommit} after {number}.sql: {e}");
        }
        drop(conn);

        match outcome {
            Ok(()) => Ok(ExecutionOutcome {
                script_number: number,
                duration_ms: round_ms(elapsed.as_secs_f64() * 1000.0),
            }),
            Err(message) => {
                log::warn!("Script {number}.sql failed: {message}");
                Err(RunnerError::ExecutionFailed { number, message })
            }
        }
    }
}

fn run_script(
    conn: &mut dyn DbConnection,
    sql: &str,
    transactional: bool,
) -> std::result::Result<(), String> {
    let executed = conn.execute_script(sql);
    if !transactional {
        return executed;
    }
    let result = executed.and_then(|()| conn.commit());
    if result.is_err() {
        if let Err(e) = conn.rollback() {
            log::warn!("Rollback after failed script also failed: {e}");
        }
    }
    result
}
