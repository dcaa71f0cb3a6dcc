//! `SqlRunner`: the operations front ends call into.

use std::sync::Arc;

use runner_core::types::{
    BenchmarkReport, BenchmarkRequest, ExecutionRequest, ExecutionResult, ScriptFile,
};
use runner_core::Result;

use crate::config::Settings;
use crate::executor::ScriptExecutor;
use crate::pool::{ConnectionPool, SqlitePool};
use crate::scheduler::BenchmarkScheduler;
use crate::store::ScriptStore;
use crate::workers::WorkerPool;

/// Owns the store, connection pool and default worker pool for the life
/// of the process. Construct once and share by reference.
pub struct SqlRunner {
    store: Arc<ScriptStore>,
    executor: Arc<ScriptExecutor>,
    workers: Arc<WorkerPool>,
    scheduler: BenchmarkScheduler,
}

impl SqlRunner {
    /// Wire the components together around an existing connection pool.
    ///
    /// Any renumbering left unfinished by an earlier process is completed
    /// here; a failure to do so is logged and left for the next mutation.
    pub fn new(
        store: ScriptStore,
        pool: Arc<dyn ConnectionPool>,
        default_workers: usize,
    ) -> Result<Self> {
        let store = Arc::new(store);
        match store.renumber() {
            Ok(0) => {}
            Ok(moved) => log::info!("Repaired script numbering ({moved} file(s) moved)"),
            Err(e) => log::warn!("Script numbering not checked at startup: {e}"),
        }

        let executor = Arc::new(ScriptExecutor::new(Arc::clone(&store), pool));
        let workers = Arc::new(WorkerPool::new("sql-worker", default_workers)?);
        let scheduler = BenchmarkScheduler::new(Arc::clone(&executor), Arc::clone(&workers));
        Ok(Self {
            store,
            executor,
            workers,
            scheduler,
        })
    }

    /// Build everything from resolved settings, opening the SQLite pool.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let pool = SqlitePool::open(&settings.database_path, settings.pool_options())?;
        Self::new(
            ScriptStore::new(&settings.scripts_dir),
            Arc::new(pool),
            settings.max_workers,
        )
    }

    pub fn default_workers(&self) -> usize {
        self.workers.size()
    }

    /// Execute one script once on the shared worker pool.
    pub fn run_one(&self, number: u32, transactional: bool) -> ExecutionResult {
        let executor = Arc::clone(&self.executor);
        let request = ExecutionRequest::new(number, transactional);
        self.workers
            .submit(move || executor.execute(request))
            .join()?
    }

    /// Run every script `count_per_script` times.
    pub fn run_benchmark(
        &self,
        count_per_script: usize,
        transactional: bool,
        worker_override: Option<usize>,
    ) -> Result<BenchmarkReport> {
        let request = BenchmarkRequest {
            count_per_script,
            transactional,
            worker_override,
        };
        self.scheduler.run(&request)
    }

    pub fn list_scripts(&self) -> Result<Vec<ScriptFile>> {
        self.store.list()
    }

    pub fn get_script(&self, number: u32) -> Result<Arc<str>> {
        self.store.load_content(number)
    }

    pub fn put_script(&self, number: u32, text: &str) -> Result<()> {
        self.store.update(number, text.as_bytes())
    }

    /// Store a new script and return its assigned number.
    pub fn create_script(&self, bytes: &[u8]) -> Result<u32> {
        self.store.create(bytes)
    }

    pub fn delete_script(&self, number: u32) -> Result<()> {
        self.store.delete(number)
    }

    pub fn renumber_scripts(&self) -> Result<usize> {
        self.store.renumber()
    }
}
