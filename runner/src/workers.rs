//! Bounded pool of worker threads for blocking script executions.
//!
//! Jobs are queued on one `mpsc` channel shared by all workers, so
//! submission order is the order in which workers pick them up. Each
//! [`WorkerPool::submit`] returns a [`TaskHandle`]: a one-shot channel that
//! resolves when the job finishes. The submitting thread never occupies a
//! worker; it only blocks in [`TaskHandle::join`].
//!
//! A panicking job is caught and reported through its handle. The worker
//! thread keeps running and sibling jobs are unaffected.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use runner_core::{Result, RunnerError};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Pending result of a submitted job.
pub struct TaskHandle<T> {
    rx: mpsc::Receiver<thread::Result<T>>,
}

impl<T> TaskHandle<T> {
    /// Block until the job has run.
    ///
    /// # Returns
    ///
    /// * `Ok(value)` with whatever the job returned.
    /// * `Err(RunnerError::Worker)` if the job panicked or the pool was shut
    ///   down before it could run.
    pub fn join(self) -> Result<T> {
        match self.rx.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => Err(RunnerError::Worker(format!(
                "task panicked: {}",
                panic_message(payload.as_ref())
            ))),
            Err(_) => Err(RunnerError::Worker(
                "task dropped: worker pool shut down".to_string(),
            )),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Handle for a fixed set of worker threads.
pub struct WorkerPool {
    name: String,
    size: usize,
    tx: Option<mpsc::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers named `{name}-{index}`.
    pub fn new(name: &str, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(RunnerError::InvalidRequest(
                "worker pool needs at least one thread".to_string(),
            ));
        }
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));

        let mut pool = Self {
            name: name.to_string(),
            size,
            tx: Some(tx),
            workers: Vec::with_capacity(size),
        };
        for index in 0..size {
            let rx = Arc::clone(&rx);
            let spawned = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || worker_loop(&rx));
            match spawned {
                Ok(handle) => pool.workers.push(handle),
                Err(e) => {
                    // Tear down whatever did start before reporting.
                    pool.shutdown();
                    return Err(RunnerError::Worker(format!(
                        "cannot spawn worker {name}-{index}: {e}"
                    )));
                }
            }
        }
        log::debug!("Started worker pool '{name}' with {size} threads");
        Ok(pool)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue `task` for execution on the next free worker.
    pub fn submit<T, F>(&self, task: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, result_rx) = mpsc::channel();
        let job: Job = Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(task));
            // The receiver may have given up; nothing to report to then.
            let _ = result_tx.send(outcome);
        });
        match &self.tx {
            Some(tx) => {
                if tx.send(job).is_err() {
                    log::error!("Worker pool '{}' has no live workers", self.name);
                }
            }
            None => log::warn!("Task submitted to worker pool '{}' after shutdown", self.name),
        }
        TaskHandle { rx: result_rx }
    }

    /// Close the queue, let queued jobs finish, and join every worker.
    ///
    /// Safe to call multiple times; also called on drop.
    pub fn shutdown(&mut self) {
        if self.tx.take().is_none() && self.workers.is_empty() {
            return;
        }
        for handle in self.workers.drain(..) {
            if let Err(e) = handle.join() {
                log::error!("Worker thread in pool '{}' panicked: {e:?}", self.name);
            }
        }
        log::debug!("Worker pool '{}' shut down", self.name);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(rx: &Mutex<mpsc::Receiver<Job>>) {
    loop {
        // The guard is a temporary, released before the job runs.
        let job = rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .recv();
        match job {
            Ok(job) => job(),
            Err(_) => break,
        }
    }
}

// ---------------------------------------------------------------------------
//  Unit Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn zero_workers_is_rejected() {
        assert!(matches!(
            WorkerPool::new("test", 0),
            Err(RunnerError::InvalidRequest(_))
        ));
    }

    #[test]
    fn every_submitted_task_resolves() {
        let pool = WorkerPool::new("test", 4).unwrap();
        let handles: Vec<_> = (0..100u64).map(|i| pool.submit(move || i * 2)).collect();
        let sum: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(sum, (0..100u64).map(|i| i * 2).sum::<u64>());
    }

    #[test]
    fn concurrency_never_exceeds_pool_size() {
        let pool = WorkerPool::new("test", 3).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..24)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                pool.submit(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(5));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency {peak} exceeded pool size");
        assert!(peak >= 1);
    }

    #[test]
    fn panicking_task_does_not_affect_siblings() {
        let pool = WorkerPool::new("test", 1).unwrap();
        let bad = pool.submit(|| -> u32 { panic!("boom") });
        let good = pool.submit(|| 7u32);

        let err = bad.join().unwrap_err();
        assert!(err.to_string().contains("boom"), "{err}");
        assert_eq!(good.join().unwrap(), 7);
    }

    #[test]
    fn shutdown_drains_queued_tasks() {
        let mut pool = WorkerPool::new("test", 2).unwrap();
        let done = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let done = done.clone();
                pool.submit(move || {
                    thread::sleep(Duration::from_millis(2));
                    done.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        pool.shutdown();
        assert_eq!(done.load(Ordering::SeqCst), 10);
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn submit_after_shutdown_is_rejected() {
        let mut pool = WorkerPool::new("test", 1).unwrap();
        pool.shutdown();
        pool.shutdown();
        let handle = pool.submit(|| 1);
        assert!(matches!(handle.join(), Err(RunnerError::Worker(_))));
    }
}
