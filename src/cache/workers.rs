//! Compression worker pool
//!
//! A fixed set of named threads fed from one unbounded `crossbeam` channel.
//! Threads are spawned on the first submit and exit once the pool is
//! dropped. Backpressure is not this pool's job: the encoder never has more
//! than N jobs of one build in flight.

use std::panic::{self, AssertUnwindSafe};
use std::thread;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::error::{Error, Result};

/// Work item executed on a compression thread
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Thread name prefix of compression workers
pub const WORKER_THREAD_PREFIX: &str = "animcache-encode";

/// Lazily started pool of compression threads.
pub struct CompressWorkers {
    threads: usize,
    sender: Mutex<Option<Sender<Job>>>,
}

impl CompressWorkers {
    /// Create a pool that will run `threads` workers once used
    pub fn new(threads: usize) -> Self {
        Self {
            threads: threads.max(1),
            sender: Mutex::new(None),
        }
    }

    /// Number of worker threads
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// True once the worker threads have been spawned
    pub fn is_started(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Queue a job, starting the workers if needed
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = {
            let mut guard = self.sender.lock();
            match guard.as_ref() {
                Some(sender) => sender.clone(),
                None => {
                    let sender = self.start()?;
                    *guard = Some(sender.clone());
                    sender
                }
            }
        };
        sender
            .send(Box::new(job))
            .map_err(|_| Error::WorkerPoolClosed)
    }

    fn start(&self) -> Result<Sender<Job>> {
        let (tx, rx) = channel::unbounded::<Job>();
        for i in 0..self.threads {
            let rx = rx.clone();
            thread::Builder::new()
                .name(format!("{}-{}", WORKER_THREAD_PREFIX, i))
                .spawn(move || worker_loop(rx))?;
        }
        debug!(threads = self.threads, "Started compression workers");
        Ok(tx)
    }
}

impl std::fmt::Debug for CompressWorkers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressWorkers")
            .field("threads", &self.threads)
            .field("started", &self.is_started())
            .finish()
    }
}

fn worker_loop(rx: Receiver<Job>) {
    while let Ok(job) = rx.recv() {
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!("Compression job panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_lazy_start() {
        let workers = CompressWorkers::new(2);
        assert!(!workers.is_started());

        let (tx, rx) = channel::bounded(1);
        workers.submit(move || tx.send(()).unwrap()).unwrap();
        rx.recv().unwrap();
        assert!(workers.is_started());
    }

    #[test]
    fn test_jobs_run_on_named_threads() {
        let workers = CompressWorkers::new(3);
        let (tx, rx) = channel::unbounded();
        for _ in 0..6 {
            let tx = tx.clone();
            workers
                .submit(move || {
                    let name = thread::current().name().unwrap_or_default().to_string();
                    tx.send(name).unwrap();
                })
                .unwrap();
        }
        for _ in 0..6 {
            let name = rx.recv().unwrap();
            assert!(name.starts_with(WORKER_THREAD_PREFIX));
        }
    }

    #[test]
    fn test_panicking_job_does_not_kill_pool() {
        let workers = CompressWorkers::new(1);
        workers.submit(|| panic!("boom")).unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = channel::bounded(1);
        let c = counter.clone();
        workers
            .submit(move || {
                c.fetch_add(1, Ordering::SeqCst);
                tx.send(()).unwrap();
            })
            .unwrap();
        rx.recv().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_zero_threads_is_clamped() {
        assert_eq!(CompressWorkers::new(0).threads(), 1);
    }
}
