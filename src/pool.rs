//! Small pool of named worker threads for blocking native calls.
//!
//! Jobs are unordered: any idle worker picks up the next one. A job that
//! panics is caught so the worker survives.

use crate::error::{Error, Result};
use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, trace, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct WorkerPool {
    name: &'static str,
    queue: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_ids: Arc<HashSet<ThreadId>>,
}

impl WorkerPool {
    /// Spawn `size` workers (at least one) named `uirt-{name}-N`.
    pub(crate) fn new(name: &'static str, size: usize) -> Result<Self> {
        let (sender, receiver) = unbounded::<Job>();
        let mut workers = Vec::with_capacity(size.max(1));
        for index in 0..size.max(1) {
            let jobs = receiver.clone();
            let worker = thread::Builder::new()
                .name(format!("uirt-{name}-{index}"))
                .spawn(move || {
                    for job in jobs {
                        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                            warn!("worker job panicked");
                        }
                    }
                    trace!("worker exiting");
                })
                .map_err(|e| Error::internal(format!("failed to spawn worker: {e}")))?;
            workers.push(worker);
        }
        let worker_ids = Arc::new(workers.iter().map(|w| w.thread().id()).collect());
        debug!(pool = name, size = workers.len(), "worker pool started");
        Ok(Self {
            name,
            queue: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            worker_ids,
        })
    }

    /// Queue a job.
    ///
    /// # Errors
    ///
    /// Returns `ResourceDisposed` once the pool has been shut down.
    pub(crate) fn execute(&self, job: impl FnOnce() + Send + 'static) -> Result<()> {
        let queue = self.queue.lock();
        let sender = queue.as_ref().ok_or(Error::disposed("worker pool"))?;
        sender
            .send(Box::new(job))
            .map_err(|_| Error::disposed("worker pool"))
    }

    /// Whether the calling thread is one of this pool's workers.
    pub(crate) fn is_worker_thread(&self) -> bool {
        self.worker_ids.contains(&thread::current().id())
    }

    /// Stop accepting jobs and join the workers once the queue drains.
    ///
    /// From a worker thread the join is skipped; the workers exit on their
    /// own after the remaining jobs.
    pub(crate) fn shutdown(&self) {
        if self.queue.lock().take().is_none() {
            return;
        }
        if self.is_worker_thread() {
            debug!(pool = self.name, "shutdown from a worker; not joining");
            return;
        }
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if worker.join().is_err() {
                warn!(pool = self.name, "worker thread panicked");
            }
        }
        debug!(pool = self.name, "worker pool joined");
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.queue.lock().is_none()
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("workers", &self.worker_ids.len())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
