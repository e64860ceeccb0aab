//! Fixed-size worker pool fed by a bounded queue

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam::channel::{bounded, Sender};
use tracing::{debug, warn};

use crate::config::ConfigError;

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Named worker threads draining a bounded job queue
///
/// `submit` blocks while the queue is full. A panicking job is logged and
/// dropped; its worker keeps serving the queue.
pub(crate) struct WorkerPool {
    name: &'static str,
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    join_on_drop: bool,
}

impl WorkerPool {
    /// Start `size` threads named `{name}-{i}` sharing a queue of `capacity` jobs
    pub fn new(name: &'static str, size: usize, capacity: usize) -> Result<Self, ConfigError> {
        let (sender, receiver) = bounded::<Job>(capacity);
        let mut workers = Vec::with_capacity(size);

        for worker_id in 0..size {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("{name}-{worker_id}"))
                .spawn(move || {
                    for job in receiver.iter() {
                        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                            warn!(pool = name, worker_id, "pooled job panicked");
                        }
                    }
                    debug!(pool = name, worker_id, "worker stopped");
                })
                .map_err(ConfigError::WorkerSpawn)?;
            workers.push(handle);
        }

        debug!(pool = name, size, capacity, "worker pool started");
        Ok(Self {
            name,
            sender: Some(sender),
            workers,
            join_on_drop: true,
        })
    }

    /// Let workers finish on their own instead of joining them on drop
    ///
    /// For pools running caller-supplied code that may never return.
    pub fn detached(mut self) -> Self {
        self.join_on_drop = false;
        self
    }

    /// Queue a job, waiting for room if the queue is full
    ///
    /// Returns `false` if the pool is shutting down and the job was dropped.
    pub fn submit(&self, job: Job) -> bool {
        match &self.sender {
            Some(sender) => sender.send(job).is_ok(),
            None => false,
        }
    }

    /// Queue a job unless the queue stays full until `deadline`
    ///
    /// Returns `false` when the job was not queued.
    pub fn submit_before(&self, job: Job, deadline: Instant) -> bool {
        match &self.sender {
            Some(sender) => sender.send_deadline(job, deadline).is_ok(),
            None => false,
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the queue ends each worker's receive loop once it drains.
        self.sender.take();
        if !self.join_on_drop {
            debug!(pool = self.name, "worker pool detached");
            return;
        }
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
