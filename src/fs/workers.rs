use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Sender, TrySendError};
use thiserror::Error;
use tracing::{debug, error};

/// Default number of queued jobs per worker.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("worker {slot} queue full ({capacity} jobs)")]
    QueueFull { slot: usize, capacity: usize },

    #[error("worker {slot} has stopped")]
    Closed { slot: usize },
}

/// Fixed pool of dispatch threads, each fed by its own bounded queue. Jobs
/// submitted under the same key always land on the same thread and run in
/// submission order. A job that panics is logged and does not take its
/// worker down.
pub struct WorkerPool {
    senders: Vec<Sender<Job>>,
    threads: Vec<JoinHandle<()>>,
    capacity: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        Self::with_capacity(size, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(size: usize, capacity: usize) -> Self {
        let size = size.max(1);
        let capacity = capacity.max(1);
        let mut senders = Vec::with_capacity(size);
        let mut threads = Vec::with_capacity(size);
        for i in 0..size {
            let (tx, rx) = bounded::<Job>(capacity);
            let handle = std::thread::Builder::new()
                .name(format!("dradisfs-worker-{}", i))
                .spawn(move || {
                    debug!("Worker {} started", i);
                    for job in rx {
                        if catch_unwind(AssertUnwindSafe(job)).is_err() {
                            error!("Worker {}: job panicked, continuing", i);
                        }
                    }
                    debug!("Worker {} shutting down", i);
                })
                .expect("failed to spawn dispatch worker");
            senders.push(tx);
            threads.push(handle);
        }
        Self {
            senders,
            threads,
            capacity,
        }
    }

    pub fn size(&self) -> usize {
        self.senders.len()
    }

    fn slot(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.senders.len() as u64) as usize
    }

    /// Queue `job` on the worker owning `key`. On error the job is dropped
    /// without running.
    pub fn submit<F>(&self, key: &str, job: F) -> Result<(), SubmitError>
    where
        F: FnOnce() + Send + 'static,
    {
        let slot = self.slot(key);
        match self.senders[slot].try_send(Box::new(job)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(SubmitError::QueueFull {
                slot,
                capacity: self.capacity,
            }),
            Err(TrySendError::Disconnected(_)) => Err(SubmitError::Closed { slot }),
        }
    }

    /// Close the queues and wait for queued jobs to finish.
    pub fn shutdown(self) {
        drop(self.senders);
        for t in self.threads {
            let _ = t.join();
        }
    }
}
