//! Background execution for per-package sync work.
//!
//! The synchronizer never spawns threads itself; it hands [`Task`]s to a
//! [`TaskQueue`] owned by the caller. The server runs a [`WorkerPool`];
//! tests use [`InlineQueue`] or [`DeferredQueue`] to control when work runs.

use crossbeam_channel::{unbounded, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;
use std::thread::JoinHandle;
use tracing::{debug, error};

pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait TaskQueue: Send + Sync {
    fn submit(&self, task: Task);
}

/// Runs every task immediately on the submitting thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineQueue;

impl TaskQueue for InlineQueue {
    fn submit(&self, task: Task) {
        run_guarded(task);
    }
}

/// Holds tasks until [`run_pending`](DeferredQueue::run_pending) is called.
#[derive(Default)]
pub struct DeferredQueue {
    pending: Mutex<Vec<Task>>,
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().expect("task queue mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run queued tasks in submission order, including tasks submitted by
    /// the tasks themselves. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let batch: Vec<Task> =
                std::mem::take(&mut *self.pending.lock().expect("task queue mutex poisoned"));
            if batch.is_empty() {
                return ran;
            }
            for task in batch {
                run_guarded(task);
                ran += 1;
            }
        }
    }
}

impl TaskQueue for DeferredQueue {
    fn submit(&self, task: Task) {
        self.pending
            .lock()
            .expect("task queue mutex poisoned")
            .push(task);
    }
}

/// Fixed-size pool of worker threads fed through an unbounded channel.
/// Dropping the pool lets the workers drain the queue, then joins them.
pub struct WorkerPool {
    sender: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        let (sender, receiver) = unbounded::<Task>();

        let handles = (0..workers)
            .map(|i| {
                let receiver = receiver.clone();
                std::thread::Builder::new()
                    .name(format!("condor-worker-{i}"))
                    .spawn(move || {
                        while let Ok(task) = receiver.recv() {
                            run_guarded(task);
                        }
                        debug!("worker {i} exiting");
                    })
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(e) => {
                    error!("failed to spawn worker thread: {e}");
                    None
                }
            })
            .collect();

        Self {
            sender: Some(sender),
            workers: handles,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl TaskQueue for WorkerPool {
    fn submit(&self, task: Task) {
        let rejected = match self.sender {
            Some(ref sender) if !self.workers.is_empty() => match sender.send(task) {
                Ok(()) => return,
                Err(e) => e.into_inner(),
            },
            _ => task,
        };
        // No worker can take it; run on the caller's thread instead.
        run_guarded(rejected);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.sender.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn run_guarded(task: Task) {
    if catch_unwind(AssertUnwindSafe(task)).is_err() {
        error!("background task panicked");
    }
}
