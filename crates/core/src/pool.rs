//! Worker pool for asynchronous point operations.
//!
//! A fixed set of threads drains one FIFO queue. Submission hands the
//! pool a closure and blocks on a per-task completion signal; the caller
//! then runs its own callback on the submitting thread. That keeps
//! callbacks off pool threads, which matters to embedders with thread
//! affinity, and means one client thread can never reorder its own tasks.
//!
//! There is no cancellation: a submitted task always runs. Shutdown wakes
//! the workers, lets them drain what is queued, and joins them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

/// Upper bound on pool threads, whatever the configuration asks for.
pub const MAX_WORKER_THREADS: usize = 8;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    queue: Mutex<VecDeque<Job>>,
    available: Condvar,
    shutdown: AtomicBool,
}

/// Fixed-size worker pool with a blocking submit.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Starts `threads` workers (clamped to `1..=MAX_WORKER_THREADS`).
    pub fn start(threads: usize) -> Self {
        let threads = threads.clamp(1, MAX_WORKER_THREADS);
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });
        let mut workers = Vec::with_capacity(threads);
        for n in 0..threads {
            let shared = Arc::clone(&shared);
            workers.push(
                std::thread::Builder::new()
                    .name(format!("arbordb-worker-{n}"))
                    .spawn(move || worker_loop(&shared))
                    .expect("failed to spawn worker thread"),
            );
        }
        tracing::debug!(threads, "worker pool started");
        Self { shared, workers: Mutex::new(workers) }
    }

    /// Runs `job` on a worker and blocks until it finishes, returning its
    /// result. Returns `None` when the pool is shut down.
    pub fn submit_and_wait<T, F>(&self, job: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if self.shared.shutdown.load(Ordering::SeqCst) {
            return None;
        }

        struct Slot<T> {
            result: Mutex<Option<T>>,
            done: Condvar,
        }
        let slot = Arc::new(Slot { result: Mutex::new(None), done: Condvar::new() });

        {
            let slot = Arc::clone(&slot);
            let mut queue = self.shared.queue.lock();
            queue.push_back(Box::new(move || {
                let value = job();
                *slot.result.lock() = Some(value);
                slot.done.notify_one();
            }));
        }
        self.shared.available.notify_one();

        let mut result = slot.result.lock();
        while result.is_none() {
            slot.done.wait(&mut result);
        }
        result.take()
    }

    /// Wakes the workers, drains the queue, and joins every thread.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.available.notify_all();
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
        tracing::debug!("worker pool stopped");
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let job = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(job) = queue.pop_front() {
                    break Some(job);
                }
                if shared.shutdown.load(Ordering::SeqCst) {
                    break None;
                }
                shared.available.wait(&mut queue);
            }
        };
        match job {
            Some(job) => job(),
            None => return,
        }
    }
}
