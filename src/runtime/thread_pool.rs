//! Worker pool for background compilation
//!
//! Workers stay alive for the lifetime of the runtime and pull compile jobs
//! from a channel:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                   CompilerThreadPool                     │
//! │                                                          │
//! │  ┌────────┐    ┌─────────────────────────────────────┐   │
//! │  │ Sender │───>│        Unbounded Channel            │   │
//! │  └────────┘    └─────────────────────────────────────┘   │
//! │                        │                                 │
//! │         ┌──────────────┼──────────────┐                  │
//! │         ▼              ▼              ▼                  │
//! │   ┌──────────┐   ┌──────────┐   ┌──────────┐             │
//! │   │ Worker 1 │   │ Worker 2 │   │ Worker N │             │
//! │   └──────────┘   └──────────┘   └──────────┘             │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The channel is unbounded: a caller that crosses a compile threshold must
//! never block on a full queue. The pool size bounds concurrent compilations.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace};

type BoxedJob = Box<dyn FnOnce() + Send + 'static>;

pub struct CompilerThreadPool {
    sender: Mutex<Option<Sender<BoxedJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    pending: Arc<AtomicUsize>,
    num_threads: usize,
}

impl CompilerThreadPool {
    /// Spawn `num_threads` workers, blocked on the channel and ready for work
    pub fn new(num_threads: usize) -> Self {
        let num_threads = num_threads.max(1);
        let (sender, receiver) = unbounded::<BoxedJob>();
        let pending = Arc::new(AtomicUsize::new(0));

        let workers = (0..num_threads)
            .map(|id| {
                let rx = receiver.clone();
                let pending = Arc::clone(&pending);
                thread::Builder::new()
                    .name(format!("tiercall-compiler-{}", id))
                    .spawn(move || worker_loop(rx, pending))
                    .expect("failed to spawn compiler thread")
            })
            .collect();

        debug!(threads = num_threads, "compiler thread pool started");
        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            pending,
            num_threads,
        }
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Jobs queued or running
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Queue a job. Returns false if the pool has been shut down.
    pub fn execute<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return false;
        };
        self.pending.fetch_add(1, Ordering::AcqRel);
        if sender.send(Box::new(job)).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        true
    }

    /// Close the queue and wait for the workers to drain it
    ///
    /// Idempotent. Must not be called from a worker thread.
    pub fn shutdown(&self) {
        // Dropping the sender closes the channel once the queue is drained
        drop(self.sender.lock().take());

        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let _ = worker.join();
        }
    }
}

impl Drop for CompilerThreadPool {
    fn drop(&mut self) {
        drop(self.sender.lock().take());
    }
}

fn worker_loop(receiver: Receiver<BoxedJob>, pending: Arc<AtomicUsize>) {
    while let Ok(job) = receiver.recv() {
        job();
        pending.fetch_sub(1, Ordering::AcqRel);
    }
    trace!("compiler worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_execute_runs_jobs() {
        let pool = CompilerThreadPool::new(2);
        let (tx, rx) = mpsc::channel();
        for i in 0..10 {
            let tx = tx.clone();
            assert!(pool.execute(move || tx.send(i).unwrap()));
        }
        let mut results: Vec<i32> = (0..10).map(|_| rx.recv().unwrap()).collect();
        results.sort();
        assert_eq!(results, (0..10).collect::<Vec<_>>());
        pool.shutdown();
    }

    #[test]
    fn test_shutdown_drains_and_rejects() {
        let pool = CompilerThreadPool::new(1);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            let counter = Arc::clone(&counter);
            pool.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 50);
        assert_eq!(pool.pending(), 0);
        assert!(!pool.execute(|| {}));
        pool.shutdown();
    }

    #[test]
    fn test_zero_threads_still_gets_one_worker() {
        let pool = CompilerThreadPool::new(0);
        assert_eq!(pool.num_threads(), 1);
        pool.shutdown();
    }
}
