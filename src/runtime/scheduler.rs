//! Compilation scheduling
//!
//! The scheduler turns a submitted [`CompilationTask`] into a backend call,
//! either inline on the caller's thread (synchronous policy) or on the
//! [`CompilerThreadPool`]. It then installs the result, discards it, or
//! routes the failure back to the target.
//!
//! The scheduler does not deduplicate submissions. At most one task per
//! target is in flight because targets only submit through their
//! double-checked `compile`.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace, warn};

use super::call_target::CallTarget;
use super::error::{CompilationError, CompilationFailure};
use super::options::RuntimeOptions;
use super::task::{CompilationTask, TaskOutcome, TaskState};
use super::thread_pool::CompilerThreadPool;

// ============================================================================
// Statistics
// ============================================================================

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    installed: AtomicU64,
    discarded: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

/// Snapshot of scheduler activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulerStats {
    pub submitted: u64,
    pub installed: u64,
    /// Successful compilations dropped because the unit changed meanwhile
    pub discarded: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Jobs queued or running on the worker pool
    pub pending: usize,
}

// ============================================================================
// Scheduler
// ============================================================================

pub struct CompilationScheduler {
    /// `None` under the synchronous policy
    pool: Option<CompilerThreadPool>,
    counters: Counters,
}

impl CompilationScheduler {
    pub fn new(options: &RuntimeOptions) -> Self {
        let pool = (options.compilation_enabled && options.background_compilation)
            .then(|| CompilerThreadPool::new(options.effective_compiler_threads()));
        Self {
            pool,
            counters: Counters::default(),
        }
    }

    pub fn is_background(&self) -> bool {
        self.pool.is_some()
    }

    /// Create a task for `target` and hand it to the pool. Under the
    /// synchronous policy the task stays queued until
    /// [`CompilationScheduler::finish`] runs it.
    pub fn submit(&self, target: &Arc<CallTarget>) -> Arc<CompilationTask> {
        let task = Arc::new(CompilationTask::new(
            target.id(),
            target.to_string(),
            target.structure_version(),
        ));
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        trace!(target: "tiercall", name = %task.target_name(), task = %task.id(), "compilation submitted");

        if let Some(pool) = &self.pool {
            let job_target = Arc::clone(target);
            let job_task = Arc::clone(&task);
            let queued = pool.execute(move || {
                let runtime = Arc::clone(job_target.runtime());
                runtime.scheduler().run(&job_target, &job_task);
            });
            if !queued {
                warn!(target: "tiercall", name = %task.target_name(), "compiler pool is shut down, dropping compilation");
                task.cancel();
                self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
            }
        }
        task
    }

    /// Run a still-queued task inline, then optionally wait for it.
    ///
    /// Returns the outcome if the task finished before returning.
    pub fn finish(
        &self,
        target: &Arc<CallTarget>,
        task: &Arc<CompilationTask>,
        may_be_async: bool,
    ) -> Option<TaskOutcome> {
        if self.pool.is_none() && task.state() == TaskState::Queued {
            self.run(target, task);
        }
        if may_be_async && self.pool.is_some() {
            task.outcome()
        } else {
            Some(task.wait())
        }
    }

    /// Execute one task: backend call, then install or failure routing
    pub fn run(&self, target: &Arc<CallTarget>, task: &Arc<CompilationTask>) {
        if !task.try_start() {
            debug!(target: "tiercall", name = %task.target_name(), task = %task.id(), "cancelled before start");
            self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
            target.reset_compilation_task(task);
            task.finish(TaskOutcome::Cancelled);
            return;
        }

        let runtime = target.runtime();
        let request = target.compilation_request();
        let started = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| runtime.backend().compile(&request)))
            .unwrap_or_else(|payload| Err(CompilationFailure::Panicked(panic_message(payload))));
        trace!(
            target: "tiercall",
            name = %task.target_name(),
            elapsed_us = started.elapsed().as_micros() as u64,
            ok = result.is_ok(),
            "backend returned"
        );

        let outcome = match result {
            Ok(code) => target.install_compiled(task, code),
            Err(failure) if task.try_fail() => match target.notify_compilation_failed(&failure) {
                Ok(()) => TaskOutcome::Failed { thrown: None },
                Err(CompilationError::Thrown(error)) => TaskOutcome::Failed {
                    thrown: Some(error),
                },
                Err(CompilationError::Fatal(error)) => {
                    runtime.handle_fatal(&error);
                    TaskOutcome::Failed { thrown: None }
                }
            },
            Err(failure) => {
                debug!(target: "tiercall", name = %task.target_name(), %failure, "failure after cancellation ignored");
                TaskOutcome::Cancelled
            }
        };

        let counter = match &outcome {
            TaskOutcome::Installed(_) => &self.counters.installed,
            TaskOutcome::Discarded => &self.counters.discarded,
            TaskOutcome::Failed { .. } => &self.counters.failed,
            TaskOutcome::Cancelled => &self.counters.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        target.reset_compilation_task(task);
        task.finish(outcome);
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            installed: self.counters.installed.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
            pending: self.pool.as_ref().map_or(0, CompilerThreadPool::pending),
        }
    }

    /// Stop accepting work and wait for queued compilations to drain
    pub fn shutdown(&self) {
        if let Some(pool) = &self.pool {
            pool.shutdown();
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
