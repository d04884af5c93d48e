//! Compilation task handles
//!
//! A task moves through a small state machine:
//!
//! ```text
//! Queued ──start──> Running ──complete──> Completed
//!   │                  │ └────fail──────> Failed
//!   └──cancel──┐       └─cancel─┐
//!              ▼                ▼
//!          Cancelled        Cancelled (result discarded)
//! ```
//!
//! Every transition is a single compare-and-swap, so exactly one of
//! "installed" and "cancelled" wins for any task.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::artifact::ArtifactId;
use super::call_target::TargetId;
use super::error::OptimizationFailed;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    Queued = 0,
    Running = 1,
    Completed = 2,
    Failed = 3,
    Cancelled = 4,
}

impl From<u8> for TaskState {
    fn from(v: u8) -> Self {
        match v {
            0 => TaskState::Queued,
            1 => TaskState::Running,
            2 => TaskState::Completed,
            3 => TaskState::Failed,
            _ => TaskState::Cancelled,
        }
    }
}

/// How a task ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The result was installed as this artifact
    Installed(ArtifactId),
    /// The backend succeeded but the unit changed underneath it
    Discarded,
    /// The backend failed. `thrown` carries the failure when the policy says
    /// it must reach the caller of `compile`.
    Failed { thrown: Option<OptimizationFailed> },
    Cancelled,
}

pub struct CompilationTask {
    id: TaskId,
    target: TargetId,
    target_name: String,
    /// Structure version of the unit when the task was submitted
    structure_version: u64,
    state: AtomicU8,
    outcome: Mutex<Option<TaskOutcome>>,
    done: Condvar,
}

impl CompilationTask {
    pub fn new(target: TargetId, target_name: impl Into<String>, structure_version: u64) -> Self {
        Self {
            id: TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)),
            target,
            target_name: target_name.into(),
            structure_version,
            state: AtomicU8::new(TaskState::Queued as u8),
            outcome: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn target(&self) -> TargetId {
        self.target
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    pub fn structure_version(&self) -> u64 {
        self.structure_version
    }

    #[inline]
    pub fn state(&self) -> TaskState {
        TaskState::from(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: TaskState, to: TaskState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Queued → Running. Fails if the task was cancelled before it started.
    pub fn try_start(&self) -> bool {
        self.transition(TaskState::Queued, TaskState::Running)
    }

    /// Running → Completed. Fails if cancellation won the race.
    pub fn try_complete(&self) -> bool {
        self.transition(TaskState::Running, TaskState::Completed)
    }

    /// Running → Failed
    pub fn try_fail(&self) -> bool {
        self.transition(TaskState::Running, TaskState::Failed)
    }

    /// Request cancellation. Returns true if this call cancelled the task;
    /// false if it had already completed, failed or been cancelled.
    pub fn cancel(&self) -> bool {
        if self.transition(TaskState::Queued, TaskState::Cancelled) {
            // Never started: nobody else will finish it before the worker
            // dequeues it, so release waiters now.
            self.finish(TaskOutcome::Cancelled);
            return true;
        }
        self.transition(TaskState::Running, TaskState::Cancelled)
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == TaskState::Cancelled
    }

    /// Record the outcome and wake waiters. Only the first outcome sticks.
    pub fn finish(&self, outcome: TaskOutcome) {
        let mut slot = self.outcome.lock();
        if slot.is_none() {
            *slot = Some(outcome);
        }
        self.done.notify_all();
    }

    pub fn is_done(&self) -> bool {
        self.outcome.lock().is_some()
    }

    pub fn outcome(&self) -> Option<TaskOutcome> {
        self.outcome.lock().clone()
    }

    /// Block until the task has an outcome
    pub fn wait(&self) -> TaskOutcome {
        let mut slot = self.outcome.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            self.done.wait(&mut slot);
        }
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<TaskOutcome> {
        let mut slot = self.outcome.lock();
        if slot.is_none() {
            self.done.wait_for(&mut slot, timeout);
        }
        slot.clone()
    }
}

impl fmt::Debug for CompilationTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilationTask")
            .field("id", &self.id)
            .field("target", &self.target_name)
            .field("state", &self.state())
            .finish()
    }
}
