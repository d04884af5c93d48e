//! Lifecycle notifications for embedders and tooling.

use super::artifact::InstalledArtifact;
use super::call_target::CallTarget;
use super::error::CompilationFailure;
use super::task::CompilationTask;

/// Observer of call-target lifecycle events
///
/// Every method has a no-op default. Methods may be called from compiler
/// worker threads and must not block.
pub trait RuntimeListener: Send + Sync {
    fn on_first_execution(&self, _target: &CallTarget) {}

    fn on_compilation_queued(&self, _target: &CallTarget, _task: &CompilationTask) {}

    fn on_compilation_success(&self, _target: &CallTarget, _artifact: &InstalledArtifact) {}

    fn on_compilation_failed(&self, _target: &CallTarget, _failure: &CompilationFailure) {}

    fn on_invalidated(&self, _target: &CallTarget, _cause: Option<&str>, _reason: &str) {}

    fn on_cancelled(&self, _target: &CallTarget, _reason: &str) {}
}

/// Listener that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl RuntimeListener for NoopListener {}
