//! The runtime registry
//!
//! One [`Runtime`] is built per process (or per test) and injected into
//! every call target it creates. It owns the compiler backend, the
//! compilation scheduler, the policy options and the arena of live targets.
//!
//! Targets hold an `Arc<Runtime>` and the arena holds an `Arc<CallTarget>`
//! for every registered target. The cycle is broken explicitly:
//! [`Runtime::release`] drops one target and [`Runtime::shutdown`] drops
//! them all.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::{debug, error, info, trace};

use super::artifact::InstalledArtifact;
use super::backend::CompilerBackend;
use super::call_target::{CallTarget, TargetId};
use super::error::{FatalCompilationError, TargetError};
use super::listener::{NoopListener, RuntimeListener};
use super::options::RuntimeOptions;
use super::scheduler::{CompilationScheduler, SchedulerStats};
use super::task::{CompilationTask, TaskOutcome};
use super::unit::{ExecutableUnit, UnitObserver};

/// Exit status used by the default fatal handler
pub const FATAL_EXIT_CODE: i32 = -1;

/// The single place allowed to act on a fatal compilation failure
pub type FatalHandler = Arc<dyn Fn(&FatalCompilationError) + Send + Sync>;

/// Logs the dump, writes it to stderr and terminates the process with
/// [`FATAL_EXIT_CODE`]
pub fn exit_process_handler() -> FatalHandler {
    Arc::new(|err: &FatalCompilationError| {
        error!(target: "tiercall", "{}\n{}", err, err.dump);
        eprintln!("{}\n{}", err, err.dump);
        std::process::exit(FATAL_EXIT_CODE);
    })
}

pub struct RuntimeBuilder {
    backend: Arc<dyn CompilerBackend>,
    options: RuntimeOptions,
    listener: Arc<dyn RuntimeListener>,
    fatal_handler: FatalHandler,
}

impl RuntimeBuilder {
    pub fn new(backend: Arc<dyn CompilerBackend>) -> Self {
        Self {
            backend,
            options: RuntimeOptions::default(),
            listener: Arc::new(NoopListener),
            fatal_handler: exit_process_handler(),
        }
    }

    pub fn options(mut self, options: RuntimeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn listener(mut self, listener: Arc<dyn RuntimeListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn fatal_handler(mut self, handler: FatalHandler) -> Self {
        self.fatal_handler = handler;
        self
    }

    pub fn build(self) -> Arc<Runtime> {
        let scheduler = CompilationScheduler::new(&self.options);
        info!(
            target: "tiercall",
            backend = self.backend.name(),
            background = scheduler.is_background(),
            threshold = self.options.compilation_threshold,
            "runtime started"
        );
        Arc::new(Runtime {
            options: self.options,
            backend: self.backend,
            listener: self.listener,
            fatal_handler: self.fatal_handler,
            scheduler,
            targets: DashMap::new(),
            next_target_id: AtomicU64::new(1),
            stub_reinstalls: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
        })
    }
}

pub struct Runtime {
    options: RuntimeOptions,
    backend: Arc<dyn CompilerBackend>,
    listener: Arc<dyn RuntimeListener>,
    fatal_handler: FatalHandler,
    scheduler: CompilationScheduler,
    targets: DashMap<TargetId, Arc<CallTarget>>,
    next_target_id: AtomicU64,
    stub_reinstalls: AtomicU64,
    shut_down: AtomicBool,
}

impl Runtime {
    pub fn builder(backend: Arc<dyn CompilerBackend>) -> RuntimeBuilder {
        RuntimeBuilder::new(backend)
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    pub fn backend(&self) -> &Arc<dyn CompilerBackend> {
        &self.backend
    }

    pub fn listener(&self) -> &Arc<dyn RuntimeListener> {
        &self.listener
    }

    pub(crate) fn scheduler(&self) -> &CompilationScheduler {
        &self.scheduler
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // Target creation
    // ------------------------------------------------------------------

    /// Register a unit and return its (uninitialized) call target
    pub fn create_call_target(
        self: &Arc<Self>,
        unit: Arc<dyn ExecutableUnit>,
    ) -> Result<Arc<CallTarget>, TargetError> {
        self.register(None, unit)
    }

    /// Register `unit` as a split of `source`. Clones of clones are refused.
    pub fn create_cloned_call_target(
        self: &Arc<Self>,
        source: &CallTarget,
        unit: Arc<dyn ExecutableUnit>,
    ) -> Result<Arc<CallTarget>, TargetError> {
        if source.source_id().is_some() {
            return Err(TargetError::CloneOfClone {
                target: source.to_string(),
            });
        }
        self.register(Some((source.id(), source.next_split_index())), unit)
    }

    fn register(
        self: &Arc<Self>,
        source: Option<(TargetId, u32)>,
        unit: Arc<dyn ExecutableUnit>,
    ) -> Result<Arc<CallTarget>, TargetError> {
        if self.is_shut_down() {
            return Err(TargetError::RuntimeShutDown);
        }
        let id = TargetId(self.next_target_id.fetch_add(1, Ordering::Relaxed));
        let target = Arc::new(CallTarget::new(Arc::clone(self), id, source, unit));

        let observer: Weak<dyn UnitObserver> = Arc::downgrade(&target) as Weak<dyn UnitObserver>;
        target.root().attach_observer(observer);

        self.targets.insert(id, Arc::clone(&target));
        debug!(target: "tiercall", id = %id, name = %target, "call target created");
        Ok(target)
    }

    pub fn target(&self, id: TargetId) -> Option<Arc<CallTarget>> {
        self.targets.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    /// Remove a target from the arena. It is freed once the last caller
    /// drops its handle.
    pub fn release(&self, id: TargetId) -> Option<Arc<CallTarget>> {
        self.targets.remove(&id).map(|(_, target)| target)
    }

    // ------------------------------------------------------------------
    // Policy queries and hooks used by call targets
    // ------------------------------------------------------------------

    /// Whether a unit may ever be compiled
    pub fn accept_for_compilation(&self, unit: &dyn ExecutableUnit) -> bool {
        self.options.compilation_enabled
            && unit.is_compilable()
            && self.options.accepts_name(unit.name())
    }

    pub fn on_first_execution(&self, target: &CallTarget) {
        trace!(target: "tiercall", name = %target, "first execution");
        self.listener.on_first_execution(target);
    }

    /// Create and enqueue a compilation task. Called under the target lock,
    /// so this must not call back into the target's locked state.
    pub fn submit_for_compilation(&self, target: &Arc<CallTarget>) -> Arc<CompilationTask> {
        self.scheduler.submit(target)
    }

    /// Drive a submitted task. Blocks until it finishes unless
    /// `may_be_async` and a worker pool is running.
    pub fn finish_compilation(
        &self,
        target: &Arc<CallTarget>,
        task: &Arc<CompilationTask>,
        may_be_async: bool,
    ) -> Option<TaskOutcome> {
        self.scheduler.finish(target, task, may_be_async)
    }

    /// Cancel the target's in-flight task, if any. Returns true only if this
    /// call actually cancelled it.
    pub fn cancel_installed_task(&self, target: &CallTarget, cause: Option<&str>, reason: &str) -> bool {
        let Some(task) = target.compilation_task() else {
            return false;
        };
        if !task.cancel() {
            return false;
        }
        // A running backend keeps the handle until its worker exits
        if task.is_done() {
            target.reset_compilation_task(&task);
        }
        debug!(
            target: "tiercall",
            name = %target,
            task = %task.id(),
            cause = cause.unwrap_or("-"),
            reason,
            "compilation cancelled"
        );
        self.listener.on_cancelled(target, reason);
        true
    }

    /// Invalidate the target's current artifact. Returns true if a valid
    /// artifact was invalidated by this call.
    pub fn invalidate_installed_code(&self, target: &CallTarget, cause: Option<&str>, reason: &str) -> bool {
        let Some(artifact) = target.artifact_slot().invalidate(reason) else {
            return false;
        };
        self.report_invalidated(target, &artifact, cause, reason);
        true
    }

    pub(crate) fn report_invalidated(
        &self,
        target: &CallTarget,
        artifact: &InstalledArtifact,
        cause: Option<&str>,
        reason: &str,
    ) {
        debug!(
            target: "tiercall",
            name = %target,
            artifact = %artifact.id(),
            cause = cause.unwrap_or("-"),
            reason,
            "optimized code invalidated"
        );
        self.listener.on_invalidated(target, cause, reason);
    }

    /// Called when a target runs interpreted although optimized code is
    /// installed, i.e. the caller raced an install
    pub fn reinstall_stubs(&self, target: &CallTarget) {
        self.stub_reinstalls.fetch_add(1, Ordering::Relaxed);
        trace!(target: "tiercall", name = %target, "dispatch stubs reinstalled");
    }

    pub fn stub_reinstall_count(&self) -> u64 {
        self.stub_reinstalls.load(Ordering::Relaxed)
    }

    pub fn log(&self, message: &str) {
        info!(target: "tiercall", "{}", message);
    }

    pub fn handle_fatal(&self, error: &FatalCompilationError) {
        (self.fatal_handler)(error);
    }

    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// Stop compiling, drain the worker pool and drop every target
    ///
    /// Must not be called from a compiler worker thread.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.scheduler.shutdown();
        let released = self.targets.len();
        self.targets.clear();
        info!(target: "tiercall", released, "runtime shut down");
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("backend", &self.backend.name())
            .field("targets", &self.targets.len())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
