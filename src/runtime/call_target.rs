//! Call targets: the invocable unit of the runtime
//!
//! A call target wraps one [`ExecutableUnit`] and moves through
//!
//! ```text
//! Uninitialized ──first call──> Initialized(profile kind)
//!        Interpreting ⇄ Compiling ──install──> Optimized
//!        Optimized ──invalidate / deopt──> Interpreting (and maybe Compiling again)
//! ```
//!
//! Calls never wait for compilation. Every call runs whatever is valid at
//! the moment it dispatches: the installed artifact if there is one,
//! otherwise the interpreter. Compilation management errors never reach a
//! caller of `call`; application exceptions reach it unchanged.

use std::backtrace::Backtrace;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::artifact::{ArtifactSlot, ArtifactState, CodeExit, CompiledCode, InstalledArtifact};
use super::backend::CompilationRequest;
use super::debug::{put, to_toml, DebugProperties};
use super::error::{CompilationError, CompilationFailure, FatalCompilationError, OptimizationFailed, TargetError};
use super::frame::Frame;
use super::profile::CompilationProfile;
use super::registry::Runtime;
use super::speculation::{SpeculationId, SpeculationLog};
use super::task::{CompilationTask, TaskOutcome};
use super::unit::{ExecutableUnit, UnitObserver};
use super::value::{Exception, Value};

static VOID_PROFILE: CompilationProfile = CompilationProfile::Void;

/// Stable arena identifier of a call target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub u64);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "target#{}", self.0)
    }
}

/// Which tier executed a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionTier {
    Interpreted,
    Optimized,
}

/// State guarded by the per-target lock
#[derive(Default)]
struct TargetState {
    compilation_task: Option<Arc<CompilationTask>>,
    known_call_sites: u32,
    speculation_log: Option<Arc<SpeculationLog>>,
}

pub struct CallTarget {
    runtime: Arc<Runtime>,
    id: TargetId,
    /// Source target and split number, for clones
    source: Option<(TargetId, u32)>,
    root: Arc<dyn ExecutableUnit>,

    initialized: AtomicBool,
    init_lock: Mutex<()>,
    profile: OnceLock<CompilationProfile>,
    /// Pristine copy of the unit taken before its first execution
    uninitialized_root: OnceLock<Arc<dyn ExecutableUnit>>,

    /// Cached non-trivial node count, -1 when unknown
    node_count: AtomicI64,
    state: Mutex<TargetState>,
    /// Lock-free mirror of `state.compilation_task.is_some()`
    compiling: AtomicBool,
    /// Bumped on every node replacement; results compiled against an older
    /// version are discarded
    structure_version: AtomicU64,
    artifact: ArtifactSlot,
    splits: AtomicU32,

    interpreted_calls: AtomicU64,
    optimized_calls: AtomicU64,
    deoptimizations: AtomicU64,
}

impl CallTarget {
    pub(crate) fn new(
        runtime: Arc<Runtime>,
        id: TargetId,
        source: Option<(TargetId, u32)>,
        root: Arc<dyn ExecutableUnit>,
    ) -> Self {
        Self {
            runtime,
            id,
            source,
            root,
            initialized: AtomicBool::new(false),
            init_lock: Mutex::new(()),
            profile: OnceLock::new(),
            uninitialized_root: OnceLock::new(),
            node_count: AtomicI64::new(-1),
            state: Mutex::new(TargetState::default()),
            compiling: AtomicBool::new(false),
            structure_version: AtomicU64::new(0),
            artifact: ArtifactSlot::new(),
            splits: AtomicU32::new(0),
            interpreted_calls: AtomicU64::new(0),
            optimized_calls: AtomicU64::new(0),
            deoptimizations: AtomicU64::new(0),
        }
    }

    // ========================================================================
    // Identity
    // ========================================================================

    pub fn id(&self) -> TargetId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.root.name()
    }

    pub fn root(&self) -> &Arc<dyn ExecutableUnit> {
        &self.root
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// The target this one was split from; `None` for a source target
    pub fn source_id(&self) -> Option<TargetId> {
        self.source.map(|(id, _)| id)
    }

    pub fn source(&self) -> Option<Arc<CallTarget>> {
        self.source_id().and_then(|id| self.runtime.target(id))
    }

    pub fn is_split(&self) -> bool {
        self.source.is_some()
    }

    pub(crate) fn next_split_index(&self) -> u32 {
        self.splits.fetch_add(1, Ordering::Relaxed) + 1
    }

    // ========================================================================
    // Initialization
    // ========================================================================

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    #[inline]
    fn ensure_initialized(&self) {
        if !self.initialized.load(Ordering::Acquire) {
            self.initialize();
        }
    }

    fn initialize(&self) {
        let _guard = self.init_lock.lock();
        if self.initialized.load(Ordering::Acquire) {
            return;
        }

        let options = self.runtime.options();
        let accepted = self.runtime.accept_for_compilation(self.root.as_ref());
        let _ = self
            .profile
            .set(CompilationProfile::select(self.name(), accepted, options));

        if self.source.is_none() && self.root.is_cloning_allowed() {
            if let Some(copy) = self.root.duplicate() {
                let _ = self.uninitialized_root.set(copy);
            }
        }

        self.initialized.store(true, Ordering::Release);
        self.runtime.on_first_execution(self);
    }

    /// The profile; the void profile until the target is initialized
    pub fn profile(&self) -> &CompilationProfile {
        self.profile.get().unwrap_or(&VOID_PROFILE)
    }

    // ========================================================================
    // Calls
    // ========================================================================

    /// An ordinary (indirect) call
    pub fn call(self: &Arc<Self>, args: &[Value]) -> Result<Value, Exception> {
        self.ensure_initialized();
        if self.profile().profile_indirect_call(self.artifact.is_valid()) {
            self.compile_from_call();
        }
        self.call_boundary(args).1
    }

    /// A call from a call site bound to this target
    ///
    /// Profiles argument shapes and classifies raised exceptions before
    /// returning them unchanged.
    pub fn call_direct(self: &Arc<Self>, args: &[Value]) -> Result<Value, Exception> {
        self.ensure_initialized();
        let profile = self.profile();
        let observation = profile.profile_direct_call(args, self.artifact.is_valid());
        if observation.arguments_destabilized {
            self.invalidate_for_profile_change("argument profile changed");
        }
        if observation.should_compile {
            self.compile_from_call();
        }

        let (tier, result) = self.call_boundary(args);
        match &result {
            Ok(value) if tier == ExecutionTier::Optimized => {
                if profile.inject_return_value_profile(value) {
                    self.invalidate_for_profile_change("return profile changed");
                }
            }
            Ok(_) => {}
            Err(exception) => profile.profile_exception(exception),
        }
        result
    }

    /// A call whose body was inlined into the caller: runs the unit directly
    /// against a fresh frame without going through the call boundary
    pub fn call_inlined(&self, args: &[Value]) -> Result<Value, Exception> {
        self.ensure_initialized();
        self.profile().profile_inlined_call();
        let mut frame = Frame::new(self.root.frame_descriptor(), args);
        self.root.execute(&mut frame)
    }

    /// Dispatch to installed code if it is valid, otherwise interpret
    pub fn call_boundary(&self, args: &[Value]) -> (ExecutionTier, Result<Value, Exception>) {
        if let Some(artifact) = self.artifact.valid() {
            let mut frame = Frame::new(self.root.frame_descriptor(), args);
            match artifact.code().execute(&mut frame) {
                Ok(value) => {
                    self.optimized_calls.fetch_add(1, Ordering::Relaxed);
                    return (ExecutionTier::Optimized, Ok(value));
                }
                Err(CodeExit::Raised(exception)) => {
                    self.optimized_calls.fetch_add(1, Ordering::Relaxed);
                    return (ExecutionTier::Optimized, Err(exception));
                }
                Err(CodeExit::Deoptimize(speculation)) => {
                    self.deoptimize(&artifact, speculation);
                }
            }
        }
        (ExecutionTier::Interpreted, self.call_root(args))
    }

    fn call_root(&self, args: &[Value]) -> Result<Value, Exception> {
        if self.artifact.is_valid() {
            // Raced an install; later calls take the optimized path
            self.runtime.reinstall_stubs(self);
        }
        self.interpreted_calls.fetch_add(1, Ordering::Relaxed);

        let mut frame = Frame::new(self.root.frame_descriptor(), args);
        let result = self.root.execute(&mut frame);
        if let Ok(value) = &result {
            if self.profile().profile_return_value(value) {
                self.invalidate_for_profile_change("return profile changed");
            }
        }
        result
    }

    /// Compiled code hit a failed speculation: remember it, drop the code and
    /// let the interpreter redo the call
    fn deoptimize(&self, artifact: &InstalledArtifact, speculation: SpeculationId) {
        self.deoptimizations.fetch_add(1, Ordering::Relaxed);
        let reason = format!("speculation failed: {}", speculation);
        self.speculation_log().record_failure(speculation);

        self.node_count.store(-1, Ordering::Relaxed);
        if self.artifact.invalidate_if_current(artifact.id(), &reason) {
            self.runtime.report_invalidated(self, artifact, None, &reason);
            self.profile().report_invalidated();
        }
    }

    fn invalidate_for_profile_change(&self, reason: &str) {
        if self.artifact.is_valid() {
            self.invalidate(None, reason);
        }
    }

    // ========================================================================
    // Compilation
    // ========================================================================

    /// True iff a compilation task is in flight
    #[inline]
    pub fn is_compiling(&self) -> bool {
        self.compiling.load(Ordering::Acquire)
    }

    pub fn compilation_task(&self) -> Option<Arc<CompilationTask>> {
        self.state.lock().compilation_task.clone()
    }

    /// Clear the task handle if `task` is still the stored one
    pub(crate) fn reset_compilation_task(&self, task: &Arc<CompilationTask>) {
        let mut state = self.state.lock();
        if state
            .compilation_task
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, task))
        {
            state.compilation_task = None;
            self.compiling.store(false, Ordering::Release);
        }
    }

    /// Request compilation of this target
    ///
    /// A no-op while a compilation is in flight. Blocks until the compilation
    /// finished when background compilation is off or compilation exceptions
    /// are thrown; the latter is the only way this returns an error.
    pub fn compile(self: &Arc<Self>) -> Result<(), OptimizationFailed> {
        if self.is_compiling() {
            return Ok(());
        }
        self.ensure_initialized();
        if matches!(self.profile(), CompilationProfile::Void) || self.runtime.is_shut_down() {
            return Ok(());
        }

        let task = {
            let mut state = self.state.lock();
            if state.compilation_task.is_some() {
                return Ok(());
            }
            let task = self.runtime.submit_for_compilation(self);
            state.compilation_task = Some(Arc::clone(&task));
            self.compiling.store(true, Ordering::Release);
            task
        };
        self.runtime.listener().on_compilation_queued(self, &task);

        let may_be_async = self.runtime.options().may_be_asynchronous();
        let outcome = self.runtime.finish_compilation(self, &task, may_be_async);
        if task.is_done() {
            self.reset_compilation_task(&task);
        }
        match outcome {
            Some(TaskOutcome::Failed { thrown: Some(error) }) => Err(error),
            _ => Ok(()),
        }
    }

    fn compile_from_call(self: &Arc<Self>) {
        if let Err(error) = self.compile() {
            warn!(target: "tiercall", name = %self, %error, "compilation failed, continuing interpreted");
        }
    }

    pub(crate) fn compilation_request(&self) -> CompilationRequest {
        CompilationRequest {
            target: self.id,
            name: self.to_string(),
            unit: Arc::clone(&self.root),
            speculation_log: self.speculation_log(),
            profile: self.profile().snapshot(),
        }
    }

    pub(crate) fn structure_version(&self) -> u64 {
        self.structure_version.load(Ordering::Acquire)
    }

    /// Install a backend result for `task`, unless the task was cancelled or
    /// the unit changed since it was submitted
    pub(crate) fn install_compiled(&self, task: &CompilationTask, code: Arc<dyn CompiledCode>) -> TaskOutcome {
        let (artifact, previous) = {
            let _state = self.state.lock();
            if task.structure_version() != self.structure_version() {
                return if task.try_complete() {
                    debug!(target: "tiercall", name = %self, "unit changed during compilation, result discarded");
                    TaskOutcome::Discarded
                } else {
                    TaskOutcome::Cancelled
                };
            }
            if !task.try_complete() {
                return TaskOutcome::Cancelled;
            }
            let artifact = Arc::new(InstalledArtifact::new(code));
            let previous = self.artifact.install(Arc::clone(&artifact));
            (artifact, previous)
        };

        if let Some(previous) = previous {
            previous.invalidate("superseded");
        }
        debug!(
            target: "tiercall",
            name = %self,
            artifact = %artifact.id(),
            code_size = artifact.code_size(),
            "optimized code installed"
        );
        self.runtime.listener().on_compilation_success(self, &artifact);
        TaskOutcome::Installed(artifact.id())
    }

    /// Route a backend failure according to policy
    ///
    /// Transient bailouts only push the next compile attempt out. Permanent
    /// failures are recorded in the profile and then returned as
    /// [`CompilationError::Thrown`], dumped and returned as
    /// [`CompilationError::Fatal`], or logged.
    pub fn notify_compilation_failed(&self, failure: &CompilationFailure) -> Result<(), CompilationError> {
        self.runtime.listener().on_compilation_failed(self, failure);
        if !failure.is_permanent() {
            debug!(target: "tiercall", name = %self, %failure, "transient bailout, will retry");
            self.profile().report_transient_bailout();
            return Ok(());
        }

        self.profile().report_compilation_failure(failure);
        let options = self.runtime.options();
        if options.compilation_exceptions_are_thrown {
            return Err(CompilationError::Thrown(OptimizationFailed::new(
                self.to_string(),
                failure.clone(),
            )));
        }

        let fatal = options.compilation_exceptions_are_fatal();
        if fatal || options.compilation_exceptions_are_printed {
            let dump = self.failure_dump(failure);
            self.runtime.log(&dump);
            if fatal {
                return Err(CompilationError::Fatal(FatalCompilationError {
                    target: self.to_string(),
                    failure: failure.clone(),
                    dump,
                }));
            }
        } else {
            warn!(target: "tiercall", name = %self, %failure, "compilation failed");
        }
        Ok(())
    }

    fn failure_dump(&self, failure: &CompilationFailure) -> String {
        let properties = to_toml(&self.debug_properties()).unwrap_or_else(|e| e.to_string());
        format!(
            "compilation of {} failed ({}): {}\n{}\n{}",
            self,
            failure.kind(),
            failure,
            properties,
            Backtrace::force_capture()
        )
    }

    // ========================================================================
    // Optimized code
    // ========================================================================

    pub fn artifact_state(&self) -> ArtifactState {
        self.artifact.state()
    }

    pub fn is_valid(&self) -> bool {
        self.artifact.is_valid()
    }

    pub fn installed_artifact(&self) -> Option<Arc<InstalledArtifact>> {
        self.artifact.load()
    }

    pub(crate) fn artifact_slot(&self) -> &ArtifactSlot {
        &self.artifact
    }

    /// Drop installed code, if any is valid. `source` and `reason` are
    /// advisory and only show up in diagnostics.
    pub fn invalidate(&self, source: Option<&str>, reason: &str) -> bool {
        self.node_count.store(-1, Ordering::Relaxed);
        if self.artifact.is_valid() && self.runtime.invalidate_installed_code(self, source, reason) {
            self.profile().report_invalidated();
            return true;
        }
        false
    }

    // ========================================================================
    // Splitting
    // ========================================================================

    /// Create a split: a new target running a pristine copy of this unit
    pub fn clone_uninitialized(self: &Arc<Self>) -> Result<Arc<CallTarget>, TargetError> {
        if self.source.is_some() {
            return Err(TargetError::CloneOfClone {
                target: self.to_string(),
            });
        }
        self.ensure_initialized();
        let copy = self
            .uninitialized_root
            .get()
            .and_then(|pristine| pristine.duplicate())
            .ok_or_else(|| TargetError::CloningNotAllowed {
                target: self.to_string(),
            })?;
        self.runtime.create_cloned_call_target(self, copy)
    }

    // ========================================================================
    // Administration
    // ========================================================================

    /// The speculation log, created on first use
    pub fn speculation_log(&self) -> Arc<SpeculationLog> {
        let mut state = self.state.lock();
        Arc::clone(state.speculation_log.get_or_insert_with(|| Arc::new(SpeculationLog::new())))
    }

    /// Replace the speculation log
    pub fn set_speculation_log(&self, log: Arc<SpeculationLog>) {
        self.state.lock().speculation_log = Some(log);
    }

    pub fn known_call_site_count(&self) -> u32 {
        self.state.lock().known_call_sites
    }

    pub fn increment_known_call_sites(&self) {
        let mut state = self.state.lock();
        state.known_call_sites = state.known_call_sites.saturating_add(1);
    }

    pub fn decrement_known_call_sites(&self) {
        let mut state = self.state.lock();
        state.known_call_sites = state.known_call_sites.saturating_sub(1);
    }

    /// Report loop iterations performed on behalf of this target
    pub fn report_loop_count(&self, count: u32) {
        self.profile().report_loop_count(count);
    }

    /// Number of non-trivial nodes in the unit, cached until invalidation
    pub fn non_trivial_node_count(&self) -> usize {
        let cached = self.node_count.load(Ordering::Relaxed);
        if cached >= 0 {
            return cached as usize;
        }
        let count = self.root.non_trivial_node_count();
        self.node_count.store(count as i64, Ordering::Relaxed);
        count
    }

    pub fn interpreted_call_count(&self) -> u64 {
        self.interpreted_calls.load(Ordering::Relaxed)
    }

    pub fn optimized_call_count(&self) -> u64 {
        self.optimized_calls.load(Ordering::Relaxed)
    }

    pub fn deoptimization_count(&self) -> u64 {
        self.deoptimizations.load(Ordering::Relaxed)
    }

    pub fn debug_properties(&self) -> DebugProperties {
        let mut props = DebugProperties::new();
        put(&mut props, "name", self.name());
        put(&mut props, "id", self.id.0);
        put(&mut props, "non_trivial_node_count", self.non_trivial_node_count());
        put(&mut props, "known_call_sites", self.known_call_site_count());
        put(&mut props, "compiling", self.is_compiling());
        put(&mut props, "artifact", self.artifact_state().name());
        if let Some(artifact) = self.artifact.load() {
            put(&mut props, "artifact_id", artifact.id().0);
            put(&mut props, "code_size", artifact.code_size());
        }
        put(&mut props, "interpreted_calls", self.interpreted_call_count());
        put(&mut props, "optimized_calls", self.optimized_call_count());
        put(&mut props, "deoptimizations", self.deoptimization_count());
        put(&mut props, "split", self.is_split());
        if let Some(source) = self.source_id() {
            put(&mut props, "source", source.0);
        }
        let log = self.state.lock().speculation_log.clone();
        let failed: Vec<String> = log
            .map(|log| log.failed_speculations().iter().map(ToString::to_string).collect())
            .unwrap_or_default();
        put(&mut props, "failed_speculations", failed);
        self.profile().debug_properties(&mut props);
        props
    }
}

impl UnitObserver for CallTarget {
    fn node_replaced(&self, _old: &dyn fmt::Debug, new: &dyn fmt::Debug, reason: &str) -> bool {
        {
            let _state = self.state.lock();
            self.structure_version.fetch_add(1, Ordering::AcqRel);
        }

        let cause = format!("{:?}", new);
        if self.artifact.is_valid() {
            self.invalidate(Some(&cause), reason);
        }
        self.profile().report_node_replaced();
        if self.runtime.cancel_installed_task(self, Some(&cause), reason) {
            self.profile().report_invalidated();
        }
        false
    }

    fn report_loop_count(&self, count: u32) {
        CallTarget::report_loop_count(self, count);
    }
}

impl fmt::Display for CallTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())?;
        if self.artifact.is_valid() {
            write!(f, " <opt>")?;
        }
        if let Some((_, split)) = self.source {
            write!(f, " <split-{}>", split)?;
        }
        Ok(())
    }
}

impl fmt::Debug for CallTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallTarget")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("source", &self.source_id())
            .field("artifact", &self.artifact_state())
            .field("compiling", &self.is_compiling())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::debug::DebugValue;
    use crate::runtime::RuntimeOptions;
    use crate::tree::{programs, TreeCompiler};

    fn add_target() -> (Arc<Runtime>, Arc<CallTarget>) {
        let runtime = Runtime::builder(Arc::new(TreeCompiler::new()))
            .options(RuntimeOptions::default().with_threshold(1000).synchronous())
            .build();
        let target = runtime
            .create_call_target(Arc::new(programs::add("add")))
            .unwrap();
        (runtime, target)
    }

    #[test]
    fn test_debug_properties_leave_speculation_log_unallocated() {
        let (runtime, target) = add_target();
        target.call(&[Value::Long(1), Value::Long(2)]).unwrap();

        let props = target.debug_properties();
        assert_eq!(props.get("failed_speculations"), Some(&DebugValue::List(Vec::new())));
        assert!(target.state.lock().speculation_log.is_none());

        target.speculation_log().record_failure(SpeculationId::new("add:arg0:long"));
        let props = target.debug_properties();
        assert_eq!(
            props.get("failed_speculations"),
            Some(&DebugValue::List(vec!["add:arg0:long".to_string()]))
        );
        runtime.shutdown();
    }
}
