//! The counting profile: call and loop counters against thresholds, plus
//! argument, return and exception profiling.
//!
//! Compilation fires once both the interpreted call count reaches the call
//! threshold and the combined call + loop count reaches its own threshold.
//! Invalidations and node replacements push both thresholds past the current
//! counts so that a target re-profiles for a while before it is compiled
//! again.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::Mutex;

use super::exceptions::{ExceptionObservation, ExceptionProfile};
use super::shape::{ArgumentProfile, ShapeObservation, ShapeSlot, SlotState};
use crate::runtime::debug::{put, DebugProperties};
use crate::runtime::error::CompilationFailure;
use crate::runtime::options::RuntimeOptions;
use crate::runtime::value::{Exception, Value};

/// Counting profile for one call target
///
/// # Thread Safety
///
/// Counters are plain relaxed atomics. Racing increments only move the
/// point at which the threshold fires by a call or two; the target's
/// double-checked submission keeps that from producing duplicate compiles.
#[derive(Debug)]
pub struct DefaultProfile {
    call_count: AtomicU32,
    call_and_loop_count: AtomicU32,
    inlined_call_count: AtomicU32,

    call_threshold: AtomicU32,
    call_and_loop_threshold: AtomicU32,
    invalidation_reprofile_count: u32,
    replace_reprofile_count: u32,

    /// Set by a permanent compilation failure, never cleared
    failed: AtomicBool,
    failure_count: AtomicU32,
    transient_bailout_count: AtomicU32,
    invalidation_count: AtomicU32,
    node_replaced_count: AtomicU32,
    last_failure: Mutex<Option<String>>,

    arguments: ArgumentProfile,
    return_value: ShapeSlot,
    exceptions: ExceptionProfile,
}

impl DefaultProfile {
    pub fn new(options: &RuntimeOptions) -> Self {
        Self {
            call_count: AtomicU32::new(0),
            call_and_loop_count: AtomicU32::new(0),
            inlined_call_count: AtomicU32::new(0),
            call_threshold: AtomicU32::new(options.min_invokes_threshold),
            call_and_loop_threshold: AtomicU32::new(options.compilation_threshold),
            invalidation_reprofile_count: options.invalidation_reprofile_count,
            replace_reprofile_count: options.replace_reprofile_count,
            failed: AtomicBool::new(false),
            failure_count: AtomicU32::new(0),
            transient_bailout_count: AtomicU32::new(0),
            invalidation_count: AtomicU32::new(0),
            node_replaced_count: AtomicU32::new(0),
            last_failure: Mutex::new(None),
            arguments: ArgumentProfile::new(),
            return_value: ShapeSlot::new(),
            exceptions: ExceptionProfile::new(options.hot_exception_threshold),
        }
    }

    /// Count an interpreted call. Calls dispatched to installed code are not
    /// counted. Returns true if the target should now be compiled.
    #[inline]
    pub fn interpreter_call(&self, installed: bool) -> bool {
        if installed {
            return false;
        }
        saturating_increment(&self.call_count, 1);
        saturating_increment(&self.call_and_loop_count, 1);
        self.should_compile()
    }

    pub fn profile_arguments(&self, args: &[Value]) -> ShapeObservation {
        self.arguments.observe(args)
    }

    pub fn profile_inlined_call(&self) {
        saturating_increment(&self.inlined_call_count, 1);
    }

    pub fn report_loop_count(&self, count: u32) {
        saturating_increment(&self.call_and_loop_count, count);
    }

    #[inline]
    pub fn should_compile(&self) -> bool {
        !self.failed.load(Ordering::Relaxed)
            && self.call_count.load(Ordering::Relaxed) >= self.call_threshold.load(Ordering::Relaxed)
            && self.call_and_loop_count.load(Ordering::Relaxed)
                >= self.call_and_loop_threshold.load(Ordering::Relaxed)
    }

    /// Returns true if this value made a stable return profile unstable
    pub fn profile_return_value(&self, value: &Value) -> bool {
        self.return_value.observe(value.shape()) == ShapeObservation::Destabilized
    }

    /// Check a value returned by installed code against the return profile.
    ///
    /// Unlike [`DefaultProfile::profile_return_value`] this never pins an
    /// unobserved slot. Returns true if the value contradicted the profile.
    pub fn inject_return_value_profile(&self, value: &Value) -> bool {
        match self.return_value.state() {
            SlotState::Stable(shape) if shape != value.shape() => {
                self.return_value.destabilize() == ShapeObservation::Destabilized
            }
            _ => false,
        }
    }

    pub fn profile_exception(&self, exception: &Exception) -> ExceptionObservation {
        self.exceptions.record(exception)
    }

    pub fn report_compilation_failure(&self, failure: &CompilationFailure) {
        self.failed.store(true, Ordering::Relaxed);
        saturating_increment(&self.failure_count, 1);
        *self.last_failure.lock() = Some(failure.to_string());
    }

    pub fn report_transient_bailout(&self) {
        saturating_increment(&self.transient_bailout_count, 1);
        self.ensure_profiling(self.invalidation_reprofile_count, self.invalidation_reprofile_count);
    }

    pub fn report_invalidated(&self) {
        saturating_increment(&self.invalidation_count, 1);
        self.ensure_profiling(self.invalidation_reprofile_count, self.invalidation_reprofile_count);
    }

    pub fn report_node_replaced(&self) {
        saturating_increment(&self.node_replaced_count, 1);
        self.ensure_profiling(1, self.replace_reprofile_count);
    }

    /// Require at least `calls` more calls and `calls_and_loops` more calls +
    /// loop iterations before the next compilation fires
    fn ensure_profiling(&self, calls: u32, calls_and_loops: u32) {
        let calls_floor = self.call_count.load(Ordering::Relaxed).saturating_add(calls);
        self.call_threshold.fetch_max(calls_floor, Ordering::Relaxed);

        let loops_floor = self
            .call_and_loop_count
            .load(Ordering::Relaxed)
            .saturating_add(calls_and_loops);
        self.call_and_loop_threshold
            .fetch_max(loops_floor, Ordering::Relaxed);
    }

    pub fn reset_argument_profile(&self) {
        self.arguments.reset();
    }

    pub fn arguments(&self) -> &ArgumentProfile {
        &self.arguments
    }

    pub fn return_shape(&self) -> SlotState {
        self.return_value.state()
    }

    pub fn exceptions(&self) -> &ExceptionProfile {
        &self.exceptions
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn call_and_loop_count(&self) -> u32 {
        self.call_and_loop_count.load(Ordering::Relaxed)
    }

    pub fn inlined_call_count(&self) -> u32 {
        self.inlined_call_count.load(Ordering::Relaxed)
    }

    pub fn call_threshold(&self) -> u32 {
        self.call_threshold.load(Ordering::Relaxed)
    }

    pub fn call_and_loop_threshold(&self) -> u32 {
        self.call_and_loop_threshold.load(Ordering::Relaxed)
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Relaxed)
    }

    pub fn transient_bailout_count(&self) -> u32 {
        self.transient_bailout_count.load(Ordering::Relaxed)
    }

    pub fn invalidation_count(&self) -> u32 {
        self.invalidation_count.load(Ordering::Relaxed)
    }

    pub fn node_replaced_count(&self) -> u32 {
        self.node_replaced_count.load(Ordering::Relaxed)
    }

    pub fn debug_properties(&self, props: &mut DebugProperties) {
        put(props, "call_count", self.call_count());
        put(props, "call_and_loop_count", self.call_and_loop_count());
        put(props, "inlined_call_count", self.inlined_call_count());
        put(props, "call_threshold", self.call_threshold());
        put(props, "call_and_loop_threshold", self.call_and_loop_threshold());
        put(props, "compilation_failed", self.is_failed());
        put(props, "failure_count", self.failure_count());
        put(props, "transient_bailout_count", self.transient_bailout_count());
        put(props, "invalidation_count", self.invalidation_count());
        put(props, "node_replaced_count", self.node_replaced_count());
        if let Some(failure) = self.last_failure.lock().clone() {
            put(props, "last_failure", failure);
        }

        let argument_shapes = match self.arguments.states() {
            Some(states) => states.into_iter().map(SlotState::label).collect(),
            None => vec!["arity-mismatch".to_string()],
        };
        put(props, "argument_shapes", argument_shapes);
        put(props, "return_shape", self.return_shape().label());

        let exceptions: Vec<String> = self
            .exceptions
            .categories()
            .into_iter()
            .map(|(category, count)| format!("{}={}", category, count))
            .collect();
        put(props, "exceptions", exceptions);
        put(props, "hot_exceptions", self.exceptions.hot_categories());
    }
}

#[inline]
fn saturating_increment(counter: &AtomicU32, amount: u32) {
    // Relaxed read-modify-write; a lost update only delays the threshold
    let current = counter.load(Ordering::Relaxed);
    counter.store(current.saturating_add(amount), Ordering::Relaxed);
}
