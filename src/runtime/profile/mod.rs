//! Per-target compilation profiles
//!
//! A target picks its profile kind once, at initialization:
//!
//! - [`CompilationProfile::Void`] for units that are never compiled: records
//!   nothing and never fires
//! - [`CompilationProfile::Default`] for ordinary targets: counters against
//!   thresholds plus type and exception profiling
//! - [`CompilationProfile::Tracing`] when `call_target_profiling` is on: the
//!   default profile plus a log line per event
//!
//! All three share one capability surface, so the call target never needs to
//! know which one it holds.

mod counting;
mod exceptions;
mod shape;
mod trace;

pub use counting::DefaultProfile;
pub use exceptions::{ExceptionObservation, ExceptionProfile};
pub use shape::{ArgumentProfile, ShapeObservation, ShapeSlot, SlotState};
pub use trace::TracingProfile;

use super::debug::{put, DebugProperties};
use super::error::CompilationFailure;
use super::options::RuntimeOptions;
use super::value::{Exception, Value};

/// Outcome of profiling one direct call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirectCallObservation {
    /// The compile threshold is reached
    pub should_compile: bool,
    /// An argument slot went generic on this call
    pub arguments_destabilized: bool,
}

/// Profile facts handed to the compiler backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileSnapshot {
    /// Per-argument shapes, `None` when the arity was not stable
    pub argument_shapes: Option<Vec<SlotState>>,
    pub return_shape: SlotState,
    pub hot_exceptions: Vec<String>,
    pub call_count: u32,
    pub call_and_loop_count: u32,
}

impl ProfileSnapshot {
    /// The snapshot of a target that records nothing
    pub fn empty() -> Self {
        Self {
            argument_shapes: None,
            return_shape: SlotState::Unobserved,
            hot_exceptions: Vec::new(),
            call_count: 0,
            call_and_loop_count: 0,
        }
    }

    /// Stable shape of argument `index`, if any
    pub fn argument_shape(&self, index: usize) -> SlotState {
        match &self.argument_shapes {
            Some(shapes) => shapes.get(index).copied().unwrap_or(SlotState::Unobserved),
            None => SlotState::Unstable,
        }
    }
}

/// Profile kind label used in debug properties
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileKind {
    Void,
    Default,
    Tracing,
}

impl ProfileKind {
    pub fn name(self) -> &'static str {
        match self {
            ProfileKind::Void => "void",
            ProfileKind::Default => "default",
            ProfileKind::Tracing => "tracing",
        }
    }
}

#[derive(Debug)]
pub enum CompilationProfile {
    Void,
    Default(DefaultProfile),
    Tracing(TracingProfile),
}

impl CompilationProfile {
    /// Select the profile kind for a target
    pub fn select(name: &str, accepted: bool, options: &RuntimeOptions) -> Self {
        if !accepted {
            CompilationProfile::Void
        } else if options.call_target_profiling {
            CompilationProfile::Tracing(TracingProfile::new(name, options))
        } else {
            CompilationProfile::Default(DefaultProfile::new(options))
        }
    }

    pub fn kind(&self) -> ProfileKind {
        match self {
            CompilationProfile::Void => ProfileKind::Void,
            CompilationProfile::Default(_) => ProfileKind::Default,
            CompilationProfile::Tracing(_) => ProfileKind::Tracing,
        }
    }

    /// The counting state, absent for the void profile
    pub fn counting(&self) -> Option<&DefaultProfile> {
        match self {
            CompilationProfile::Void => None,
            CompilationProfile::Default(p) => Some(p),
            CompilationProfile::Tracing(p) => Some(p.counting()),
        }
    }

    /// Record an ordinary call. Returns true if the target should compile.
    #[inline]
    pub fn profile_indirect_call(&self, installed: bool) -> bool {
        match self {
            CompilationProfile::Void => false,
            CompilationProfile::Default(p) => p.interpreter_call(installed),
            CompilationProfile::Tracing(p) => p.record_indirect_call(installed),
        }
    }

    /// Record a direct call, profiling the argument shapes of the call site
    pub fn profile_direct_call(&self, args: &[Value], installed: bool) -> DirectCallObservation {
        match self {
            CompilationProfile::Void => DirectCallObservation::default(),
            CompilationProfile::Default(p) => DirectCallObservation {
                arguments_destabilized: p.profile_arguments(args) == ShapeObservation::Destabilized,
                should_compile: p.interpreter_call(installed),
            },
            CompilationProfile::Tracing(p) => DirectCallObservation {
                arguments_destabilized: p.profile_arguments(args) == ShapeObservation::Destabilized,
                should_compile: p.record_direct_call(installed),
            },
        }
    }

    pub fn profile_inlined_call(&self) {
        match self {
            CompilationProfile::Void => {}
            CompilationProfile::Default(p) => p.profile_inlined_call(),
            CompilationProfile::Tracing(p) => p.profile_inlined_call(),
        }
    }

    pub fn report_loop_count(&self, count: u32) {
        match self {
            CompilationProfile::Void => {}
            CompilationProfile::Default(p) => p.report_loop_count(count),
            CompilationProfile::Tracing(p) => p.report_loop_count(count),
        }
    }

    pub fn should_compile(&self) -> bool {
        self.counting().is_some_and(DefaultProfile::should_compile)
    }

    /// Returns true if the return profile went generic
    pub fn profile_return_value(&self, value: &Value) -> bool {
        match self {
            CompilationProfile::Void => false,
            CompilationProfile::Default(p) => p.profile_return_value(value),
            CompilationProfile::Tracing(p) => p.profile_return_value(value),
        }
    }

    pub fn inject_return_value_profile(&self, value: &Value) -> bool {
        match self {
            CompilationProfile::Void => false,
            CompilationProfile::Default(p) => p.inject_return_value_profile(value),
            CompilationProfile::Tracing(p) => p.inject_return_value_profile(value),
        }
    }

    pub fn profile_exception(&self, exception: &Exception) {
        match self {
            CompilationProfile::Void => {}
            CompilationProfile::Default(p) => {
                p.profile_exception(exception);
            }
            CompilationProfile::Tracing(p) => {
                p.profile_exception(exception);
            }
        }
    }

    pub fn report_compilation_failure(&self, failure: &CompilationFailure) {
        match self {
            CompilationProfile::Void => {}
            CompilationProfile::Default(p) => p.report_compilation_failure(failure),
            CompilationProfile::Tracing(p) => p.report_compilation_failure(failure),
        }
    }

    pub fn report_transient_bailout(&self) {
        match self {
            CompilationProfile::Void => {}
            CompilationProfile::Default(p) => p.report_transient_bailout(),
            CompilationProfile::Tracing(p) => p.report_transient_bailout(),
        }
    }

    pub fn report_invalidated(&self) {
        match self {
            CompilationProfile::Void => {}
            CompilationProfile::Default(p) => p.report_invalidated(),
            CompilationProfile::Tracing(p) => p.report_invalidated(),
        }
    }

    pub fn report_node_replaced(&self) {
        match self {
            CompilationProfile::Void => {}
            CompilationProfile::Default(p) => p.report_node_replaced(),
            CompilationProfile::Tracing(p) => p.report_node_replaced(),
        }
    }

    pub fn reset_argument_profile(&self) {
        if let Some(p) = self.counting() {
            p.reset_argument_profile();
        }
    }

    pub fn snapshot(&self) -> ProfileSnapshot {
        match self.counting() {
            None => ProfileSnapshot::empty(),
            Some(p) => ProfileSnapshot {
                argument_shapes: p.arguments().states(),
                return_shape: p.return_shape(),
                hot_exceptions: p.exceptions().hot_categories(),
                call_count: p.call_count(),
                call_and_loop_count: p.call_and_loop_count(),
            },
        }
    }

    pub fn debug_properties(&self, props: &mut DebugProperties) {
        put(props, "profile", self.kind().name());
        match self {
            CompilationProfile::Void => {}
            CompilationProfile::Default(p) => p.debug_properties(props),
            CompilationProfile::Tracing(p) => p.debug_properties(props),
        }
    }
}
