//! Tracing profile: the counting profile plus one log line per profiling
//! event. Decisions are always delegated unchanged.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info};

use super::counting::DefaultProfile;
use super::exceptions::ExceptionObservation;
use super::shape::ShapeObservation;
use crate::runtime::debug::{put, DebugProperties};
use crate::runtime::error::CompilationFailure;
use crate::runtime::options::RuntimeOptions;
use crate::runtime::value::{Exception, Value};

const TRACE_TARGET: &str = "tiercall::profile";

#[derive(Debug)]
pub struct TracingProfile {
    name: String,
    inner: DefaultProfile,
    indirect_calls: AtomicU64,
    direct_calls: AtomicU64,
    inlined_calls: AtomicU64,
}

impl TracingProfile {
    pub fn new(name: impl Into<String>, options: &RuntimeOptions) -> Self {
        Self {
            name: name.into(),
            inner: DefaultProfile::new(options),
            indirect_calls: AtomicU64::new(0),
            direct_calls: AtomicU64::new(0),
            inlined_calls: AtomicU64::new(0),
        }
    }

    pub fn counting(&self) -> &DefaultProfile {
        &self.inner
    }

    pub fn record_indirect_call(&self, installed: bool) -> bool {
        let n = self.indirect_calls.fetch_add(1, Ordering::Relaxed) + 1;
        let fire = self.inner.interpreter_call(installed);
        debug!(
            target: TRACE_TARGET,
            "{}: indirect call #{} (installed={}, calls={}, fire={})",
            self.name,
            n,
            installed,
            self.inner.call_count(),
            fire
        );
        fire
    }

    pub fn record_direct_call(&self, installed: bool) -> bool {
        let n = self.direct_calls.fetch_add(1, Ordering::Relaxed) + 1;
        let fire = self.inner.interpreter_call(installed);
        debug!(
            target: TRACE_TARGET,
            "{}: direct call #{} (installed={}, calls={}, fire={})",
            self.name,
            n,
            installed,
            self.inner.call_count(),
            fire
        );
        fire
    }

    pub fn profile_arguments(&self, args: &[Value]) -> ShapeObservation {
        let observation = self.inner.profile_arguments(args);
        if observation == ShapeObservation::Destabilized {
            debug!(target: TRACE_TARGET, "{}: argument profile went generic", self.name);
        }
        observation
    }

    pub fn profile_inlined_call(&self) {
        let n = self.inlined_calls.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner.profile_inlined_call();
        debug!(target: TRACE_TARGET, "{}: inlined call #{}", self.name, n);
    }

    pub fn report_loop_count(&self, count: u32) {
        self.inner.report_loop_count(count);
        debug!(
            target: TRACE_TARGET,
            "{}: loop batch of {} (calls+loops={})",
            self.name,
            count,
            self.inner.call_and_loop_count()
        );
    }

    pub fn profile_return_value(&self, value: &Value) -> bool {
        let destabilized = self.inner.profile_return_value(value);
        if destabilized {
            debug!(target: TRACE_TARGET, "{}: return profile went generic", self.name);
        }
        destabilized
    }

    pub fn inject_return_value_profile(&self, value: &Value) -> bool {
        self.inner.inject_return_value_profile(value)
    }

    pub fn profile_exception(&self, exception: &Exception) -> ExceptionObservation {
        let observation = self.inner.profile_exception(exception);
        if observation.became_hot {
            info!(
                target: TRACE_TARGET,
                "{}: exception path {} is hot ({} occurrences)",
                self.name,
                exception.category(),
                observation.count
            );
        }
        observation
    }

    pub fn report_compilation_failure(&self, failure: &CompilationFailure) {
        self.inner.report_compilation_failure(failure);
        info!(target: TRACE_TARGET, "{}: compilation failed: {}", self.name, failure);
    }

    pub fn report_transient_bailout(&self) {
        self.inner.report_transient_bailout();
        info!(
            target: TRACE_TARGET,
            "{}: transient bailout, next attempt after {} calls",
            self.name,
            self.inner.call_threshold()
        );
    }

    pub fn report_invalidated(&self) {
        self.inner.report_invalidated();
        info!(
            target: TRACE_TARGET,
            "{}: invalidated (#{}), reprofiling until {} calls",
            self.name,
            self.inner.invalidation_count(),
            self.inner.call_threshold()
        );
    }

    pub fn report_node_replaced(&self) {
        self.inner.report_node_replaced();
        info!(
            target: TRACE_TARGET,
            "{}: node replaced (#{})",
            self.name,
            self.inner.node_replaced_count()
        );
    }

    pub fn debug_properties(&self, props: &mut DebugProperties) {
        self.inner.debug_properties(props);
        put(props, "traced_indirect_calls", self.indirect_calls.load(Ordering::Relaxed));
        put(props, "traced_direct_calls", self.direct_calls.load(Ordering::Relaxed));
        put(props, "traced_inlined_calls", self.inlined_calls.load(Ordering::Relaxed));
    }
}
