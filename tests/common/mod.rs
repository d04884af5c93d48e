//! Shared fixtures for the integration tests
//!
//! - Stub compiler backends with scripted behaviour
//! - A minimal executable unit
//! - A listener that records every lifecycle event
//! - A fatal handler that records instead of exiting
#![allow(dead_code)]

use std::any::Any;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tiercall::runtime::{
    CallTarget, CodeExit, CompilationFailure, CompilationRequest, CompilationTask, CompiledCode,
    CompilerBackend, Exception, ExecutableUnit, FatalCompilationError, FatalHandler, Frame,
    FrameDescriptor, InstalledArtifact, Runtime, RuntimeListener, RuntimeOptions, Value,
};

// ============================================================================
// Units
// ============================================================================

/// Sums its integer arguments. Raises `TypeError` on anything else.
#[derive(Debug)]
pub struct SumUnit {
    name: String,
    executions: AtomicU64,
}

impl SumUnit {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            executions: AtomicU64::new(0),
        })
    }

    /// Interpreter executions, i.e. calls that did not run optimized code
    pub fn executions(&self) -> u64 {
        self.executions.load(Ordering::SeqCst)
    }
}

impl ExecutableUnit for SumUnit {
    fn name(&self) -> &str {
        &self.name
    }

    fn frame_descriptor(&self) -> Arc<FrameDescriptor> {
        FrameDescriptor::empty()
    }

    fn execute(&self, frame: &mut Frame) -> Result<Value, Exception> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        sum_arguments(frame.arguments())
    }

    fn is_cloning_allowed(&self) -> bool {
        true
    }

    fn duplicate(&self) -> Option<Arc<dyn ExecutableUnit>> {
        Some(SumUnit::new(&self.name))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn sum_arguments(args: &[Value]) -> Result<Value, Exception> {
    let mut total = 0i64;
    for arg in args {
        match arg.as_long() {
            Some(n) => total += n,
            None => return Err(Exception::new("TypeError", format!("not a long: {}", arg))),
        }
    }
    Ok(Value::Long(total))
}

// ============================================================================
// Backends
// ============================================================================

/// What the stub backend does with every request
#[derive(Debug, Clone)]
pub enum StubMode {
    Succeed,
    Fail(CompilationFailure),
    Panic,
}

/// Optimized code produced by [`StubBackend`]: the same sum, without
/// touching the unit
pub struct StubCode;

impl CompiledCode for StubCode {
    fn execute(&self, frame: &mut Frame) -> Result<Value, CodeExit> {
        Ok(sum_arguments(frame.arguments())?)
    }
}

pub struct StubBackend {
    mode: Mutex<StubMode>,
    delay: Duration,
    compilations: AtomicU64,
    active: AtomicUsize,
    max_active: AtomicUsize,
    per_target: Mutex<Vec<String>>,
}

impl StubBackend {
    pub fn new(mode: StubMode) -> Arc<Self> {
        Self::with_delay(mode, Duration::ZERO)
    }

    pub fn with_delay(mode: StubMode, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(mode),
            delay,
            compilations: AtomicU64::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            per_target: Mutex::new(Vec::new()),
        })
    }

    pub fn succeeding() -> Arc<Self> {
        Self::new(StubMode::Succeed)
    }

    pub fn set_mode(&self, mode: StubMode) {
        *self.mode.lock() = mode;
    }

    pub fn compilations(&self) -> u64 {
        self.compilations.load(Ordering::SeqCst)
    }

    /// Highest number of backend calls observed running at once
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Names of the targets compiled, in call order
    pub fn compiled_names(&self) -> Vec<String> {
        self.per_target.lock().clone()
    }
}

impl CompilerBackend for StubBackend {
    fn compile(&self, request: &CompilationRequest) -> Result<Arc<dyn CompiledCode>, CompilationFailure> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        self.compilations.fetch_add(1, Ordering::SeqCst);
        self.per_target.lock().push(request.name.clone());

        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        let mode = self.mode.lock().clone();
        self.active.fetch_sub(1, Ordering::SeqCst);

        match mode {
            StubMode::Succeed => Ok(Arc::new(StubCode)),
            StubMode::Fail(failure) => Err(failure),
            StubMode::Panic => panic!("backend exploded"),
        }
    }

    fn name(&self) -> &str {
        "stub"
    }
}

// ============================================================================
// Listener and fatal handler
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    FirstExecution(String),
    Queued(String),
    Success(String),
    Failed(String, String),
    Invalidated(String, String),
    Cancelled(String, String),
}

#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<Event>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }

    fn push(&self, event: Event) {
        self.events.lock().push(event);
    }
}

impl RuntimeListener for RecordingListener {
    fn on_first_execution(&self, target: &CallTarget) {
        self.push(Event::FirstExecution(target.name().to_string()));
    }

    fn on_compilation_queued(&self, target: &CallTarget, _task: &CompilationTask) {
        self.push(Event::Queued(target.name().to_string()));
    }

    fn on_compilation_success(&self, target: &CallTarget, _artifact: &InstalledArtifact) {
        self.push(Event::Success(target.name().to_string()));
    }

    fn on_compilation_failed(&self, target: &CallTarget, failure: &CompilationFailure) {
        self.push(Event::Failed(target.name().to_string(), failure.kind().to_string()));
    }

    fn on_invalidated(&self, target: &CallTarget, _cause: Option<&str>, reason: &str) {
        self.push(Event::Invalidated(target.name().to_string(), reason.to_string()));
    }

    fn on_cancelled(&self, target: &CallTarget, reason: &str) {
        self.push(Event::Cancelled(target.name().to_string(), reason.to_string()));
    }
}

/// Fatal handler that records errors instead of terminating the process
pub fn recording_fatal_handler() -> (FatalHandler, Arc<Mutex<Vec<FatalCompilationError>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler: FatalHandler = Arc::new(move |err: &FatalCompilationError| {
        sink.lock().push(err.clone());
    });
    (handler, seen)
}

// ============================================================================
// Runtime helpers
// ============================================================================

pub fn runtime(backend: Arc<dyn CompilerBackend>, options: RuntimeOptions) -> Arc<Runtime> {
    let (fatal, _) = recording_fatal_handler();
    Runtime::builder(backend).options(options).fatal_handler(fatal).build()
}

/// Synchronous compilation with the same call and loop threshold
pub fn sync_options(threshold: u32) -> RuntimeOptions {
    RuntimeOptions::default().with_threshold(threshold).synchronous()
}

pub fn background_options(threshold: u32, threads: usize) -> RuntimeOptions {
    RuntimeOptions::default()
        .with_threshold(threshold)
        .with_compiler_threads(threads)
}

/// Poll until `cond` holds or `timeout` elapses. Returns the final value.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let started = Instant::now();
    while started.elapsed() < timeout {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}

pub fn longs(values: &[i64]) -> Vec<Value> {
    values.iter().copied().map(Value::Long).collect()
}
