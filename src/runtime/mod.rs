//! Adaptive call-target runtime
//!
//! Everything needed to run units of interpreted code and move them to and
//! from optimized code:
//!
//! - [`CallTarget`]: the invocable unit with its lifecycle
//! - [`CompilationProfile`]: per-target statistics driving the compile decision
//! - [`SpeculationLog`]: failed speculations, consulted by the next compilation
//! - [`CompilationScheduler`]: inline or background compilation
//! - [`Runtime`]: the registry that creates targets and owns the policy

pub mod artifact;
pub mod backend;
pub mod call_target;
pub mod debug;
pub mod error;
pub mod frame;
pub mod listener;
pub mod options;
pub mod profile;
pub mod registry;
pub mod scheduler;
pub mod speculation;
pub mod task;
pub mod thread_pool;
pub mod unit;
pub mod value;

pub use artifact::{ArtifactId, ArtifactState, CodeExit, CompiledCode, InstalledArtifact};
pub use backend::{CompilationRequest, CompilerBackend};
pub use call_target::{CallTarget, ExecutionTier, TargetId};
pub use debug::{DebugProperties, DebugValue};
pub use error::{
    CompilationError, CompilationFailure, ConfigError, FatalCompilationError, OptimizationFailed,
    TargetError,
};
pub use frame::{Frame, FrameDescriptor};
pub use listener::{NoopListener, RuntimeListener};
pub use options::RuntimeOptions;
pub use profile::{CompilationProfile, ProfileKind, ProfileSnapshot, SlotState};
pub use registry::{exit_process_handler, FatalHandler, Runtime, RuntimeBuilder, FATAL_EXIT_CODE};
pub use scheduler::{CompilationScheduler, SchedulerStats};
pub use speculation::{SpeculationId, SpeculationLog};
pub use task::{CompilationTask, TaskId, TaskOutcome, TaskState};
pub use unit::{ExecutableUnit, UnitObserver};
pub use value::{Exception, Value, ValueShape};
