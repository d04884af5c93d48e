//! The compiler backend seam.
//!
//! The runtime never compiles anything itself. It hands a
//! [`CompilationRequest`] to a [`CompilerBackend`] and installs whatever
//! [`CompiledCode`] comes back.

use std::sync::Arc;

use super::artifact::CompiledCode;
use super::call_target::TargetId;
use super::error::CompilationFailure;
use super::profile::ProfileSnapshot;
use super::speculation::SpeculationLog;
use super::unit::ExecutableUnit;

/// Everything a backend gets to see about one compilation
#[derive(Clone)]
pub struct CompilationRequest {
    pub target: TargetId,
    pub name: String,
    pub unit: Arc<dyn ExecutableUnit>,
    /// Speculations that already failed for this target; the backend must
    /// not make them again
    pub speculation_log: Arc<SpeculationLog>,
    pub profile: ProfileSnapshot,
}

/// An optimizing compiler
///
/// Called repeatedly for the same unit with different speculation logs, and
/// from worker threads.
pub trait CompilerBackend: Send + Sync {
    fn compile(&self, request: &CompilationRequest) -> Result<Arc<dyn CompiledCode>, CompilationFailure>;

    fn name(&self) -> &str {
        "backend"
    }
}
