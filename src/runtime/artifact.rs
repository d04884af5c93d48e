//! Installed optimized code and the slot that publishes it to callers.
//!
//! An artifact moves from valid to invalid exactly once. Installing a new
//! compilation result always creates a fresh artifact with its own id; an
//! invalidated artifact is never revived.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::frame::Frame;
use super::speculation::SpeculationId;
use super::value::{Exception, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactId(pub u64);

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "artifact#{}", self.0)
    }
}

static NEXT_ARTIFACT_ID: AtomicU64 = AtomicU64::new(1);

/// How optimized code left a call other than by returning normally
#[derive(Debug, Clone)]
pub enum CodeExit {
    /// The unit raised an application exception
    Raised(Exception),
    /// A speculative assumption did not hold; the call must be re-executed
    /// in the interpreter
    Deoptimize(SpeculationId),
}

impl From<Exception> for CodeExit {
    fn from(e: Exception) -> Self {
        CodeExit::Raised(e)
    }
}

/// Installable code produced by a compiler backend
pub trait CompiledCode: Send + Sync {
    fn execute(&self, frame: &mut Frame) -> Result<Value, CodeExit>;

    /// Size of the generated code, for diagnostics
    fn code_size(&self) -> usize {
        0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ArtifactState {
    Absent = 0,
    Valid = 1,
    Invalid = 2,
}

impl ArtifactState {
    pub fn name(self) -> &'static str {
        match self {
            ArtifactState::Absent => "absent",
            ArtifactState::Valid => "valid",
            ArtifactState::Invalid => "invalid",
        }
    }
}

/// One installed compilation result
pub struct InstalledArtifact {
    id: ArtifactId,
    code: Arc<dyn CompiledCode>,
    state: AtomicU8,
    invalidation_reason: Mutex<Option<String>>,
}

impl InstalledArtifact {
    pub fn new(code: Arc<dyn CompiledCode>) -> Self {
        Self {
            id: ArtifactId(NEXT_ARTIFACT_ID.fetch_add(1, Ordering::Relaxed)),
            code,
            state: AtomicU8::new(ArtifactState::Valid as u8),
            invalidation_reason: Mutex::new(None),
        }
    }

    #[inline]
    pub fn id(&self) -> ArtifactId {
        self.id
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.state.load(Ordering::Acquire) == ArtifactState::Valid as u8
    }

    pub fn code(&self) -> &Arc<dyn CompiledCode> {
        &self.code
    }

    pub fn code_size(&self) -> usize {
        self.code.code_size()
    }

    /// Valid → invalid. Returns false if it was already invalid.
    pub fn invalidate(&self, reason: &str) -> bool {
        let won = self
            .state
            .compare_exchange(
                ArtifactState::Valid as u8,
                ArtifactState::Invalid as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if won {
            *self.invalidation_reason.lock() = Some(reason.to_string());
        }
        won
    }

    pub fn invalidation_reason(&self) -> Option<String> {
        self.invalidation_reason.lock().clone()
    }
}

impl fmt::Debug for InstalledArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstalledArtifact")
            .field("id", &self.id)
            .field("valid", &self.is_valid())
            .field("code_size", &self.code_size())
            .finish()
    }
}

/// The artifact currently visible to callers of a target
///
/// Readers clone the `Arc` under a read lock, so a concurrent install can
/// never hand out a torn or missing artifact.
#[derive(Debug, Default)]
pub struct ArtifactSlot {
    current: RwLock<Option<Arc<InstalledArtifact>>>,
}

impl ArtifactSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `artifact`, returning the one it replaced
    pub fn install(&self, artifact: Arc<InstalledArtifact>) -> Option<Arc<InstalledArtifact>> {
        self.current.write().replace(artifact)
    }

    #[inline]
    pub fn load(&self) -> Option<Arc<InstalledArtifact>> {
        self.current.read().clone()
    }

    /// The current artifact if it is still valid
    #[inline]
    pub fn valid(&self) -> Option<Arc<InstalledArtifact>> {
        self.load().filter(|a| a.is_valid())
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.current.read().as_ref().is_some_and(|a| a.is_valid())
    }

    pub fn state(&self) -> ArtifactState {
        match self.current.read().as_ref() {
            None => ArtifactState::Absent,
            Some(a) if a.is_valid() => ArtifactState::Valid,
            Some(_) => ArtifactState::Invalid,
        }
    }

    /// Invalidate the current artifact if it is valid
    pub fn invalidate(&self, reason: &str) -> Option<Arc<InstalledArtifact>> {
        let current = self.load()?;
        if current.invalidate(reason) {
            Some(current)
        } else {
            None
        }
    }

    /// Invalidate only if `id` is still the current artifact
    pub fn invalidate_if_current(&self, id: ArtifactId, reason: &str) -> bool {
        match self.load() {
            Some(current) if current.id() == id => current.invalidate(reason),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ConstCode(i64);

    impl CompiledCode for ConstCode {
        fn execute(&self, _frame: &mut Frame) -> Result<Value, CodeExit> {
            Ok(Value::Long(self.0))
        }
    }

    #[test]
    fn test_invalid_never_revalidates() {
        let artifact = InstalledArtifact::new(Arc::new(ConstCode(1)));
        assert!(artifact.is_valid());
        assert!(artifact.invalidate("first"));
        assert!(!artifact.invalidate("second"));
        assert!(!artifact.is_valid());
        assert_eq!(artifact.invalidation_reason().as_deref(), Some("first"));
    }

    #[test]
    fn test_slot_states() {
        let slot = ArtifactSlot::new();
        assert_eq!(slot.state(), ArtifactState::Absent);

        let first = Arc::new(InstalledArtifact::new(Arc::new(ConstCode(1))));
        assert!(slot.install(first.clone()).is_none());
        assert_eq!(slot.state(), ArtifactState::Valid);

        let second = Arc::new(InstalledArtifact::new(Arc::new(ConstCode(2))));
        assert_ne!(first.id(), second.id());
        let replaced = slot.install(second.clone()).unwrap();
        assert_eq!(replaced.id(), first.id());

        assert!(!slot.invalidate_if_current(first.id(), "stale"));
        assert!(slot.invalidate_if_current(second.id(), "test"));
        assert_eq!(slot.state(), ArtifactState::Invalid);
        assert!(slot.valid().is_none());
    }
}
