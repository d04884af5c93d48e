//! Error types for the compilation-management path.
//!
//! Application exceptions ([`crate::runtime::Exception`]) never pass through
//! these types: everything here is confined to `compile` and the
//! administrative operations on a target.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Failure reported by a compiler backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompilationFailure {
    /// The backend gave up. Non-permanent bailouts (e.g. the unit changed
    /// while it was being compiled) are expected and retried later.
    Bailout { permanent: bool, reason: String },

    /// The unit uses something the backend cannot compile
    Unsupported(String),

    /// Internal backend error
    Internal(String),

    /// The backend panicked; the message is the panic payload
    Panicked(String),
}

impl CompilationFailure {
    pub fn transient(reason: impl Into<String>) -> Self {
        CompilationFailure::Bailout {
            permanent: false,
            reason: reason.into(),
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        CompilationFailure::Bailout {
            permanent: true,
            reason: reason.into(),
        }
    }

    /// Only non-permanent bailouts are considered retryable
    pub fn is_permanent(&self) -> bool {
        match self {
            CompilationFailure::Bailout { permanent, .. } => *permanent,
            _ => true,
        }
    }

    /// Short kind label for logs and debug properties
    pub fn kind(&self) -> &'static str {
        match self {
            CompilationFailure::Bailout { permanent: true, .. } => "permanent-bailout",
            CompilationFailure::Bailout { permanent: false, .. } => "transient-bailout",
            CompilationFailure::Unsupported(_) => "unsupported",
            CompilationFailure::Internal(_) => "internal",
            CompilationFailure::Panicked(_) => "panicked",
        }
    }
}

impl fmt::Display for CompilationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompilationFailure::Bailout { permanent, reason } => {
                let kind = if *permanent { "permanent" } else { "transient" };
                write!(f, "{} bailout: {}", kind, reason)
            }
            CompilationFailure::Unsupported(msg) => write!(f, "unsupported: {}", msg),
            CompilationFailure::Internal(msg) => write!(f, "internal compiler error: {}", msg),
            CompilationFailure::Panicked(msg) => write!(f, "compiler panicked: {}", msg),
        }
    }
}

impl std::error::Error for CompilationFailure {}

/// A permanent failure surfaced to the caller of `compile` under the
/// "exceptions are thrown" policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizationFailed {
    pub target: String,
    pub failure: CompilationFailure,
}

impl OptimizationFailed {
    pub fn new(target: impl Into<String>, failure: CompilationFailure) -> Self {
        Self {
            target: target.into(),
            failure,
        }
    }
}

impl fmt::Display for OptimizationFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "optimization of {} failed: {}", self.target, self.failure)
    }
}

impl std::error::Error for OptimizationFailed {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.failure)
    }
}

/// A permanent failure under the "exceptions are fatal" policy
///
/// Carries the full diagnostic dump. Only the runtime's fatal handler acts on
/// it.
#[derive(Debug, Clone)]
pub struct FatalCompilationError {
    pub target: String,
    pub failure: CompilationFailure,
    pub dump: String,
}

impl fmt::Display for FatalCompilationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fatal compilation failure in {}: {}",
            self.target, self.failure
        )
    }
}

impl std::error::Error for FatalCompilationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.failure)
    }
}

/// What the failure-notification path asks its caller to do
#[derive(Debug, Clone)]
pub enum CompilationError {
    /// Hand the failure to whoever called `compile`
    Thrown(OptimizationFailed),
    /// Terminate through the designated fatal handler
    Fatal(FatalCompilationError),
}

impl fmt::Display for CompilationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompilationError::Thrown(e) => write!(f, "{}", e),
            CompilationError::Fatal(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CompilationError {}

/// Misuse of the target administration API
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    /// Clones cannot be cloned again
    CloneOfClone { target: String },
    /// The unit does not support duplication
    CloningNotAllowed { target: String },
    /// The runtime was shut down
    RuntimeShutDown,
}

impl fmt::Display for TargetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetError::CloneOfClone { target } => {
                write!(f, "cannot clone {}: it is itself a clone", target)
            }
            TargetError::CloningNotAllowed { target } => {
                write!(f, "cannot clone {}: unit does not allow cloning", target)
            }
            TargetError::RuntimeShutDown => write!(f, "runtime has been shut down"),
        }
    }
}

impl std::error::Error for TargetError {}

/// Error loading or writing runtime configuration
#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: io::Error },
    Parse(toml::de::Error),
    Serialize(toml::ser::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "failed to read {}: {}", path.display(), source)
            }
            ConfigError::Parse(e) => write!(f, "invalid runtime configuration: {}", e),
            ConfigError::Serialize(e) => write!(f, "failed to serialize: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Serialize(e) => Some(e),
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(e: toml::ser::Error) -> Self {
        ConfigError::Serialize(e)
    }
}
