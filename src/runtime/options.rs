//! Runtime policy configuration
//!
//! Options can be built in code or loaded from a TOML file. Every field has a
//! default, so a configuration file only lists what it changes:
//!
//! ```toml
//! compilation_threshold = 500
//! background_compilation = true
//! compilation_exceptions_are_printed = true
//! compile_only = ["fib", "loop"]
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::ConfigError;

/// Calls + loop iterations before a target is compiled
pub const DEFAULT_COMPILATION_THRESHOLD: u32 = 1000;

/// Minimum number of interpreted calls before a target is compiled
pub const DEFAULT_MIN_INVOKES_THRESHOLD: u32 = 3;

/// Extra calls required after an invalidation before recompiling
pub const DEFAULT_INVALIDATION_REPROFILE_COUNT: u32 = 3;

/// Extra calls + loop iterations required after a node replacement
pub const DEFAULT_REPLACE_REPROFILE_COUNT: u32 = 10;

/// Occurrences of one exception category before its path counts as hot
pub const DEFAULT_HOT_EXCEPTION_THRESHOLD: u32 = 16;

/// Policy for profiling, compiling and reporting failures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeOptions {
    /// Master switch; when off every target gets the void profile
    pub compilation_enabled: bool,
    /// Compile on the worker pool instead of on the calling thread
    pub background_compilation: bool,
    /// Calls + loop iterations needed before compilation
    pub compilation_threshold: u32,
    /// Interpreted calls needed before compilation
    pub min_invokes_threshold: u32,
    pub invalidation_reprofile_count: u32,
    pub replace_reprofile_count: u32,
    /// Use the tracing profile, which logs every profiling event
    pub call_target_profiling: bool,
    /// Return permanent compilation failures to the caller of `compile`
    pub compilation_exceptions_are_thrown: bool,
    /// Log a full dump of every permanent compilation failure
    pub compilation_exceptions_are_printed: bool,
    /// Terminate the process on a permanent compilation failure. When unset
    /// this follows `consistency_checks`.
    pub compilation_exceptions_are_fatal: Option<bool>,
    /// Internal consistency checking
    pub consistency_checks: bool,
    /// Worker threads for background compilation (0 = one per CPU)
    pub compiler_threads: usize,
    /// If non-empty, only units whose name contains one of these are compiled
    pub compile_only: Vec<String>,
    pub hot_exception_threshold: u32,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            compilation_enabled: true,
            background_compilation: true,
            compilation_threshold: DEFAULT_COMPILATION_THRESHOLD,
            min_invokes_threshold: DEFAULT_MIN_INVOKES_THRESHOLD,
            invalidation_reprofile_count: DEFAULT_INVALIDATION_REPROFILE_COUNT,
            replace_reprofile_count: DEFAULT_REPLACE_REPROFILE_COUNT,
            call_target_profiling: false,
            compilation_exceptions_are_thrown: false,
            compilation_exceptions_are_printed: false,
            compilation_exceptions_are_fatal: None,
            consistency_checks: false,
            compiler_threads: 0,
            compile_only: Vec::new(),
            hot_exception_threshold: DEFAULT_HOT_EXCEPTION_THRESHOLD,
        }
    }
}

impl RuntimeOptions {
    /// Parse options from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load options from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }

    /// Use the same threshold for calls and for calls + loop iterations
    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.compilation_threshold = threshold;
        self.min_invokes_threshold = threshold;
        self
    }

    pub fn with_thresholds(mut self, min_invokes: u32, calls_and_loops: u32) -> Self {
        self.min_invokes_threshold = min_invokes;
        self.compilation_threshold = calls_and_loops;
        self
    }

    /// Compile on the calling thread
    pub fn synchronous(mut self) -> Self {
        self.background_compilation = false;
        self
    }

    pub fn with_call_target_profiling(mut self) -> Self {
        self.call_target_profiling = true;
        self
    }

    pub fn with_compiler_threads(mut self, threads: usize) -> Self {
        self.compiler_threads = threads;
        self
    }

    /// Never compile anything
    pub fn interpreter_only() -> Self {
        Self {
            compilation_enabled: false,
            ..Default::default()
        }
    }

    /// Effective fatal policy: explicit setting wins, otherwise fatal exactly
    /// when consistency checks are on
    pub fn compilation_exceptions_are_fatal(&self) -> bool {
        self.compilation_exceptions_are_fatal
            .unwrap_or(self.consistency_checks)
    }

    /// Whether `compile` may return before the compilation finished
    pub fn may_be_asynchronous(&self) -> bool {
        self.background_compilation && !self.compilation_exceptions_are_thrown
    }

    pub fn effective_compiler_threads(&self) -> usize {
        if self.compiler_threads == 0 {
            num_cpus::get().max(1)
        } else {
            self.compiler_threads
        }
    }

    /// Apply the `compile_only` filter to a unit name
    pub fn accepts_name(&self, name: &str) -> bool {
        self.compile_only.is_empty() || self.compile_only.iter().any(|f| name.contains(f.as_str()))
    }
}
