//! Speculation log
//!
//! Records speculative assumptions that failed at run time so the next
//! compilation of the same target does not make them again. The log is
//! append-only: nothing is ever removed.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use itertools::Itertools;
use parking_lot::RwLock;

/// Identifier of one speculative assumption (e.g. "fib:arg0:long")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpeculationId(Arc<str>);

impl SpeculationId {
    pub fn new(id: impl AsRef<str>) -> Self {
        SpeculationId(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpeculationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SpeculationId {
    fn from(s: &str) -> Self {
        SpeculationId::new(s)
    }
}

/// Append-only set of failed speculations
#[derive(Default)]
pub struct SpeculationLog {
    failed: RwLock<HashSet<SpeculationId>>,
    /// Times a backend asked whether it may speculate
    queries: AtomicU64,
}

impl SpeculationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a compilation may rely on `id`
    pub fn may_speculate(&self, id: &SpeculationId) -> bool {
        self.queries.fetch_add(1, Ordering::Relaxed);
        !self.is_failed(id)
    }

    /// Record a failed speculation. Returns false if it was already recorded.
    pub fn record_failure(&self, id: SpeculationId) -> bool {
        self.failed.write().insert(id)
    }

    pub fn is_failed(&self, id: &SpeculationId) -> bool {
        self.failed.read().contains(id)
    }

    pub fn failure_count(&self) -> usize {
        self.failed.read().len()
    }

    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    /// Failed speculations in sorted order
    pub fn failed_speculations(&self) -> Vec<SpeculationId> {
        self.failed.read().iter().cloned().sorted().collect()
    }
}

impl fmt::Debug for SpeculationLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SpeculationLog[{}]",
            self.failed_speculations().iter().join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_forgets() {
        let log = SpeculationLog::new();
        let a = SpeculationId::new("A");
        let b = SpeculationId::new("B");

        assert!(log.record_failure(a.clone()));
        assert!(log.record_failure(b.clone()));
        assert!(!log.record_failure(a.clone()));

        assert!(log.is_failed(&a));
        assert!(log.is_failed(&b));
        assert!(!log.may_speculate(&a));
        assert!(log.may_speculate(&SpeculationId::new("C")));
        assert_eq!(log.failure_count(), 2);
        assert_eq!(log.query_count(), 2);
    }

    #[test]
    fn test_debug_lists_failures_sorted() {
        let log = SpeculationLog::new();
        log.record_failure("z".into());
        log.record_failure("a".into());
        assert_eq!(format!("{:?}", log), "SpeculationLog[a, z]");
    }
}
