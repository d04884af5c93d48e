//! The executable unit contract consumed by call targets.
//!
//! A unit is the root of an interpreted tree. The runtime never looks inside
//! it: it executes it against a frame, asks it for a duplicate when splitting,
//! and listens for structural changes through a [`UnitObserver`].

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use super::frame::{Frame, FrameDescriptor};
use super::value::{Exception, Value};

/// Receiver of structural-change and loop-count notifications from a unit
///
/// Call targets register themselves as the observer of their unit.
pub trait UnitObserver: Send + Sync {
    /// A node of the unit was swapped for another one.
    ///
    /// `old` and `new` are advisory descriptions used in diagnostics only.
    /// Returns true if the replacement was handled specially; the runtime
    /// always returns false.
    fn node_replaced(&self, old: &dyn fmt::Debug, new: &dyn fmt::Debug, reason: &str) -> bool;

    /// A loop inside the unit completed `count` iterations
    fn report_loop_count(&self, _count: u32) {}
}

/// An interpretable unit of program logic (the root of a tree)
pub trait ExecutableUnit: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn frame_descriptor(&self) -> Arc<FrameDescriptor>;

    /// Run the unit in the interpreter
    fn execute(&self, frame: &mut Frame) -> Result<Value, Exception>;

    /// Whether [`ExecutableUnit::duplicate`] produces independent copies
    fn is_cloning_allowed(&self) -> bool {
        false
    }

    /// Produce an uninitialized, independent copy of this unit
    fn duplicate(&self) -> Option<Arc<dyn ExecutableUnit>> {
        None
    }

    /// Number of nodes whose cost is not trivial
    fn non_trivial_node_count(&self) -> usize {
        1
    }

    /// Units may opt out of optimization entirely
    fn is_compilable(&self) -> bool {
        true
    }

    /// Subscribe to structural changes. Units that never rewrite themselves
    /// can ignore the observer.
    fn attach_observer(&self, _observer: Weak<dyn UnitObserver>) {}

    /// Lets a compiler backend recover its concrete unit type
    fn as_any(&self) -> &dyn Any;
}
