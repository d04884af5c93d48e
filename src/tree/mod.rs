//! Reference executable units and compiler backend
//!
//! [`TreeUnit`] is a small self-specializing expression tree: enough of an
//! interpreter to drive every part of the call-target lifecycle (profiling,
//! node replacement, splitting, speculation and deoptimization).
//! [`TreeCompiler`] is the matching backend.

mod compiler;
mod node;
pub mod programs;

pub use compiler::{CompiledTree, TreeCompiler, DEFAULT_MAX_NODES};
pub use node::{AddNode, AddState, Node};

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::runtime::{Exception, ExecutableUnit, Frame, FrameDescriptor, UnitObserver, Value};

pub struct TreeUnit {
    name: String,
    descriptor: Arc<FrameDescriptor>,
    body: Node,
    cloning_allowed: bool,
    compilable: bool,
    observer: RwLock<Option<Weak<dyn UnitObserver>>>,
}

impl TreeUnit {
    pub fn new(name: impl Into<String>, body: Node) -> Self {
        Self {
            name: name.into(),
            descriptor: FrameDescriptor::empty(),
            body,
            cloning_allowed: true,
            compilable: true,
            observer: RwLock::new(None),
        }
    }

    /// Declare named local slots
    pub fn with_locals<I, S>(mut self, locals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.descriptor = Arc::new(FrameDescriptor::new(locals));
        self
    }

    pub fn with_cloning(mut self, allowed: bool) -> Self {
        self.cloning_allowed = allowed;
        self
    }

    pub fn with_compilable(mut self, compilable: bool) -> Self {
        self.compilable = compilable;
        self
    }

    pub fn body(&self) -> &Node {
        &self.body
    }
}

impl ExecutableUnit for TreeUnit {
    fn name(&self) -> &str {
        &self.name
    }

    fn frame_descriptor(&self) -> Arc<FrameDescriptor> {
        Arc::clone(&self.descriptor)
    }

    fn execute(&self, frame: &mut Frame) -> Result<Value, Exception> {
        let observer = self.observer.read().as_ref().and_then(Weak::upgrade);
        self.body.execute(frame, observer.as_ref())
    }

    fn is_cloning_allowed(&self) -> bool {
        self.cloning_allowed
    }

    fn duplicate(&self) -> Option<Arc<dyn ExecutableUnit>> {
        if !self.cloning_allowed {
            return None;
        }
        Some(Arc::new(TreeUnit {
            name: self.name.clone(),
            descriptor: Arc::clone(&self.descriptor),
            body: self.body.fresh_copy(),
            cloning_allowed: true,
            compilable: self.compilable,
            observer: RwLock::new(None),
        }))
    }

    fn non_trivial_node_count(&self) -> usize {
        self.body.non_trivial_count()
    }

    fn is_compilable(&self) -> bool {
        self.compilable
    }

    fn attach_observer(&self, observer: Weak<dyn UnitObserver>) {
        *self.observer.write() = Some(observer);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for TreeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TreeUnit({} {:?})", self.name, self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct Recorder {
        replaced: AtomicU32,
        loops: AtomicU32,
    }

    impl UnitObserver for Recorder {
        fn node_replaced(&self, _old: &dyn fmt::Debug, _new: &dyn fmt::Debug, _reason: &str) -> bool {
            self.replaced.fetch_add(1, Ordering::SeqCst);
            false
        }

        fn report_loop_count(&self, count: u32) {
            self.loops.fetch_add(count, Ordering::SeqCst);
        }
    }

    fn run(unit: &TreeUnit, args: &[Value]) -> Result<Value, Exception> {
        let mut frame = Frame::new(unit.frame_descriptor(), args);
        unit.execute(&mut frame)
    }

    #[test]
    fn test_add_rewrites_to_generic_once() {
        let unit = programs::sum_loop("sum");
        let recorder = Arc::new(Recorder::default());
        let weak: Weak<dyn UnitObserver> = Arc::downgrade(&recorder) as Weak<dyn UnitObserver>;
        unit.attach_observer(weak);

        assert_eq!(run(&unit, &[Value::Long(4), Value::Long(1)]).unwrap(), Value::Long(4));
        assert_eq!(recorder.replaced.load(Ordering::SeqCst), 0);
        assert_eq!(recorder.loops.load(Ordering::SeqCst), 4);

        assert_eq!(
            run(&unit, &[Value::Long(2), Value::Double(0.5)]).unwrap(),
            Value::Double(1.0)
        );
        run(&unit, &[Value::Long(2), Value::Double(0.5)]).unwrap();
        assert_eq!(recorder.replaced.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_duplicate_is_uninitialized() {
        let unit = programs::sum_loop("sum");
        run(&unit, &[Value::Long(1), Value::Long(1)]).unwrap();

        let copy = unit.duplicate().unwrap();
        let copy = copy.as_any().downcast_ref::<TreeUnit>().unwrap();
        let mut states = Vec::new();
        copy.body().for_each_add(&mut |add| states.push(add.state()));
        assert_eq!(states, vec![AddState::Uninitialized]);
        assert_eq!(copy.non_trivial_node_count(), unit.non_trivial_node_count());
    }

    #[test]
    fn test_raise_and_type_errors() {
        let unit = TreeUnit::new("boom", Node::raise("Boom", "exploded"));
        let err = run(&unit, &[]).unwrap_err();
        assert_eq!(err.category(), "Boom");

        let unit = TreeUnit::new("bad", Node::add(Node::constant(true), Node::constant(1i64)));
        assert_eq!(run(&unit, &[]).unwrap_err().category(), "TypeError");
    }

    #[test]
    fn test_no_cloning() {
        let unit = TreeUnit::new("fixed", Node::constant(1i64)).with_cloning(false);
        assert!(!unit.is_cloning_allowed());
        assert!(unit.duplicate().is_none());
    }
}
