//! Self-specializing expression nodes.
//!
//! `Add` starts uninitialized, specializes to integer addition on its first
//! integer operands, and rewrites itself to the generic form the first time
//! the integer assumption fails. That last rewrite is reported to the unit's
//! observer as a node replacement.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::runtime::{Exception, Frame, UnitObserver, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AddState {
    Uninitialized = 0,
    Long = 1,
    Generic = 2,
}

impl From<u8> for AddState {
    fn from(v: u8) -> Self {
        match v {
            0 => AddState::Uninitialized,
            1 => AddState::Long,
            _ => AddState::Generic,
        }
    }
}

impl fmt::Display for AddState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddState::Uninitialized => write!(f, "Add<uninitialized>"),
            AddState::Long => write!(f, "Add<long>"),
            AddState::Generic => write!(f, "Add<generic>"),
        }
    }
}

pub struct AddNode {
    pub(crate) left: Box<Node>,
    pub(crate) right: Box<Node>,
    state: AtomicU8,
}

impl AddNode {
    fn new(left: Node, right: Node) -> Self {
        Self {
            left: Box::new(left),
            right: Box::new(right),
            state: AtomicU8::new(AddState::Uninitialized as u8),
        }
    }

    pub fn state(&self) -> AddState {
        AddState::from(self.state.load(Ordering::Acquire))
    }

    fn execute(&self, frame: &mut Frame, observer: Option<&Arc<dyn UnitObserver>>) -> Result<Value, Exception> {
        let left = self.left.execute(frame, observer)?;
        let right = self.right.execute(frame, observer)?;

        match self.state() {
            AddState::Uninitialized => {
                let next = if add_long(&left, &right).is_some() {
                    AddState::Long
                } else {
                    AddState::Generic
                };
                let _ = self.state.compare_exchange(
                    AddState::Uninitialized as u8,
                    next as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
            }
            AddState::Long => {
                if let Some(sum) = add_long(&left, &right) {
                    return Ok(Value::Long(sum));
                }
                self.rewrite_generic(observer);
            }
            AddState::Generic => {}
        }
        add_generic(&left, &right)
    }

    fn rewrite_generic(&self, observer: Option<&Arc<dyn UnitObserver>>) {
        let won = self
            .state
            .compare_exchange(
                AddState::Long as u8,
                AddState::Generic as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if won {
            if let Some(observer) = observer {
                observer.node_replaced(&AddState::Long, &AddState::Generic, "operands are no longer integers");
            }
        }
    }
}

pub(crate) fn add_long(left: &Value, right: &Value) -> Option<i64> {
    match (left, right) {
        (Value::Long(a), Value::Long(b)) => a.checked_add(*b),
        _ => None,
    }
}

pub(crate) fn add_generic(left: &Value, right: &Value) -> Result<Value, Exception> {
    if let Some(sum) = add_long(left, right) {
        return Ok(Value::Long(sum));
    }
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Ok(Value::string(&format!("{}{}", a, b))),
        _ => match (left.as_double(), right.as_double()) {
            (Some(a), Some(b)) => Ok(Value::Double(a + b)),
            _ => Err(Exception::new(
                "TypeError",
                format!("cannot add {} and {}", left.shape(), right.shape()),
            )),
        },
    }
}

pub(crate) fn less_than(left: &Value, right: &Value) -> Result<Value, Exception> {
    match (left.as_double(), right.as_double()) {
        (Some(a), Some(b)) => Ok(Value::Bool(a < b)),
        _ => Err(Exception::new(
            "TypeError",
            format!("cannot compare {} and {}", left.shape(), right.shape()),
        )),
    }
}

pub(crate) fn loop_count(value: &Value) -> Result<u64, Exception> {
    match value.as_long() {
        Some(n) if n >= 0 => Ok(n as u64),
        _ => Err(Exception::new(
            "TypeError",
            format!("repeat count must be a non-negative long, got {}", value),
        )),
    }
}

pub(crate) fn missing_slot(kind: &str, index: usize) -> Exception {
    Exception::new("FrameError", format!("no {} slot {}", kind, index))
}

/// A node of an interpreted tree
pub enum Node {
    Const(Value),
    Arg(usize),
    Local(usize),
    SetLocal(usize, Box<Node>),
    Seq(Vec<Node>),
    Add(AddNode),
    Less(Box<Node>, Box<Node>),
    If(Box<Node>, Box<Node>, Box<Node>),
    /// Evaluate `body` `count` times; the value is the last iteration's
    Repeat { count: Box<Node>, body: Box<Node> },
    Raise { category: String, message: String },
}

impl Node {
    pub fn constant(value: impl Into<Value>) -> Self {
        Node::Const(value.into())
    }

    pub fn arg(index: usize) -> Self {
        Node::Arg(index)
    }

    pub fn local(index: usize) -> Self {
        Node::Local(index)
    }

    pub fn set_local(index: usize, value: Node) -> Self {
        Node::SetLocal(index, Box::new(value))
    }

    pub fn seq(nodes: Vec<Node>) -> Self {
        Node::Seq(nodes)
    }

    pub fn add(left: Node, right: Node) -> Self {
        Node::Add(AddNode::new(left, right))
    }

    pub fn less(left: Node, right: Node) -> Self {
        Node::Less(Box::new(left), Box::new(right))
    }

    pub fn if_else(cond: Node, then: Node, otherwise: Node) -> Self {
        Node::If(Box::new(cond), Box::new(then), Box::new(otherwise))
    }

    pub fn repeat(count: Node, body: Node) -> Self {
        Node::Repeat {
            count: Box::new(count),
            body: Box::new(body),
        }
    }

    pub fn raise(category: impl Into<String>, message: impl Into<String>) -> Self {
        Node::Raise {
            category: category.into(),
            message: message.into(),
        }
    }

    pub(crate) fn execute(
        &self,
        frame: &mut Frame,
        observer: Option<&Arc<dyn UnitObserver>>,
    ) -> Result<Value, Exception> {
        match self {
            Node::Const(value) => Ok(value.clone()),
            Node::Arg(index) => frame
                .argument(*index)
                .cloned()
                .ok_or_else(|| missing_slot("argument", *index)),
            Node::Local(index) => frame
                .local(*index)
                .cloned()
                .ok_or_else(|| missing_slot("local", *index)),
            Node::SetLocal(index, value) => {
                let value = value.execute(frame, observer)?;
                if !frame.set_local(*index, value.clone()) {
                    return Err(missing_slot("local", *index));
                }
                Ok(value)
            }
            Node::Seq(nodes) => {
                let mut last = Value::Nil;
                for node in nodes {
                    last = node.execute(frame, observer)?;
                }
                Ok(last)
            }
            Node::Add(add) => add.execute(frame, observer),
            Node::Less(left, right) => {
                let left = left.execute(frame, observer)?;
                let right = right.execute(frame, observer)?;
                less_than(&left, &right)
            }
            Node::If(cond, then, otherwise) => {
                if cond.execute(frame, observer)?.is_truthy() {
                    then.execute(frame, observer)
                } else {
                    otherwise.execute(frame, observer)
                }
            }
            Node::Repeat { count, body } => {
                let n = loop_count(&count.execute(frame, observer)?)?;
                let mut last = Value::Nil;
                for _ in 0..n {
                    last = body.execute(frame, observer)?;
                }
                if let Some(observer) = observer {
                    observer.report_loop_count(u32::try_from(n).unwrap_or(u32::MAX));
                }
                Ok(last)
            }
            Node::Raise { category, message } => Err(Exception::new(category.clone(), message.clone())),
        }
    }

    /// An uninitialized copy: same structure, all specializations reset
    pub fn fresh_copy(&self) -> Node {
        match self {
            Node::Const(value) => Node::Const(value.clone()),
            Node::Arg(index) => Node::Arg(*index),
            Node::Local(index) => Node::Local(*index),
            Node::SetLocal(index, value) => Node::set_local(*index, value.fresh_copy()),
            Node::Seq(nodes) => Node::Seq(nodes.iter().map(Node::fresh_copy).collect()),
            Node::Add(add) => Node::add(add.left.fresh_copy(), add.right.fresh_copy()),
            Node::Less(left, right) => Node::less(left.fresh_copy(), right.fresh_copy()),
            Node::If(cond, then, otherwise) => {
                Node::if_else(cond.fresh_copy(), then.fresh_copy(), otherwise.fresh_copy())
            }
            Node::Repeat { count, body } => Node::repeat(count.fresh_copy(), body.fresh_copy()),
            Node::Raise { category, message } => Node::raise(category.clone(), message.clone()),
        }
    }

    /// Nodes that do real work; constants and slot reads are free
    pub fn non_trivial_count(&self) -> usize {
        match self {
            Node::Const(_) | Node::Arg(_) | Node::Local(_) => 0,
            Node::SetLocal(_, value) => 1 + value.non_trivial_count(),
            Node::Seq(nodes) => nodes.iter().map(Node::non_trivial_count).sum(),
            Node::Add(add) => 1 + add.left.non_trivial_count() + add.right.non_trivial_count(),
            Node::Less(left, right) => 1 + left.non_trivial_count() + right.non_trivial_count(),
            Node::If(cond, then, otherwise) => {
                1 + cond.non_trivial_count() + then.non_trivial_count() + otherwise.non_trivial_count()
            }
            Node::Repeat { count, body } => 1 + count.non_trivial_count() + body.non_trivial_count(),
            Node::Raise { .. } => 1,
        }
    }

    /// Visit every `Add` node in pre-order
    pub fn for_each_add(&self, f: &mut dyn FnMut(&AddNode)) {
        match self {
            Node::Const(_) | Node::Arg(_) | Node::Local(_) | Node::Raise { .. } => {}
            Node::SetLocal(_, value) => value.for_each_add(f),
            Node::Seq(nodes) => nodes.iter().for_each(|n| n.for_each_add(f)),
            Node::Add(add) => {
                f(add);
                add.left.for_each_add(f);
                add.right.for_each_add(f);
            }
            Node::Less(left, right) => {
                left.for_each_add(f);
                right.for_each_add(f);
            }
            Node::If(cond, then, otherwise) => {
                cond.for_each_add(f);
                then.for_each_add(f);
                otherwise.for_each_add(f);
            }
            Node::Repeat { count, body } => {
                count.for_each_add(f);
                body.for_each_add(f);
            }
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Const(value) => write!(f, "{}", value),
            Node::Arg(index) => write!(f, "arg{}", index),
            Node::Local(index) => write!(f, "local{}", index),
            Node::SetLocal(index, value) => write!(f, "(set local{} {:?})", index, value),
            Node::Seq(nodes) => {
                write!(f, "(seq")?;
                for node in nodes {
                    write!(f, " {:?}", node)?;
                }
                write!(f, ")")
            }
            Node::Add(add) => write!(f, "({} {:?} {:?})", add.state(), add.left, add.right),
            Node::Less(left, right) => write!(f, "(< {:?} {:?})", left, right),
            Node::If(cond, then, otherwise) => write!(f, "(if {:?} {:?} {:?})", cond, then, otherwise),
            Node::Repeat { count, body } => write!(f, "(repeat {:?} {:?})", count, body),
            Node::Raise { category, .. } => write!(f, "(raise {})", category),
        }
    }
}
