//! A small optimizing backend for tree units.
//!
//! Lowering freezes each `Add` node's current specialization. Integer adds
//! become guarded fast paths and stable argument shapes become entry guards.
//! Every guard is a named speculation; when one fails the compiled code
//! exits with [`CodeExit::Deoptimize`], and the next compilation of the same
//! target finds the speculation in its log and emits the generic path
//! instead.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::trace;

use super::node::{add_generic, add_long, less_than, loop_count, missing_slot, AddState, Node};
use super::TreeUnit;
use crate::runtime::{
    CodeExit, CompilationFailure, CompilationRequest, CompiledCode, CompilerBackend, Exception,
    ExecutableUnit, Frame, SlotState, SpeculationId, SpeculationLog, Value, ValueShape,
};

/// Default upper bound on non-trivial nodes per compilation unit
pub const DEFAULT_MAX_NODES: usize = 10_000;

// Rough per-node cost of generated code, for diagnostics only
const BYTES_PER_NODE: usize = 16;

enum CompiledNode {
    Const(Value),
    Arg(usize),
    Local(usize),
    SetLocal(usize, Box<CompiledNode>),
    Seq(Vec<CompiledNode>),
    AddLong {
        left: Box<CompiledNode>,
        right: Box<CompiledNode>,
        speculation: SpeculationId,
    },
    AddGeneric(Box<CompiledNode>, Box<CompiledNode>),
    Less(Box<CompiledNode>, Box<CompiledNode>),
    If(Box<CompiledNode>, Box<CompiledNode>, Box<CompiledNode>),
    Repeat {
        count: Box<CompiledNode>,
        body: Box<CompiledNode>,
    },
    Raise {
        category: String,
        message: String,
    },
}

impl CompiledNode {
    fn execute(&self, frame: &mut Frame) -> Result<Value, CodeExit> {
        match self {
            CompiledNode::Const(value) => Ok(value.clone()),
            CompiledNode::Arg(index) => frame
                .argument(*index)
                .cloned()
                .ok_or_else(|| missing_slot("argument", *index).into()),
            CompiledNode::Local(index) => frame
                .local(*index)
                .cloned()
                .ok_or_else(|| missing_slot("local", *index).into()),
            CompiledNode::SetLocal(index, value) => {
                let value = value.execute(frame)?;
                if !frame.set_local(*index, value.clone()) {
                    return Err(missing_slot("local", *index).into());
                }
                Ok(value)
            }
            CompiledNode::Seq(nodes) => {
                let mut last = Value::Nil;
                for node in nodes {
                    last = node.execute(frame)?;
                }
                Ok(last)
            }
            CompiledNode::AddLong {
                left,
                right,
                speculation,
            } => {
                let l = left.execute(frame)?;
                let r = right.execute(frame)?;
                add_long(&l, &r)
                    .map(Value::Long)
                    .ok_or_else(|| CodeExit::Deoptimize(speculation.clone()))
            }
            CompiledNode::AddGeneric(left, right) => {
                let l = left.execute(frame)?;
                let r = right.execute(frame)?;
                Ok(add_generic(&l, &r)?)
            }
            CompiledNode::Less(left, right) => {
                let l = left.execute(frame)?;
                let r = right.execute(frame)?;
                Ok(less_than(&l, &r)?)
            }
            CompiledNode::If(cond, then, otherwise) => {
                if cond.execute(frame)?.is_truthy() {
                    then.execute(frame)
                } else {
                    otherwise.execute(frame)
                }
            }
            CompiledNode::Repeat { count, body } => {
                let n = loop_count(&count.execute(frame)?)?;
                let mut last = Value::Nil;
                for _ in 0..n {
                    last = body.execute(frame)?;
                }
                Ok(last)
            }
            CompiledNode::Raise { category, message } => {
                Err(CodeExit::Raised(Exception::new(category.clone(), message.clone())))
            }
        }
    }
}

struct ArgumentGuard {
    index: usize,
    shape: ValueShape,
    speculation: SpeculationId,
}

/// Optimized code for one tree unit
pub struct CompiledTree {
    guards: Vec<ArgumentGuard>,
    body: CompiledNode,
    node_count: usize,
}

impl CompiledTree {
    /// Speculations this code relies on
    pub fn speculations(&self) -> Vec<SpeculationId> {
        let mut ids: Vec<SpeculationId> = self.guards.iter().map(|g| g.speculation.clone()).collect();
        collect_add_speculations(&self.body, &mut ids);
        ids
    }
}

fn collect_add_speculations(node: &CompiledNode, ids: &mut Vec<SpeculationId>) {
    match node {
        CompiledNode::AddLong {
            left,
            right,
            speculation,
        } => {
            ids.push(speculation.clone());
            collect_add_speculations(left, ids);
            collect_add_speculations(right, ids);
        }
        CompiledNode::SetLocal(_, n) => collect_add_speculations(n, ids),
        CompiledNode::Seq(nodes) => nodes.iter().for_each(|n| collect_add_speculations(n, ids)),
        CompiledNode::AddGeneric(a, b) | CompiledNode::Less(a, b) => {
            collect_add_speculations(a, ids);
            collect_add_speculations(b, ids);
        }
        CompiledNode::If(a, b, c) => {
            collect_add_speculations(a, ids);
            collect_add_speculations(b, ids);
            collect_add_speculations(c, ids);
        }
        CompiledNode::Repeat { count, body } => {
            collect_add_speculations(count, ids);
            collect_add_speculations(body, ids);
        }
        CompiledNode::Const(_) | CompiledNode::Arg(_) | CompiledNode::Local(_) | CompiledNode::Raise { .. } => {}
    }
}

impl CompiledCode for CompiledTree {
    fn execute(&self, frame: &mut Frame) -> Result<Value, CodeExit> {
        for guard in &self.guards {
            if frame.argument(guard.index).map(Value::shape) != Some(guard.shape) {
                return Err(CodeExit::Deoptimize(guard.speculation.clone()));
            }
        }
        self.body.execute(frame)
    }

    fn code_size(&self) -> usize {
        self.node_count * BYTES_PER_NODE
    }
}

struct Lowering<'a> {
    unit: &'a str,
    log: &'a SpeculationLog,
    next_add: usize,
    nodes: usize,
}

impl Lowering<'_> {
    fn boxed(&mut self, node: &Node) -> Box<CompiledNode> {
        Box::new(self.lower(node))
    }

    fn lower(&mut self, node: &Node) -> CompiledNode {
        self.nodes += 1;
        match node {
            Node::Const(value) => CompiledNode::Const(value.clone()),
            Node::Arg(index) => CompiledNode::Arg(*index),
            Node::Local(index) => CompiledNode::Local(*index),
            Node::SetLocal(index, value) => CompiledNode::SetLocal(*index, self.boxed(value)),
            Node::Seq(nodes) => CompiledNode::Seq(nodes.iter().map(|n| self.lower(n)).collect()),
            Node::Add(add) => {
                let index = self.next_add;
                self.next_add += 1;
                let left = self.boxed(&add.left);
                let right = self.boxed(&add.right);
                let speculation = SpeculationId::new(format!("{}:add{}:long", self.unit, index));
                if add.state() != AddState::Generic && self.log.may_speculate(&speculation) {
                    CompiledNode::AddLong {
                        left,
                        right,
                        speculation,
                    }
                } else {
                    CompiledNode::AddGeneric(left, right)
                }
            }
            Node::Less(left, right) => CompiledNode::Less(self.boxed(left), self.boxed(right)),
            Node::If(cond, then, otherwise) => {
                CompiledNode::If(self.boxed(cond), self.boxed(then), self.boxed(otherwise))
            }
            Node::Repeat { count, body } => CompiledNode::Repeat {
                count: self.boxed(count),
                body: self.boxed(body),
            },
            Node::Raise { category, message } => CompiledNode::Raise {
                category: category.clone(),
                message: message.clone(),
            },
        }
    }
}

/// Compiler backend for [`TreeUnit`]s
#[derive(Debug)]
pub struct TreeCompiler {
    max_nodes: usize,
    compilations: AtomicU64,
}

impl Default for TreeCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeCompiler {
    pub fn new() -> Self {
        Self {
            max_nodes: DEFAULT_MAX_NODES,
            compilations: AtomicU64::new(0),
        }
    }

    /// Refuse units with more than `max_nodes` non-trivial nodes
    pub fn with_max_nodes(mut self, max_nodes: usize) -> Self {
        self.max_nodes = max_nodes;
        self
    }

    pub fn compilations(&self) -> u64 {
        self.compilations.load(Ordering::Relaxed)
    }

    /// Lower a tree unit, honouring the speculation log and profile
    pub fn lower(&self, request: &CompilationRequest) -> Result<CompiledTree, CompilationFailure> {
        let unit = request
            .unit
            .as_any()
            .downcast_ref::<TreeUnit>()
            .ok_or_else(|| CompilationFailure::Unsupported(format!("{} is not a tree unit", request.name)))?;

        let size = unit.body().non_trivial_count();
        if size > self.max_nodes {
            return Err(CompilationFailure::permanent(format!(
                "{} has {} nodes, limit is {}",
                request.name, size, self.max_nodes
            )));
        }

        let log = request.speculation_log.as_ref();
        let guards = request
            .profile
            .argument_shapes
            .iter()
            .flatten()
            .enumerate()
            .filter_map(|(index, state)| match state {
                SlotState::Stable(shape) => Some((index, *shape)),
                _ => None,
            })
            .filter_map(|(index, shape)| {
                let speculation = SpeculationId::new(format!("{}:arg{}:{}", unit.name(), index, shape));
                log.may_speculate(&speculation).then_some(ArgumentGuard {
                    index,
                    shape,
                    speculation,
                })
            })
            .collect();

        let mut lowering = Lowering {
            unit: unit.name(),
            log,
            next_add: 0,
            nodes: 0,
        };
        let body = lowering.lower(unit.body());

        Ok(CompiledTree {
            guards,
            body,
            node_count: lowering.nodes,
        })
    }
}

impl CompilerBackend for TreeCompiler {
    fn compile(&self, request: &CompilationRequest) -> Result<Arc<dyn CompiledCode>, CompilationFailure> {
        let compiled = self.lower(request)?;
        self.compilations.fetch_add(1, Ordering::Relaxed);
        trace!(
            target: "tiercall",
            name = %request.name,
            guards = compiled.guards.len(),
            code_size = compiled.code_size(),
            "tree lowered"
        );
        Ok(Arc::new(compiled))
    }

    fn name(&self) -> &str {
        "tree"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ProfileSnapshot, TargetId};
    use crate::tree::programs;

    fn request(unit: Arc<dyn ExecutableUnit>, log: Arc<SpeculationLog>, profile: ProfileSnapshot) -> CompilationRequest {
        CompilationRequest {
            target: TargetId(1),
            name: unit.name().to_string(),
            unit,
            speculation_log: log,
            profile,
        }
    }

    fn long_args_profile() -> ProfileSnapshot {
        ProfileSnapshot {
            argument_shapes: Some(vec![SlotState::Stable(ValueShape::Long), SlotState::Stable(ValueShape::Long)]),
            ..ProfileSnapshot::empty()
        }
    }

    #[test]
    fn test_speculates_until_logged() {
        let unit: Arc<dyn ExecutableUnit> = Arc::new(programs::sum_loop("sum"));
        let log = Arc::new(SpeculationLog::new());
        let compiler = TreeCompiler::new();

        let first = compiler
            .lower(&request(unit.clone(), log.clone(), long_args_profile()))
            .unwrap();
        let speculations = first.speculations();
        assert!(speculations.contains(&SpeculationId::new("sum:arg0:long")));
        assert!(speculations.contains(&SpeculationId::new("sum:add0:long")));

        log.record_failure(SpeculationId::new("sum:add0:long"));
        let second = compiler.lower(&request(unit, log, long_args_profile())).unwrap();
        assert!(!second.speculations().contains(&SpeculationId::new("sum:add0:long")));
    }

    #[test]
    fn test_guard_failure_deoptimizes() {
        let unit: Arc<dyn ExecutableUnit> = Arc::new(programs::sum_loop("sum"));
        let compiled = TreeCompiler::new()
            .lower(&request(unit.clone(), Arc::new(SpeculationLog::new()), long_args_profile()))
            .unwrap();

        let mut frame = Frame::new(unit.frame_descriptor(), &[Value::Long(3), Value::Long(2)]);
        assert_eq!(compiled.execute(&mut frame).unwrap(), Value::Long(6));

        let mut frame = Frame::new(unit.frame_descriptor(), &[Value::Long(3), Value::Double(0.5)]);
        match compiled.execute(&mut frame) {
            Err(CodeExit::Deoptimize(id)) => assert_eq!(id.as_str(), "sum:arg1:long"),
            _ => panic!("expected deoptimization"),
        }
    }

    #[test]
    fn test_size_limit_is_permanent() {
        let unit: Arc<dyn ExecutableUnit> = Arc::new(programs::sum_loop("sum"));
        let err = TreeCompiler::new()
            .with_max_nodes(1)
            .compile(&request(unit, Arc::new(SpeculationLog::new()), ProfileSnapshot::empty()))
            .err()
            .unwrap();
        assert!(err.is_permanent());
    }
}
