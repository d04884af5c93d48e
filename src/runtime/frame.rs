//! Execution frames built for every call of a unit.

use std::sync::Arc;

use smallvec::SmallVec;

use super::value::Value;

/// Declared shape of a unit's frame: the named local slots
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameDescriptor {
    slots: Vec<String>,
}

impl FrameDescriptor {
    pub fn new<I, S>(slots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            slots: slots.into_iter().map(Into::into).collect(),
        }
    }

    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of local slots
    #[inline]
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_index(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|s| s == name)
    }

    pub fn slot_names(&self) -> &[String] {
        &self.slots
    }
}

/// A fresh activation: the call arguments plus zeroed local slots
#[derive(Debug, Clone)]
pub struct Frame {
    descriptor: Arc<FrameDescriptor>,
    arguments: SmallVec<[Value; 4]>,
    locals: Vec<Value>,
}

impl Frame {
    pub fn new(descriptor: Arc<FrameDescriptor>, args: &[Value]) -> Self {
        let locals = vec![Value::Nil; descriptor.size()];
        Self {
            descriptor,
            arguments: args.iter().cloned().collect(),
            locals,
        }
    }

    pub fn descriptor(&self) -> &Arc<FrameDescriptor> {
        &self.descriptor
    }

    #[inline]
    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    #[inline]
    pub fn argument(&self, index: usize) -> Option<&Value> {
        self.arguments.get(index)
    }

    #[inline]
    pub fn local(&self, index: usize) -> Option<&Value> {
        self.locals.get(index)
    }

    /// Store into a local slot; returns false if the slot does not exist
    pub fn set_local(&mut self, index: usize, value: Value) -> bool {
        match self.locals.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}
