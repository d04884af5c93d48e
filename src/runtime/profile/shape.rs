//! Lock-free type stability slots for arguments and return values.
//!
//! Each slot follows a one-way state machine:
//!
//! ```text
//! Unobserved --first value--> Stable(shape) --different shape--> Unstable
//! ```
//!
//! `Unstable` is terminal until an explicit [`ShapeSlot::reset`].

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::OnceLock;

use crate::runtime::value::{Value, ValueShape};

const UNOBSERVED: u8 = 0;
const UNSTABLE: u8 = u8::MAX;

/// Observable state of one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Unobserved,
    Stable(ValueShape),
    Unstable,
}

impl SlotState {
    pub fn stable_shape(self) -> Option<ValueShape> {
        match self {
            SlotState::Stable(shape) => Some(shape),
            _ => None,
        }
    }

    pub fn label(self) -> String {
        match self {
            SlotState::Unobserved => "unobserved".to_string(),
            SlotState::Stable(shape) => shape.name().to_string(),
            SlotState::Unstable => "unstable".to_string(),
        }
    }
}

/// Result of feeding one observation into a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeObservation {
    /// Nothing changed
    Unchanged,
    /// First observation pinned the shape
    Pinned,
    /// This observation turned a stable slot unstable
    Destabilized,
}

impl ShapeObservation {
    fn merge(self, other: ShapeObservation) -> ShapeObservation {
        match (self, other) {
            (ShapeObservation::Destabilized, _) | (_, ShapeObservation::Destabilized) => {
                ShapeObservation::Destabilized
            }
            (ShapeObservation::Pinned, _) | (_, ShapeObservation::Pinned) => ShapeObservation::Pinned,
            _ => ShapeObservation::Unchanged,
        }
    }
}

/// One type-profiled position
#[derive(Debug, Default)]
pub struct ShapeSlot(AtomicU8);

impl ShapeSlot {
    pub const fn new() -> Self {
        ShapeSlot(AtomicU8::new(UNOBSERVED))
    }

    pub fn observe(&self, shape: ValueShape) -> ShapeObservation {
        let code = shape as u8;
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if current == UNSTABLE || current == code {
                return ShapeObservation::Unchanged;
            }
            if current == UNOBSERVED {
                match self.0.compare_exchange(
                    UNOBSERVED,
                    code,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => return ShapeObservation::Pinned,
                    Err(actual) => {
                        current = actual;
                        continue;
                    }
                }
            }
            // Only one thread reports the transition
            return if self.0.swap(UNSTABLE, Ordering::AcqRel) == UNSTABLE {
                ShapeObservation::Unchanged
            } else {
                ShapeObservation::Destabilized
            };
        }
    }

    pub fn state(&self) -> SlotState {
        match self.0.load(Ordering::Acquire) {
            UNOBSERVED => SlotState::Unobserved,
            UNSTABLE => SlotState::Unstable,
            code => ValueShape::from_u8(code)
                .map(SlotState::Stable)
                .unwrap_or(SlotState::Unstable),
        }
    }

    /// Force the slot generic
    pub fn destabilize(&self) -> ShapeObservation {
        if self.0.swap(UNSTABLE, Ordering::AcqRel) == UNSTABLE {
            ShapeObservation::Unchanged
        } else {
            ShapeObservation::Destabilized
        }
    }

    pub fn reset(&self) {
        self.0.store(UNOBSERVED, Ordering::Release);
    }
}

/// Per-argument shape profile
///
/// The arity is fixed by the first profiled call. A call with a different
/// arity turns the whole profile generic.
#[derive(Debug, Default)]
pub struct ArgumentProfile {
    slots: OnceLock<Box<[ShapeSlot]>>,
    arity_mismatch: AtomicBool,
}

impl ArgumentProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, args: &[Value]) -> ShapeObservation {
        if self.arity_mismatch.load(Ordering::Acquire) {
            return ShapeObservation::Unchanged;
        }
        let slots = self
            .slots
            .get_or_init(|| args.iter().map(|_| ShapeSlot::new()).collect());
        if slots.len() != args.len() {
            return if self.arity_mismatch.swap(true, Ordering::AcqRel) {
                ShapeObservation::Unchanged
            } else {
                ShapeObservation::Destabilized
            };
        }
        slots
            .iter()
            .zip(args)
            .fold(ShapeObservation::Unchanged, |acc, (slot, arg)| {
                acc.merge(slot.observe(arg.shape()))
            })
    }

    /// Per-slot states, or `None` when the arity is not stable
    pub fn states(&self) -> Option<Vec<SlotState>> {
        if self.arity_mismatch.load(Ordering::Acquire) {
            return None;
        }
        self.slots
            .get()
            .map(|slots| slots.iter().map(ShapeSlot::state).collect())
    }

    pub fn slot(&self, index: usize) -> SlotState {
        if self.arity_mismatch.load(Ordering::Acquire) {
            return SlotState::Unstable;
        }
        self.slots
            .get()
            .and_then(|slots| slots.get(index))
            .map(ShapeSlot::state)
            .unwrap_or(SlotState::Unobserved)
    }

    /// Explicit reset; the only way an unstable slot can specialize again
    pub fn reset(&self) {
        if let Some(slots) = self.slots.get() {
            slots.iter().for_each(ShapeSlot::reset);
        }
        self.arity_mismatch.store(false, Ordering::Release);
    }
}
