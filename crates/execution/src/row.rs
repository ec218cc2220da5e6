//! Row contexts as slots (`spec.md` §4.5): a relational node allocates a
//! slot keyed by a [`RowDescriptor`] mapping attribute ids to row
//! positions; child scalars resolve `ColumnRef`s via the innermost
//! matching slot. [`SlotStack`] gives scoped lifetimes on top of
//! [`lucidb_data_structures::ScopedStack`] -- a slot opens when a row
//! enters and closes on every exit path, including an error.

use lucidb_data_structures::ScopedStack;
use lucidb_primitives::AttributeId;
use lucidb_sats::{Row, Value};

/// Maps attribute ids to positions in a physical row. Built once per
/// relational node (its output shape is fixed), reused for every row
/// that flows through.
#[derive(Clone, Debug, PartialEq)]
pub struct RowDescriptor {
    positions: Vec<AttributeId>,
}

impl RowDescriptor {
    pub fn new(positions: Vec<AttributeId>) -> Self {
        Self { positions }
    }

    pub fn position_of(&self, id: AttributeId) -> Option<usize> {
        self.positions.iter().position(|p| *p == id)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// One open slot: a descriptor plus the row currently bound to it.
pub struct Slot<'a> {
    pub descriptor: &'a RowDescriptor,
    pub row: &'a Row,
}

/// The scalar-evaluation environment: a stack of open slots (innermost
/// last, searched in reverse so a nested subquery's own columns shadow
/// the outer query's), plus the statement's bound parameters and the
/// current `MutationContext` captures.
pub struct EvalEnv<'a> {
    slots: ScopedStack<Slot<'a>>,
    pub params: &'a [Value],
    pub captures: &'a [(AttributeId, Value)],
}

impl<'a> EvalEnv<'a> {
    pub fn new(params: &'a [Value], captures: &'a [(AttributeId, Value)]) -> Self {
        Self {
            slots: ScopedStack::new(),
            params,
            captures,
        }
    }

    pub fn enter(&mut self, descriptor: &'a RowDescriptor, row: &'a Row) {
        self.slots.push(Slot { descriptor, row });
    }

    pub fn exit(&mut self) {
        self.slots.pop();
    }

    /// Resolves a column reference against the innermost slot that knows
    /// about it, falling back to `MutationContext` captures (which are
    /// visible to every row below their injection point, not scoped to a
    /// single slot).
    pub fn resolve(&self, id: AttributeId) -> Option<&Value> {
        for slot in self.slots.iter_from_top() {
            if let Some(pos) = slot.descriptor.position_of(id) {
                return slot.row.get(pos);
            }
        }
        self.captures.iter().find(|(cap_id, _)| *cap_id == id).map(|(_, v)| v)
    }

    /// Clones this environment's open slot stack (not its rows) into a new
    /// environment with `captures` swapped out. Used when a `MutationContext`
    /// layers freshly evaluated captures beneath rows already in scope for a
    /// correlated subquery, and by the scheduler whenever it needs a fresh
    /// stack to open its own slot into without disturbing the caller's.
    pub fn nested_with_captures(&self, captures: &'a [(AttributeId, Value)]) -> Self {
        let mut frames: Vec<Slot<'a>> = self
            .slots
            .iter_from_top()
            .map(|s| Slot {
                descriptor: s.descriptor,
                row: s.row,
            })
            .collect();
        frames.reverse();
        let mut slots = ScopedStack::new();
        for frame in frames {
            slots.push(frame);
        }
        Self {
            slots,
            params: self.params,
            captures,
        }
    }

    /// Same slot stack, same captures -- a fresh handle the scheduler can
    /// open its own slot into without mutating the caller's environment.
    pub fn nested(&self) -> Self {
        self.nested_with_captures(self.captures)
    }
}
