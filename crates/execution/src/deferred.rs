//! Deferred `CHECK` constraints (`spec.md` §4.7): a constraint marked
//! deferrable that a `ConstraintCheck` operator finds false is not a
//! statement failure by itself -- it is queued here and `lucidb-datastore`'s
//! transaction coordinator re-evaluates the queue once more at commit,
//! after every statement in the transaction has had a chance to make the
//! row true. A plain `Mutex<Vec<_>>` is enough: the queue is drained once,
//! at commit, never contended during normal execution.

use std::sync::Mutex;

use lucidb_expr::ScalarExpr;
use lucidb_sats::Row;

use crate::row::RowDescriptor;

/// One deferred obligation: the row as it stood when the check first
/// failed, the descriptor needed to resolve the check expression's column
/// references against it, and the constraint's name for the eventual error.
pub struct PendingCheck {
    pub constraint_name: String,
    pub expr: ScalarExpr,
    pub descriptor: RowDescriptor,
    pub row: Row,
}

#[derive(Default)]
pub struct DeferredChecks {
    pending: Mutex<Vec<PendingCheck>>,
}

impl DeferredChecks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, check: PendingCheck) {
        self.pending.lock().expect("deferred check queue lock poisoned").push(check);
    }

    /// Empties the queue, handing ownership of every pending check to the
    /// caller for re-evaluation.
    pub fn drain(&self) -> Vec<PendingCheck> {
        std::mem::take(&mut *self.pending.lock().expect("deferred check queue lock poisoned"))
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().expect("deferred check queue lock poisoned").is_empty()
    }
}
