//! The coarse, planning-time capability hint a virtual-table module
//! advertises for a table (`spec.md` §4.4's "retrieve growth" rule, §6
//! `getBestAccessPlan`). This is deliberately smaller than the runtime
//! vtab contract (`lucidb-physical-plan`'s `FilterInfo`/`AccessPlan`):
//! the planner only needs enough to decide whether a predicate/sort/
//! limit/projection is safe to slide into a `Retrieve` node, not the
//! machinery to actually run the pushed-down read.
//!
//! Per the REDESIGN/open-question note in §9 ("some rules rely on
//! `supports()` without a formal contract for partial support"), this
//! module resolves that ambiguity explicitly: support is reported
//! per-predicate-operator, not as one blanket "supports filtering" flag,
//! so a module that accepts equality but not `LIKE` lets the optimizer
//! push the former and retain the latter as a residual `Filter`.

use lucidb_primitives::TableId;

/// A predicate operator, mirroring `FilterInfo`'s `op` enum in §6.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PredicateOp {
    Eq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Like,
    Glob,
    IsNull,
    IsNotNull,
    In,
    Match,
}

/// What a module declares it can accept for one table, consulted by the
/// retrieve-growth rule. `sort`/`limit`/`projection` are coarse booleans
/// (the common case: a module either can or can't honor an ORDER BY,
/// LIMIT, or column projection at all); predicate support is finer,
/// since partial predicate pushdown is the common real-world case (an
/// index that accepts equality but not range, say).
#[derive(Clone, Debug, Default)]
pub struct VtabCapabilities {
    supported_ops: Vec<PredicateOp>,
    pub sort: bool,
    pub limit: bool,
    pub projection: bool,
    pub estimated_rows: Option<u64>,
}

impl VtabCapabilities {
    pub fn none() -> Self {
        Self::default()
    }

    /// A module that accepts everything pushed at it -- the memory table
    /// engine's default stance, since it evaluates filters/sort/limit/
    /// projection over its own merge-cursor scan natively.
    pub fn all(estimated_rows: Option<u64>) -> Self {
        Self {
            supported_ops: vec![
                PredicateOp::Eq,
                PredicateOp::Lt,
                PredicateOp::LtEq,
                PredicateOp::Gt,
                PredicateOp::GtEq,
                PredicateOp::Like,
                PredicateOp::Glob,
                PredicateOp::IsNull,
                PredicateOp::IsNotNull,
                PredicateOp::In,
                PredicateOp::Match,
            ],
            sort: true,
            limit: true,
            projection: true,
            estimated_rows,
        }
    }

    pub fn with_ops(mut self, ops: impl IntoIterator<Item = PredicateOp>) -> Self {
        self.supported_ops = ops.into_iter().collect();
        self
    }

    pub fn supports_op(&self, op: PredicateOp) -> bool {
        self.supported_ops.contains(&op)
    }
}

/// Resolves a table's [`VtabCapabilities`] during planning. Implemented
/// by whatever owns the live module registry (the host embedding the
/// planner); the planner crate itself has no notion of a running vtab.
pub trait CapabilityProvider {
    fn capabilities(&self, table_id: TableId) -> VtabCapabilities;
}

/// A [`CapabilityProvider`] that reports no pushdown support for any
/// table, useful as a conservative default in tests and for sources that
/// genuinely cannot accept pushdown.
pub struct NoPushdown;

impl CapabilityProvider for NoPushdown {
    fn capabilities(&self, _table_id: TableId) -> VtabCapabilities {
        VtabCapabilities::none()
    }
}
