//! The physical operator tree (`spec.md` §4.4's physical-lowering pass):
//! the optimized [`lucidb_expr::RelExpr`] with join strategy, aggregate
//! strategy, and materialization decisions baked in. Scalar sub-trees are
//! reused as-is from `lucidb-expr` -- lowering changes relational shape,
//! not scalar semantics.

use lucidb_expr::{Attribute, CheckSpec, DmlOp, JoinKind, Reduction, ScalarExpr};
use lucidb_primitives::{AttributeId, TableId};

use crate::vtab::PushedFilter;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

impl From<lucidb_expr::SortDir> for SortDir {
    fn from(dir: lucidb_expr::SortDir) -> Self {
        match dir {
            lucidb_expr::SortDir::Asc => SortDir::Asc,
            lucidb_expr::SortDir::Desc => SortDir::Desc,
        }
    }
}

/// A join condition already split into columnar equi-keys (usable by a
/// hash join) and whatever residual predicate doesn't fit that shape.
#[derive(Clone, Debug, PartialEq)]
pub struct EquiJoinKeys {
    pub left: Vec<ScalarExpr>,
    pub right: Vec<ScalarExpr>,
    pub residual: Option<ScalarExpr>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PhysicalPlan {
    /// A virtual-table read. `filter` carries whatever the optimizer
    /// pushed into the originating `Retrieve`, translated into the
    /// runtime `FilterInfo` shape the module sees at execution time.
    Scan {
        table_id: TableId,
        module_name: String,
        filter: PushedFilter,
        attrs: Vec<Attribute>,
    },
    Filter {
        input: Box<PhysicalPlan>,
        predicate: ScalarExpr,
        attrs: Vec<Attribute>,
    },
    Project {
        input: Box<PhysicalPlan>,
        projections: Vec<ScalarExpr>,
        attrs: Vec<Attribute>,
    },
    NestedLoopJoin {
        kind: JoinKind,
        left: Box<PhysicalPlan>,
        right: Box<PhysicalPlan>,
        condition: Option<ScalarExpr>,
        attrs: Vec<Attribute>,
    },
    HashJoin {
        kind: JoinKind,
        left: Box<PhysicalPlan>,
        right: Box<PhysicalPlan>,
        keys: EquiJoinKeys,
        attrs: Vec<Attribute>,
    },
    /// Grouping computed by sorting-free hashing; used whenever the input
    /// doesn't already arrive ordered by the grouping columns.
    HashAggregate {
        input: Box<PhysicalPlan>,
        group_by: Vec<ScalarExpr>,
        reductions: Vec<Reduction>,
        attrs: Vec<Attribute>,
    },
    /// Grouping computed incrementally as each run of equal group-by keys
    /// passes through; only valid when `input`'s advertised order already
    /// groups those keys together (the planner's streaming-aggregate-
    /// choice rule stamps this onto the logical node before lowering).
    StreamAggregate {
        input: Box<PhysicalPlan>,
        group_by: Vec<ScalarExpr>,
        reductions: Vec<Reduction>,
        attrs: Vec<Attribute>,
    },
    Window {
        input: Box<PhysicalPlan>,
        windows: Vec<ScalarExpr>,
        attrs: Vec<Attribute>,
    },
    Sort {
        input: Box<PhysicalPlan>,
        keys: Vec<(AttributeId, SortDir)>,
        attrs: Vec<Attribute>,
    },
    Limit {
        input: Box<PhysicalPlan>,
        limit: Option<ScalarExpr>,
        offset: Option<ScalarExpr>,
        attrs: Vec<Attribute>,
    },
    SetOp {
        op: lucidb_expr::SetOpKind,
        all: bool,
        left: Box<PhysicalPlan>,
        right: Box<PhysicalPlan>,
        attrs: Vec<Attribute>,
    },
    Values {
        rows: Vec<Vec<ScalarExpr>>,
        attrs: Vec<Attribute>,
    },
    MutationContext {
        input: Box<PhysicalPlan>,
        captures: Vec<(AttributeId, ScalarExpr)>,
        attrs: Vec<Attribute>,
    },
    ConstraintCheck {
        input: Box<PhysicalPlan>,
        op: DmlOp,
        checks: Vec<CheckSpec>,
        attrs: Vec<Attribute>,
    },
    Insert {
        table_id: TableId,
        module_name: String,
        input: Box<PhysicalPlan>,
        attrs: Vec<Attribute>,
    },
    Update {
        table_id: TableId,
        module_name: String,
        input: Box<PhysicalPlan>,
        assignments: Vec<(AttributeId, ScalarExpr)>,
        attrs: Vec<Attribute>,
    },
    Delete {
        table_id: TableId,
        module_name: String,
        input: Box<PhysicalPlan>,
        attrs: Vec<Attribute>,
    },
    Returning {
        input: Box<PhysicalPlan>,
        projections: Vec<ScalarExpr>,
        attrs: Vec<Attribute>,
    },
    Block {
        statements: Vec<PhysicalPlan>,
        attrs: Vec<Attribute>,
    },
    /// Materialize `input` once per distinct binding of the parameters it
    /// closes over, keyed by `fingerprint`. Lowered 1:1 from
    /// `RelExpr::Cache`.
    Materialize {
        input: Box<PhysicalPlan>,
        fingerprint: u64,
        attrs: Vec<Attribute>,
    },
}

impl PhysicalPlan {
    pub fn attributes(&self) -> &[Attribute] {
        match self {
            PhysicalPlan::Scan { attrs, .. }
            | PhysicalPlan::Filter { attrs, .. }
            | PhysicalPlan::Project { attrs, .. }
            | PhysicalPlan::NestedLoopJoin { attrs, .. }
            | PhysicalPlan::HashJoin { attrs, .. }
            | PhysicalPlan::HashAggregate { attrs, .. }
            | PhysicalPlan::StreamAggregate { attrs, .. }
            | PhysicalPlan::Window { attrs, .. }
            | PhysicalPlan::Sort { attrs, .. }
            | PhysicalPlan::Limit { attrs, .. }
            | PhysicalPlan::SetOp { attrs, .. }
            | PhysicalPlan::Values { attrs, .. }
            | PhysicalPlan::MutationContext { attrs, .. }
            | PhysicalPlan::ConstraintCheck { attrs, .. }
            | PhysicalPlan::Insert { attrs, .. }
            | PhysicalPlan::Update { attrs, .. }
            | PhysicalPlan::Delete { attrs, .. }
            | PhysicalPlan::Returning { attrs, .. }
            | PhysicalPlan::Block { attrs, .. }
            | PhysicalPlan::Materialize { attrs, .. } => attrs,
        }
    }

    pub fn children(&self) -> Vec<&PhysicalPlan> {
        match self {
            PhysicalPlan::Scan { .. } | PhysicalPlan::Values { .. } => vec![],
            PhysicalPlan::Filter { input, .. }
            | PhysicalPlan::Project { input, .. }
            | PhysicalPlan::HashAggregate { input, .. }
            | PhysicalPlan::StreamAggregate { input, .. }
            | PhysicalPlan::Window { input, .. }
            | PhysicalPlan::Sort { input, .. }
            | PhysicalPlan::Limit { input, .. }
            | PhysicalPlan::MutationContext { input, .. }
            | PhysicalPlan::ConstraintCheck { input, .. }
            | PhysicalPlan::Insert { input, .. }
            | PhysicalPlan::Update { input, .. }
            | PhysicalPlan::Delete { input, .. }
            | PhysicalPlan::Returning { input, .. }
            | PhysicalPlan::Materialize { input, .. } => vec![input.as_ref()],
            PhysicalPlan::NestedLoopJoin { left, right, .. }
            | PhysicalPlan::HashJoin { left, right, .. }
            | PhysicalPlan::SetOp { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            PhysicalPlan::Block { statements, .. } => statements.iter().collect(),
        }
    }
}
