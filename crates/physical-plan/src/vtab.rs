//! The structural shapes of the virtual-table contract (`spec.md` §4.6,
//! §6): `FilterInfo`, `AccessPlan`, and the pushed-down filter a `Scan`
//! node carries. The async `Module`/`Table`/`Connection` traits that
//! exchange these types at run time live in `lucidb-execution`, which has
//! the async stack this crate deliberately does not depend on -- a
//! physical plan is a pure data structure, not a running thing.

use lucidb_expr::ScalarExpr;
use lucidb_primitives::AttributeId;

use crate::plan::SortDir;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterOp {
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

/// One constraint a module's `getBestAccessPlan`/`query` sees, naming the
/// constrained column and, for non-unary operators, the position in
/// `FilterInfo::params` holding the comparison value.
#[derive(Clone, Debug, PartialEq)]
pub struct FilterConstraint {
    pub column: AttributeId,
    pub op: FilterOp,
    pub arg_pos: Option<usize>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FilterOrderBy {
    pub column: AttributeId,
    pub dir: SortDir,
}

/// The descriptor a module's `query` receives (§6's `FilterInfo`).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FilterInfo {
    pub index_number: Option<u32>,
    pub index_name: Option<String>,
    pub constraints: Vec<FilterConstraint>,
    pub order_by: Vec<FilterOrderBy>,
    pub projection: Option<Vec<usize>>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub params: Vec<lucidb_sats::Value>,
}

/// What a module's optional `getBestAccessPlan` reports back: which of
/// the offered constraints/ordering/limit it can honor, and an estimated
/// row count the optimizer's caching-insertion rule treats as a
/// cheapness proxy.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AccessPlan {
    pub accepted_constraints: Vec<usize>,
    pub accepts_order_by: bool,
    pub accepts_limit: bool,
    pub estimated_rows: Option<u64>,
}

/// The pushed-down filter baked into a `PhysicalPlan::Scan`, lowered from
/// `lucidb_expr::PushedDown`. `filter`/`limit`/`offset` stay as
/// `ScalarExpr` here (params/literals resolved at row-evaluation time,
/// not at lowering time) -- `FilterInfo::params` is filled in by the
/// scheduler once it has the statement's bound parameters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PushedFilter {
    pub filter: Option<ScalarExpr>,
    pub sort: Vec<(AttributeId, SortDir)>,
    pub limit: Option<ScalarExpr>,
    pub offset: Option<ScalarExpr>,
    pub projection: Option<Vec<usize>>,
}
