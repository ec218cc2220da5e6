//! Scalar expression nodes (`spec.md` §3 "Plan-tree entities", the
//! `Literal`/`ColumnRef`/.../`In` list).

use lucidb_primitives::{AttributeId, FunctionId};
use lucidb_sats::{LogicalType, Value};

use crate::rel::RelExpr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    IsNull,
    IsNotNull,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Like,
    Glob,
    Concat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FrameBound {
    UnboundedPreceding,
    Preceding(i64),
    CurrentRow,
    Following(i64),
    UnboundedFollowing,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WindowFrame {
    pub partition_by: Vec<ScalarExpr>,
    pub order_by: Vec<(ScalarExpr, SortDir)>,
    pub bounds: Option<(FrameBound, FrameBound)>,
}

/// The list a bare `IN` predicate matches against: either a literal value
/// list or a subquery (`IN (SELECT ...)`), per §3.
#[derive(Clone, Debug, PartialEq)]
pub enum InList {
    Values(Vec<ScalarExpr>),
    Subquery(Box<RelExpr>),
}

/// A scalar (expression-typed) plan node. Every variant carries its own
/// stable [`AttributeId`] -- expressions are themselves addressable
/// outputs once they appear in a `Seq` projection or an `Aggregate`
/// reduction -- and, except for `Exists`/boolean-typed nodes, the
/// [`LogicalType`] the value evaluates to.
#[derive(Clone, Debug, PartialEq)]
pub enum ScalarExpr {
    Literal {
        id: AttributeId,
        value: Value,
        ty: LogicalType,
    },
    ColumnRef {
        id: AttributeId,
        /// The attribute id of the producing relational node's output
        /// column this reference resolves to. Column references never
        /// allocate a fresh id of their own distinct from the one they
        /// name -- per §4.3, "projections re-use incoming IDs... creating
        /// new ones only for computed columns" -- so `id == refers_to`
        /// for every `ColumnRef` constructed by the plan builder.
        refers_to: AttributeId,
        ty: LogicalType,
    },
    Parameter {
        id: AttributeId,
        index: usize,
        ty: LogicalType,
    },
    Unary {
        id: AttributeId,
        op: UnaryOp,
        expr: Box<ScalarExpr>,
        ty: LogicalType,
    },
    Binary {
        id: AttributeId,
        op: BinaryOp,
        lhs: Box<ScalarExpr>,
        rhs: Box<ScalarExpr>,
        ty: LogicalType,
    },
    Cast {
        id: AttributeId,
        expr: Box<ScalarExpr>,
        ty: LogicalType,
    },
    Case {
        id: AttributeId,
        operand: Option<Box<ScalarExpr>>,
        branches: Vec<(ScalarExpr, ScalarExpr)>,
        else_branch: Option<Box<ScalarExpr>>,
        ty: LogicalType,
    },
    FunctionCall {
        id: AttributeId,
        function: FunctionId,
        name: String,
        args: Vec<ScalarExpr>,
        deterministic: bool,
        ty: LogicalType,
    },
    WindowCall {
        id: AttributeId,
        name: String,
        args: Vec<ScalarExpr>,
        frame: WindowFrame,
        ty: LogicalType,
    },
    ScalarSubquery {
        id: AttributeId,
        plan: Box<RelExpr>,
        ty: LogicalType,
    },
    Exists {
        id: AttributeId,
        plan: Box<RelExpr>,
    },
    In {
        id: AttributeId,
        expr: Box<ScalarExpr>,
        list: InList,
        negated: bool,
    },
}

impl ScalarExpr {
    pub fn id(&self) -> AttributeId {
        match self {
            ScalarExpr::Literal { id, .. }
            | ScalarExpr::ColumnRef { id, .. }
            | ScalarExpr::Parameter { id, .. }
            | ScalarExpr::Unary { id, .. }
            | ScalarExpr::Binary { id, .. }
            | ScalarExpr::Cast { id, .. }
            | ScalarExpr::Case { id, .. }
            | ScalarExpr::FunctionCall { id, .. }
            | ScalarExpr::WindowCall { id, .. }
            | ScalarExpr::ScalarSubquery { id, .. }
            | ScalarExpr::Exists { id, .. }
            | ScalarExpr::In { id, .. } => *id,
        }
    }

    /// The logical type the expression evaluates to. `Exists` and `In` are
    /// always boolean and not nullable by construction (a missing operand
    /// is a NULL comparison result, not a NULL predicate -- three-valued
    /// logic is resolved by the emitter, not represented in the type).
    pub fn ty(&self) -> LogicalType {
        match self {
            ScalarExpr::Literal { ty, .. }
            | ScalarExpr::ColumnRef { ty, .. }
            | ScalarExpr::Parameter { ty, .. }
            | ScalarExpr::Unary { ty, .. }
            | ScalarExpr::Binary { ty, .. }
            | ScalarExpr::Cast { ty, .. }
            | ScalarExpr::Case { ty, .. }
            | ScalarExpr::FunctionCall { ty, .. }
            | ScalarExpr::WindowCall { ty, .. }
            | ScalarExpr::ScalarSubquery { ty, .. } => ty.clone(),
            ScalarExpr::Exists { .. } | ScalarExpr::In { .. } => {
                LogicalType::not_null(lucidb_sats::PhysicalType::Boolean)
            }
        }
    }

    /// Direct scalar children, for recursive rewrites and
    /// [`ScalarExpr::is_deterministic`]. Subquery plans nested inside
    /// `ScalarSubquery`/`Exists`/`In` are not scalar children -- they are
    /// relational subtrees walked separately by the optimizer.
    pub fn children(&self) -> Vec<&ScalarExpr> {
        match self {
            ScalarExpr::Literal { .. } | ScalarExpr::ColumnRef { .. } | ScalarExpr::Parameter { .. } => vec![],
            ScalarExpr::Unary { expr, .. } | ScalarExpr::Cast { expr, .. } => vec![expr],
            ScalarExpr::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            ScalarExpr::Case {
                operand,
                branches,
                else_branch,
                ..
            } => operand
                .iter()
                .map(AsRef::as_ref)
                .chain(branches.iter().flat_map(|(w, t)| [w, t]))
                .chain(else_branch.iter().map(AsRef::as_ref))
                .collect(),
            ScalarExpr::FunctionCall { args, .. } => args.iter().collect(),
            ScalarExpr::WindowCall { args, frame, .. } => args
                .iter()
                .chain(frame.partition_by.iter())
                .chain(frame.order_by.iter().map(|(e, _)| e))
                .collect(),
            ScalarExpr::ScalarSubquery { .. } | ScalarExpr::Exists { .. } => vec![],
            ScalarExpr::In { expr, list, .. } => {
                let mut out = vec![expr.as_ref()];
                if let InList::Values(vs) = list {
                    out.extend(vs.iter());
                }
                out
            }
        }
    }

    /// Per §4.5's determinism rule: `FunctionCall` is deterministic only
    /// if the registered function is; everything else is deterministic
    /// iff its children are (a `ColumnRef`/`Literal`/`Parameter` is always
    /// deterministic -- it reads a fixed slot, it doesn't compute
    /// anything). Subqueries are conservatively treated as deterministic
    /// here; the builder routes genuinely non-deterministic producers
    /// through a `MutationContext` capture instead of leaving them inline.
    pub fn is_deterministic(&self) -> bool {
        match self {
            ScalarExpr::FunctionCall { deterministic, args, .. } => {
                *deterministic && args.iter().all(ScalarExpr::is_deterministic)
            }
            _ => self.children().iter().all(|c| c.is_deterministic()),
        }
    }
}
