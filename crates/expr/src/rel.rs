//! Relational (producer) plan nodes (`spec.md` §3).

use lucidb_primitives::{AttributeId, TableId};
use lucidb_sats::LogicalType;

use crate::scalar::{ScalarExpr, SortDir};

#[derive(Clone, Debug, PartialEq)]
pub struct Attribute {
    pub id: AttributeId,
    pub name: String,
    pub ty: LogicalType,
}

/// Whether a relation's output may contain duplicate rows (`Bag`, the
/// default) or is known not to (`Set`) -- the optimizer exploits `Set` to
/// justify set-op algorithms and to drop redundant `DISTINCT`s.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cardinality {
    Bag,
    Set,
}

/// What a `Retrieve`/subquery subtree captures from outside itself: a
/// bound statement parameter, or a column from an enclosing query (a
/// correlated subquery). Per invariant 2, a `Retrieve` node's bindings
/// must enumerate every parameter/outer-column it references.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Binding {
    Parameter(usize),
    OuterColumn(AttributeId),
}

/// Non-cardinality logical properties an optimizer rule may consult
/// without re-deriving them: the sort order the node's output already
/// satisfies (used by sort elimination and streaming-aggregate choice),
/// whether the output is already known duplicate-free, a size estimate
/// (since cost-based optimization is explicitly out of scope, this is
/// advisory only -- used by caching-insertion as a cheapness proxy, not
/// by any cost model), and the bindings a subtree captures.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LogicalProps {
    pub sort_order: Vec<(AttributeId, SortDir)>,
    pub cardinality: Option<Cardinality>,
    pub estimated_rows: Option<u64>,
    pub bindings: Vec<Binding>,
}

impl LogicalProps {
    pub fn is_set(&self) -> bool {
        matches!(self.cardinality, Some(Cardinality::Set))
    }
}

/// Convenience accessors over a plan node's attribute list, used by
/// optimizer-rule tests asserting invariant 1 (`attributes(R(P)) ⊇
/// attributes(P)` restricted to survivors).
pub trait AttributeSetExt {
    fn ids(&self) -> Vec<AttributeId>;
    fn contains_id(&self, id: AttributeId) -> bool;
}

impl AttributeSetExt for [Attribute] {
    fn ids(&self) -> Vec<AttributeId> {
        self.iter().map(|a| a.id).collect()
    }

    fn contains_id(&self, id: AttributeId) -> bool {
        self.iter().any(|a| a.id == id)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Cross,
}

#[derive(Clone, Debug, PartialEq)]
pub enum JoinCondition {
    On(ScalarExpr),
    Using(Vec<AttributeId>),
    None,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetOpKind {
    Union,
    Intersect,
    Except,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Reduction {
    pub output: AttributeId,
    pub function_name: String,
    pub args: Vec<ScalarExpr>,
    pub distinct: bool,
}

/// Columns pushed into a `Retrieve` node by the optimizer's "retrieve
/// growth" rule (§4.4), or populated directly by the plan builder for a
/// bare scan. A predicate/sort/limit/projection the source's
/// `supports()` rejects is left as `None`/empty here and stays above the
/// `Retrieve` as an ordinary `Filter`/`Sort`/`Limit`/`Seq` node.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PushedDown {
    pub filter: Option<ScalarExpr>,
    pub sort: Vec<(AttributeId, SortDir)>,
    pub limit: Option<ScalarExpr>,
    pub offset: Option<ScalarExpr>,
    /// Column positions the source should project; `None` means "all
    /// columns", matching `FilterInfo::projection` in §6.
    pub projection: Option<Vec<usize>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DmlOp {
    Insert,
    Update,
    Delete,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CheckSpec {
    pub constraint_name: String,
    pub expr: ScalarExpr,
    pub deferrable: bool,
    pub contains_subquery: bool,
}

/// A plan tree node: scalar expression nodes (`ScalarExpr`) are typed
/// separately; every variant here is relation-typed, carrying its own
/// output [`Attribute`]s and [`LogicalProps`] (§4.3 "Every plan node
/// carries (i) a stable attribute set... and (ii) a type").
#[derive(Clone, Debug, PartialEq)]
pub enum RelExpr {
    /// Projection -- named `Seq` per the node-variant list in §3.
    Seq {
        input: Box<RelExpr>,
        projections: Vec<ScalarExpr>,
        attrs: Vec<Attribute>,
        props: LogicalProps,
    },
    Filter {
        input: Box<RelExpr>,
        predicate: ScalarExpr,
        attrs: Vec<Attribute>,
        props: LogicalProps,
    },
    Join {
        kind: JoinKind,
        left: Box<RelExpr>,
        right: Box<RelExpr>,
        condition: JoinCondition,
        attrs: Vec<Attribute>,
        props: LogicalProps,
    },
    Aggregate {
        input: Box<RelExpr>,
        group_by: Vec<ScalarExpr>,
        reductions: Vec<Reduction>,
        attrs: Vec<Attribute>,
        props: LogicalProps,
    },
    Window {
        input: Box<RelExpr>,
        windows: Vec<ScalarExpr>,
        attrs: Vec<Attribute>,
        props: LogicalProps,
    },
    Sort {
        input: Box<RelExpr>,
        keys: Vec<(AttributeId, SortDir)>,
        attrs: Vec<Attribute>,
        props: LogicalProps,
    },
    Limit {
        input: Box<RelExpr>,
        limit: Option<ScalarExpr>,
        offset: Option<ScalarExpr>,
        attrs: Vec<Attribute>,
        props: LogicalProps,
    },
    Set {
        op: SetOpKind,
        all: bool,
        left: Box<RelExpr>,
        right: Box<RelExpr>,
        attrs: Vec<Attribute>,
        props: LogicalProps,
    },
    Cte {
        name: String,
        definition: Box<RelExpr>,
        body: Box<RelExpr>,
        attrs: Vec<Attribute>,
        props: LogicalProps,
    },
    Values {
        rows: Vec<Vec<ScalarExpr>>,
        attrs: Vec<Attribute>,
        props: LogicalProps,
    },
    /// A virtual-table read, holding any predicates/sort/limit/projection
    /// the optimizer has pushed down and the bindings it captures.
    Retrieve {
        table_id: TableId,
        module_name: String,
        pushed: PushedDown,
        attrs: Vec<Attribute>,
        props: LogicalProps,
    },
    /// Statement-scoped, evaluated-once captures of non-deterministic
    /// values (§4.3, §4.5's determinism rule), injected into every row's
    /// evaluation environment below this node.
    MutationContext {
        input: Box<RelExpr>,
        captures: Vec<(AttributeId, ScalarExpr)>,
        attrs: Vec<Attribute>,
        props: LogicalProps,
    },
    ConstraintCheck {
        input: Box<RelExpr>,
        op: DmlOp,
        checks: Vec<CheckSpec>,
        attrs: Vec<Attribute>,
        props: LogicalProps,
    },
    Insert {
        table_id: TableId,
        input: Box<RelExpr>,
        attrs: Vec<Attribute>,
        props: LogicalProps,
    },
    Update {
        table_id: TableId,
        input: Box<RelExpr>,
        assignments: Vec<(AttributeId, ScalarExpr)>,
        attrs: Vec<Attribute>,
        props: LogicalProps,
    },
    Delete {
        table_id: TableId,
        input: Box<RelExpr>,
        attrs: Vec<Attribute>,
        props: LogicalProps,
    },
    Returning {
        input: Box<RelExpr>,
        projections: Vec<ScalarExpr>,
        attrs: Vec<Attribute>,
        props: LogicalProps,
    },
    Block {
        statements: Vec<RelExpr>,
        attrs: Vec<Attribute>,
        props: LogicalProps,
    },
    /// A memoizing node inserted by the optimizer's caching-insertion rule
    /// (§4.4): `input` is re-evaluated only when the bound parameters it
    /// closes over change, keyed by `fingerprint` (the subtree's structural
    /// fingerprint) plus those bound values. Never produced by the plan
    /// builder -- only by [`RelExpr::attributes`]'s optimizer-side caller.
    Cache {
        input: Box<RelExpr>,
        fingerprint: u64,
        attrs: Vec<Attribute>,
        props: LogicalProps,
    },
}

impl RelExpr {
    pub fn attributes(&self) -> &[Attribute] {
        match self {
            RelExpr::Seq { attrs, .. }
            | RelExpr::Filter { attrs, .. }
            | RelExpr::Join { attrs, .. }
            | RelExpr::Aggregate { attrs, .. }
            | RelExpr::Window { attrs, .. }
            | RelExpr::Sort { attrs, .. }
            | RelExpr::Limit { attrs, .. }
            | RelExpr::Set { attrs, .. }
            | RelExpr::Cte { attrs, .. }
            | RelExpr::Values { attrs, .. }
            | RelExpr::Retrieve { attrs, .. }
            | RelExpr::MutationContext { attrs, .. }
            | RelExpr::ConstraintCheck { attrs, .. }
            | RelExpr::Insert { attrs, .. }
            | RelExpr::Update { attrs, .. }
            | RelExpr::Delete { attrs, .. }
            | RelExpr::Returning { attrs, .. }
            | RelExpr::Block { attrs, .. }
            | RelExpr::Cache { attrs, .. } => attrs,
        }
    }

    pub fn logical_props(&self) -> &LogicalProps {
        match self {
            RelExpr::Seq { props, .. }
            | RelExpr::Filter { props, .. }
            | RelExpr::Join { props, .. }
            | RelExpr::Aggregate { props, .. }
            | RelExpr::Window { props, .. }
            | RelExpr::Sort { props, .. }
            | RelExpr::Limit { props, .. }
            | RelExpr::Set { props, .. }
            | RelExpr::Cte { props, .. }
            | RelExpr::Values { props, .. }
            | RelExpr::Retrieve { props, .. }
            | RelExpr::MutationContext { props, .. }
            | RelExpr::ConstraintCheck { props, .. }
            | RelExpr::Insert { props, .. }
            | RelExpr::Update { props, .. }
            | RelExpr::Delete { props, .. }
            | RelExpr::Returning { props, .. }
            | RelExpr::Block { props, .. }
            | RelExpr::Cache { props, .. } => props,
        }
    }

    pub fn children(&self) -> Vec<&RelExpr> {
        match self {
            RelExpr::Seq { input, .. }
            | RelExpr::Filter { input, .. }
            | RelExpr::MutationContext { input, .. }
            | RelExpr::ConstraintCheck { input, .. }
            | RelExpr::Insert { input, .. }
            | RelExpr::Update { input, .. }
            | RelExpr::Delete { input, .. }
            | RelExpr::Returning { input, .. }
            | RelExpr::Aggregate { input, .. }
            | RelExpr::Window { input, .. }
            | RelExpr::Sort { input, .. }
            | RelExpr::Cache { input, .. }
            | RelExpr::Limit { input, .. } => vec![input],
            RelExpr::Join { left, right, .. } | RelExpr::Set { left, right, .. } => vec![left, right],
            RelExpr::Cte { definition, body, .. } => vec![definition, body],
            RelExpr::Values { .. } | RelExpr::Retrieve { .. } => vec![],
            RelExpr::Block { statements, .. } => statements.iter().collect(),
        }
    }

    /// Rebuilds this node with `new_children` substituted in, preserving
    /// this node's own attribute ids and properties -- the mechanism
    /// optimizer rules use to rewrite a subtree without perturbing
    /// identity (§4.3, §9 "structural sharing").
    ///
    /// # Panics
    /// If `new_children.len()` does not match [`RelExpr::children`]'s
    /// length for this variant.
    pub fn with_children(&self, new_children: Vec<RelExpr>) -> RelExpr {
        let mut it = new_children.into_iter();
        let mut next = || it.next().expect("with_children: child count mismatch");
        let node = match self {
            RelExpr::Seq {
                projections, attrs, props, ..
            } => RelExpr::Seq {
                input: Box::new(next()),
                projections: projections.clone(),
                attrs: attrs.clone(),
                props: props.clone(),
            },
            RelExpr::Filter {
                predicate, attrs, props, ..
            } => RelExpr::Filter {
                input: Box::new(next()),
                predicate: predicate.clone(),
                attrs: attrs.clone(),
                props: props.clone(),
            },
            RelExpr::Join {
                kind,
                condition,
                attrs,
                props,
                ..
            } => RelExpr::Join {
                kind: *kind,
                left: Box::new(next()),
                right: Box::new(next()),
                condition: condition.clone(),
                attrs: attrs.clone(),
                props: props.clone(),
            },
            RelExpr::Aggregate {
                group_by,
                reductions,
                attrs,
                props,
                ..
            } => RelExpr::Aggregate {
                input: Box::new(next()),
                group_by: group_by.clone(),
                reductions: reductions.clone(),
                attrs: attrs.clone(),
                props: props.clone(),
            },
            RelExpr::Window {
                windows, attrs, props, ..
            } => RelExpr::Window {
                input: Box::new(next()),
                windows: windows.clone(),
                attrs: attrs.clone(),
                props: props.clone(),
            },
            RelExpr::Sort { keys, attrs, props, .. } => RelExpr::Sort {
                input: Box::new(next()),
                keys: keys.clone(),
                attrs: attrs.clone(),
                props: props.clone(),
            },
            RelExpr::Limit {
                limit,
                offset,
                attrs,
                props,
                ..
            } => RelExpr::Limit {
                input: Box::new(next()),
                limit: limit.clone(),
                offset: offset.clone(),
                attrs: attrs.clone(),
                props: props.clone(),
            },
            RelExpr::Set {
                op, all, attrs, props, ..
            } => RelExpr::Set {
                op: *op,
                all: *all,
                left: Box::new(next()),
                right: Box::new(next()),
                attrs: attrs.clone(),
                props: props.clone(),
            },
            RelExpr::Cte { name, attrs, props, .. } => RelExpr::Cte {
                name: name.clone(),
                definition: Box::new(next()),
                body: Box::new(next()),
                attrs: attrs.clone(),
                props: props.clone(),
            },
            RelExpr::Values { rows, attrs, props } => RelExpr::Values {
                rows: rows.clone(),
                attrs: attrs.clone(),
                props: props.clone(),
            },
            RelExpr::Retrieve {
                table_id,
                module_name,
                pushed,
                attrs,
                props,
            } => RelExpr::Retrieve {
                table_id: *table_id,
                module_name: module_name.clone(),
                pushed: pushed.clone(),
                attrs: attrs.clone(),
                props: props.clone(),
            },
            RelExpr::MutationContext {
                captures, attrs, props, ..
            } => RelExpr::MutationContext {
                input: Box::new(next()),
                captures: captures.clone(),
                attrs: attrs.clone(),
                props: props.clone(),
            },
            RelExpr::ConstraintCheck {
                op, checks, attrs, props, ..
            } => RelExpr::ConstraintCheck {
                input: Box::new(next()),
                op: *op,
                checks: checks.clone(),
                attrs: attrs.clone(),
                props: props.clone(),
            },
            RelExpr::Insert {
                table_id, attrs, props, ..
            } => RelExpr::Insert {
                table_id: *table_id,
                input: Box::new(next()),
                attrs: attrs.clone(),
                props: props.clone(),
            },
            RelExpr::Update {
                table_id,
                assignments,
                attrs,
                props,
                ..
            } => RelExpr::Update {
                table_id: *table_id,
                input: Box::new(next()),
                assignments: assignments.clone(),
                attrs: attrs.clone(),
                props: props.clone(),
            },
            RelExpr::Delete {
                table_id, attrs, props, ..
            } => RelExpr::Delete {
                table_id: *table_id,
                input: Box::new(next()),
                attrs: attrs.clone(),
                props: props.clone(),
            },
            RelExpr::Returning {
                projections, attrs, props, ..
            } => RelExpr::Returning {
                input: Box::new(next()),
                projections: projections.clone(),
                attrs: attrs.clone(),
                props: props.clone(),
            },
            RelExpr::Block { attrs, props, .. } => RelExpr::Block {
                statements: it.collect(),
                attrs: attrs.clone(),
                props: props.clone(),
            },
            RelExpr::Cache {
                fingerprint, attrs, props, ..
            } => RelExpr::Cache {
                input: Box::new(next()),
                fingerprint: *fingerprint,
                attrs: attrs.clone(),
                props: props.clone(),
            },
        };
        node
    }

    pub fn attribute_ids(&self) -> Vec<AttributeId> {
        self.attributes().iter().map(|a| a.id).collect()
    }
}
