//! Shared helpers the individual rules build on.

use lucidb_expr::{AttributeSetExt, Attribute, BinaryOp, ScalarExpr};
use lucidb_primitives::AttributeId;
use lucidb_sats::{LogicalType, PhysicalType};
use std::collections::HashSet;

/// Splits a predicate on top-level `AND`s, recursively. `a AND (b AND c)`
/// and `(a AND b) AND c` both split to `[a, b, c]`; anything else (a bare
/// comparison, an `OR`, a function call) is a single-element list.
pub fn conjuncts(expr: &ScalarExpr) -> Vec<ScalarExpr> {
    match expr {
        ScalarExpr::Binary {
            op: BinaryOp::And,
            lhs,
            rhs,
            ..
        } => {
            let mut out = conjuncts(lhs);
            out.extend(conjuncts(rhs));
            out
        }
        other => vec![other.clone()],
    }
}

/// Rebuilds a (possibly empty) set of conjuncts into a single predicate,
/// reusing `fallback_id` for any synthesized `AND` node. A predicate's own
/// `id` has no downstream observer (predicates are never projected as an
/// output column the way a `Seq` projection or `Reduction` output is), so
/// reusing one id across the rebuilt tree is safe.
pub fn and_together(mut parts: Vec<ScalarExpr>, fallback_id: AttributeId) -> Option<ScalarExpr> {
    if parts.is_empty() {
        return None;
    }
    let mut acc = parts.remove(0);
    for part in parts {
        acc = ScalarExpr::Binary {
            id: fallback_id,
            op: BinaryOp::And,
            lhs: Box::new(acc),
            rhs: Box::new(part),
            ty: LogicalType::not_null(PhysicalType::Boolean),
        };
    }
    Some(acc)
}

/// Every attribute id a scalar expression reads, via its `ColumnRef`
/// leaves (recursing into nested subquery plans' own correlated column
/// references is deliberately out of scope here -- those are captured by
/// a `Retrieve`'s [`lucidb_expr::Binding::OuterColumn`] list, not read
/// through an ordinary `ColumnRef`).
pub fn referenced_attrs(expr: &ScalarExpr) -> HashSet<AttributeId> {
    let mut out = HashSet::new();
    collect_refs(expr, &mut out);
    out
}

fn collect_refs(expr: &ScalarExpr, out: &mut HashSet<AttributeId>) {
    if let ScalarExpr::ColumnRef { refers_to, .. } = expr {
        out.insert(*refers_to);
    }
    for child in expr.children() {
        collect_refs(child, out);
    }
}

pub fn attrs_set(attrs: &[Attribute]) -> HashSet<AttributeId> {
    attrs.ids().into_iter().collect()
}

/// Whether every attribute `expr` reads is among `available`.
pub fn is_evaluable_over(expr: &ScalarExpr, available: &HashSet<AttributeId>) -> bool {
    referenced_attrs(expr).is_subset(available)
}
