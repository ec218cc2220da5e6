//! Retrieve growth (`spec.md` §4.4): slide `Filter`/`Sort`/`Limit`/`Seq`
//! nodes directly above a `Retrieve` into its [`PushedDown`] payload when
//! the source's advertised [`VtabCapabilities`] accept them, leaving any
//! unsupported residual above the (grown) `Retrieve`.

use lucidb_expr::{BinaryOp, PredicateOp, RelExpr, ScalarExpr, UnaryOp, VtabCapabilities};

use crate::rule::{Rule, RuleContext};
use crate::rules::util::{and_together, conjuncts};

pub struct RetrieveGrowthRule;

impl Rule for RetrieveGrowthRule {
    fn id(&self) -> u32 {
        10
    }

    fn name(&self) -> &'static str {
        "retrieve_growth"
    }

    fn rewrite(&self, node: &RelExpr, ctx: &RuleContext) -> Option<RelExpr> {
        match node {
            RelExpr::Filter {
                input,
                predicate,
                attrs,
                props,
            } => {
                let RelExpr::Retrieve {
                    table_id,
                    module_name,
                    pushed,
                    attrs: r_attrs,
                    props: r_props,
                } = input.as_ref()
                else {
                    return None;
                };
                let caps = ctx.capabilities.capabilities(*table_id);
                let parts = conjuncts(predicate);
                let (pushable, residual): (Vec<_>, Vec<_>) = parts.into_iter().partition(|p| predicate_pushable(p, &caps));
                if pushable.is_empty() || pushed.filter.is_some() {
                    return None;
                }
                let mut new_pushed = pushed.clone();
                let combined = and_together(pushable, predicate.id());
                new_pushed.filter = match (new_pushed.filter.take(), combined) {
                    (None, c) => c,
                    (Some(existing), Some(c)) => and_together(vec![existing, c], predicate.id()),
                    (existing, None) => existing,
                };
                let grown = RelExpr::Retrieve {
                    table_id: *table_id,
                    module_name: module_name.clone(),
                    pushed: new_pushed,
                    attrs: r_attrs.clone(),
                    props: r_props.clone(),
                };
                Some(match and_together(residual, predicate.id()) {
                    Some(residual_pred) => RelExpr::Filter {
                        input: Box::new(grown),
                        predicate: residual_pred,
                        attrs: attrs.clone(),
                        props: props.clone(),
                    },
                    None => grown,
                })
            }
            RelExpr::Sort {
                input,
                keys,
                attrs: _,
                props: _,
            } => {
                let RelExpr::Retrieve {
                    table_id,
                    module_name,
                    pushed,
                    attrs: r_attrs,
                    props: r_props,
                } = input.as_ref()
                else {
                    return None;
                };
                let caps = ctx.capabilities.capabilities(*table_id);
                if !caps.sort || !pushed.sort.is_empty() {
                    return None;
                }
                let mut new_pushed = pushed.clone();
                new_pushed.sort = keys.clone();
                Some(RelExpr::Retrieve {
                    table_id: *table_id,
                    module_name: module_name.clone(),
                    pushed: new_pushed,
                    attrs: r_attrs.clone(),
                    props: {
                        let mut p = r_props.clone();
                        p.sort_order = keys.clone();
                        p
                    },
                })
            }
            RelExpr::Limit {
                input,
                limit,
                offset,
                attrs: _,
                props: _,
            } => {
                let RelExpr::Retrieve {
                    table_id,
                    module_name,
                    pushed,
                    attrs: r_attrs,
                    props: r_props,
                } = input.as_ref()
                else {
                    return None;
                };
                let caps = ctx.capabilities.capabilities(*table_id);
                if !caps.limit || pushed.limit.is_some() {
                    return None;
                }
                let mut new_pushed = pushed.clone();
                new_pushed.limit = limit.clone();
                new_pushed.offset = offset.clone();
                Some(RelExpr::Retrieve {
                    table_id: *table_id,
                    module_name: module_name.clone(),
                    pushed: new_pushed,
                    attrs: r_attrs.clone(),
                    props: r_props.clone(),
                })
            }
            RelExpr::Seq {
                input,
                projections,
                attrs,
                props,
            } => {
                let RelExpr::Retrieve {
                    table_id,
                    module_name,
                    pushed,
                    attrs: r_attrs,
                    props: r_props,
                } = input.as_ref()
                else {
                    return None;
                };
                let caps = ctx.capabilities.capabilities(*table_id);
                if !caps.projection || pushed.projection.is_some() {
                    return None;
                }
                // Only a bare column-selecting projection (no computed
                // expressions, no renames reordering beyond column choice)
                // is safe to push: the source would otherwise need to
                // evaluate expressions itself, which is not what
                // `FilterInfo::projection` means in §6.
                let positions: Option<Vec<usize>> = projections
                    .iter()
                    .map(|p| match p {
                        ScalarExpr::ColumnRef { refers_to, .. } => r_attrs.iter().position(|a| a.id == *refers_to),
                        _ => None,
                    })
                    .collect();
                let positions = positions?;
                let mut new_pushed = pushed.clone();
                new_pushed.projection = Some(positions);
                Some(RelExpr::Retrieve {
                    table_id: *table_id,
                    module_name: module_name.clone(),
                    pushed: new_pushed,
                    attrs: attrs.clone(),
                    props: props.clone(),
                })
            }
            _ => None,
        }
    }
}

fn predicate_pushable(expr: &ScalarExpr, caps: &VtabCapabilities) -> bool {
    as_predicate_op(expr).is_some_and(|op| caps.supports_op(op))
}

/// Maps a scalar predicate to the `PredicateOp` a vtab module would see
/// in its `FilterInfo`, if it is shaped like a pushable single predicate
/// at all (a plain `col OP literal-or-parameter`, or a unary null check).
fn as_predicate_op(expr: &ScalarExpr) -> Option<PredicateOp> {
    match expr {
        ScalarExpr::Binary { op, lhs, rhs, .. } => {
            if !is_column_then_value(lhs, rhs) {
                return None;
            }
            match op {
                BinaryOp::Eq => Some(PredicateOp::Eq),
                BinaryOp::Lt => Some(PredicateOp::Lt),
                BinaryOp::LtEq => Some(PredicateOp::LtEq),
                BinaryOp::Gt => Some(PredicateOp::Gt),
                BinaryOp::GtEq => Some(PredicateOp::GtEq),
                BinaryOp::Like => Some(PredicateOp::Like),
                BinaryOp::Glob => Some(PredicateOp::Glob),
                _ => None,
            }
        }
        ScalarExpr::Unary { op, expr, .. } => match op {
            UnaryOp::IsNull if matches!(expr.as_ref(), ScalarExpr::ColumnRef { .. }) => Some(PredicateOp::IsNull),
            UnaryOp::IsNotNull if matches!(expr.as_ref(), ScalarExpr::ColumnRef { .. }) => Some(PredicateOp::IsNotNull),
            _ => None,
        },
        ScalarExpr::In {
            expr,
            list: lucidb_expr::InList::Values(_),
            negated: false,
            ..
        } if matches!(expr.as_ref(), ScalarExpr::ColumnRef { .. }) => Some(PredicateOp::In),
        _ => None,
    }
}

fn is_column_then_value(lhs: &ScalarExpr, rhs: &ScalarExpr) -> bool {
    let col = |e: &ScalarExpr| matches!(e, ScalarExpr::ColumnRef { .. });
    let val = |e: &ScalarExpr| matches!(e, ScalarExpr::Literal { .. } | ScalarExpr::Parameter { .. });
    (col(lhs) && val(rhs)) || (val(lhs) && col(rhs))
}
