//! Physical lowering (`spec.md` §4.4's final pass): turns the optimized
//! [`RelExpr`] into a [`PhysicalPlan`] by choosing a join strategy, an
//! aggregate strategy, and a materialization scheme. No scalar
//! expressions change shape here -- only the relational skeleton does.

use std::collections::HashSet;

use lucidb_expr::{BinaryOp, JoinCondition, JoinKind, RelExpr, ScalarExpr};
use lucidb_primitives::AttributeId;

use crate::plan::{EquiJoinKeys, PhysicalPlan};
use crate::vtab::PushedFilter;

pub fn lower(node: RelExpr) -> PhysicalPlan {
    match node {
        RelExpr::Retrieve {
            table_id,
            module_name,
            pushed,
            attrs,
            ..
        } => PhysicalPlan::Scan {
            table_id,
            module_name,
            filter: PushedFilter {
                filter: pushed.filter,
                sort: pushed.sort,
                limit: pushed.limit,
                offset: pushed.offset,
                projection: pushed.projection,
            },
            attrs,
        },
        RelExpr::Filter {
            input,
            predicate,
            attrs,
            ..
        } => PhysicalPlan::Filter {
            input: Box::new(lower(*input)),
            predicate,
            attrs,
        },
        RelExpr::Seq {
            input,
            projections,
            attrs,
            ..
        } => PhysicalPlan::Project {
            input: Box::new(lower(*input)),
            projections,
            attrs,
        },
        RelExpr::Join {
            kind,
            left,
            right,
            condition,
            attrs,
            ..
        } => {
            let left_attrs: HashSet<AttributeId> = left.attributes().iter().map(|a| a.id).collect();
            let right_attrs: HashSet<AttributeId> = right.attributes().iter().map(|a| a.id).collect();
            let left = Box::new(lower(*left));
            let right = Box::new(lower(*right));
            match equi_join_keys(kind, &condition, &left_attrs, &right_attrs) {
                Some(keys) => PhysicalPlan::HashJoin { kind, left, right, keys, attrs },
                None => PhysicalPlan::NestedLoopJoin {
                    kind,
                    left,
                    right,
                    condition: match condition {
                        JoinCondition::On(expr) => Some(expr),
                        JoinCondition::Using(_) | JoinCondition::None => None,
                    },
                    attrs,
                },
            }
        }
        RelExpr::Aggregate {
            input,
            group_by,
            reductions,
            attrs,
            props,
        } => {
            let input = lower(*input);
            if streams(&group_by, &props.sort_order) {
                PhysicalPlan::StreamAggregate {
                    input: Box::new(input),
                    group_by,
                    reductions,
                    attrs,
                }
            } else {
                PhysicalPlan::HashAggregate {
                    input: Box::new(input),
                    group_by,
                    reductions,
                    attrs,
                }
            }
        }
        RelExpr::Window { input, windows, attrs, .. } => PhysicalPlan::Window {
            input: Box::new(lower(*input)),
            windows,
            attrs,
        },
        RelExpr::Sort { input, keys, attrs, .. } => PhysicalPlan::Sort {
            input: Box::new(lower(*input)),
            keys,
            attrs,
        },
        RelExpr::Limit {
            input,
            limit,
            offset,
            attrs,
            ..
        } => PhysicalPlan::Limit {
            input: Box::new(lower(*input)),
            limit,
            offset,
            attrs,
        },
        RelExpr::Set {
            op,
            all,
            left,
            right,
            attrs,
            ..
        } => PhysicalPlan::SetOp {
            op,
            all,
            left: Box::new(lower(*left)),
            right: Box::new(lower(*right)),
            attrs,
        },
        RelExpr::Cte { body, .. } => lower(*body),
        RelExpr::Values { rows, attrs, .. } => PhysicalPlan::Values { rows, attrs },
        RelExpr::MutationContext {
            input,
            captures,
            attrs,
            ..
        } => PhysicalPlan::MutationContext {
            input: Box::new(lower(*input)),
            captures,
            attrs,
        },
        RelExpr::ConstraintCheck {
            input,
            op,
            checks,
            attrs,
            ..
        } => PhysicalPlan::ConstraintCheck {
            input: Box::new(lower(*input)),
            op,
            checks,
            attrs,
        },
        RelExpr::Insert {
            table_id,
            input,
            attrs,
            ..
        } => PhysicalPlan::Insert {
            table_id,
            module_name: scan_module_name(&input).unwrap_or_else(|| "memory".to_string()),
            input: Box::new(lower(*input)),
            attrs,
        },
        RelExpr::Update {
            table_id,
            input,
            assignments,
            attrs,
            ..
        } => PhysicalPlan::Update {
            table_id,
            module_name: scan_module_name(&input).unwrap_or_else(|| "memory".to_string()),
            input: Box::new(lower(*input)),
            assignments,
            attrs,
        },
        RelExpr::Delete { table_id, input, attrs, .. } => PhysicalPlan::Delete {
            table_id,
            module_name: scan_module_name(&input).unwrap_or_else(|| "memory".to_string()),
            input: Box::new(lower(*input)),
            attrs,
        },
        RelExpr::Returning {
            input,
            projections,
            attrs,
            ..
        } => PhysicalPlan::Returning {
            input: Box::new(lower(*input)),
            projections,
            attrs,
        },
        RelExpr::Block { statements, attrs, .. } => PhysicalPlan::Block {
            statements: statements.into_iter().map(lower).collect(),
            attrs,
        },
        RelExpr::Cache {
            input,
            fingerprint,
            attrs,
            ..
        } => PhysicalPlan::Materialize {
            input: Box::new(lower(*input)),
            fingerprint,
            attrs,
        },
    }
}

/// A module is only named directly on a `Retrieve`; a mutation's target
/// module is whichever scan (if any) sits under it once `ConstraintCheck`/
/// `MutationContext` wrappers are peeled away. Falls back to the default
/// module name when no scan is found (e.g. `INSERT ... VALUES`).
fn scan_module_name(input: &RelExpr) -> Option<String> {
    match input {
        RelExpr::Retrieve { module_name, .. } => Some(module_name.clone()),
        RelExpr::ConstraintCheck { input, .. } | RelExpr::MutationContext { input, .. } => scan_module_name(input),
        _ => None,
    }
}

/// A `Join`'s condition lowers to a hash join when it is a top-level
/// conjunction of `col = col` equalities referencing exactly one side
/// each; everything else (or any non-equi conjunct) stays in `residual`,
/// and `Cross`/no-condition joins never qualify for hashing.
fn equi_join_keys(kind: JoinKind, condition: &JoinCondition, left_attrs: &HashSet<AttributeId>, right_attrs: &HashSet<AttributeId>) -> Option<EquiJoinKeys> {
    if matches!(kind, JoinKind::Cross) {
        return None;
    }
    let JoinCondition::On(expr) = condition else {
        return None;
    };
    let mut left = Vec::new();
    let mut right = Vec::new();
    let mut residual_parts = Vec::new();
    for conjunct in split_conjuncts(expr) {
        match as_equi_key(&conjunct, left_attrs, right_attrs) {
            Some((l, r)) => {
                left.push(l);
                right.push(r);
            }
            None => residual_parts.push(conjunct),
        }
    }
    if left.is_empty() {
        return None;
    }
    let residual = residual_parts.into_iter().reduce(|acc, part| ScalarExpr::Binary {
        id: acc.id(),
        op: BinaryOp::And,
        lhs: Box::new(acc),
        rhs: Box::new(part),
        ty: lucidb_sats::LogicalType::not_null(lucidb_sats::PhysicalType::Boolean),
    });
    Some(EquiJoinKeys { left, right, residual })
}

fn split_conjuncts(expr: &ScalarExpr) -> Vec<ScalarExpr> {
    match expr {
        ScalarExpr::Binary { op: BinaryOp::And, lhs, rhs, .. } => {
            let mut parts = split_conjuncts(lhs);
            parts.extend(split_conjuncts(rhs));
            parts
        }
        other => vec![other.clone()],
    }
}

/// `col = col` where the two columns come from disjoint attribute sets
/// is the shape a hash join can key on. The `ON` condition can name
/// either side first (`o.user_id = u.id` is just as valid as
/// `u.id = o.user_id`), so which operand becomes `EquiJoinKeys.left` vs
/// `.right` is decided by testing each `ColumnRef`'s `refers_to` against
/// `left_attrs`/`right_attrs`, never by the operand's lexical position.
fn as_equi_key(expr: &ScalarExpr, left_attrs: &HashSet<AttributeId>, right_attrs: &HashSet<AttributeId>) -> Option<(ScalarExpr, ScalarExpr)> {
    let ScalarExpr::Binary {
        op: BinaryOp::Eq, lhs, rhs, ..
    } = expr
    else {
        return None;
    };
    let (ScalarExpr::ColumnRef { refers_to: lhs_id, .. }, ScalarExpr::ColumnRef { refers_to: rhs_id, .. }) = (lhs.as_ref(), rhs.as_ref()) else {
        return None;
    };
    if left_attrs.contains(lhs_id) && right_attrs.contains(rhs_id) {
        Some((lhs.as_ref().clone(), rhs.as_ref().clone()))
    } else if left_attrs.contains(rhs_id) && right_attrs.contains(lhs_id) {
        Some((rhs.as_ref().clone(), lhs.as_ref().clone()))
    } else {
        None
    }
}

/// Mirrors the planner's streaming-aggregate-choice rule: streamable iff
/// every group-by column is a bare `ColumnRef` and the input's existing
/// sort order already groups those columns (as a prefix set, order of
/// the grouping list itself doesn't matter for correctness).
fn streams(group_by: &[ScalarExpr], input_sort_order: &[(AttributeId, lucidb_expr::SortDir)]) -> bool {
    let Some(group_ids) = group_by_attr_ids(group_by) else {
        return false;
    };
    if group_ids.is_empty() {
        return true;
    }
    let prefix: HashSet<AttributeId> = input_sort_order.iter().take(group_ids.len()).map(|(id, _)| *id).collect();
    prefix == group_ids.into_iter().collect::<HashSet<_>>()
}

fn group_by_attr_ids(group_by: &[ScalarExpr]) -> Option<HashSet<AttributeId>> {
    group_by
        .iter()
        .map(|e| match e {
            ScalarExpr::ColumnRef { refers_to, .. } => Some(*refers_to),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lucidb_expr::{Attribute, LogicalProps};
    use lucidb_primitives::{AttributeIdGen, TableId};
    use lucidb_sats::PhysicalType;

    fn attr(gen: &mut AttributeIdGen, name: &str) -> Attribute {
        Attribute {
            id: gen.next(),
            name: name.into(),
            ty: lucidb_sats::LogicalType::not_null(PhysicalType::Integer),
        }
    }

    #[test]
    fn equi_condition_lowers_to_hash_join() {
        let mut gen = AttributeIdGen::new();
        let l_id = gen.next();
        let r_id = gen.next();
        let left = RelExpr::Retrieve {
            table_id: TableId::new(1),
            module_name: "memory".into(),
            pushed: Default::default(),
            attrs: vec![Attribute {
                id: l_id,
                name: "a".into(),
                ty: lucidb_sats::LogicalType::not_null(PhysicalType::Integer),
            }],
            props: LogicalProps::default(),
        };
        let right = RelExpr::Retrieve {
            table_id: TableId::new(2),
            module_name: "memory".into(),
            pushed: Default::default(),
            attrs: vec![Attribute {
                id: r_id,
                name: "b".into(),
                ty: lucidb_sats::LogicalType::not_null(PhysicalType::Integer),
            }],
            props: LogicalProps::default(),
        };
        let condition = JoinCondition::On(ScalarExpr::Binary {
            id: gen.next(),
            op: BinaryOp::Eq,
            lhs: Box::new(ScalarExpr::ColumnRef {
                id: gen.next(),
                refers_to: l_id,
                ty: lucidb_sats::LogicalType::not_null(PhysicalType::Integer),
            }),
            rhs: Box::new(ScalarExpr::ColumnRef {
                id: gen.next(),
                refers_to: r_id,
                ty: lucidb_sats::LogicalType::not_null(PhysicalType::Integer),
            }),
            ty: lucidb_sats::LogicalType::not_null(PhysicalType::Boolean),
        });
        let node = RelExpr::Join {
            kind: JoinKind::Inner,
            left: Box::new(left),
            right: Box::new(right),
            condition,
            attrs: vec![attr(&mut gen, "a"), attr(&mut gen, "b")],
            props: LogicalProps::default(),
        };
        let lowered = lower(node);
        assert!(matches!(lowered, PhysicalPlan::HashJoin { .. }));
    }

    #[test]
    fn cross_join_never_hashes() {
        let mut gen = AttributeIdGen::new();
        let left = RelExpr::Values {
            rows: vec![],
            attrs: vec![],
            props: LogicalProps::default(),
        };
        let right = RelExpr::Values {
            rows: vec![],
            attrs: vec![],
            props: LogicalProps::default(),
        };
        let node = RelExpr::Join {
            kind: JoinKind::Cross,
            left: Box::new(left),
            right: Box::new(right),
            condition: JoinCondition::None,
            attrs: vec![],
            props: LogicalProps::default(),
        };
        let _ = &mut gen;
        let lowered = lower(node);
        assert!(matches!(lowered, PhysicalPlan::NestedLoopJoin { .. }));
    }
}
