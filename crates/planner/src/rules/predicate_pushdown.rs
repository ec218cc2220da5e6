//! Predicate pushdown (`spec.md` §4.4): `Filter` through `Seq` and
//! `Join`, preserving outer-join null-extension semantics.

use lucidb_expr::{JoinKind, RelExpr};

use crate::rule::{Rule, RuleContext};
use crate::rules::util::{and_together, attrs_set, conjuncts, is_evaluable_over};

pub struct PredicatePushdownRule;

impl Rule for PredicatePushdownRule {
    fn id(&self) -> u32 {
        11
    }

    fn name(&self) -> &'static str {
        "predicate_pushdown"
    }

    fn rewrite(&self, node: &RelExpr, _ctx: &RuleContext) -> Option<RelExpr> {
        let RelExpr::Filter {
            input,
            predicate,
            attrs,
            props,
        } = node
        else {
            return None;
        };

        match input.as_ref() {
            // Filter(Seq(x)) -> Seq(Filter(x)) when the predicate only
            // reads attributes Seq's own input already exposes (i.e. it
            // does not depend on a computed projection column).
            RelExpr::Seq {
                input: seq_input,
                projections,
                attrs: seq_attrs,
                props: seq_props,
            } => {
                let below = attrs_set(seq_input.attributes());
                if !is_evaluable_over(predicate, &below) {
                    return None;
                }
                let pushed_filter = RelExpr::Filter {
                    input: seq_input.clone(),
                    predicate: predicate.clone(),
                    attrs: seq_input.attributes().to_vec(),
                    props: seq_input.logical_props().clone(),
                };
                Some(RelExpr::Seq {
                    input: Box::new(pushed_filter),
                    projections: projections.clone(),
                    attrs: seq_attrs.clone(),
                    props: seq_props.clone(),
                })
            }
            // Filter(Join(l, r)) -> split the predicate into conjuncts
            // that read only `l`, only `r`, or both; single-side conjuncts
            // move into a Filter under that side. For an outer join, only
            // the preserved (non-nullable) side accepts pushdown -- moving
            // a predicate below the nullable side would wrongly exclude
            // the null-extended rows the join is defined to keep.
            RelExpr::Join {
                kind,
                left,
                right,
                condition,
                attrs: join_attrs,
                props: join_props,
            } => {
                let left_ok = matches!(kind, JoinKind::Inner | JoinKind::Cross | JoinKind::Left);
                let right_ok = matches!(kind, JoinKind::Inner | JoinKind::Cross | JoinKind::Right);
                let left_attrs = attrs_set(left.attributes());
                let right_attrs = attrs_set(right.attributes());

                let mut to_left = Vec::new();
                let mut to_right = Vec::new();
                let mut residual = Vec::new();
                for conjunct in conjuncts(predicate) {
                    if left_ok && is_evaluable_over(&conjunct, &left_attrs) {
                        to_left.push(conjunct);
                    } else if right_ok && is_evaluable_over(&conjunct, &right_attrs) {
                        to_right.push(conjunct);
                    } else {
                        residual.push(conjunct);
                    }
                }
                if to_left.is_empty() && to_right.is_empty() {
                    return None;
                }

                let new_left = match and_together(to_left, predicate.id()) {
                    Some(p) => Box::new(RelExpr::Filter {
                        input: left.clone(),
                        predicate: p,
                        attrs: left.attributes().to_vec(),
                        props: left.logical_props().clone(),
                    }),
                    None => left.clone(),
                };
                let new_right = match and_together(to_right, predicate.id()) {
                    Some(p) => Box::new(RelExpr::Filter {
                        input: right.clone(),
                        predicate: p,
                        attrs: right.attributes().to_vec(),
                        props: right.logical_props().clone(),
                    }),
                    None => right.clone(),
                };
                let new_join = RelExpr::Join {
                    kind: *kind,
                    left: new_left,
                    right: new_right,
                    condition: condition.clone(),
                    attrs: join_attrs.clone(),
                    props: join_props.clone(),
                };
                Some(match and_together(residual, predicate.id()) {
                    Some(residual_pred) => RelExpr::Filter {
                        input: Box::new(new_join),
                        predicate: residual_pred,
                        attrs: attrs.clone(),
                        props: props.clone(),
                    },
                    None => new_join,
                })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lucidb_expr::{Attribute, BinaryOp, JoinCondition, LogicalProps, ScalarExpr};
    use lucidb_primitives::AttributeIdGen;
    use lucidb_sats::{LogicalType, PhysicalType};
    use lucidb_schema::Catalog;
    use lucidb_expr::NoPushdown;

    fn col(gen: &mut AttributeIdGen, refers_to: lucidb_primitives::AttributeId) -> ScalarExpr {
        ScalarExpr::ColumnRef {
            id: gen.next(),
            refers_to,
            ty: LogicalType::not_null(PhysicalType::Integer),
        }
    }

    fn scan(gen: &mut AttributeIdGen, n: usize) -> (RelExpr, Vec<lucidb_primitives::AttributeId>) {
        let ids: Vec<_> = (0..n).map(|_| gen.next()).collect();
        let attrs = ids
            .iter()
            .map(|id| Attribute {
                id: *id,
                name: "c".into(),
                ty: LogicalType::not_null(PhysicalType::Integer),
            })
            .collect();
        (
            RelExpr::Retrieve {
                table_id: lucidb_primitives::TableId::new(1),
                module_name: "memory".into(),
                pushed: Default::default(),
                attrs,
                props: LogicalProps::default(),
            },
            ids,
        )
    }

    #[test]
    fn pushes_single_side_conjunct_below_inner_join() {
        let mut gen = AttributeIdGen::new();
        let (left, left_ids) = scan(&mut gen, 1);
        let (right, right_ids) = scan(&mut gen, 1);
        let predicate = ScalarExpr::Binary {
            id: gen.next(),
            op: BinaryOp::Eq,
            lhs: Box::new(col(&mut gen, left_ids[0])),
            rhs: Box::new(ScalarExpr::Literal {
                id: gen.next(),
                value: lucidb_sats::Value::Integer(1),
                ty: LogicalType::not_null(PhysicalType::Integer),
            }),
            ty: LogicalType::not_null(PhysicalType::Boolean),
        };
        let join = RelExpr::Join {
            kind: JoinKind::Inner,
            left: Box::new(left),
            right: Box::new(right),
            condition: JoinCondition::None,
            attrs: vec![],
            props: LogicalProps::default(),
        };
        let filter = RelExpr::Filter {
            input: Box::new(join),
            predicate,
            attrs: vec![],
            props: LogicalProps::default(),
        };
        let catalog = Catalog::new();
        let caps = NoPushdown;
        let ctx = RuleContext {
            catalog: &catalog,
            capabilities: &caps,
        };
        let rewritten = PredicatePushdownRule.rewrite(&filter, &ctx).expect("should push");
        match rewritten {
            RelExpr::Join { left, .. } => {
                assert!(matches!(*left, RelExpr::Filter { .. }));
            }
            other => panic!("expected bare join with no residual, got {other:?}"),
        }
        let _ = right_ids;
    }
}
