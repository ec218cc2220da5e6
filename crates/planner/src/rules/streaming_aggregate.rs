//! Streaming aggregate choice (`spec.md` §4.4): if the input's order
//! already satisfies the `GROUP BY` prefix, the aggregate's own output
//! is annotated as sorted by those keys (streaming is possible and
//! preserves that order); otherwise the annotation is cleared (a hash
//! aggregation gives no ordering guarantee). The physical-lowering pass
//! reads this same prefix test to pick the actual operator; recording it
//! here lets [`crate::rules::sort_elimination::SortEliminationRule`]
//! drop a redundant `Sort` above the aggregate without re-deriving it.

use lucidb_expr::{RelExpr, ScalarExpr};
use lucidb_primitives::AttributeId;

use crate::rule::{Rule, RuleContext};

pub struct StreamingAggregateChoiceRule;

impl Rule for StreamingAggregateChoiceRule {
    fn id(&self) -> u32 {
        50
    }

    fn name(&self) -> &'static str {
        "streaming_aggregate_choice"
    }

    fn rewrite(&self, node: &RelExpr, _ctx: &RuleContext) -> Option<RelExpr> {
        let RelExpr::Aggregate {
            input,
            group_by,
            reductions,
            attrs,
            props,
        } = node
        else {
            return None;
        };
        if group_by.is_empty() {
            return None;
        }
        let group_ids = group_by_attr_ids(group_by)?;
        let input_order = &input.logical_props().sort_order;
        let can_stream = input_order.len() >= group_ids.len()
            && input_order[..group_ids.len()]
                .iter()
                .map(|(id, _)| *id)
                .collect::<std::collections::HashSet<_>>()
                == group_ids.iter().copied().collect::<std::collections::HashSet<_>>();
        let new_sort_order = if can_stream {
            input_order[..group_ids.len()].to_vec()
        } else {
            vec![]
        };
        if new_sort_order == props.sort_order {
            return None;
        }
        Some(RelExpr::Aggregate {
            input: input.clone(),
            group_by: group_by.clone(),
            reductions: reductions.clone(),
            attrs: attrs.clone(),
            props: lucidb_expr::LogicalProps {
                sort_order: new_sort_order,
                ..props.clone()
            },
        })
    }
}

fn group_by_attr_ids(group_by: &[ScalarExpr]) -> Option<Vec<AttributeId>> {
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
    use lucidb_expr::{LogicalProps, SortDir};
    use lucidb_primitives::AttributeIdGen;
    use lucidb_sats::{LogicalType, PhysicalType};
    use lucidb_schema::Catalog;
    use lucidb_expr::NoPushdown;

    #[test]
    fn marks_output_sorted_when_input_already_grouped() {
        let mut gen = AttributeIdGen::new();
        let group_col = gen.next();
        let input = RelExpr::Values {
            rows: vec![],
            attrs: vec![],
            props: LogicalProps {
                sort_order: vec![(group_col, SortDir::Asc)],
                ..Default::default()
            },
        };
        let group_by = vec![ScalarExpr::ColumnRef {
            id: gen.next(),
            refers_to: group_col,
            ty: LogicalType::not_null(PhysicalType::Integer),
        }];
        let agg = RelExpr::Aggregate {
            input: Box::new(input),
            group_by,
            reductions: vec![],
            attrs: vec![],
            props: Default::default(),
        };
        let catalog = Catalog::new();
        let caps = NoPushdown;
        let ctx = RuleContext {
            catalog: &catalog,
            capabilities: &caps,
        };
        let rewritten = StreamingAggregateChoiceRule.rewrite(&agg, &ctx).expect("should annotate");
        let RelExpr::Aggregate { props, .. } = rewritten else {
            panic!("expected Aggregate");
        };
        assert_eq!(props.sort_order, vec![(group_col, SortDir::Asc)]);
    }
}
