//! Sort elimination (`spec.md` §4.4): drop a `Sort` whose requested order
//! is already satisfied by its input's logical ordering.

use lucidb_expr::RelExpr;

use crate::rule::{Rule, RuleContext};

pub struct SortEliminationRule;

impl Rule for SortEliminationRule {
    fn id(&self) -> u32 {
        60
    }

    fn name(&self) -> &'static str {
        "sort_elimination"
    }

    fn rewrite(&self, node: &RelExpr, _ctx: &RuleContext) -> Option<RelExpr> {
        let RelExpr::Sort { input, keys, .. } = node else {
            return None;
        };
        let existing = &input.logical_props().sort_order;
        if existing.len() >= keys.len() && existing[..keys.len()] == keys[..] {
            Some((**input).clone())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lucidb_expr::{LogicalProps, SortDir};
    use lucidb_primitives::AttributeIdGen;
    use lucidb_schema::Catalog;
    use lucidb_expr::NoPushdown;

    #[test]
    fn drops_sort_already_satisfied_by_input_order() {
        let mut gen = AttributeIdGen::new();
        let col = gen.next();
        let input = RelExpr::Values {
            rows: vec![],
            attrs: vec![],
            props: LogicalProps {
                sort_order: vec![(col, SortDir::Asc)],
                ..Default::default()
            },
        };
        let sort = RelExpr::Sort {
            input: Box::new(input),
            keys: vec![(col, SortDir::Asc)],
            attrs: vec![],
            props: Default::default(),
        };
        let catalog = Catalog::new();
        let caps = NoPushdown;
        let ctx = RuleContext {
            catalog: &catalog,
            capabilities: &caps,
        };
        let rewritten = SortEliminationRule.rewrite(&sort, &ctx).expect("should eliminate");
        assert!(matches!(rewritten, RelExpr::Values { .. }));
    }

    #[test]
    fn keeps_sort_when_direction_differs() {
        let mut gen = AttributeIdGen::new();
        let col = gen.next();
        let input = RelExpr::Values {
            rows: vec![],
            attrs: vec![],
            props: LogicalProps {
                sort_order: vec![(col, SortDir::Asc)],
                ..Default::default()
            },
        };
        let sort = RelExpr::Sort {
            input: Box::new(input),
            keys: vec![(col, SortDir::Desc)],
            attrs: vec![],
            props: Default::default(),
        };
        let catalog = Catalog::new();
        let caps = NoPushdown;
        let ctx = RuleContext {
            catalog: &catalog,
            capabilities: &caps,
        };
        assert!(SortEliminationRule.rewrite(&sort, &ctx).is_none());
    }
}
