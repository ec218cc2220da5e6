//! Caching insertion (`spec.md` §4.4): a subtree referenced multiple
//! times and judged cheap to materialize gets a memoizing
//! [`RelExpr::Cache`] node, keyed by the subtree's structural
//! fingerprint plus bound parameters.
//!
//! The concrete "referenced multiple times" shape this rule recognizes
//! is a join whose two sides are structurally identical plans (the
//! common self-join-against-the-same-subquery pattern); recognizing
//! arbitrary DAG sharing would need a global subtree-interning pass this
//! crate does not perform (plans arrive as trees, not DAGs, from
//! [`lucidb_expr::PlanBuilder`]).

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use lucidb_expr::RelExpr;

use crate::rule::{Rule, RuleContext};

/// A subtree whose `estimated_rows` exceeds this is not "cheap to
/// materialize" and is left alone, recomputed on each reference instead.
const MATERIALIZE_ROW_LIMIT: u64 = 10_000;

pub struct CachingInsertionRule;

impl Rule for CachingInsertionRule {
    fn id(&self) -> u32 {
        40
    }

    fn name(&self) -> &'static str {
        "caching_insertion"
    }

    fn rewrite(&self, node: &RelExpr, _ctx: &RuleContext) -> Option<RelExpr> {
        let RelExpr::Join {
            kind,
            left,
            right,
            condition,
            attrs,
            props,
        } = node
        else {
            return None;
        };
        if matches!(left.as_ref(), RelExpr::Cache { .. }) {
            return None;
        }
        if left != right {
            return None;
        }
        let cheap = left
            .logical_props()
            .estimated_rows
            .map_or(true, |rows| rows <= MATERIALIZE_ROW_LIMIT);
        if !cheap {
            return None;
        }
        let fingerprint = fingerprint(left);
        let cached = |side: &Box<RelExpr>| RelExpr::Cache {
            input: side.clone(),
            fingerprint,
            attrs: side.attributes().to_vec(),
            props: side.logical_props().clone(),
        };
        Some(RelExpr::Join {
            kind: *kind,
            left: Box::new(cached(left)),
            right: Box::new(cached(right)),
            condition: condition.clone(),
            attrs: attrs.clone(),
            props: props.clone(),
        })
    }
}

fn fingerprint(node: &RelExpr) -> u64 {
    let mut hasher = DefaultHasher::new();
    format!("{node:?}").hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lucidb_expr::{JoinCondition, JoinKind, LogicalProps};
    use lucidb_primitives::{AttributeIdGen, TableId};
    use lucidb_schema::Catalog;
    use lucidb_expr::NoPushdown;

    fn scan(gen: &mut AttributeIdGen) -> RelExpr {
        let _ = gen.next();
        RelExpr::Retrieve {
            table_id: TableId::new(7),
            module_name: "memory".into(),
            pushed: Default::default(),
            attrs: vec![],
            props: LogicalProps::default(),
        }
    }

    #[test]
    fn wraps_both_sides_of_a_self_join_in_cache() {
        let mut gen = AttributeIdGen::new();
        let left = scan(&mut gen);
        let right = left.clone();
        let join = RelExpr::Join {
            kind: JoinKind::Inner,
            left: Box::new(left),
            right: Box::new(right),
            condition: JoinCondition::None,
            attrs: vec![],
            props: Default::default(),
        };
        let catalog = Catalog::new();
        let caps = NoPushdown;
        let ctx = RuleContext {
            catalog: &catalog,
            capabilities: &caps,
        };
        let rewritten = CachingInsertionRule.rewrite(&join, &ctx).expect("should cache");
        let RelExpr::Join { left, right, .. } = rewritten else {
            panic!("expected Join");
        };
        assert!(matches!(*left, RelExpr::Cache { .. }));
        assert!(matches!(*right, RelExpr::Cache { .. }));
    }

    #[test]
    fn leaves_distinct_sides_alone() {
        let mut gen = AttributeIdGen::new();
        let left = scan(&mut gen);
        let right = RelExpr::Retrieve {
            table_id: TableId::new(9),
            module_name: "memory".into(),
            pushed: Default::default(),
            attrs: vec![],
            props: LogicalProps::default(),
        };
        let join = RelExpr::Join {
            kind: JoinKind::Inner,
            left: Box::new(left),
            right: Box::new(right),
            condition: JoinCondition::None,
            attrs: vec![],
            props: Default::default(),
        };
        let catalog = Catalog::new();
        let caps = NoPushdown;
        let ctx = RuleContext {
            catalog: &catalog,
            capabilities: &caps,
        };
        assert!(CachingInsertionRule.rewrite(&join, &ctx).is_none());
    }
}
