//! The bottom-up, fixpoint rule driver (`spec.md` §4.4).

use lucidb_expr::RelExpr;

use crate::node_scalars::{map_node_scalars, rewrite_plans_in_scalar};
use crate::rule::{Rule, RuleContext};

/// Caps the per-node rewrite loop so a buggy or cyclic pair of rules
/// cannot hang the optimizer; `spec.md`'s fixpoint guarantee assumes
/// confluent, terminating rules, but a ceiling turns a bug into a
/// diagnosable panic rather than an infinite loop.
const MAX_ITERATIONS_PER_NODE: u32 = 64;

/// A named group of rules applied together, lowest rule id first, to
/// every node in the tree before the next pass begins.
pub struct Pass {
    pub name: &'static str,
    pub rules: Vec<Box<dyn Rule>>,
}

impl Pass {
    pub fn new(name: &'static str, mut rules: Vec<Box<dyn Rule>>) -> Self {
        rules.sort_by_key(|r| r.id());
        Self { name, rules }
    }
}

/// Runs a fixed sequence of [`Pass`]es bottom-up over a plan tree.
///
/// `spec.md` names four passes (logical-lowering, predicate-pushdown,
/// constant-folding, physical-lowering); logical-lowering is the AST to
/// `RelExpr` lowering `lucidb_expr::PlanBuilder` already performs before
/// a plan ever reaches this crate, and physical-lowering is
/// `lucidb-physical-plan`'s job once the logical plan below is settled.
/// What runs here is the logical middle: predicate-pushdown (retrieve
/// growth plus filter pushdown), constant-folding, and a final
/// plan-shaping pass (caching insertion, streaming-aggregate choice,
/// sort elimination) that wants the first two passes' results already
/// settled.
pub struct Optimizer {
    passes: Vec<Pass>,
}

impl Optimizer {
    pub fn new(passes: Vec<Pass>) -> Self {
        Self { passes }
    }

    /// The required rule set, grouped into the three passes this crate
    /// owns (see the type doc comment for why logical-lowering and
    /// physical-lowering aren't here).
    pub fn standard() -> Self {
        use crate::rules::{
            CachingInsertionRule, ConstantFoldingRule, PredicatePushdownRule, RetrieveGrowthRule, SortEliminationRule,
            StreamingAggregateChoiceRule,
        };
        Self::new(vec![
            Pass::new(
                "predicate-pushdown",
                vec![Box::new(RetrieveGrowthRule), Box::new(PredicatePushdownRule)],
            ),
            Pass::new("constant-folding", vec![Box::new(ConstantFoldingRule)]),
            Pass::new(
                "plan-shaping",
                vec![
                    Box::new(SortEliminationRule),
                    Box::new(StreamingAggregateChoiceRule),
                    Box::new(CachingInsertionRule),
                ],
            ),
        ])
    }

    pub fn optimize(&self, plan: RelExpr, ctx: &RuleContext) -> RelExpr {
        let mut plan = plan;
        for pass in &self.passes {
            plan = Self::run_pass(plan, pass, ctx);
        }
        plan
    }

    fn run_pass(node: RelExpr, pass: &Pass, ctx: &RuleContext) -> RelExpr {
        let children: Vec<RelExpr> = node
            .children()
            .into_iter()
            .map(|c| Self::run_pass(c.clone(), pass, ctx))
            .collect();
        let mut node = if children.is_empty() { node } else { node.with_children(children) };

        // A scalar expression may itself close over a relational subtree
        // (a correlated subquery, EXISTS, IN (SELECT ...)); optimize
        // those with the same pass before applying rules at this level.
        node = map_node_scalars(node, &mut |s| rewrite_plans_in_scalar(s, &mut |p| Self::run_pass(p, pass, ctx)));

        let mut iterations = 0;
        loop {
            let before = node.attribute_ids();
            let fired = pass.rules.iter().find_map(|rule| rule.rewrite(&node, ctx).map(|n| (rule.name(), n)));
            let Some((rule_name, rewritten)) = fired else {
                break;
            };
            debug_assert!(
                before.iter().all(|id| rewritten.attribute_ids().contains(id) || !surviving_attrs(&node).contains(id)),
                "rule `{rule_name}` dropped a surviving attribute"
            );
            node = rewritten;
            iterations += 1;
            if iterations >= MAX_ITERATIONS_PER_NODE {
                log::warn!("optimizer pass `{}` did not reach a fixpoint within {MAX_ITERATIONS_PER_NODE} iterations", pass.name);
                break;
            }
        }
        node
    }
}

/// Conservative stand-in for "attributes a parent still observes": until
/// the driver threads real liveness information through, every attribute
/// a node currently exposes is treated as potentially live.
fn surviving_attrs(node: &RelExpr) -> Vec<lucidb_primitives::AttributeId> {
    node.attribute_ids()
}
