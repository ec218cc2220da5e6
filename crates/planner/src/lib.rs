//! The rule-driven logical optimizer (`spec.md` §4.4): a fixed pipeline
//! of bottom-up, fixpoint rewrite passes over a [`lucidb_expr::RelExpr`]
//! tree. Consumes the plan [`lucidb_expr::builder::PlanBuilder`]
//! produces; [`lucidb_physical_plan`] lowers the optimized tree this
//! crate returns into an executable physical plan.

pub mod error;
mod node_scalars;
pub mod optimizer;
pub mod rule;
pub mod rules;

pub use error::{OptimizeError, OptimizeResult};
pub use optimizer::{Optimizer, Pass};
pub use rule::{Rule, RuleContext};
pub use rules::{
    CachingInsertionRule, ConstantFoldingRule, PredicatePushdownRule, RetrieveGrowthRule, SortEliminationRule,
    StreamingAggregateChoiceRule,
};

#[cfg(test)]
mod tests {
    use super::*;
    use lucidb_expr::{Attribute, LogicalProps, RelExpr, VtabCapabilities};
    use lucidb_primitives::{AttributeIdGen, TableId};
    use lucidb_sats::{LogicalType, PhysicalType};
    use lucidb_schema::Catalog;

    struct AllPushdown;
    impl lucidb_expr::CapabilityProvider for AllPushdown {
        fn capabilities(&self, _table_id: TableId) -> VtabCapabilities {
            VtabCapabilities::all(Some(100))
        }
    }

    #[test]
    fn standard_pipeline_folds_and_pushes_down_a_filter_over_a_scan() {
        let mut gen = AttributeIdGen::new();
        let col = gen.next();
        let scan = RelExpr::Retrieve {
            table_id: TableId::new(1),
            module_name: "memory".into(),
            pushed: Default::default(),
            attrs: vec![Attribute {
                id: col,
                name: "id".into(),
                ty: LogicalType::not_null(PhysicalType::Integer),
            }],
            props: LogicalProps::default(),
        };
        let predicate = lucidb_expr::ScalarExpr::Binary {
            id: gen.next(),
            op: lucidb_expr::BinaryOp::Eq,
            lhs: Box::new(lucidb_expr::ScalarExpr::ColumnRef {
                id: gen.next(),
                refers_to: col,
                ty: LogicalType::not_null(PhysicalType::Integer),
            }),
            rhs: Box::new(lucidb_expr::ScalarExpr::Literal {
                id: gen.next(),
                value: lucidb_sats::Value::Integer(1),
                ty: LogicalType::not_null(PhysicalType::Integer),
            }),
            ty: LogicalType::not_null(PhysicalType::Boolean),
        };
        let plan = RelExpr::Filter {
            input: Box::new(scan),
            predicate,
            attrs: vec![Attribute {
                id: col,
                name: "id".into(),
                ty: LogicalType::not_null(PhysicalType::Integer),
            }],
            props: LogicalProps::default(),
        };

        let catalog = Catalog::new();
        let caps = AllPushdown;
        let ctx = RuleContext {
            catalog: &catalog,
            capabilities: &caps,
        };
        let optimized = Optimizer::standard().optimize(plan, &ctx);
        match optimized {
            RelExpr::Retrieve { pushed, .. } => assert!(pushed.filter.is_some()),
            other => panic!("expected the filter to be pushed into a bare Retrieve, got {other:?}"),
        }
    }
}
