//! `Database::explain` (the supplemental operation noted in §2 of the
//! expanded specification): renders an optimized [`PhysicalPlan`] as
//! structured data a host can walk and render itself, rather than a
//! pre-formatted string -- needed to assert on plan shape in tests (e.g.
//! "the filter landed inside the `Retrieve`") without parsing text back
//! out of a debug dump.

use lucidb_physical_plan::PhysicalPlan;

#[derive(Clone, Debug, PartialEq)]
pub struct PlanDescription {
    /// The physical operator's name, e.g. `"Scan"`, `"HashJoin"`.
    pub kind: String,
    /// A short, human-readable summary of this node's own parameters
    /// (table name, join kind, sort keys, ...), not its subtree.
    pub detail: String,
    pub output_columns: Vec<String>,
    pub children: Vec<PlanDescription>,
}

pub fn describe(plan: &PhysicalPlan) -> PlanDescription {
    let output_columns = plan.attributes().iter().map(|a| a.name.clone()).collect();
    let children = plan.children().into_iter().map(describe).collect();
    let (kind, detail) = describe_node(plan);
    PlanDescription {
        kind,
        detail,
        output_columns,
        children,
    }
}

fn describe_node(plan: &PhysicalPlan) -> (String, String) {
    match plan {
        PhysicalPlan::Scan { table_id, module_name, filter, .. } => (
            "Scan".into(),
            format!(
                "table={} module={module_name} filter={} sort={} limit={}",
                table_id.value(),
                filter.filter.is_some(),
                !filter.sort.is_empty(),
                filter.limit.is_some()
            ),
        ),
        PhysicalPlan::Filter { .. } => ("Filter".into(), String::new()),
        PhysicalPlan::Project { projections, .. } => ("Project".into(), format!("{} expr(s)", projections.len())),
        PhysicalPlan::NestedLoopJoin { kind, .. } => ("NestedLoopJoin".into(), format!("{kind:?}")),
        PhysicalPlan::HashJoin { kind, keys, .. } => {
            ("HashJoin".into(), format!("{kind:?} on {} key(s)", keys.left.len()))
        }
        PhysicalPlan::HashAggregate { group_by, reductions, .. } => (
            "HashAggregate".into(),
            format!("group_by={} reductions={}", group_by.len(), reductions.len()),
        ),
        PhysicalPlan::StreamAggregate { group_by, reductions, .. } => (
            "StreamAggregate".into(),
            format!("group_by={} reductions={}", group_by.len(), reductions.len()),
        ),
        PhysicalPlan::Window { windows, .. } => ("Window".into(), format!("{} window function(s)", windows.len())),
        PhysicalPlan::Sort { keys, .. } => ("Sort".into(), format!("{} key(s)", keys.len())),
        PhysicalPlan::Limit { limit, offset, .. } => (
            "Limit".into(),
            format!("limit={} offset={}", limit.is_some(), offset.is_some()),
        ),
        PhysicalPlan::SetOp { op, all, .. } => ("SetOp".into(), format!("{op:?} all={all}")),
        PhysicalPlan::Values { rows, .. } => ("Values".into(), format!("{} row(s)", rows.len())),
        PhysicalPlan::MutationContext { .. } => ("MutationContext".into(), String::new()),
        PhysicalPlan::ConstraintCheck { op, checks, .. } => {
            ("ConstraintCheck".into(), format!("{op:?} {} check(s)", checks.len()))
        }
        PhysicalPlan::Insert { table_id, module_name, .. } => {
            ("Insert".into(), format!("table={} module={module_name}", table_id.value()))
        }
        PhysicalPlan::Update { table_id, module_name, assignments, .. } => (
            "Update".into(),
            format!("table={} module={module_name} assignments={}", table_id.value(), assignments.len()),
        ),
        PhysicalPlan::Delete { table_id, module_name, .. } => {
            ("Delete".into(), format!("table={} module={module_name}", table_id.value()))
        }
        PhysicalPlan::Returning { projections, .. } => ("Returning".into(), format!("{} expr(s)", projections.len())),
        PhysicalPlan::Block { statements, .. } => ("Block".into(), format!("{} statement(s)", statements.len())),
        PhysicalPlan::Materialize { fingerprint, .. } => ("Materialize".into(), format!("fingerprint={fingerprint:#x}")),
    }
}
