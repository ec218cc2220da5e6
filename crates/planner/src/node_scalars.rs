//! Exhaustive plumbing to reach every [`ScalarExpr`] a [`RelExpr`] node
//! owns directly, and every nested relational plan a scalar expression
//! closes over (`ScalarSubquery`/`Exists`/`In`-with-subquery). The
//! optimizer's bottom-up driver uses this to recurse into subquery plans
//! that [`RelExpr::children`] does not expose (they are scalar children,
//! not relational ones -- see `lucidb_expr::scalar::ScalarExpr::children`).

use lucidb_expr::{CheckSpec, InList, RelExpr, ScalarExpr};

/// Rewrites every scalar field owned directly by `node`, threading `f`
/// through each one. Relational children (`input`/`left`/`right`/...)
/// are passed through unchanged -- the caller has already recursed into
/// those separately via [`RelExpr::children`]/[`RelExpr::with_children`].
pub fn map_node_scalars(node: RelExpr, f: &mut impl FnMut(ScalarExpr) -> ScalarExpr) -> RelExpr {
    match node {
        RelExpr::Seq {
            input,
            projections,
            attrs,
            props,
        } => RelExpr::Seq {
            input,
            projections: projections.into_iter().map(|e| f(e)).collect(),
            attrs,
            props,
        },
        RelExpr::Filter {
            input,
            predicate,
            attrs,
            props,
        } => RelExpr::Filter {
            input,
            predicate: f(predicate),
            attrs,
            props,
        },
        RelExpr::Join {
            kind,
            left,
            right,
            condition,
            attrs,
            props,
        } => RelExpr::Join {
            kind,
            left,
            right,
            condition: match condition {
                lucidb_expr::JoinCondition::On(e) => lucidb_expr::JoinCondition::On(f(e)),
                other => other,
            },
            attrs,
            props,
        },
        RelExpr::Aggregate {
            input,
            group_by,
            reductions,
            attrs,
            props,
        } => RelExpr::Aggregate {
            input,
            group_by: group_by.into_iter().map(|e| f(e)).collect(),
            reductions: reductions
                .into_iter()
                .map(|r| lucidb_expr::Reduction {
                    args: r.args.into_iter().map(|e| f(e)).collect(),
                    ..r
                })
                .collect(),
            attrs,
            props,
        },
        RelExpr::Window {
            input,
            windows,
            attrs,
            props,
        } => RelExpr::Window {
            input,
            windows: windows.into_iter().map(|e| f(e)).collect(),
            attrs,
            props,
        },
        RelExpr::Limit {
            input,
            limit,
            offset,
            attrs,
            props,
        } => RelExpr::Limit {
            input,
            limit: limit.map(|e| f(e)),
            offset: offset.map(|e| f(e)),
            attrs,
            props,
        },
        RelExpr::Values { rows, attrs, props } => RelExpr::Values {
            rows: rows.into_iter().map(|row| row.into_iter().map(|e| f(e)).collect()).collect(),
            attrs,
            props,
        },
        RelExpr::MutationContext {
            input,
            captures,
            attrs,
            props,
        } => RelExpr::MutationContext {
            input,
            captures: captures.into_iter().map(|(id, e)| (id, f(e))).collect(),
            attrs,
            props,
        },
        RelExpr::ConstraintCheck {
            input,
            op,
            checks,
            attrs,
            props,
        } => RelExpr::ConstraintCheck {
            input,
            op,
            checks: checks
                .into_iter()
                .map(|c| CheckSpec { expr: f(c.expr), ..c })
                .collect(),
            attrs,
            props,
        },
        RelExpr::Update {
            table_id,
            input,
            assignments,
            attrs,
            props,
        } => RelExpr::Update {
            table_id,
            input,
            assignments: assignments.into_iter().map(|(id, e)| (id, f(e))).collect(),
            attrs,
            props,
        },
        RelExpr::Returning {
            input,
            projections,
            attrs,
            props,
        } => RelExpr::Returning {
            input,
            projections: projections.into_iter().map(|e| f(e)).collect(),
            attrs,
            props,
        },
        // No scalar fields of their own: Sort/Set/Cte/Retrieve/Insert/Delete/Block/Cache.
        other => other,
    }
}

/// Rewrites every relational plan nested inside `expr` (a correlated
/// subquery, an `EXISTS`, or an `IN (SELECT ...)`) via `f`, recursing
/// into ordinary scalar children along the way. `f` is typically the
/// optimizer's own whole-pass entry point, so a subquery is optimized
/// exactly as thoroughly as its enclosing statement.
pub fn rewrite_plans_in_scalar(expr: ScalarExpr, f: &mut impl FnMut(RelExpr) -> RelExpr) -> ScalarExpr {
    match expr {
        ScalarExpr::Unary { id, op, expr, ty } => ScalarExpr::Unary {
            id,
            op,
            expr: Box::new(rewrite_plans_in_scalar(*expr, f)),
            ty,
        },
        ScalarExpr::Binary { id, op, lhs, rhs, ty } => ScalarExpr::Binary {
            id,
            op,
            lhs: Box::new(rewrite_plans_in_scalar(*lhs, f)),
            rhs: Box::new(rewrite_plans_in_scalar(*rhs, f)),
            ty,
        },
        ScalarExpr::Cast { id, expr, ty } => ScalarExpr::Cast {
            id,
            expr: Box::new(rewrite_plans_in_scalar(*expr, f)),
            ty,
        },
        ScalarExpr::Case {
            id,
            operand,
            branches,
            else_branch,
            ty,
        } => ScalarExpr::Case {
            id,
            operand: operand.map(|o| Box::new(rewrite_plans_in_scalar(*o, f))),
            branches: branches
                .into_iter()
                .map(|(w, t)| (rewrite_plans_in_scalar(w, f), rewrite_plans_in_scalar(t, f)))
                .collect(),
            else_branch: else_branch.map(|e| Box::new(rewrite_plans_in_scalar(*e, f))),
            ty,
        },
        ScalarExpr::FunctionCall {
            id,
            function,
            name,
            args,
            deterministic,
            ty,
        } => ScalarExpr::FunctionCall {
            id,
            function,
            name,
            args: args.into_iter().map(|a| rewrite_plans_in_scalar(a, f)).collect(),
            deterministic,
            ty,
        },
        ScalarExpr::WindowCall {
            id,
            name,
            args,
            frame,
            ty,
        } => ScalarExpr::WindowCall {
            id,
            name,
            args: args.into_iter().map(|a| rewrite_plans_in_scalar(a, f)).collect(),
            frame: lucidb_expr::WindowFrame {
                partition_by: frame
                    .partition_by
                    .into_iter()
                    .map(|a| rewrite_plans_in_scalar(a, f))
                    .collect(),
                order_by: frame
                    .order_by
                    .into_iter()
                    .map(|(e, d)| (rewrite_plans_in_scalar(e, f), d))
                    .collect(),
                bounds: frame.bounds,
            },
            ty,
        },
        ScalarExpr::ScalarSubquery { id, plan, ty } => ScalarExpr::ScalarSubquery {
            id,
            plan: Box::new(f(*plan)),
            ty,
        },
        ScalarExpr::Exists { id, plan } => ScalarExpr::Exists { id, plan: Box::new(f(*plan)) },
        ScalarExpr::In {
            id,
            expr,
            list,
            negated,
        } => ScalarExpr::In {
            id,
            expr: Box::new(rewrite_plans_in_scalar(*expr, f)),
            list: match list {
                InList::Values(vs) => InList::Values(vs.into_iter().map(|e| rewrite_plans_in_scalar(e, f)).collect()),
                InList::Subquery(plan) => InList::Subquery(Box::new(f(*plan))),
            },
            negated,
        },
        leaf @ (ScalarExpr::Literal { .. } | ScalarExpr::ColumnRef { .. } | ScalarExpr::Parameter { .. }) => leaf,
    }
}
