//! The instruction emitter and scheduler (`spec.md` §4.5): walks a
//! [`PhysicalPlan`] bottom-up and produces its rows. Each node's output is
//! materialized into an owned `Vec<Row>` before being handed to its parent
//! -- a deliberate simplification over a truly lazy, per-row pull pipeline,
//! noted in `DESIGN.md`, that keeps the lifetime story tractable (no node
//! needs to hold a live borrow into a child's still-running stream across
//! an `.await`). Only the two public entry points, [`execute`] and
//! [`execute_correlated`], wrap the final vector in a [`RowStream`] so
//! callers still see an async stream, matching the virtual-table contract's
//! shape.

use std::cmp::Ordering;
use std::collections::HashMap;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use lucidb_expr::{Attribute, BinaryOp, FrameBound, JoinKind, Reduction, ScalarExpr, SetOpKind, UnaryOp};
use lucidb_physical_plan::{FilterConstraint, FilterInfo, FilterOp, FilterOrderBy, PhysicalPlan, PushedFilter, SortDir};
use lucidb_primitives::AttributeId;
use lucidb_sats::{compare, order_key, CompareResult, LogicalType, NullOrdering, PhysicalType, Row, Value};

use crate::context::ExecCtx;
use crate::deferred::PendingCheck;
use crate::error::{ExecError, ExecResult};
use crate::eval::evaluate;
use crate::row::{EvalEnv, RowDescriptor};
use crate::vtab::{ConflictResolution, UpdateArgs, UpdateOutcome};

pub type RowStream = BoxStream<'static, ExecResult<Row>>;

/// Runs a top-level statement with no enclosing row context.
pub async fn execute(plan: PhysicalPlan, ctx: &ExecCtx<'_>) -> ExecResult<RowStream> {
    let env = EvalEnv::new(ctx.params, &[]);
    let rows = run(&plan, ctx, &env).await?;
    Ok(stream::iter(rows.into_iter().map(Ok)).boxed())
}

/// Runs `plan` (typically a lowered subquery) against an already-open row
/// context, so `OuterColumn` references inside it resolve against the
/// enclosing row's still-open slot. This is what makes a correlated
/// subquery correlated -- see [`crate::eval::run_subquery`].
pub async fn execute_correlated<'a>(plan: PhysicalPlan, env: &EvalEnv<'a>, ctx: &ExecCtx<'a>) -> ExecResult<RowStream> {
    let rows = run(&plan, ctx, env).await?;
    Ok(stream::iter(rows.into_iter().map(Ok)).boxed())
}

fn descriptor_for(plan: &PhysicalPlan) -> RowDescriptor {
    RowDescriptor::new(plan.attributes().iter().map(|a: &Attribute| a.id).collect())
}

fn run<'a>(plan: &'a PhysicalPlan, ctx: &'a ExecCtx<'a>, outer: &'a EvalEnv<'a>) -> BoxFuture<'a, ExecResult<Vec<Row>>> {
    Box::pin(async move {
        match plan {
            PhysicalPlan::Scan { table_id, module_name, filter, attrs } => run_scan(*table_id, module_name, filter, attrs, ctx, outer).await,
            PhysicalPlan::Filter { input, predicate, .. } => run_filter(input, predicate, ctx, outer).await,
            PhysicalPlan::Project { input, projections, .. } => run_project(input, projections, ctx, outer).await,
            PhysicalPlan::NestedLoopJoin {
                kind,
                left,
                right,
                condition,
                ..
            } => run_nested_loop_join(*kind, left, right, condition.as_ref(), ctx, outer).await,
            PhysicalPlan::HashJoin { kind, left, right, keys, .. } => run_hash_join(*kind, left, right, keys, ctx, outer).await,
            PhysicalPlan::HashAggregate {
                input,
                group_by,
                reductions,
                ..
            }
            | PhysicalPlan::StreamAggregate {
                input,
                group_by,
                reductions,
                ..
            } => run_aggregate(input, group_by, reductions, ctx, outer).await,
            PhysicalPlan::Window { input, windows, .. } => run_window(input, windows, ctx, outer).await,
            PhysicalPlan::Sort { input, keys, .. } => run_sort(input, keys, ctx, outer).await,
            PhysicalPlan::Limit { input, limit, offset, .. } => run_limit(input, limit.as_ref(), offset.as_ref(), ctx, outer).await,
            PhysicalPlan::SetOp { op, all, left, right, .. } => run_set_op(*op, *all, left, right, ctx, outer).await,
            PhysicalPlan::Values { rows, .. } => run_values(rows, ctx, outer).await,
            PhysicalPlan::MutationContext { input, captures, .. } => run_mutation_context(input, captures, ctx, outer).await,
            PhysicalPlan::ConstraintCheck { input, checks, .. } => run_constraint_check(input, checks, ctx, outer).await,
            PhysicalPlan::Insert { table_id, module_name, input, .. } => {
                run_insert(*table_id, module_name, input, ctx, outer).await
            }
            PhysicalPlan::Update {
                table_id,
                module_name,
                input,
                assignments,
                ..
            } => run_update(*table_id, module_name, input, assignments, ctx, outer).await,
            PhysicalPlan::Delete { table_id, module_name, input, .. } => run_delete(*table_id, module_name, input, ctx, outer).await,
            PhysicalPlan::Returning { input, projections, .. } => run_project(input, projections, ctx, outer).await,
            PhysicalPlan::Block { statements, .. } => run_block(statements, ctx, outer).await,
            PhysicalPlan::Materialize { input, fingerprint, .. } => run_materialize(input, *fingerprint, ctx, outer).await,
        }
    })
}

// -- scan -------------------------------------------------------------

async fn run_scan<'a>(
    table_id: lucidb_primitives::TableId,
    module_name: &str,
    filter: &PushedFilter,
    attrs: &'a [Attribute],
    ctx: &'a ExecCtx<'a>,
    outer: &'a EvalEnv<'a>,
) -> ExecResult<Vec<Row>> {
    let table = ctx.open_table(table_id, module_name).await?;
    let (filter_info, residual) = build_filter_info(filter, attrs, ctx, outer).await?;
    let mut rows = Vec::new();
    {
        let mut stream = table.query(&filter_info).await?;
        while let Some(item) = stream.next().await {
            let (_, row) = item?;
            rows.push(row);
        }
    }
    if let Some(pred) = residual {
        let desc = RowDescriptor::new(attrs.iter().map(|a| a.id).collect());
        let mut kept = Vec::with_capacity(rows.len());
        for row in rows {
            let mut env = outer.nested();
            env.enter(&desc, &row);
            let v = evaluate(&pred, &env, ctx).await?;
            env.exit();
            if matches!(v, Value::Boolean(true)) {
                kept.push(row);
            }
        }
        rows = kept;
    }
    Ok(rows)
}

fn split_conjuncts(expr: &ScalarExpr, out: &mut Vec<ScalarExpr>) {
    if let ScalarExpr::Binary { op: BinaryOp::And, lhs, rhs, .. } = expr {
        split_conjuncts(lhs, out);
        split_conjuncts(rhs, out);
    } else {
        out.push(expr.clone());
    }
}

fn predicate_op(op: BinaryOp) -> Option<FilterOp> {
    Some(match op {
        BinaryOp::Eq => FilterOp::Eq,
        BinaryOp::Lt => FilterOp::Lt,
        BinaryOp::LtEq => FilterOp::LtEq,
        BinaryOp::Gt => FilterOp::Gt,
        BinaryOp::GtEq => FilterOp::GtEq,
        BinaryOp::Like => FilterOp::Like,
        BinaryOp::Glob => FilterOp::Glob,
        _ => return None,
    })
}

fn flip_op(op: FilterOp) -> FilterOp {
    match op {
        FilterOp::Lt => FilterOp::Gt,
        FilterOp::LtEq => FilterOp::GtEq,
        FilterOp::Gt => FilterOp::Lt,
        FilterOp::GtEq => FilterOp::LtEq,
        other => other,
    }
}

fn is_value_like(expr: &ScalarExpr) -> bool {
    matches!(expr, ScalarExpr::Literal { .. } | ScalarExpr::Parameter { .. })
}

/// Splits a pushed-down `ScalarExpr` predicate into the column/op/value
/// constraints a module's `FilterInfo` can act on, leaving whatever
/// doesn't fit that shape as a residual filter the scan re-checks itself.
/// A `Retrieve`'s pushed predicates/sort still name columns by the
/// statement-wide `AttributeId` the builder allocated; the vtab contract's
/// `FilterInfo` (`spec.md` §6) names them by their ordinal position in the
/// row the module actually returns. This maps one to the other, `None` if
/// the id isn't one of this scan's own output columns (shouldn't happen
/// for anything the optimizer legitimately pushed into this `Retrieve`).
fn column_position(attrs: &[Attribute], id: AttributeId) -> Option<AttributeId> {
    attrs.iter().position(|a| a.id == id).map(|pos| AttributeId::from_raw(pos as u32))
}

async fn classify_constraint<'a>(
    expr: &ScalarExpr,
    attrs: &[Attribute],
    ctx: &'a ExecCtx<'a>,
    outer: &'a EvalEnv<'a>,
) -> ExecResult<Option<(AttributeId, FilterOp, Option<Value>)>> {
    match expr {
        ScalarExpr::Unary { op: UnaryOp::IsNull, expr, .. } => Ok(match expr.as_ref() {
            ScalarExpr::ColumnRef { refers_to, .. } => column_position(attrs, *refers_to).map(|c| (c, FilterOp::IsNull, None)),
            _ => None,
        }),
        ScalarExpr::Unary {
            op: UnaryOp::IsNotNull,
            expr,
            ..
        } => Ok(match expr.as_ref() {
            ScalarExpr::ColumnRef { refers_to, .. } => column_position(attrs, *refers_to).map(|c| (c, FilterOp::IsNotNull, None)),
            _ => None,
        }),
        ScalarExpr::Binary { op, lhs, rhs, .. } => {
            let Some(fop) = predicate_op(*op) else { return Ok(None) };
            if let ScalarExpr::ColumnRef { refers_to, .. } = lhs.as_ref() {
                if is_value_like(rhs) {
                    let Some(col) = column_position(attrs, *refers_to) else { return Ok(None) };
                    let v = evaluate(rhs, outer, ctx).await?;
                    return Ok(Some((col, fop, Some(v))));
                }
            }
            if let ScalarExpr::ColumnRef { refers_to, .. } = rhs.as_ref() {
                if is_value_like(lhs) {
                    let Some(col) = column_position(attrs, *refers_to) else { return Ok(None) };
                    let v = evaluate(lhs, outer, ctx).await?;
                    return Ok(Some((col, flip_op(fop), Some(v))));
                }
            }
            Ok(None)
        }
        _ => Ok(None),
    }
}

fn and_expr(a: ScalarExpr, b: ScalarExpr) -> ScalarExpr {
    ScalarExpr::Binary {
        id: AttributeId::from_raw(0),
        op: BinaryOp::And,
        lhs: Box::new(a),
        rhs: Box::new(b),
        ty: LogicalType::not_null(PhysicalType::Boolean),
    }
}

fn as_u64(v: Value) -> ExecResult<Option<u64>> {
    match v {
        Value::Null => Ok(None),
        Value::Integer(i) if i >= 0 => Ok(Some(i as u64)),
        Value::BigInt(i) if i >= 0 => Ok(Some(i as u64)),
        _ => Err(ExecError::Internal("LIMIT/OFFSET must evaluate to a non-negative integer".into())),
    }
}

async fn build_filter_info<'a>(
    pushed: &PushedFilter,
    attrs: &[Attribute],
    ctx: &'a ExecCtx<'a>,
    outer: &'a EvalEnv<'a>,
) -> ExecResult<(FilterInfo, Option<ScalarExpr>)> {
    let mut constraints = Vec::new();
    let mut params = Vec::new();
    let mut residual_terms = Vec::new();
    if let Some(filter) = &pushed.filter {
        let mut conjuncts = Vec::new();
        split_conjuncts(filter, &mut conjuncts);
        for term in conjuncts {
            match classify_constraint(&term, attrs, ctx, outer).await? {
                Some((column, op, value)) => {
                    let arg_pos = value.map(|v| {
                        params.push(v);
                        params.len() - 1
                    });
                    constraints.push(FilterConstraint { column, op, arg_pos });
                }
                None => residual_terms.push(term),
            }
        }
    }
    let residual = residual_terms.into_iter().reduce(and_expr);
    let order_by = pushed
        .sort
        .iter()
        .filter_map(|(id, dir)| column_position(attrs, *id).map(|pos| FilterOrderBy { column: pos, dir: *dir }))
        .collect();
    let limit = match &pushed.limit {
        Some(e) => as_u64(evaluate(e, outer, ctx).await?)?,
        None => None,
    };
    let offset = match &pushed.offset {
        Some(e) => as_u64(evaluate(e, outer, ctx).await?)?,
        None => None,
    };
    Ok((
        FilterInfo {
            index_number: None,
            index_name: None,
            constraints,
            order_by,
            projection: pushed.projection.clone(),
            limit,
            offset,
            params,
        },
        residual,
    ))
}

// -- filter / project ----------------------------------------------------

async fn run_filter<'a>(input: &'a PhysicalPlan, predicate: &'a ScalarExpr, ctx: &'a ExecCtx<'a>, outer: &'a EvalEnv<'a>) -> ExecResult<Vec<Row>> {
    let rows = run(input, ctx, outer).await?;
    let desc = descriptor_for(input);
    let mut kept = Vec::with_capacity(rows.len());
    for row in rows {
        let mut env = outer.nested();
        env.enter(&desc, &row);
        let v = evaluate(predicate, &env, ctx).await?;
        env.exit();
        if matches!(v, Value::Boolean(true)) {
            kept.push(row);
        }
    }
    Ok(kept)
}

async fn run_project<'a>(
    input: &'a PhysicalPlan,
    projections: &'a [ScalarExpr],
    ctx: &'a ExecCtx<'a>,
    outer: &'a EvalEnv<'a>,
) -> ExecResult<Vec<Row>> {
    let rows = run(input, ctx, outer).await?;
    let desc = descriptor_for(input);
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let mut env = outer.nested();
        env.enter(&desc, &row);
        let mut values = Vec::with_capacity(projections.len());
        for proj in projections {
            values.push(evaluate(proj, &env, ctx).await?);
        }
        env.exit();
        out.push(Row::new(values));
    }
    Ok(out)
}

// -- joins ----------------------------------------------------------------

fn concat_rows(a: &Row, b: &Row) -> Row {
    Row::new(a.0.iter().chain(b.0.iter()).cloned().collect())
}

fn pad_left(left_width: usize, b: &Row) -> Row {
    Row::new(std::iter::repeat(Value::Null).take(left_width).chain(b.0.iter().cloned()).collect())
}

fn pad_right(a: &Row, right_width: usize) -> Row {
    Row::new(a.0.iter().cloned().chain(std::iter::repeat(Value::Null).take(right_width)).collect())
}

async fn run_nested_loop_join<'a>(
    kind: JoinKind,
    left: &'a PhysicalPlan,
    right: &'a PhysicalPlan,
    condition: Option<&'a ScalarExpr>,
    ctx: &'a ExecCtx<'a>,
    outer: &'a EvalEnv<'a>,
) -> ExecResult<Vec<Row>> {
    let left_rows = run(left, ctx, outer).await?;
    let right_rows = run(right, ctx, outer).await?;
    let left_width = left.attributes().len();
    let right_width = right.attributes().len();
    let combined_desc = RowDescriptor::new(left.attributes().iter().chain(right.attributes().iter()).map(|a| a.id).collect());
    let mut right_matched = vec![false; right_rows.len()];
    let mut out = Vec::new();
    for lrow in &left_rows {
        let mut left_matched = false;
        for (ri, rrow) in right_rows.iter().enumerate() {
            let combined = concat_rows(lrow, rrow);
            let keep = match condition {
                Some(cond) => {
                    let mut env = outer.nested();
                    env.enter(&combined_desc, &combined);
                    let v = evaluate(cond, &env, ctx).await?;
                    env.exit();
                    matches!(v, Value::Boolean(true))
                }
                None => true,
            };
            if keep {
                left_matched = true;
                right_matched[ri] = true;
                out.push(combined);
            }
        }
        if !left_matched && matches!(kind, JoinKind::Left) {
            out.push(pad_right(lrow, right_width));
        }
    }
    if matches!(kind, JoinKind::Right) {
        for (ri, rrow) in right_rows.iter().enumerate() {
            if !right_matched[ri] {
                out.push(pad_left(left_width, rrow));
            }
        }
    }
    Ok(out)
}

async fn run_hash_join<'a>(
    kind: JoinKind,
    left: &'a PhysicalPlan,
    right: &'a PhysicalPlan,
    keys: &'a lucidb_physical_plan::EquiJoinKeys,
    ctx: &'a ExecCtx<'a>,
    outer: &'a EvalEnv<'a>,
) -> ExecResult<Vec<Row>> {
    let left_rows = run(left, ctx, outer).await?;
    let right_rows = run(right, ctx, outer).await?;
    let left_desc = descriptor_for(left);
    let right_desc = descriptor_for(right);
    let combined_desc = RowDescriptor::new(left.attributes().iter().chain(right.attributes().iter()).map(|a| a.id).collect());
    let left_width = left.attributes().len();
    let right_width = right.attributes().len();

    let mut right_index: HashMap<Vec<String>, Vec<usize>> = HashMap::new();
    for (ri, rrow) in right_rows.iter().enumerate() {
        let mut env = outer.nested();
        env.enter(&right_desc, rrow);
        let mut values = Vec::with_capacity(keys.right.len());
        for k in &keys.right {
            values.push(evaluate(k, &env, ctx).await?);
        }
        env.exit();
        // A NULL join key is never equal to anything, including another
        // NULL (`compare`'s own `Incomparable` for NULL) -- such a row
        // can't be a hash-join candidate on either side.
        if values.iter().any(Value::is_null) {
            continue;
        }
        let key: Vec<String> = values.iter().map(ToString::to_string).collect();
        right_index.entry(key).or_default().push(ri);
    }

    let mut right_matched = vec![false; right_rows.len()];
    let mut out = Vec::new();
    for lrow in &left_rows {
        let mut env = outer.nested();
        env.enter(&left_desc, lrow);
        let mut values = Vec::with_capacity(keys.left.len());
        for k in &keys.left {
            values.push(evaluate(k, &env, ctx).await?);
        }
        env.exit();
        let key: Option<Vec<String>> = if values.iter().any(Value::is_null) {
            None
        } else {
            Some(values.iter().map(ToString::to_string).collect())
        };

        let mut left_matched = false;
        if let Some(candidates) = key.as_ref().and_then(|key| right_index.get(key)) {
            for &ri in candidates {
                let rrow = &right_rows[ri];
                let combined = concat_rows(lrow, rrow);
                let keep = match &keys.residual {
                    Some(cond) => {
                        let mut env2 = outer.nested();
                        env2.enter(&combined_desc, &combined);
                        let v = evaluate(cond, &env2, ctx).await?;
                        env2.exit();
                        matches!(v, Value::Boolean(true))
                    }
                    None => true,
                };
                if keep {
                    left_matched = true;
                    right_matched[ri] = true;
                    out.push(combined);
                }
            }
        }
        if !left_matched && matches!(kind, JoinKind::Left) {
            out.push(pad_right(lrow, right_width));
        }
    }
    if matches!(kind, JoinKind::Right) {
        for (ri, rrow) in right_rows.iter().enumerate() {
            if !right_matched[ri] {
                out.push(pad_left(left_width, rrow));
            }
        }
    }
    Ok(out)
}

// -- aggregation ------------------------------------------------------------

fn keys_equal(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(x, y)| {
            if x.is_null() && y.is_null() {
                true
            } else {
                matches!(compare(x, y, None), CompareResult::Equal)
            }
        })
}

fn reduce_sum(arg_tuples: &[Vec<Value>]) -> ExecResult<Value> {
    let mut acc: Option<Value> = None;
    for t in arg_tuples {
        let Some(v) = t.first() else { continue };
        if v.is_null() {
            continue;
        }
        acc = Some(match acc {
            None => v.clone(),
            Some(prev) => {
                let (a, b) = lucidb_sats::coerce_for_arithmetic(&prev, v).map_err(|e| ExecError::Internal(e.to_string()))?;
                match (a, b) {
                    (Value::Integer(x), Value::Integer(y)) => {
                        Value::Integer(x.checked_add(y).ok_or_else(|| ExecError::Internal("integer overflow in SUM".into()))?)
                    }
                    (Value::BigInt(x), Value::BigInt(y)) => {
                        Value::BigInt(x.checked_add(y).ok_or_else(|| ExecError::Internal("integer overflow in SUM".into()))?)
                    }
                    (Value::Real(x), Value::Real(y)) => Value::Real(x + y),
                    _ => return Err(ExecError::Internal("SUM over non-numeric values".into())),
                }
            }
        });
    }
    Ok(acc.unwrap_or(Value::Null))
}

fn reduce_extreme(arg_tuples: &[Vec<Value>], want: CompareResult) -> ExecResult<Value> {
    let mut best: Option<Value> = None;
    for t in arg_tuples {
        let Some(v) = t.first() else { continue };
        if v.is_null() {
            continue;
        }
        best = Some(match best {
            None => v.clone(),
            Some(prev) => match compare(v, &prev, None) {
                r if r == want => v.clone(),
                CompareResult::Incomparable => return Err(ExecError::Internal("MIN/MAX over incomparable values".into())),
                _ => prev,
            },
        });
    }
    Ok(best.unwrap_or(Value::Null))
}

fn apply_reduction(reduction_name: &str, reduction_args_len: usize, distinct: bool, mut arg_tuples: Vec<Vec<Value>>) -> ExecResult<Value> {
    if distinct {
        let mut seen: Vec<Vec<Value>> = Vec::new();
        arg_tuples.retain(|t| {
            if seen.iter().any(|s| keys_equal(s, t)) {
                false
            } else {
                seen.push(t.clone());
                true
            }
        });
    }
    match reduction_name.to_ascii_lowercase().as_str() {
        "count" => {
            let n = if reduction_args_len == 0 {
                arg_tuples.len()
            } else {
                arg_tuples.iter().filter(|t| t.first().is_some_and(|v| !v.is_null())).count()
            };
            Ok(Value::Integer(n as i64))
        }
        "sum" => reduce_sum(&arg_tuples),
        "avg" => {
            let nums: Vec<f64> = arg_tuples
                .iter()
                .filter_map(|t| t.first())
                .filter(|v| !v.is_null())
                .filter_map(Value::as_f64)
                .collect();
            if nums.is_empty() {
                Ok(Value::Null)
            } else {
                Ok(Value::Real(nums.iter().sum::<f64>() / nums.len() as f64))
            }
        }
        "min" => reduce_extreme(&arg_tuples, CompareResult::Less),
        "max" => reduce_extreme(&arg_tuples, CompareResult::Greater),
        other => Err(ExecError::Internal(format!("unknown aggregate function `{other}`"))),
    }
}

async fn run_aggregate<'a>(
    input: &'a PhysicalPlan,
    group_by: &'a [ScalarExpr],
    reductions: &'a [Reduction],
    ctx: &'a ExecCtx<'a>,
    outer: &'a EvalEnv<'a>,
) -> ExecResult<Vec<Row>> {
    let rows = run(input, ctx, outer).await?;
    let desc = descriptor_for(input);

    let mut evaluated: Vec<(Vec<Value>, Vec<Vec<Value>>)> = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut env = outer.nested();
        env.enter(&desc, row);
        let mut key = Vec::with_capacity(group_by.len());
        for g in group_by {
            key.push(evaluate(g, &env, ctx).await?);
        }
        let mut args = Vec::with_capacity(reductions.len());
        for r in reductions {
            let mut vals = Vec::with_capacity(r.args.len());
            for a in &r.args {
                vals.push(evaluate(a, &env, ctx).await?);
            }
            args.push(vals);
        }
        env.exit();
        evaluated.push((key, args));
    }

    let mut groups: Vec<(Vec<Value>, Vec<Vec<Vec<Value>>>)> = Vec::new();
    for (key, args) in evaluated {
        match groups.iter().position(|(k, _)| keys_equal(k, &key)) {
            Some(i) => {
                for (slot, a) in groups[i].1.iter_mut().zip(args) {
                    slot.push(a);
                }
            }
            None => {
                let per_reduction: Vec<Vec<Vec<Value>>> = args.into_iter().map(|a| vec![a]).collect();
                groups.push((key, per_reduction));
            }
        }
    }
    if group_by.is_empty() && groups.is_empty() {
        groups.push((Vec::new(), reductions.iter().map(|_| Vec::new()).collect()));
    }

    let mut out = Vec::with_capacity(groups.len());
    for (key, per_reduction) in groups {
        let mut values = key;
        for (reduction, arg_tuples) in reductions.iter().zip(per_reduction) {
            values.push(apply_reduction(&reduction.function_name, reduction.args.len(), reduction.distinct, arg_tuples)?);
        }
        out.push(Row::new(values));
    }
    Ok(out)
}

// -- window functions -------------------------------------------------------

fn frame_bounds(bounds: &Option<(FrameBound, FrameBound)>, pos: usize, len: usize) -> (usize, usize) {
    let to_offset = |b: &FrameBound| -> usize {
        match b {
            FrameBound::UnboundedPreceding => 0,
            FrameBound::Preceding(n) => pos.saturating_sub(*n as usize),
            FrameBound::CurrentRow => pos,
            FrameBound::Following(n) => (pos + *n as usize).min(len.saturating_sub(1)),
            FrameBound::UnboundedFollowing => len.saturating_sub(1),
        }
    };
    match bounds {
        None => (0, len.saturating_sub(1)),
        Some((start, end)) => {
            let lo = to_offset(start);
            let hi = to_offset(end);
            (lo.min(hi), lo.max(hi))
        }
    }
}

async fn compute_window_column<'a>(
    rows: &[Row],
    desc: &RowDescriptor,
    call: &'a ScalarExpr,
    ctx: &'a ExecCtx<'a>,
    outer: &'a EvalEnv<'a>,
) -> ExecResult<Vec<Value>> {
    let ScalarExpr::WindowCall { name, args, frame, .. } = call else {
        return Err(ExecError::Internal("Window operator given a non-WindowCall expression".into()));
    };

    let mut partition_keys = Vec::with_capacity(rows.len());
    let mut order_keys = Vec::with_capacity(rows.len());
    let mut arg_values = Vec::with_capacity(rows.len());
    for row in rows {
        let mut env = outer.nested();
        env.enter(desc, row);
        let mut pk = Vec::with_capacity(frame.partition_by.len());
        for p in &frame.partition_by {
            pk.push(evaluate(p, &env, ctx).await?);
        }
        let mut ok = Vec::with_capacity(frame.order_by.len());
        for (o, _) in &frame.order_by {
            ok.push(evaluate(o, &env, ctx).await?);
        }
        let mut av = Vec::with_capacity(args.len());
        for a in args {
            av.push(evaluate(a, &env, ctx).await?);
        }
        env.exit();
        partition_keys.push(pk);
        order_keys.push(ok);
        arg_values.push(av);
    }

    let mut partitions: Vec<(Vec<Value>, Vec<usize>)> = Vec::new();
    for (i, pk) in partition_keys.iter().enumerate() {
        match partitions.iter().position(|(k, _)| keys_equal(k, pk)) {
            Some(p) => partitions[p].1.push(i),
            None => partitions.push((pk.clone(), vec![i])),
        }
    }

    let mut output = vec![Value::Null; rows.len()];
    let fn_name = name.to_ascii_lowercase();
    for (_, mut indices) in partitions {
        indices.sort_by(|&a, &b| {
            for (idx, (_, dir)) in frame.order_by.iter().enumerate() {
                let ord = order_key(&order_keys[a][idx], &order_keys[b][idx], None, NullOrdering::First);
                let ord = match dir {
                    lucidb_expr::SortDir::Asc => ord,
                    lucidb_expr::SortDir::Desc => ord.reverse(),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });

        match fn_name.as_str() {
            "row_number" => {
                for (pos, &idx) in indices.iter().enumerate() {
                    output[idx] = Value::Integer(pos as i64 + 1);
                }
            }
            "rank" | "dense_rank" => {
                let mut rank = 0i64;
                let mut dense = 0i64;
                let mut prev: Option<&Vec<Value>> = None;
                for (pos, &idx) in indices.iter().enumerate() {
                    let cur = &order_keys[idx];
                    let tied = prev.is_some_and(|p| keys_equal(p, cur));
                    if !tied {
                        rank = pos as i64 + 1;
                        dense += 1;
                    }
                    output[idx] = Value::Integer(if fn_name == "rank" { rank } else { dense });
                    prev = Some(cur);
                }
            }
            other => {
                for (pos, &idx) in indices.iter().enumerate() {
                    let (lo, hi) = frame_bounds(&frame.bounds, pos, indices.len());
                    let slice: Vec<Vec<Value>> = indices[lo..=hi].iter().map(|&j| arg_values[j].clone()).collect();
                    output[idx] = apply_reduction(other, args.len(), false, slice)?;
                }
            }
        }
    }
    Ok(output)
}

async fn run_window<'a>(input: &'a PhysicalPlan, windows: &'a [ScalarExpr], ctx: &'a ExecCtx<'a>, outer: &'a EvalEnv<'a>) -> ExecResult<Vec<Row>> {
    let rows = run(input, ctx, outer).await?;
    let desc = descriptor_for(input);
    let mut columns = Vec::with_capacity(windows.len());
    for call in windows {
        columns.push(compute_window_column(&rows, &desc, call, ctx, outer).await?);
    }
    let mut out = Vec::with_capacity(rows.len());
    for (i, row) in rows.into_iter().enumerate() {
        let mut values = row.0;
        for col in &columns {
            values.push(col[i].clone());
        }
        out.push(Row::new(values));
    }
    Ok(out)
}

// -- sort / limit / set ops -------------------------------------------------

async fn run_sort<'a>(
    input: &'a PhysicalPlan,
    keys: &'a [(AttributeId, SortDir)],
    ctx: &'a ExecCtx<'a>,
    outer: &'a EvalEnv<'a>,
) -> ExecResult<Vec<Row>> {
    let rows = run(input, ctx, outer).await?;
    let desc = descriptor_for(input);
    let mut decorated: Vec<(Vec<Value>, Row)> = Vec::with_capacity(rows.len());
    for row in rows {
        let key = keys
            .iter()
            .map(|(id, _)| {
                desc.position_of(*id)
                    .and_then(|pos| row.get(pos))
                    .cloned()
                    .unwrap_or(Value::Null)
            })
            .collect();
        decorated.push((key, row));
    }
    decorated.sort_by(|a, b| {
        for (i, (_, dir)) in keys.iter().enumerate() {
            let ord = order_key(&a.0[i], &b.0[i], None, NullOrdering::First);
            let ord = match dir {
                SortDir::Asc => ord,
                SortDir::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
    Ok(decorated.into_iter().map(|(_, r)| r).collect())
}

async fn run_limit<'a>(
    input: &'a PhysicalPlan,
    limit: Option<&'a ScalarExpr>,
    offset: Option<&'a ScalarExpr>,
    ctx: &'a ExecCtx<'a>,
    outer: &'a EvalEnv<'a>,
) -> ExecResult<Vec<Row>> {
    let rows = run(input, ctx, outer).await?;
    let off = match offset {
        Some(e) => as_u64(evaluate(e, outer, ctx).await?)?.unwrap_or(0) as usize,
        None => 0,
    };
    let lim = match limit {
        Some(e) => as_u64(evaluate(e, outer, ctx).await?)?,
        None => None,
    };
    let iter = rows.into_iter().skip(off);
    Ok(match lim {
        Some(n) => iter.take(n as usize).collect(),
        None => iter.collect(),
    })
}

fn rows_equal(a: &Row, b: &Row) -> bool {
    keys_equal(&a.0, &b.0)
}

fn dedup_rows(rows: Vec<Row>) -> Vec<Row> {
    let mut out: Vec<Row> = Vec::with_capacity(rows.len());
    for row in rows {
        if !out.iter().any(|r| rows_equal(r, &row)) {
            out.push(row);
        }
    }
    out
}

async fn run_set_op<'a>(
    op: SetOpKind,
    all: bool,
    left: &'a PhysicalPlan,
    right: &'a PhysicalPlan,
    ctx: &'a ExecCtx<'a>,
    outer: &'a EvalEnv<'a>,
) -> ExecResult<Vec<Row>> {
    let left_rows = run(left, ctx, outer).await?;
    let right_rows = run(right, ctx, outer).await?;
    let result = match op {
        SetOpKind::Union => {
            let mut r = left_rows;
            r.extend(right_rows);
            r
        }
        SetOpKind::Intersect => left_rows.into_iter().filter(|l| right_rows.iter().any(|r| rows_equal(l, r))).collect(),
        SetOpKind::Except => left_rows.into_iter().filter(|l| !right_rows.iter().any(|r| rows_equal(l, r))).collect(),
    };
    Ok(if all { result } else { dedup_rows(result) })
}

async fn run_values<'a>(rows: &'a [Vec<ScalarExpr>], ctx: &'a ExecCtx<'a>, outer: &'a EvalEnv<'a>) -> ExecResult<Vec<Row>> {
    let mut out = Vec::with_capacity(rows.len());
    for row_exprs in rows {
        let mut values = Vec::with_capacity(row_exprs.len());
        for e in row_exprs {
            values.push(evaluate(e, outer, ctx).await?);
        }
        out.push(Row::new(values));
    }
    Ok(out)
}

// -- mutation plumbing --------------------------------------------------

async fn run_mutation_context<'a>(
    input: &'a PhysicalPlan,
    captures: &'a [(AttributeId, ScalarExpr)],
    ctx: &'a ExecCtx<'a>,
    outer: &'a EvalEnv<'a>,
) -> ExecResult<Vec<Row>> {
    let mut resolved = Vec::with_capacity(captures.len());
    for (id, expr) in captures {
        resolved.push((*id, evaluate(expr, outer, ctx).await?));
    }
    let nested_env = outer.nested_with_captures(&resolved);
    run(input, ctx, &nested_env).await
}

async fn run_constraint_check<'a>(
    input: &'a PhysicalPlan,
    checks: &'a [lucidb_expr::CheckSpec],
    ctx: &'a ExecCtx<'a>,
    outer: &'a EvalEnv<'a>,
) -> ExecResult<Vec<Row>> {
    let rows = run(input, ctx, outer).await?;
    let desc = descriptor_for(input);
    for row in &rows {
        let mut env = outer.nested();
        env.enter(&desc, row);
        for check in checks {
            let v = evaluate(&check.expr, &env, ctx).await?;
            // A CHECK is violated only by an explicit false; NULL (unknown)
            // passes, matching standard SQL CHECK semantics.
            let satisfied = matches!(v, Value::Boolean(true)) || v.is_null();
            if !satisfied {
                if check.deferrable {
                    if let Some(sink) = ctx.deferred {
                        sink.push(PendingCheck {
                            constraint_name: check.constraint_name.clone(),
                            expr: check.expr.clone(),
                            descriptor: desc.clone(),
                            row: row.clone(),
                        });
                        continue;
                    }
                }
                env.exit();
                return Err(ExecError::Constraint {
                    constraint_name: check.constraint_name.clone(),
                    expr_text: format!("{:?}", check.expr),
                });
            }
        }
        env.exit();
    }
    Ok(rows)
}

fn primary_key_values(schema: &lucidb_schema::TableSchema, row: &Row) -> Vec<Value> {
    schema
        .effective_primary_key()
        .iter()
        .filter_map(|col_id| {
            let pos = schema.columns.iter().position(|c| c.col_id == col_id)?;
            row.get(pos).cloned()
        })
        .collect()
}

async fn run_insert<'a>(
    table_id: lucidb_primitives::TableId,
    module_name: &str,
    input: &'a PhysicalPlan,
    ctx: &'a ExecCtx<'a>,
    outer: &'a EvalEnv<'a>,
) -> ExecResult<Vec<Row>> {
    let rows = run(input, ctx, outer).await?;
    let table = ctx.open_table(table_id, module_name).await?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let outcome = table
            .update(UpdateArgs::Insert {
                new_row: row,
                conflict: ConflictResolution::Abort,
            })
            .await?;
        match outcome {
            UpdateOutcome::Written(row) => out.push(row),
            UpdateOutcome::Deleted(_) => return Err(ExecError::Internal("INSERT produced a delete outcome".into())),
        }
    }
    Ok(out)
}

async fn run_update<'a>(
    table_id: lucidb_primitives::TableId,
    module_name: &str,
    input: &'a PhysicalPlan,
    assignments: &'a [(AttributeId, ScalarExpr)],
    ctx: &'a ExecCtx<'a>,
    outer: &'a EvalEnv<'a>,
) -> ExecResult<Vec<Row>> {
    let rows = run(input, ctx, outer).await?;
    let desc = descriptor_for(input);
    let table = ctx.open_table(table_id, module_name).await?;
    let schema = table.schema().clone();
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let old_key = primary_key_values(&schema, &row);
        let mut new_values = row.0.clone();
        {
            let mut env = outer.nested();
            env.enter(&desc, &row);
            for (id, expr) in assignments {
                let value = evaluate(expr, &env, ctx).await?;
                if let Some(pos) = desc.position_of(*id) {
                    new_values[pos] = value;
                }
            }
            env.exit();
        }
        let new_row = Row::new(new_values);
        let outcome = table.update(UpdateArgs::Update { old_key, new_row }).await?;
        match outcome {
            UpdateOutcome::Written(row) => out.push(row),
            UpdateOutcome::Deleted(_) => return Err(ExecError::Internal("UPDATE produced a delete outcome".into())),
        }
    }
    Ok(out)
}

async fn run_delete<'a>(
    table_id: lucidb_primitives::TableId,
    module_name: &str,
    input: &'a PhysicalPlan,
    ctx: &'a ExecCtx<'a>,
    outer: &'a EvalEnv<'a>,
) -> ExecResult<Vec<Row>> {
    let rows = run(input, ctx, outer).await?;
    let table = ctx.open_table(table_id, module_name).await?;
    let schema = table.schema().clone();
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let old_key = primary_key_values(&schema, &row);
        let outcome = table.update(UpdateArgs::Delete { old_key }).await?;
        match outcome {
            UpdateOutcome::Deleted(row) => out.push(row),
            UpdateOutcome::Written(_) => return Err(ExecError::Internal("DELETE produced a write outcome".into())),
        }
    }
    Ok(out)
}

async fn run_block<'a>(statements: &'a [PhysicalPlan], ctx: &'a ExecCtx<'a>, outer: &'a EvalEnv<'a>) -> ExecResult<Vec<Row>> {
    let mut last = Vec::new();
    for stmt in statements {
        last = run(stmt, ctx, outer).await?;
    }
    Ok(last)
}

async fn run_materialize<'a>(input: &'a PhysicalPlan, fingerprint: u64, ctx: &'a ExecCtx<'a>, outer: &'a EvalEnv<'a>) -> ExecResult<Vec<Row>> {
    if let Some(cache) = ctx.materialize_cache {
        if let Some(rows) = cache.get(fingerprint, outer.params) {
            return Ok(rows);
        }
        let rows = run(input, ctx, outer).await?;
        cache.put(fingerprint, outer.params, rows.clone());
        return Ok(rows);
    }
    run(input, ctx, outer).await
}
