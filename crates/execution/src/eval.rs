//! Scalar evaluation. Recurses through every [`ScalarExpr`] shape except
//! `WindowCall` (computed specially by the `Window` operator over a whole
//! partition, not row-by-row here). `ScalarSubquery`/`Exists`/`In`-with-
//! subquery lower and run their nested [`RelExpr`] on demand against the
//! *current* [`EvalEnv`], so `OuterColumn` references inside it resolve
//! against the enclosing row's still-open slot -- this is what makes a
//! correlated subquery correlated.

use futures::future::BoxFuture;
use futures::StreamExt;
use lucidb_expr::{BinaryOp, InList, RelExpr, ScalarExpr, UnaryOp};
use lucidb_sats::{coerce_for_arithmetic, compare, CompareResult, Value};

use crate::context::ExecCtx;
use crate::error::{ExecError, ExecResult};
use crate::row::EvalEnv;
use crate::scheduler;

pub fn evaluate<'a>(expr: &'a ScalarExpr, env: &'a EvalEnv<'a>, ctx: &'a ExecCtx<'a>) -> BoxFuture<'a, ExecResult<Value>> {
    Box::pin(async move {
        match expr {
            ScalarExpr::Literal { value, .. } => Ok(value.clone()),
            ScalarExpr::ColumnRef { refers_to, .. } => Ok(env.resolve(*refers_to).cloned().unwrap_or(Value::Null)),
            ScalarExpr::Parameter { index, .. } => Ok(env.params.get(*index).cloned().unwrap_or(Value::Null)),
            ScalarExpr::Unary { op, expr, .. } => {
                let v = evaluate(expr, env, ctx).await?;
                eval_unary(*op, v)
            }
            ScalarExpr::Binary { op, lhs, rhs, .. } => eval_binary(*op, lhs, rhs, env, ctx).await,
            ScalarExpr::Cast { expr, ty, .. } => {
                let v = evaluate(expr, env, ctx).await?;
                cast_value(v, ty)
            }
            ScalarExpr::Case {
                operand,
                branches,
                else_branch,
                ..
            } => eval_case(operand.as_deref(), branches, else_branch.as_deref(), env, ctx).await,
            ScalarExpr::FunctionCall { name, args, .. } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(evaluate(arg, env, ctx).await?);
                }
                ctx.functions.call(name, &values)
            }
            ScalarExpr::WindowCall { .. } => Err(ExecError::Internal(
                "window functions are evaluated by the Window operator, not the scalar evaluator".into(),
            )),
            ScalarExpr::In { expr, list, negated, .. } => eval_in(expr, list, *negated, env, ctx).await,
            ScalarExpr::ScalarSubquery { plan, .. } => {
                let rows = run_subquery(plan, env, ctx).await?;
                match rows.len() {
                    0 => Ok(Value::Null),
                    1 => Ok(rows[0].0.first().cloned().unwrap_or(Value::Null)),
                    n => Err(ExecError::Internal(format!("scalar subquery returned {n} rows, expected at most 1"))),
                }
            }
            ScalarExpr::Exists { plan, .. } => {
                let rows = run_subquery(plan, env, ctx).await?;
                Ok(Value::Boolean(!rows.is_empty()))
            }
        }
    })
}

async fn run_subquery(plan: &RelExpr, env: &EvalEnv<'_>, ctx: &ExecCtx<'_>) -> ExecResult<Vec<lucidb_sats::Row>> {
    let physical = lucidb_physical_plan::lower(plan.clone());
    let stream = scheduler::execute_correlated(physical, env, ctx).await?;
    let rows: Vec<_> = stream.collect::<Vec<_>>().await.into_iter().collect::<ExecResult<_>>()?;
    Ok(rows)
}

async fn eval_in(expr: &ScalarExpr, list: &InList, negated: bool, env: &EvalEnv<'_>, ctx: &ExecCtx<'_>) -> ExecResult<Value> {
    let probe = evaluate(expr, env, ctx).await?;
    if probe.is_null() {
        return Ok(Value::Null);
    }
    let members: Vec<Value> = match list {
        InList::Values(values) => {
            let mut out = Vec::with_capacity(values.len());
            for v in values {
                out.push(evaluate(v, env, ctx).await?);
            }
            out
        }
        InList::Subquery(plan) => run_subquery(plan, env, ctx)
            .await?
            .into_iter()
            .map(|row| row.0.into_iter().next().unwrap_or(Value::Null))
            .collect(),
    };
    let mut saw_null = false;
    for member in &members {
        if member.is_null() {
            saw_null = true;
            continue;
        }
        if matches!(compare(&probe, member, None), CompareResult::Equal) {
            return Ok(Value::Boolean(!negated));
        }
    }
    if saw_null {
        Ok(Value::Null)
    } else {
        Ok(Value::Boolean(negated))
    }
}

async fn eval_case(
    operand: Option<&ScalarExpr>,
    branches: &[(ScalarExpr, ScalarExpr)],
    else_branch: Option<&ScalarExpr>,
    env: &EvalEnv<'_>,
    ctx: &ExecCtx<'_>,
) -> ExecResult<Value> {
    let operand_value = match operand {
        Some(o) => Some(evaluate(o, env, ctx).await?),
        None => None,
    };
    for (when, then) in branches {
        let matched = match &operand_value {
            Some(ov) => matches!(compare(ov, &evaluate(when, env, ctx).await?, None), CompareResult::Equal),
            None => matches!(evaluate(when, env, ctx).await?, Value::Boolean(true)),
        };
        if matched {
            return evaluate(then, env, ctx).await;
        }
    }
    match else_branch {
        Some(e) => evaluate(e, env, ctx).await,
        None => Ok(Value::Null),
    }
}

async fn eval_binary(op: BinaryOp, lhs: &ScalarExpr, rhs: &ScalarExpr, env: &EvalEnv<'_>, ctx: &ExecCtx<'_>) -> ExecResult<Value> {
    // AND/OR short-circuit three-valued logic before either operand's
    // NULL-ness rules out a result, same as the optimizer's constant
    // folder, just evaluated against live row data instead of literals.
    match op {
        BinaryOp::And => {
            let l = evaluate(lhs, env, ctx).await?;
            if matches!(l, Value::Boolean(false)) {
                return Ok(Value::Boolean(false));
            }
            let r = evaluate(rhs, env, ctx).await?;
            if matches!(r, Value::Boolean(false)) {
                return Ok(Value::Boolean(false));
            }
            if l.is_null() || r.is_null() {
                return Ok(Value::Null);
            }
            Ok(Value::Boolean(as_bool(&l)? && as_bool(&r)?))
        }
        BinaryOp::Or => {
            let l = evaluate(lhs, env, ctx).await?;
            if matches!(l, Value::Boolean(true)) {
                return Ok(Value::Boolean(true));
            }
            let r = evaluate(rhs, env, ctx).await?;
            if matches!(r, Value::Boolean(true)) {
                return Ok(Value::Boolean(true));
            }
            if l.is_null() || r.is_null() {
                return Ok(Value::Null);
            }
            Ok(Value::Boolean(as_bool(&l)? || as_bool(&r)?))
        }
        _ => {
            let l = evaluate(lhs, env, ctx).await?;
            let r = evaluate(rhs, env, ctx).await?;
            if l.is_null() || r.is_null() {
                return Ok(Value::Null);
            }
            match op {
                BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => eval_arithmetic(op, l, r),
                BinaryOp::Eq | BinaryOp::NotEq | BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
                    eval_comparison(op, &l, &r)
                }
                BinaryOp::Like => eval_like(&l, &r, false),
                BinaryOp::Glob => eval_like(&l, &r, true),
                BinaryOp::Concat => match (l.as_text(), r.as_text()) {
                    (Some(a), Some(b)) => Ok(Value::Text(format!("{a}{b}"))),
                    _ => Err(ExecError::Internal("`||` expects text operands".into())),
                },
                BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
            }
        }
    }
}

fn as_bool(v: &Value) -> ExecResult<bool> {
    match v {
        Value::Boolean(b) => Ok(*b),
        _ => Err(ExecError::Internal("expected a boolean operand".into())),
    }
}

fn eval_unary(op: UnaryOp, v: Value) -> ExecResult<Value> {
    Ok(match op {
        UnaryOp::IsNull => Value::Boolean(v.is_null()),
        UnaryOp::IsNotNull => Value::Boolean(!v.is_null()),
        UnaryOp::Not => match v {
            Value::Null => Value::Null,
            Value::Boolean(b) => Value::Boolean(!b),
            _ => return Err(ExecError::Internal("NOT expects a boolean operand".into())),
        },
        UnaryOp::Neg => match v {
            Value::Null => Value::Null,
            Value::Integer(i) => Value::Integer(-i),
            Value::BigInt(i) => Value::BigInt(-i),
            Value::Real(r) => Value::Real(-r),
            _ => return Err(ExecError::Internal("unary `-` expects a number".into())),
        },
    })
}

fn eval_arithmetic(op: BinaryOp, l: Value, r: Value) -> ExecResult<Value> {
    let (l, r) = coerce_for_arithmetic(&l, &r).map_err(|e| ExecError::Internal(e.to_string()))?;
    match (l, r) {
        (Value::Integer(a), Value::Integer(b)) => integer_op(op, a, b).map(Value::Integer),
        (Value::BigInt(a), Value::BigInt(b)) => bigint_op(op, a, b).map(Value::BigInt),
        (Value::Real(a), Value::Real(b)) => real_op(op, a, b).map(Value::Real),
        _ => Err(ExecError::Internal("arithmetic on incompatible types".into())),
    }
}

fn integer_op(op: BinaryOp, a: i64, b: i64) -> ExecResult<i64> {
    let result = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        BinaryOp::Div if b != 0 => a.checked_div(b),
        BinaryOp::Mod if b != 0 => a.checked_rem(b),
        BinaryOp::Div | BinaryOp::Mod => return Err(ExecError::Internal("division by zero".into())),
        _ => unreachable!(),
    };
    result.ok_or_else(|| ExecError::Internal("integer overflow".into()))
}

fn bigint_op(op: BinaryOp, a: i128, b: i128) -> ExecResult<i128> {
    let result = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        BinaryOp::Div if b != 0 => a.checked_div(b),
        BinaryOp::Mod if b != 0 => a.checked_rem(b),
        BinaryOp::Div | BinaryOp::Mod => return Err(ExecError::Internal("division by zero".into())),
        _ => unreachable!(),
    };
    result.ok_or_else(|| ExecError::Internal("integer overflow".into()))
}

fn real_op(op: BinaryOp, a: f64, b: f64) -> ExecResult<f64> {
    Ok(match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Mod => a % b,
        _ => unreachable!(),
    })
}

fn eval_comparison(op: BinaryOp, l: &Value, r: &Value) -> ExecResult<Value> {
    let result = compare(l, r, None);
    if !result.is_comparable() {
        return Err(ExecError::Internal("comparison between incompatible types".into()));
    }
    Ok(Value::Boolean(match op {
        BinaryOp::Eq => matches!(result, CompareResult::Equal),
        BinaryOp::NotEq => !matches!(result, CompareResult::Equal),
        BinaryOp::Lt => matches!(result, CompareResult::Less),
        BinaryOp::LtEq => matches!(result, CompareResult::Less | CompareResult::Equal),
        BinaryOp::Gt => matches!(result, CompareResult::Greater),
        BinaryOp::GtEq => matches!(result, CompareResult::Greater | CompareResult::Equal),
        _ => unreachable!(),
    }))
}

fn eval_like(l: &Value, pattern: &Value, glob: bool) -> ExecResult<Value> {
    match (l.as_text(), pattern.as_text()) {
        (Some(text), Some(pattern)) => Ok(Value::Boolean(if glob {
            glob_match(pattern, text)
        } else {
            like_match(pattern, text)
        })),
        _ => Err(ExecError::Internal("LIKE/GLOB expect text operands".into())),
    }
}

/// SQL `LIKE`: `%` matches any run of characters, `_` matches exactly
/// one. Case-insensitive over ASCII, matching the common SQL default.
fn like_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.to_ascii_lowercase().chars().collect();
    let p: Vec<char> = p.into_iter().map(|c| c.to_ascii_lowercase()).collect();
    like_rec(&p, &t)
}

fn like_rec(p: &[char], t: &[char]) -> bool {
    match p.first() {
        None => t.is_empty(),
        Some('%') => like_rec(&p[1..], t) || (!t.is_empty() && like_rec(p, &t[1..])),
        Some('_') => !t.is_empty() && like_rec(&p[1..], &t[1..]),
        Some(c) => t.first() == Some(c) && like_rec(&p[1..], &t[1..]),
    }
}

/// `GLOB`: `*` matches any run, `?` matches one character, `[...]`
/// matches a bracketed character class; case-sensitive (SQL convention).
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    glob_rec(&p, &t)
}

fn glob_rec(p: &[char], t: &[char]) -> bool {
    match p.first() {
        None => t.is_empty(),
        Some('*') => glob_rec(&p[1..], t) || (!t.is_empty() && glob_rec(p, &t[1..])),
        Some('?') => !t.is_empty() && glob_rec(&p[1..], &t[1..]),
        Some('[') => match p.iter().position(|&c| c == ']') {
            Some(end) if !t.is_empty() && char_class_matches(&p[1..end], t[0]) => glob_rec(&p[end + 1..], &t[1..]),
            _ => false,
        },
        Some(c) => t.first() == Some(c) && glob_rec(&p[1..], &t[1..]),
    }
}

fn char_class_matches(class: &[char], c: char) -> bool {
    let (negate, class) = match class.first() {
        Some('^') => (true, &class[1..]),
        _ => (false, class),
    };
    let mut matched = false;
    let mut i = 0;
    while i < class.len() {
        if i + 2 < class.len() && class[i + 1] == '-' {
            if class[i] <= c && c <= class[i + 2] {
                matched = true;
            }
            i += 3;
        } else {
            if class[i] == c {
                matched = true;
            }
            i += 1;
        }
    }
    matched != negate
}

fn cast_value(v: Value, ty: &lucidb_sats::LogicalType) -> ExecResult<Value> {
    if v.is_null() {
        return Ok(Value::Null);
    }
    use lucidb_sats::PhysicalType::*;
    Ok(match (ty.physical, &v) {
        (Integer, Value::Integer(_)) => v,
        (Integer, Value::BigInt(i)) => Value::Integer(*i as i64),
        (Integer, Value::Real(r)) => Value::Integer(*r as i64),
        (Integer, Value::Text(s)) => Value::Integer(s.parse().map_err(|_| ExecError::Internal(format!("cannot cast `{s}` to INTEGER")))?),
        (BigInt, Value::Integer(i)) => Value::BigInt(*i as i128),
        (BigInt, v) if v.type_of() == Some(BigInt) => v.clone(),
        (Real, _) => Value::Real(v.as_f64().ok_or_else(|| ExecError::Internal("cannot cast to REAL".into()))?),
        (Text, Value::Text(_)) => v,
        (Text, other) => Value::Text(other.to_string()),
        (Boolean, Value::Boolean(_)) => v,
        _ if v.type_of() == Some(ty.physical) => v,
        _ => return Err(ExecError::Internal(format!("unsupported cast to {}", ty.physical))),
    })
}
