//! Constant folding (`spec.md` §4.4): deterministic expressions over
//! constants are precomputed, and NULL-propagating operators collapse
//! when an operand is a known-NULL literal.

use lucidb_expr::{BinaryOp, RelExpr, ScalarExpr, UnaryOp};
use lucidb_sats::{compare, coerce_for_arithmetic, CompareResult, Value};

use crate::node_scalars::map_node_scalars;
use crate::rule::{Rule, RuleContext};

pub struct ConstantFoldingRule;

impl Rule for ConstantFoldingRule {
    fn id(&self) -> u32 {
        20
    }

    fn name(&self) -> &'static str {
        "constant_folding"
    }

    fn rewrite(&self, node: &RelExpr, _ctx: &RuleContext) -> Option<RelExpr> {
        let folded = map_node_scalars(node.clone(), &mut fold);
        if &folded == node {
            None
        } else {
            Some(folded)
        }
    }
}

fn fold(expr: ScalarExpr) -> ScalarExpr {
    match expr {
        ScalarExpr::Unary { id, op, expr, ty } => {
            let expr = Box::new(fold(*expr));
            if let ScalarExpr::Literal { value, .. } = expr.as_ref() {
                if let Some(folded) = fold_unary(op, value) {
                    return ScalarExpr::Literal { id, value: folded, ty };
                }
            }
            ScalarExpr::Unary { id, op, expr, ty }
        }
        ScalarExpr::Binary { id, op, lhs, rhs, ty } => {
            let lhs = Box::new(fold(*lhs));
            let rhs = Box::new(fold(*rhs));
            if let (ScalarExpr::Literal { value: lv, .. }, ScalarExpr::Literal { value: rv, .. }) =
                (lhs.as_ref(), rhs.as_ref())
            {
                if let Some(folded) = fold_binary(op, lv, rv) {
                    return ScalarExpr::Literal { id, value: folded, ty };
                }
            }
            ScalarExpr::Binary { id, op, lhs, rhs, ty }
        }
        ScalarExpr::Cast { id, expr, ty } => ScalarExpr::Cast {
            id,
            expr: Box::new(fold(*expr)),
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
            operand: operand.map(|o| Box::new(fold(*o))),
            branches: branches.into_iter().map(|(w, t)| (fold(w), fold(t))).collect(),
            else_branch: else_branch.map(|e| Box::new(fold(*e))),
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
            args: args.into_iter().map(fold).collect(),
            deterministic,
            ty,
        },
        ScalarExpr::WindowCall { id, name, args, frame, ty } => ScalarExpr::WindowCall {
            id,
            name,
            args: args.into_iter().map(fold).collect(),
            frame,
            ty,
        },
        ScalarExpr::In { id, expr, list, negated } => ScalarExpr::In {
            id,
            expr: Box::new(fold(*expr)),
            list: match list {
                lucidb_expr::InList::Values(vs) => lucidb_expr::InList::Values(vs.into_iter().map(fold).collect()),
                other @ lucidb_expr::InList::Subquery(_) => other,
            },
            negated,
        },
        leaf @ (ScalarExpr::Literal { .. }
        | ScalarExpr::ColumnRef { .. }
        | ScalarExpr::Parameter { .. }
        | ScalarExpr::ScalarSubquery { .. }
        | ScalarExpr::Exists { .. }) => leaf,
    }
}

fn fold_unary(op: UnaryOp, value: &Value) -> Option<Value> {
    match op {
        UnaryOp::IsNull => Some(Value::Boolean(value.is_null())),
        UnaryOp::IsNotNull => Some(Value::Boolean(!value.is_null())),
        UnaryOp::Not => match value {
            Value::Null => Some(Value::Null),
            Value::Boolean(b) => Some(Value::Boolean(!b)),
            _ => None,
        },
        UnaryOp::Neg => match value {
            Value::Null => Some(Value::Null),
            Value::Integer(i) => i.checked_neg().map(Value::Integer),
            Value::BigInt(i) => i.checked_neg().map(Value::BigInt),
            Value::Real(r) => Some(Value::Real(-r)),
            _ => None,
        },
    }
}

fn fold_binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Option<Value> {
    use BinaryOp::*;
    // NULL propagates through every operator except the boolean
    // short-circuits, which have their own three-valued-logic rules.
    if matches!(op, And) {
        if is_false(lhs) || is_false(rhs) {
            return Some(Value::Boolean(false));
        }
        if lhs.is_null() || rhs.is_null() {
            return if matches!((lhs, rhs), (Value::Boolean(_) | Value::Null, Value::Boolean(_) | Value::Null)) {
                Some(Value::Null)
            } else {
                None
            };
        }
    }
    if matches!(op, Or) {
        if is_true(lhs) || is_true(rhs) {
            return Some(Value::Boolean(true));
        }
        if lhs.is_null() || rhs.is_null() {
            return if matches!((lhs, rhs), (Value::Boolean(_) | Value::Null, Value::Boolean(_) | Value::Null)) {
                Some(Value::Null)
            } else {
                None
            };
        }
    }
    if lhs.is_null() || rhs.is_null() {
        return Some(Value::Null);
    }
    match op {
        Add | Sub | Mul | Div | Mod => fold_arithmetic(op, lhs, rhs),
        Eq | NotEq | Lt | LtEq | Gt | GtEq => fold_comparison(op, lhs, rhs),
        And => Some(Value::Boolean(as_bool(lhs)? && as_bool(rhs)?)),
        Or => Some(Value::Boolean(as_bool(lhs)? || as_bool(rhs)?)),
        Like | Glob | Concat => None,
    }
}

fn is_true(v: &Value) -> bool {
    matches!(v, Value::Boolean(true))
}

fn is_false(v: &Value) -> bool {
    matches!(v, Value::Boolean(false))
}

fn as_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Boolean(b) => Some(*b),
        _ => None,
    }
}

fn fold_arithmetic(op: BinaryOp, lhs: &Value, rhs: &Value) -> Option<Value> {
    let (l, r) = coerce_for_arithmetic(lhs, rhs).ok()?;
    use BinaryOp::*;
    match (l, r) {
        (Value::Integer(a), Value::Integer(b)) => match op {
            Add => a.checked_add(b).map(Value::Integer),
            Sub => a.checked_sub(b).map(Value::Integer),
            Mul => a.checked_mul(b).map(Value::Integer),
            Div if b != 0 => a.checked_div(b).map(Value::Integer),
            Mod if b != 0 => a.checked_rem(b).map(Value::Integer),
            _ => None,
        },
        (Value::BigInt(a), Value::BigInt(b)) => match op {
            Add => a.checked_add(b).map(Value::BigInt),
            Sub => a.checked_sub(b).map(Value::BigInt),
            Mul => a.checked_mul(b).map(Value::BigInt),
            Div if b != 0 => a.checked_div(b).map(Value::BigInt),
            Mod if b != 0 => a.checked_rem(b).map(Value::BigInt),
            _ => None,
        },
        (Value::Real(a), Value::Real(b)) => Some(Value::Real(match op {
            Add => a + b,
            Sub => a - b,
            Mul => a * b,
            Div => a / b,
            Mod => a % b,
            _ => return None,
        })),
        _ => None,
    }
}

fn fold_comparison(op: BinaryOp, lhs: &Value, rhs: &Value) -> Option<Value> {
    let result = compare(lhs, rhs, None);
    if !result.is_comparable() {
        return None;
    }
    use BinaryOp::*;
    Some(Value::Boolean(match op {
        Eq => matches!(result, CompareResult::Equal),
        NotEq => !matches!(result, CompareResult::Equal),
        Lt => matches!(result, CompareResult::Less),
        LtEq => matches!(result, CompareResult::Less | CompareResult::Equal),
        Gt => matches!(result, CompareResult::Greater),
        GtEq => matches!(result, CompareResult::Greater | CompareResult::Equal),
        _ => return None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lucidb_primitives::AttributeIdGen;
    use lucidb_sats::{LogicalType, PhysicalType};
    use lucidb_schema::Catalog;
    use lucidb_expr::NoPushdown;

    fn lit(gen: &mut AttributeIdGen, value: Value, physical: PhysicalType) -> ScalarExpr {
        ScalarExpr::Literal {
            id: gen.next(),
            value,
            ty: LogicalType::not_null(physical),
        }
    }

    #[test]
    fn folds_deterministic_arithmetic() {
        let mut gen = AttributeIdGen::new();
        let expr = ScalarExpr::Binary {
            id: gen.next(),
            op: BinaryOp::Add,
            lhs: Box::new(lit(&mut gen, Value::Integer(2), PhysicalType::Integer)),
            rhs: Box::new(lit(&mut gen, Value::Integer(3), PhysicalType::Integer)),
            ty: LogicalType::not_null(PhysicalType::Integer),
        };
        let node = RelExpr::Filter {
            input: Box::new(RelExpr::Values {
                rows: vec![],
                attrs: vec![],
                props: Default::default(),
            }),
            predicate: expr,
            attrs: vec![],
            props: Default::default(),
        };
        let catalog = Catalog::new();
        let caps = NoPushdown;
        let ctx = RuleContext {
            catalog: &catalog,
            capabilities: &caps,
        };
        let rewritten = ConstantFoldingRule.rewrite(&node, &ctx).expect("should fold");
        let RelExpr::Filter { predicate, .. } = rewritten else {
            panic!("expected Filter");
        };
        assert_eq!(predicate, ScalarExpr::Literal {
            id: predicate.id(),
            value: Value::Integer(5),
            ty: LogicalType::not_null(PhysicalType::Integer),
        });
    }

    #[test]
    fn and_short_circuits_on_false_even_with_null_operand() {
        let mut gen = AttributeIdGen::new();
        let left = lit(&mut gen, Value::Boolean(false), PhysicalType::Boolean);
        let right = lit(&mut gen, Value::Null, PhysicalType::Boolean);
        assert_eq!(fold_binary(BinaryOp::And, &left_value(&left), &left_value(&right)), Some(Value::Boolean(false)));
    }

    fn left_value(expr: &ScalarExpr) -> Value {
        match expr {
            ScalarExpr::Literal { value, .. } => value.clone(),
            _ => unreachable!(),
        }
    }
}
