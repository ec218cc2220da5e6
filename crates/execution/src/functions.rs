//! Scalar function dispatch. `ScalarExpr::FunctionCall` names a function
//! by string, resolved against a [`FunctionRegistry`] at evaluation time;
//! `lucidb-core`'s `database.registerFunction` (§6) adds to the same
//! registry the built-ins below are seeded into.

use std::collections::HashMap;
use std::sync::Arc;

use lucidb_sats::Value;

use crate::error::{ExecError, ExecResult};

pub type ScalarFn = Arc<dyn Fn(&[Value]) -> ExecResult<Value> + Send + Sync>;

#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, ScalarFn>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry seeded with the small built-in library every statement
    /// can call without an explicit `registerFunction`.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register("coalesce", |args| Ok(args.iter().find(|v| !v.is_null()).cloned().unwrap_or(Value::Null)));
        reg.register("lower", |args| text_fn(args, str::to_lowercase));
        reg.register("upper", |args| text_fn(args, str::to_uppercase));
        reg.register("length", |args| match args.first() {
            Some(Value::Text(s)) => Ok(Value::Integer(s.chars().count() as i64)),
            Some(Value::Null) | None => Ok(Value::Null),
            Some(_) => Err(ExecError::Internal("length() expects text".into())),
        });
        reg.register("abs", |args| match args.first() {
            Some(Value::Integer(i)) => Ok(Value::Integer(i.abs())),
            Some(Value::BigInt(i)) => Ok(Value::BigInt(i.abs())),
            Some(Value::Real(r)) => Ok(Value::Real(r.abs())),
            Some(Value::Null) | None => Ok(Value::Null),
            Some(_) => Err(ExecError::Internal("abs() expects a number".into())),
        });
        reg
    }

    pub fn register(&mut self, name: &str, f: impl Fn(&[Value]) -> ExecResult<Value> + Send + Sync + 'static) {
        self.functions.insert(name.to_ascii_lowercase(), Arc::new(f));
    }

    pub fn call(&self, name: &str, args: &[Value]) -> ExecResult<Value> {
        match self.functions.get(&name.to_ascii_lowercase()) {
            Some(f) => f(args),
            None => Err(ExecError::Internal(format!("unknown function `{name}`"))),
        }
    }
}

fn text_fn(args: &[Value], f: impl Fn(&str) -> String) -> ExecResult<Value> {
    match args.first() {
        Some(Value::Text(s)) => Ok(Value::Text(f(s))),
        Some(Value::Null) | None => Ok(Value::Null),
        Some(_) => Err(ExecError::Internal("expected text argument".into())),
    }
}
