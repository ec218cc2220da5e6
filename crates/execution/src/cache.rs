//! Per-statement materialization cache for `PhysicalPlan::Materialize`,
//! lowered 1:1 from `RelExpr::Cache` (`spec.md` §4.4's caching-insertion
//! optimizer rule): memoizes a subtree's row output keyed by its
//! fingerprint and the statement's bound parameters, so a correlated
//! subquery re-entered for many outer rows with the same effective
//! binding only actually runs once.
//!
//! `Value` has no `Hash` impl (a `Real` carries an `f64`), so the cache key
//! uses each parameter's `Display` rendering as a surrogate -- coarser than
//! hashing the value directly, but two parameter lists that print the same
//! text are the same binding for every type this engine has.

use std::collections::HashMap;
use std::sync::Mutex;

use lucidb_sats::{Row, Value};

fn param_key(params: &[Value]) -> Vec<String> {
    params.iter().map(ToString::to_string).collect()
}

#[derive(Default)]
pub struct MaterializeCache {
    entries: Mutex<HashMap<(u64, Vec<String>), Vec<Row>>>,
}

impl MaterializeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, fingerprint: u64, params: &[Value]) -> Option<Vec<Row>> {
        self.entries
            .lock()
            .expect("materialize cache lock poisoned")
            .get(&(fingerprint, param_key(params)))
            .cloned()
    }

    pub fn put(&self, fingerprint: u64, params: &[Value], rows: Vec<Row>) {
        self.entries
            .lock()
            .expect("materialize cache lock poisoned")
            .insert((fingerprint, param_key(params)), rows);
    }
}
