//! Resolves a table's CHECK-constraint obligations into the AST shape the
//! plan builder can build against the *current* statement's scope
//! (`spec.md` §4.3's "Constraint-check node", §4.7's deferred-check
//! scenario).
//!
//! `lucidb-schema`'s `CheckConstraintDef` keeps a constraint's expression
//! as uninterpreted text -- the schema crate has no scalar-expression
//! dependency, so it cannot carry a `ScalarExpr` -- and an `AttributeId`
//! is only ever meaningful within the statement that allocated it, so a
//! pre-built `ScalarExpr` handed back here couldn't reference the right
//! attributes anyway. Whatever owns both the catalog and the original
//! DDL AST (the host wiring the planner up, i.e. `lucidb-core`) answers
//! with the parsed `Expr` it already had in hand at `CREATE TABLE` time,
//! and the builder resolves it the same way it resolves everything else,
//! mirroring `CapabilityProvider`'s planning-time indirection.

use lucidb_primitives::TableId;
use lucidb_sql_ast::Expr;

use crate::rel::DmlOp;

/// One CHECK constraint, named and not yet bound to any particular
/// statement's attribute ids.
#[derive(Clone, Debug)]
pub struct CheckTemplate {
    pub constraint_name: String,
    pub expr: Expr,
    /// Whether the catalog has this constraint marked deferrable.
    /// Subquery-bearing checks are always deferred regardless of this
    /// flag -- the builder applies that rule once the expression is built.
    pub deferrable: bool,
}

/// Resolves which CHECK constraints apply to a table's insert/update/
/// delete, supplying each as a [`CheckTemplate`] for the builder to
/// resolve against the live statement scope.
pub trait CheckProvider {
    fn checks_for(&self, table_id: TableId, op: DmlOp) -> Vec<CheckTemplate>;
}

/// A [`CheckProvider`] with no declared constraints, the default for a
/// bare [`crate::builder::PlanBuilder`] and for tests that don't exercise
/// CHECK enforcement.
pub struct NoChecks;

impl CheckProvider for NoChecks {
    fn checks_for(&self, _table_id: TableId, _op: DmlOp) -> Vec<CheckTemplate> {
        Vec::new()
    }
}
