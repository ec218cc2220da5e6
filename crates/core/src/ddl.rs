//! `CREATE TABLE`/`DROP TABLE` handling (`spec.md` §3, §4.3): these never
//! reach `PlanBuilder::build_stmt` (it rejects them outright, see its own
//! doc comment) so `Database` resolves them against the catalog directly
//! here, and records each table's CHECK constraints in a [`CheckRegistry`]
//! the plan builder consults when it later builds an INSERT/UPDATE/DELETE
//! against that table.

use std::collections::HashMap;

use lucidb_expr::checks::{CheckProvider, CheckTemplate};
use lucidb_expr::rel::DmlOp;
use lucidb_primitives::TableId;
use lucidb_sats::{LogicalType, PhysicalType};
use lucidb_schema::{Catalog, CheckConstraintDef, CheckOpMask, ColumnDef, SchemaResult, TableSchema};
use lucidb_sql_ast as ast;

use crate::config::ColumnNullability;

/// Maps a `CREATE TABLE` column's declared type name to the engine's
/// logical type, honoring the column's own `NOT NULL`/`NULL` qualifier.
/// Mirrors `lucidb-expr`'s own private `parse_type_name` (that one always
/// returns nullable, since it has no column-level nullability to honor).
fn resolve_type(type_name: &str, nullable: bool) -> LogicalType {
    let physical = match type_name.to_ascii_uppercase().as_str() {
        "INTEGER" | "INT" => PhysicalType::Integer,
        "BIGINT" => PhysicalType::BigInt,
        "REAL" | "FLOAT" | "DOUBLE" => PhysicalType::Real,
        "BLOB" => PhysicalType::Blob,
        "BOOLEAN" | "BOOL" => PhysicalType::Boolean,
        "DATE" | "TIME" | "DATETIME" | "TIMESTAMP" => PhysicalType::Temporal,
        "JSON" => PhysicalType::Json,
        _ => PhysicalType::Text,
    };
    LogicalType::new(physical, nullable)
}

/// Per-table CHECK constraints, keyed by the table they were declared on,
/// carrying the original parsed `Expr` since `lucidb-schema`'s own
/// `CheckConstraintDef` only keeps uninterpreted text (see its doc
/// comment). This is the `CheckProvider` `PlanBuilder::with_checks` is
/// built against.
#[derive(Default)]
pub struct CheckRegistry {
    by_table: HashMap<TableId, Vec<CheckTemplate>>,
}

impl CheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_checks(&mut self, table_id: TableId, checks: Vec<CheckTemplate>) {
        self.by_table.insert(table_id, checks);
    }

    pub fn drop_table(&mut self, table_id: TableId) {
        self.by_table.remove(&table_id);
    }
}

impl CheckProvider for CheckRegistry {
    fn checks_for(&self, table_id: TableId, _op: DmlOp) -> Vec<CheckTemplate> {
        self.by_table.get(&table_id).cloned().unwrap_or_default()
    }
}

/// Builds the `lucidb-schema::TableSchema` a `CREATE TABLE` AST node
/// describes, and registers its CHECK constraints (both user-declared and
/// the NOT NULL checks synthesized per non-nullable column) into `checks`.
///
/// Returns the new table's id.
pub fn create_table(
    catalog: &mut Catalog,
    checks: &mut CheckRegistry,
    stmt: &ast::CreateTableStmt,
    _default_nullability: ColumnNullability,
    default_module: &str,
    default_module_args: &str,
) -> SchemaResult<TableId> {
    // `ColumnSpec::nullable` is already a concrete bool -- with no parser
    // of its own this crate never sees a column whose nullability was left
    // unspecified, so `DatabaseConfig::default_column_nullability` has
    // nothing to resolve here (see `DESIGN.md`'s Open Question on this).
    let module_name = stmt.module_name.clone().unwrap_or_else(|| default_module.to_string());
    let module_args = stmt.module_args.clone().unwrap_or_else(|| default_module_args.to_string());

    let columns: Vec<ColumnDef> = stmt
        .columns
        .iter()
        .enumerate()
        .map(|(i, col)| ColumnDef::new(i as u16, col.name.clone(), resolve_type(&col.type_name, col.nullable)))
        .collect();

    let primary_key = stmt
        .primary_key
        .iter()
        .filter_map(|name| columns.iter().find(|c| &c.name == name).map(|c| c.col_id))
        .collect();

    let schema = TableSchema {
        table_id: TableId::new(0),
        schema_name: stmt.schema.clone().unwrap_or_else(|| "main".to_string()),
        table_name: stmt.name.clone(),
        columns,
        primary_key,
        indexes: Vec::new(),
        checks: stmt
            .checks
            .iter()
            .enumerate()
            .map(|(i, check)| CheckConstraintDef {
                name: check.name.clone().unwrap_or_else(|| format!("{}_check_{i}", stmt.name)),
                expr: format!("{:?}", check.expr),
                ops: CheckOpMask::ALL,
                deferrable: check.deferrable,
            })
            .collect(),
        module_name,
        module_args,
    };

    let table_id = catalog.create_table(schema)?;

    // NOT NULL enforcement is synthesized by `PlanBuilder` itself from each
    // column's `LogicalType.nullable` (its own `not_null_check`/
    // `not_null_check_expr`), so only user-declared CHECKs go here.
    let templates: Vec<CheckTemplate> = stmt
        .checks
        .iter()
        .enumerate()
        .map(|(i, check)| CheckTemplate {
            constraint_name: check.name.clone().unwrap_or_else(|| format!("{}_check_{i}", stmt.name)),
            expr: check.expr.clone(),
            deferrable: check.deferrable,
        })
        .collect();

    checks.set_checks(table_id, templates);
    Ok(table_id)
}

pub fn drop_table(catalog: &mut Catalog, checks: &mut CheckRegistry, qualified_name: &str) -> SchemaResult<()> {
    let table_id = catalog.table(qualified_name)?.table_id;
    catalog.drop_table(qualified_name)?;
    checks.drop_table(table_id);
    Ok(())
}
