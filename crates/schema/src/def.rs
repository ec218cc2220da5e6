use lucidb_primitives::{ColId, ColList, CollationId, FunctionId, IndexId, ModuleId, TableId};
use lucidb_sats::{Collation, LogicalType, Value};
use std::collections::BTreeSet;

/// A column's default, attached at the schema level. Full expression
/// support belongs to `lucidb-expr` (out of this crate's dependency
/// direction -- the plan tree depends on the catalog, not the reverse),
/// so a non-literal default is carried as uninterpreted text and resolved
/// by the plan builder when it is actually needed for an INSERT.
#[derive(Clone, Debug, PartialEq)]
pub enum ColumnDefault {
    None,
    Literal(Value),
    Expr(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub col_id: ColId,
    pub ty: LogicalType,
    pub default: ColumnDefault,
}

impl ColumnDef {
    pub fn new(col_id: ColId, name: impl Into<String>, ty: LogicalType) -> Self {
        Self {
            name: name.into(),
            col_id,
            ty,
            default: ColumnDefault::None,
        }
    }

    pub fn with_default(mut self, default: ColumnDefault) -> Self {
        self.default = default;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexKind {
    Unique,
    NonUnique,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IndexDef {
    pub index_id: IndexId,
    pub name: String,
    pub table_id: TableId,
    pub columns: ColList,
    pub kind: IndexKind,
}

impl IndexDef {
    pub fn is_unique(&self) -> bool {
        matches!(self.kind, IndexKind::Unique)
    }
}

/// A mask of the DML operations a CHECK constraint applies to, per §3:
/// `{INSERT, UPDATE, DELETE}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CheckOpMask {
    pub on_insert: bool,
    pub on_update: bool,
    pub on_delete: bool,
}

impl CheckOpMask {
    pub const ALL: Self = Self {
        on_insert: true,
        on_update: true,
        on_delete: true,
    };
}

#[derive(Clone, Debug, PartialEq)]
pub struct CheckConstraintDef {
    pub name: String,
    /// Uninterpreted expression text -- see [`ColumnDefault::Expr`] for why
    /// this crate does not hold a parsed expression tree.
    pub expr: String,
    pub ops: CheckOpMask,
    pub deferrable: bool,
}

/// A table's schema (§3 "Table schema"): name, namespace, ordered columns,
/// primary-key ordering, secondary indexes, CHECK constraints, and the
/// virtual-table module that owns its storage.
#[derive(Clone, Debug, PartialEq)]
pub struct TableSchema {
    pub table_id: TableId,
    pub schema_name: String,
    pub table_name: String,
    pub columns: Vec<ColumnDef>,
    /// Empty means "all columns form the key", per §3.
    pub primary_key: ColList,
    pub indexes: Vec<IndexDef>,
    pub checks: Vec<CheckConstraintDef>,
    pub module_name: String,
    pub module_args: String,
}

impl TableSchema {
    /// The table's primary-key column ordering, defaulting to every
    /// column (in declared order) when none was declared explicitly.
    pub fn effective_primary_key(&self) -> ColList {
        if self.primary_key.is_empty() {
            self.columns.iter().map(|c| c.col_id).collect()
        } else {
            self.primary_key.clone()
        }
    }

    pub fn column(&self, col_id: ColId) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.col_id == col_id)
    }

    pub fn column_named(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema_name, self.table_name)
    }

    /// Checks applicable to a given DML operation, deferrable or not.
    pub fn checks_for(&self, op: CheckOpMask) -> impl Iterator<Item = &CheckConstraintDef> {
        self.checks.iter().filter(move |c| {
            (op.on_insert && c.ops.on_insert) || (op.on_update && c.ops.on_update) || (op.on_delete && c.ops.on_delete)
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FunctionArity {
    Fixed(u16),
    Variadic,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FunctionKind {
    Scalar,
    Aggregate,
    Window,
    TableValuedGenerator,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionDef {
    pub function_id: FunctionId,
    pub name: String,
    pub arity: FunctionArity,
    pub deterministic: bool,
    pub kind: FunctionKind,
    pub return_type: LogicalType,
}

#[derive(Clone, Debug)]
pub struct CollationDef {
    pub collation_id: CollationId,
    pub name: String,
    #[allow(dead_code)]
    pub comparator: Collation,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModuleDef {
    pub module_id: ModuleId,
    pub name: String,
    /// Table ids (if any) currently bound to this module.
    pub owned_tables: BTreeSet<TableId>,
}
