//! What a running statement shares across every operator: the catalog
//! (to resolve a `Scan`'s `table_id` to its qualified name), the module
//! registry (to open the table a `Scan`/mutation actually targets), the
//! function registry, and the statement's bound parameters.

use std::sync::Arc;

use lucidb_primitives::TableId;
use lucidb_sats::Value;
use lucidb_schema::Catalog;

use crate::cache::MaterializeCache;
use crate::deferred::DeferredChecks;
use crate::error::{ExecError, ExecResult};
use crate::functions::FunctionRegistry;
use crate::trace::TraceSink;
use crate::vtab::{Module, Table};

pub trait ModuleResolver: Send + Sync {
    fn resolve(&self, name: &str) -> ExecResult<Arc<dyn Module>>;
}

pub struct ExecCtx<'a> {
    pub catalog: &'a Catalog,
    pub modules: &'a dyn ModuleResolver,
    pub functions: &'a FunctionRegistry,
    pub params: &'a [Value],
    pub trace: Option<&'a TraceSink>,
    /// Deferred `CHECK` obligations raised while executing this statement.
    /// `None` for a statement the coordinator has decided can't defer
    /// anything (e.g. autocommit outside a transaction).
    pub deferred: Option<&'a DeferredChecks>,
    /// Backing store for `PhysicalPlan::Materialize`. `None` disables
    /// caching for this statement (every `Materialize` node just runs its
    /// input directly).
    pub materialize_cache: Option<&'a MaterializeCache>,
}

impl<'a> ExecCtx<'a> {
    pub async fn open_table(&self, table_id: TableId, module_name: &str) -> ExecResult<Box<dyn Table>> {
        let schema = self
            .catalog
            .table_by_id(table_id)
            .map_err(|e| ExecError::Internal(e.to_string()))?;
        let module = self.modules.resolve(module_name)?;
        module.connect(&schema.schema_name, &schema.table_name, "").await
    }
}
