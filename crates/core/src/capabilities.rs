//! Planning-time pushdown capability resolution (`spec.md` §4.4, §6):
//! `lucidb-planner`'s retrieve-growth rule asks a synchronous
//! `CapabilityProvider` what a table's module can accept, separate from
//! the async `Module::get_best_access_plan` a vtab answers with at
//! execution time (that one can consult live statistics; this one can't
//! afford to await anything mid-optimization).
//!
//! `Database` registers each table's module name as it's created and
//! looks the capability up from a small per-module table, defaulting any
//! module it doesn't recognize to [`VtabCapabilities::none`] -- the same
//! conservative stance `NoPushdown` takes, just keyed by module instead of
//! applied blanket.

use std::collections::HashMap;

use lucidb_expr::capabilities::{CapabilityProvider, VtabCapabilities};
use lucidb_primitives::TableId;

#[derive(Default)]
pub struct CapabilityRegistry {
    table_module: HashMap<TableId, String>,
    module_caps: HashMap<String, VtabCapabilities>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        let mut module_caps = HashMap::new();
        module_caps.insert("memory".to_string(), VtabCapabilities::all(None));
        Self {
            table_module: HashMap::new(),
            module_caps,
        }
    }

    pub fn register_table(&mut self, table_id: TableId, module_name: impl Into<String>) {
        self.table_module.insert(table_id, module_name.into());
    }

    pub fn drop_table(&mut self, table_id: TableId) {
        self.table_module.remove(&table_id);
    }

    /// Declares (or replaces) the pushdown stance reported for every table
    /// backed by `module_name`; used when a host registers a custom
    /// module that can in fact accept pushed-down predicates.
    pub fn register_module_capabilities(&mut self, module_name: impl Into<String>, caps: VtabCapabilities) {
        self.module_caps.insert(module_name.into(), caps);
    }
}

impl CapabilityProvider for CapabilityRegistry {
    fn capabilities(&self, table_id: TableId) -> VtabCapabilities {
        self.table_module
            .get(&table_id)
            .and_then(|module| self.module_caps.get(module))
            .cloned()
            .unwrap_or_else(VtabCapabilities::none)
    }
}
