//! The live virtual-table module registry (`spec.md` §4.6, §6
//! `registerModule`): resolves the module name a `Scan`/mutation node
//! carries to the running [`Module`] instance, with `lucidb-datastore`'s
//! [`MemoryModule`] preregistered under `"memory"`.

use std::collections::HashMap;
use std::sync::Arc;

use lucidb_datastore::MemoryModule;
use lucidb_execution::{ExecError, ExecResult, Module, ModuleResolver};

pub struct ModuleRegistry {
    modules: HashMap<String, Arc<dyn Module>>,
}

impl ModuleRegistry {
    pub fn with_memory_module(memory: MemoryModule) -> Self {
        let mut modules: HashMap<String, Arc<dyn Module>> = HashMap::new();
        modules.insert("memory".to_string(), Arc::new(memory));
        Self { modules }
    }

    /// Registers a host-supplied module, replacing any previous module of
    /// the same name. Returns the name's previous occupant, if any.
    pub fn register(&mut self, module: Arc<dyn Module>) -> Option<Arc<dyn Module>> {
        self.modules.insert(module.name().to_string(), module)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }
}

impl ModuleResolver for ModuleRegistry {
    fn resolve(&self, name: &str) -> ExecResult<Arc<dyn Module>> {
        self.modules
            .get(name)
            .cloned()
            .ok_or_else(|| ExecError::Internal(format!("no module registered under `{name}`")))
    }
}
