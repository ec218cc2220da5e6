use crate::def::{CollationDef, FunctionDef, IndexDef, ModuleDef, TableSchema};
use crate::error::{SchemaError, SchemaResult};
use crate::notifier::{ChangeNotifier, SchemaChangeEvent, SchemaChangeKind, SchemaObjectKind};
use indexmap::IndexMap;
use lucidb_primitives::{CollationId, FunctionId, IndexId, ModuleId, TableId};
use lucidb_sats::Collation;

/// A row of the `st_table` system catalog view (§2 supplement).
#[derive(Clone, Debug, PartialEq)]
pub struct StTableRow {
    pub table_id: TableId,
    pub name: String,
    pub module_name: String,
    pub column_count: usize,
}

/// A row of the `st_column` system catalog view.
#[derive(Clone, Debug, PartialEq)]
pub struct StColumnRow {
    pub table_id: TableId,
    pub table_name: String,
    pub column_name: String,
    pub position: usize,
    pub type_name: String,
    pub nullable: bool,
}

/// A row of the `st_index` system catalog view.
#[derive(Clone, Debug, PartialEq)]
pub struct StIndexRow {
    pub index_id: IndexId,
    pub table_id: TableId,
    pub name: String,
    pub unique: bool,
}

/// The schema catalog (§2): the registry of tables, indexes, functions,
/// collations and virtual-table modules known to a database, plus the
/// `ChangeNotifier` that publishes committed DDL as events.
///
/// Lookups are by qualified name (case-sensitive, matching identifier
/// semantics) with a stable id allocated at registration time; ids are
/// never reused within a catalog's lifetime, so a stale `TableId` held
/// across a DROP/CREATE cycle is detectable as "not found" rather than
/// silently resolving to the new object.
pub struct Catalog {
    tables: IndexMap<String, TableSchema>,
    tables_by_id: IndexMap<TableId, String>,
    indexes_by_id: IndexMap<IndexId, (TableId, String)>,
    functions: IndexMap<String, FunctionDef>,
    collations: IndexMap<String, CollationDef>,
    modules: IndexMap<String, ModuleDef>,
    next_table_id: u32,
    next_index_id: u32,
    next_function_id: u32,
    next_collation_id: u32,
    next_module_id: u32,
    notifier: ChangeNotifier,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    pub fn new() -> Self {
        let mut catalog = Self {
            tables: IndexMap::new(),
            tables_by_id: IndexMap::new(),
            indexes_by_id: IndexMap::new(),
            functions: IndexMap::new(),
            collations: IndexMap::new(),
            modules: IndexMap::new(),
            next_table_id: 0,
            next_index_id: 0,
            next_function_id: 0,
            next_collation_id: 0,
            next_module_id: 0,
            notifier: ChangeNotifier::new(),
        };
        catalog.register_builtin_collations();
        catalog
    }

    fn register_builtin_collations(&mut self) {
        for (name, comparator) in [
            ("BINARY", Collation::Binary),
            ("NOCASE", Collation::NoCase),
            ("RTRIM", Collation::RTrim),
        ] {
            let id = CollationId::new(self.next_collation_id);
            self.next_collation_id += 1;
            self.collations.insert(
                name.to_string(),
                CollationDef {
                    collation_id: id,
                    name: name.to_string(),
                    comparator,
                },
            );
        }
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    // -- tables ---------------------------------------------------------

    pub fn create_table(&mut self, mut schema: TableSchema) -> SchemaResult<TableId> {
        if schema.table_name.starts_with("st_") {
            return Err(SchemaError::ReservedName(schema.table_name.clone()));
        }
        let qualified = schema.qualified_name();
        if self.tables.contains_key(&qualified) {
            return Err(SchemaError::TableAlreadyExists(qualified));
        }
        let id = TableId::new(self.next_table_id);
        self.next_table_id += 1;
        schema.table_id = id;
        if let Some(module) = self.modules.get_mut(&schema.module_name) {
            module.owned_tables.insert(id);
        }
        self.tables_by_id.insert(id, qualified.clone());
        self.tables.insert(qualified.clone(), schema);
        self.notifier.publish(
            SchemaChangeEvent {
                kind: SchemaChangeKind::Create,
                object: SchemaObjectKind::Table,
                name: qualified,
            },
            &[id],
        );
        Ok(id)
    }

    pub fn drop_table(&mut self, qualified_name: &str) -> SchemaResult<()> {
        let schema = self
            .tables
            .shift_remove(qualified_name)
            .ok_or_else(|| SchemaError::TableNotFound(qualified_name.to_string()))?;
        self.tables_by_id.shift_remove(&schema.table_id);
        self.indexes_by_id.retain(|_, (table_id, _)| *table_id != schema.table_id);
        if let Some(module) = self.modules.get_mut(&schema.module_name) {
            module.owned_tables.remove(&schema.table_id);
        }
        self.notifier.publish(
            SchemaChangeEvent {
                kind: SchemaChangeKind::Drop,
                object: SchemaObjectKind::Table,
                name: qualified_name.to_string(),
            },
            &[schema.table_id],
        );
        Ok(())
    }

    pub fn table(&self, qualified_name: &str) -> SchemaResult<&TableSchema> {
        self.tables
            .get(qualified_name)
            .ok_or_else(|| SchemaError::TableNotFound(qualified_name.to_string()))
    }

    pub fn table_by_id(&self, id: TableId) -> SchemaResult<&TableSchema> {
        let name = self.tables_by_id.get(&id).ok_or(SchemaError::TableIdNotFound(id))?;
        self.tables.get(name).ok_or(SchemaError::TableIdNotFound(id))
    }

    pub fn table_mut(&mut self, qualified_name: &str) -> SchemaResult<&mut TableSchema> {
        self.tables
            .get_mut(qualified_name)
            .ok_or_else(|| SchemaError::TableNotFound(qualified_name.to_string()))
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    pub fn alter_table(&mut self, qualified_name: &str, f: impl FnOnce(&mut TableSchema)) -> SchemaResult<()> {
        let schema = self.table_mut(qualified_name)?;
        f(schema);
        let id = schema.table_id;
        self.notifier.publish(
            SchemaChangeEvent {
                kind: SchemaChangeKind::Alter,
                object: SchemaObjectKind::Table,
                name: qualified_name.to_string(),
            },
            &[id],
        );
        Ok(())
    }

    // -- indexes ----------------------------------------------------------

    pub fn create_index(&mut self, table_name: &str, mut index: IndexDef) -> SchemaResult<IndexId> {
        let schema = self.table_mut(table_name)?;
        if schema.indexes.iter().any(|i| i.name == index.name) {
            return Err(SchemaError::IndexAlreadyExists(index.name));
        }
        let id = IndexId::new(self.next_index_id);
        self.next_index_id += 1;
        index.index_id = id;
        index.table_id = schema.table_id;
        let table_id = schema.table_id;
        let index_name = index.name.clone();
        schema.indexes.push(index);
        self.indexes_by_id.insert(id, (table_id, index_name.clone()));
        self.notifier.publish(
            SchemaChangeEvent {
                kind: SchemaChangeKind::Create,
                object: SchemaObjectKind::Index,
                name: index_name,
            },
            &[table_id],
        );
        Ok(id)
    }

    pub fn drop_index(&mut self, index_id: IndexId) -> SchemaResult<()> {
        let (table_id, name) = self
            .indexes_by_id
            .shift_remove(&index_id)
            .ok_or(SchemaError::IndexIdNotFound(index_id))?;
        let table = self.table_by_id(table_id)?.qualified_name();
        let schema = self.table_mut(&table)?;
        schema.indexes.retain(|i| i.index_id != index_id);
        self.notifier.publish(
            SchemaChangeEvent {
                kind: SchemaChangeKind::Drop,
                object: SchemaObjectKind::Index,
                name,
            },
            &[table_id],
        );
        Ok(())
    }

    // -- functions --------------------------------------------------------

    pub fn register_function(&mut self, mut def: FunctionDef) -> SchemaResult<FunctionId> {
        if self.functions.contains_key(&def.name) {
            return Err(SchemaError::FunctionAlreadyExists(def.name));
        }
        let id = FunctionId::new(self.next_function_id);
        self.next_function_id += 1;
        def.function_id = id;
        let name = def.name.clone();
        self.functions.insert(name.clone(), def);
        self.notifier.publish(
            SchemaChangeEvent {
                kind: SchemaChangeKind::Create,
                object: SchemaObjectKind::Function,
                name,
            },
            &[],
        );
        Ok(id)
    }

    pub fn function(&self, name: &str) -> SchemaResult<&FunctionDef> {
        self.functions.get(name).ok_or_else(|| SchemaError::FunctionNotFound(name.to_string()))
    }

    pub fn drop_function(&mut self, name: &str) -> SchemaResult<()> {
        self.functions
            .shift_remove(name)
            .ok_or_else(|| SchemaError::FunctionNotFound(name.to_string()))?;
        self.notifier.publish(
            SchemaChangeEvent {
                kind: SchemaChangeKind::Drop,
                object: SchemaObjectKind::Function,
                name: name.to_string(),
            },
            &[],
        );
        Ok(())
    }

    // -- collations -------------------------------------------------------

    /// Registers a custom collation, per the SUPPLEMENTED "collations as
    /// catalog entries" behavior: the three built-ins (`BINARY`, `NOCASE`,
    /// `RTRIM`) are seeded in [`Catalog::new`] and cannot be re-registered.
    pub fn register_collation(&mut self, name: impl Into<String>, comparator: Collation) -> SchemaResult<CollationId> {
        let name = name.into();
        if self.collations.contains_key(&name) {
            return Err(SchemaError::CollationAlreadyExists(name));
        }
        let id = CollationId::new(self.next_collation_id);
        self.next_collation_id += 1;
        self.collations.insert(
            name.clone(),
            CollationDef {
                collation_id: id,
                name: name.clone(),
                comparator,
            },
        );
        self.notifier.publish(
            SchemaChangeEvent {
                kind: SchemaChangeKind::Create,
                object: SchemaObjectKind::Collation,
                name,
            },
            &[],
        );
        Ok(id)
    }

    pub fn collation(&self, name: &str) -> SchemaResult<&CollationDef> {
        self.collations.get(name).ok_or_else(|| SchemaError::CollationNotFound(name.to_string()))
    }

    // -- modules ------------------------------------------------------------

    pub fn register_module(&mut self, name: impl Into<String>) -> SchemaResult<ModuleId> {
        let name = name.into();
        if self.modules.contains_key(&name) {
            return Err(SchemaError::ModuleAlreadyExists(name));
        }
        let id = ModuleId::new(self.next_module_id);
        self.next_module_id += 1;
        self.modules.insert(
            name.clone(),
            ModuleDef {
                module_id: id,
                name: name.clone(),
                owned_tables: Default::default(),
            },
        );
        self.notifier.publish(
            SchemaChangeEvent {
                kind: SchemaChangeKind::Create,
                object: SchemaObjectKind::Module,
                name,
            },
            &[],
        );
        Ok(id)
    }

    pub fn module(&self, name: &str) -> SchemaResult<&ModuleDef> {
        self.modules.get(name).ok_or_else(|| SchemaError::ModuleNotFound(name.to_string()))
    }

    pub fn drop_module(&mut self, name: &str) -> SchemaResult<()> {
        let module = self.modules.get(name).ok_or_else(|| SchemaError::ModuleNotFound(name.to_string()))?;
        if !module.owned_tables.is_empty() {
            return Err(SchemaError::ModuleInUse(name.to_string(), module.owned_tables.len()));
        }
        self.modules.shift_remove(name);
        self.notifier.publish(
            SchemaChangeEvent {
                kind: SchemaChangeKind::Drop,
                object: SchemaObjectKind::Module,
                name: name.to_string(),
            },
            &[],
        );
        Ok(())
    }

    // -- system catalog views ---------------------------------------------

    pub fn st_table(&self) -> Vec<StTableRow> {
        self.tables
            .values()
            .map(|t| StTableRow {
                table_id: t.table_id,
                name: t.qualified_name(),
                module_name: t.module_name.clone(),
                column_count: t.columns.len(),
            })
            .collect()
    }

    pub fn st_column(&self) -> Vec<StColumnRow> {
        self.tables
            .values()
            .flat_map(|t| {
                t.columns.iter().enumerate().map(move |(position, col)| StColumnRow {
                    table_id: t.table_id,
                    table_name: t.qualified_name(),
                    column_name: col.name.clone(),
                    position,
                    type_name: col.ty.to_string(),
                    nullable: col.ty.nullable,
                })
            })
            .collect()
    }

    pub fn st_index(&self) -> Vec<StIndexRow> {
        self.tables
            .values()
            .flat_map(|t| {
                t.indexes.iter().map(move |idx| StIndexRow {
                    index_id: idx.index_id,
                    table_id: t.table_id,
                    name: idx.name.clone(),
                    unique: idx.is_unique(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::def::ColumnDef;
    use lucidb_sats::{LogicalType, PhysicalType};

    fn sample_table(name: &str) -> TableSchema {
        TableSchema {
            table_id: TableId::new(0),
            schema_name: "main".into(),
            table_name: name.into(),
            columns: vec![ColumnDef::new(0u16.into(), "id", LogicalType::not_null(PhysicalType::Integer))],
            primary_key: Default::default(),
            indexes: vec![],
            checks: vec![],
            module_name: "memory".into(),
            module_args: String::new(),
        }
    }

    #[test]
    fn create_then_drop_table_round_trips() {
        let mut catalog = Catalog::new();
        let id = catalog.create_table(sample_table("t1")).unwrap();
        assert_eq!(catalog.table_by_id(id).unwrap().table_name, "t1");
        catalog.drop_table("main.t1").unwrap();
        assert!(catalog.table("main.t1").is_err());
        assert!(catalog.table_by_id(id).is_err());
    }

    #[test]
    fn duplicate_table_name_is_rejected() {
        let mut catalog = Catalog::new();
        catalog.create_table(sample_table("t1")).unwrap();
        let err = catalog.create_table(sample_table("t1")).unwrap_err();
        assert_eq!(err, SchemaError::TableAlreadyExists("main.t1".into()));
    }

    #[test]
    fn builtin_collations_are_preseeded() {
        let catalog = Catalog::new();
        assert!(catalog.collation("BINARY").is_ok());
        assert!(catalog.collation("NOCASE").is_ok());
        assert!(catalog.collation("RTRIM").is_ok());
    }

    #[test]
    fn module_in_use_blocks_drop() {
        let mut catalog = Catalog::new();
        catalog.register_module("memory").unwrap();
        catalog.create_table(sample_table("t1")).unwrap();
        assert!(matches!(catalog.drop_module("memory"), Err(SchemaError::ModuleInUse(_, 1))));
        catalog.drop_table("main.t1").unwrap();
        assert!(catalog.drop_module("memory").is_ok());
    }

    #[test]
    fn st_prefixed_table_names_are_rejected() {
        let mut catalog = Catalog::new();
        let err = catalog.create_table(sample_table("st_widgets")).unwrap_err();
        assert_eq!(err, SchemaError::ReservedName("st_widgets".into()));
    }

    #[test]
    fn st_table_and_st_column_reflect_registered_tables() {
        let mut catalog = Catalog::new();
        catalog.create_table(sample_table("t1")).unwrap();
        let st_table = catalog.st_table();
        assert_eq!(st_table.len(), 1);
        assert_eq!(st_table[0].column_count, 1);
        let st_column = catalog.st_column();
        assert_eq!(st_column.len(), 1);
        assert_eq!(st_column[0].column_name, "id");
    }
}
