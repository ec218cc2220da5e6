//! `Database`, the public entry point (`spec.md` §6): owns the catalog,
//! the transaction coordinator, the module and function registries, and
//! fans committed mutations and schema changes out to whatever listeners
//! a host registered.
//!
//! A single `tokio::sync::Mutex` guards every piece of mutable state a
//! statement touches -- catalog, coordinator, registries -- the way the
//! teacher's own `RelationalDB` wraps its datastore in one lock a
//! transaction holds for its duration rather than spreading finer-grained
//! locks across pieces that must change together.

use std::collections::HashSet;
use std::sync::Arc;

use lucidb_execution::{DataChangeEvent, ExecCtx, FunctionRegistry, MaterializeCache, Table as VtabTable, TraceSink};
use lucidb_expr::PlanBuilder;
use lucidb_physical_plan::lower;
use lucidb_planner::{Optimizer, RuleContext};
use lucidb_primitives::TableId;
use lucidb_sats::{Collation, LogicalType, PhysicalType, Row, Value};
use lucidb_schema::{Catalog, FunctionArity, FunctionDef, FunctionKind, SchemaChangeEvent, SubscriptionHandle};
use lucidb_sql_ast as ast;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex;

use crate::capabilities::CapabilityRegistry;
use crate::config::DatabaseConfig;
use crate::ddl;
use crate::ddl::CheckRegistry;
use crate::error::{Error, Result};
use crate::explain::{self, PlanDescription};
use crate::modules::ModuleRegistry;
use crate::statement::Statement;

/// Forwards every committed mutation to whatever closures a host has
/// registered via [`Database::on_data_change`]. Exists outside
/// `DatabaseInner`'s lock since `lucidb_datastore::MemoryModule` needs a
/// `DataChangeSink` handle before a `Database` finishes constructing
/// itself (see that crate's own doc comment on the chicken-and-egg here).
pub(crate) struct DataChangeDispatcher {
    listeners: SyncMutex<Vec<Arc<dyn Fn(&DataChangeEvent) + Send + Sync>>>,
}

impl DataChangeDispatcher {
    fn new() -> Self {
        Self {
            listeners: SyncMutex::new(Vec::new()),
        }
    }

    fn register(&self, callback: Arc<dyn Fn(&DataChangeEvent) + Send + Sync>) {
        self.listeners.lock().push(callback);
    }
}

impl lucidb_datastore::DataChangeSink for DataChangeDispatcher {
    fn on_commit(&self, event: DataChangeEvent) {
        for listener in self.listeners.lock().iter() {
            listener(&event);
        }
    }
}

pub(crate) struct DatabaseInner {
    pub catalog: Catalog,
    pub coordinator: lucidb_datastore::TransactionCoordinator,
    pub modules: ModuleRegistry,
    pub functions: FunctionRegistry,
    pub checks: CheckRegistry,
    pub capabilities: CapabilityRegistry,
    pub config: DatabaseConfig,
    pub trace: Option<TraceSink>,
    pub materialize_cache: MaterializeCache,
}

impl DatabaseInner {
    /// Builds and optimizes `stmt` against the current catalog, returning
    /// the physical plan plus the table ids it reads or writes.
    fn plan(&self, stmt: &ast::Stmt) -> Result<(lucidb_physical_plan::PhysicalPlan, HashSet<TableId>)> {
        let mut builder = PlanBuilder::with_checks(&self.catalog, &self.checks);
        let logical = builder.build_stmt(stmt).map_err(Error::from)?;
        let deps = table_deps_logical(&logical);
        let rule_ctx = RuleContext {
            catalog: &self.catalog,
            capabilities: &self.capabilities,
        };
        let optimized = Optimizer::standard().optimize(logical, &rule_ctx);
        let physical = lower(optimized);
        Ok((physical, deps))
    }
}

fn table_deps_logical(node: &lucidb_expr::RelExpr) -> HashSet<TableId> {
    let mut deps = HashSet::new();
    collect_logical(node, &mut deps);
    deps
}

fn collect_logical(node: &lucidb_expr::RelExpr, deps: &mut HashSet<TableId>) {
    use lucidb_expr::RelExpr::*;
    match node {
        Retrieve { table_id, .. } | Insert { table_id, .. } | Update { table_id, .. } | Delete { table_id, .. } => {
            deps.insert(*table_id);
        }
        _ => {}
    }
    for child in node.children() {
        collect_logical(&child, deps);
    }
}

/// The virtual-table functions resolved and optimized before the teacher's
/// `PlanBuilder` sees a catalog lookup fail (`spec.md` §4.2's builtin
/// library): `count`/`sum`/`avg`/`min`/`max` and `row_number`/`rank`/
/// `dense_rank` are evaluated directly by `lucidb-execution`'s scheduler,
/// not dispatched through `FunctionRegistry`, but the catalog still needs
/// a `FunctionDef` for each so the plan builder's arity/kind checks and
/// `expr_has_aggregate` detection succeed. The scalar built-ins
/// (`coalesce`/`lower`/`upper`/`length`/`abs`) mirror `FunctionRegistry::
/// with_builtins`'s own set -- every function call, scalar or not, goes
/// through the same catalog lookup in `PlanBuilder::build_function_call`.
fn register_builtin_functions(catalog: &mut Catalog) {
    let scalar = |name: &str, arity: FunctionArity, return_type: LogicalType| FunctionDef {
        function_id: 0u32.into(),
        name: name.to_string(),
        arity,
        deterministic: true,
        kind: FunctionKind::Scalar,
        return_type,
    };
    let aggregate = |name: &str, arity: FunctionArity, return_type: LogicalType| FunctionDef {
        function_id: 0u32.into(),
        name: name.to_string(),
        arity,
        deterministic: true,
        kind: FunctionKind::Aggregate,
        return_type,
    };
    let window = |name: &str, return_type: LogicalType| FunctionDef {
        function_id: 0u32.into(),
        name: name.to_string(),
        arity: FunctionArity::Fixed(0),
        deterministic: true,
        kind: FunctionKind::Window,
        return_type,
    };

    let builtins = [
        scalar("coalesce", FunctionArity::Variadic, LogicalType::nullable(PhysicalType::Text)),
        scalar("lower", FunctionArity::Fixed(1), LogicalType::nullable(PhysicalType::Text)),
        scalar("upper", FunctionArity::Fixed(1), LogicalType::nullable(PhysicalType::Text)),
        scalar("length", FunctionArity::Fixed(1), LogicalType::nullable(PhysicalType::BigInt)),
        scalar("abs", FunctionArity::Fixed(1), LogicalType::nullable(PhysicalType::Real)),
        aggregate("count", FunctionArity::Variadic, LogicalType::not_null(PhysicalType::BigInt)),
        aggregate("sum", FunctionArity::Fixed(1), LogicalType::nullable(PhysicalType::Real)),
        aggregate("avg", FunctionArity::Fixed(1), LogicalType::nullable(PhysicalType::Real)),
        aggregate("min", FunctionArity::Fixed(1), LogicalType::nullable(PhysicalType::Real)),
        aggregate("max", FunctionArity::Fixed(1), LogicalType::nullable(PhysicalType::Real)),
        window("row_number", LogicalType::not_null(PhysicalType::BigInt)),
        window("rank", LogicalType::not_null(PhysicalType::BigInt)),
        window("dense_rank", LogicalType::not_null(PhysicalType::BigInt)),
    ];
    for def in builtins {
        catalog.register_function(def).expect("builtin function names don't collide on a fresh catalog");
    }
}

#[derive(Clone)]
pub struct Database {
    pub(crate) inner: Arc<Mutex<DatabaseInner>>,
    pub(crate) data_change: Arc<DataChangeDispatcher>,
}

impl Database {
    pub fn new(config: DatabaseConfig) -> Self {
        let data_change = Arc::new(DataChangeDispatcher::new());
        let sink: Arc<dyn lucidb_datastore::DataChangeSink> = data_change.clone();
        let memory = lucidb_datastore::MemoryModule::new(sink);

        let mut catalog = Catalog::new();
        catalog
            .register_module(config.default_vtab_module.clone())
            .expect("a fresh catalog has no module of this name yet");
        register_builtin_functions(&mut catalog);

        let mut modules = ModuleRegistry::with_memory_module(memory);
        let _ = &mut modules;
        let mut capabilities = CapabilityRegistry::new();
        capabilities.register_module_capabilities(
            config.default_vtab_module.clone(),
            lucidb_expr::VtabCapabilities::all(None),
        );

        let trace = config.runtime_metrics.then(TraceSink::new);

        let inner = DatabaseInner {
            catalog,
            coordinator: lucidb_datastore::TransactionCoordinator::new(),
            modules,
            functions: FunctionRegistry::with_builtins(),
            checks: CheckRegistry::new(),
            capabilities,
            config,
            trace,
            materialize_cache: MaterializeCache::new(),
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
            data_change,
        }
    }

    pub fn with_default_config() -> Self {
        Self::new(DatabaseConfig::default())
    }

    /// Registers a virtual-table module other than the built-in `memory`
    /// one, reachable by any `CREATE TABLE ... USING <name>` from then on.
    pub async fn register_module(&self, module: Arc<dyn lucidb_execution::Module>) {
        let mut inner = self.inner.lock().await;
        inner.modules.register(module);
    }

    /// Advertises the pushdown capabilities a custom module's tables
    /// should be planned against; the default stance for an unrecognized
    /// module is [`lucidb_expr::VtabCapabilities::none`].
    pub async fn register_module_capabilities(&self, module_name: impl Into<String>, caps: lucidb_expr::VtabCapabilities) {
        let mut inner = self.inner.lock().await;
        inner.capabilities.register_module_capabilities(module_name, caps);
    }

    pub async fn register_function(&self, def: FunctionDef, implementation: lucidb_execution::ScalarFn) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let name = def.name.clone();
        inner.catalog.register_function(def)?;
        inner.functions.register(&name, move |args| implementation(args));
        Ok(())
    }

    pub async fn register_collation(&self, name: impl Into<String>, comparator: Collation) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.catalog.register_collation(name, comparator)?;
        Ok(())
    }

    /// Subscribes to every row committed by any table, matching §6's
    /// `onDataChange`. There is currently no way to narrow this to one
    /// table or module -- see `DESIGN.md` for why.
    pub fn on_data_change(&self, callback: impl Fn(&DataChangeEvent) + Send + Sync + 'static) {
        self.data_change.register(Arc::new(callback));
    }

    /// Subscribes to every DDL commit (§6's `onSchemaChange`), independent
    /// of any one statement's dependency set.
    pub async fn on_schema_change(&self, callback: impl Fn(&SchemaChangeEvent) + Send + Sync + 'static) -> SubscriptionHandle {
        let inner = self.inner.lock().await;
        inner.catalog.notifier().subscribe_all(callback)
    }

    pub async fn unsubscribe_schema_change(&self, handle: SubscriptionHandle) {
        let inner = self.inner.lock().await;
        inner.catalog.notifier().unsubscribe(handle);
    }

    /// Runs a statement immediately, without keeping a reusable handle:
    /// DDL, transaction control, and a one-shot DML statement all go
    /// through here. `prepare` is for a statement a host plans once and
    /// runs many times.
    pub async fn exec(&self, stmt: &ast::Stmt) -> Result<Vec<Row>> {
        match stmt {
            ast::Stmt::CreateTable(create) => {
                let mut inner = self.inner.lock().await;
                let default_module = inner.config.default_vtab_module.clone();
                let default_args = inner.config.default_vtab_args.clone();
                let nullability = inner.config.default_column_nullability;
                let table_id = ddl::create_table(&mut inner.catalog, &mut inner.checks, create, nullability, &default_module, &default_args)?;
                let module_name = create.module_name.clone().unwrap_or(default_module);
                inner.capabilities.register_table(table_id, module_name.clone());
                let module = inner.modules.resolve(&module_name).map_err(Error::from)?;
                let schema = inner.catalog.table_by_id(table_id)?.clone();
                module.create(&schema, &schema.module_args).await.map_err(Error::from)?;
                Ok(Vec::new())
            }
            ast::Stmt::DropTable(name) => {
                let mut inner = self.inner.lock().await;
                let qualified = qualify(name);
                let schema = inner.catalog.table(&qualified)?.clone();
                ddl::drop_table(&mut inner.catalog, &mut inner.checks, &qualified)?;
                inner.capabilities.drop_table(schema.table_id);
                let module = inner.modules.resolve(&schema.module_name).map_err(Error::from)?;
                module.destroy(&schema.schema_name, &schema.table_name).await.map_err(Error::from)?;
                Ok(Vec::new())
            }
            ast::Stmt::Begin => {
                let mut inner = self.inner.lock().await;
                inner.coordinator.begin().map_err(Error::from)
            }
            ast::Stmt::Commit => {
                let mut inner = self.inner.lock().await;
                self.commit(&mut inner).await
            }
            ast::Stmt::Rollback { to_savepoint } => {
                let mut inner = self.inner.lock().await;
                match to_savepoint {
                    Some(name) => inner.coordinator.rollback_to_savepoint(name).await.map_err(Error::from),
                    None => inner.coordinator.rollback().await.map_err(Error::from),
                }
            }
            ast::Stmt::Savepoint(name) => {
                let mut inner = self.inner.lock().await;
                inner.coordinator.savepoint(name.clone()).await.map_err(Error::from)
            }
            ast::Stmt::Release(name) => {
                let mut inner = self.inner.lock().await;
                inner.coordinator.release_savepoint(name).await.map_err(Error::from)
            }
            _ => {
                let mut statement = self.prepare(stmt.clone()).await?;
                let rows = statement.all().await;
                statement.finalize().await;
                rows
            }
        }
    }

    async fn commit(&self, inner: &mut DatabaseInner) -> Result<Vec<Row>> {
        let ctx = ExecCtx {
            catalog: &inner.catalog,
            modules: &inner.modules,
            functions: &inner.functions,
            params: &[],
            trace: inner.trace.as_ref(),
            deferred: inner.coordinator.deferred(),
            materialize_cache: Some(&inner.materialize_cache),
        };
        inner.coordinator.commit(&ctx).await?;
        Ok(Vec::new())
    }

    /// Plans and optimizes `stmt` once, returning a reusable
    /// [`Statement`]. Only `SELECT`/`INSERT`/`UPDATE`/`DELETE` are valid
    /// here -- DDL and transaction control go through [`Self::exec`]
    /// instead, matching `PlanBuilder::build_stmt`'s own rejection of
    /// those variants.
    pub async fn prepare(&self, stmt: ast::Stmt) -> Result<Statement> {
        if matches!(
            stmt,
            ast::Stmt::CreateTable(_) | ast::Stmt::DropTable(_) | ast::Stmt::Begin | ast::Stmt::Commit | ast::Stmt::Rollback { .. } | ast::Stmt::Savepoint(_) | ast::Stmt::Release(_)
        ) {
            return Err(Error::Misuse(
                "DDL and transaction-control statements are run with `exec`, not `prepare`".into(),
            ));
        }
        let inner = self.inner.lock().await;
        let (physical, deps) = inner.plan(&stmt)?;
        let stale = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let stale_cb = stale.clone();
        let handle = inner
            .catalog
            .notifier()
            .subscribe_dependent(deps.clone(), move |_event| {
                stale_cb.store(true, std::sync::atomic::Ordering::SeqCst);
            });
        drop(inner);
        Ok(Statement::new(self.clone(), stmt, physical, deps, handle, stale))
    }

    /// Prepares, binds, runs to completion, and finalizes `stmt` in one
    /// call -- the convenience form for a query a host only runs once.
    pub async fn eval(&self, stmt: ast::Stmt, params: Vec<Value>) -> Result<Vec<Row>> {
        let mut statement = self.prepare(stmt).await?;
        statement.bind_all(params)?;
        let rows = statement.all().await;
        statement.finalize().await;
        rows
    }

    pub async fn explain(&self, stmt: &ast::Stmt) -> Result<PlanDescription> {
        let inner = self.inner.lock().await;
        let (physical, _deps) = inner.plan(stmt)?;
        Ok(explain::describe(&physical))
    }
}

fn qualify(name: &str) -> String {
    if name.contains('.') {
        name.to_string()
    } else {
        format!("main.{name}")
    }
}
