//! `Statement`, the reusable prepared-statement handle (`spec.md` §6):
//! `bind`/`bindAll`/`clearBindings`, then `run`/`iterateRows`/`get`/`all`,
//! then `finalize`. Mirrors the teacher's own distinction between a
//! cheap-to-replan `prepare` and a one-shot `eval` (`Database::eval`
//! builds one of these and drives it to completion itself).
//!
//! A statement's plan goes stale the moment a DDL statement touches one
//! of its dependencies (`Database::prepare`'s `subscribe_dependent` call);
//! [`Self::ensure_fresh`] replans lazily on the next use rather than
//! eagerly on the notifier callback, since the callback fires on whatever
//! connection ran the DDL, not necessarily one free to borrow this
//! statement's catalog. Replanning against the *current* catalog is also
//! what gives §8 scenario S6 its `SchemaMissing` behavior for free: if the
//! table is gone, `PlanBuilder::build_stmt` fails the same way a fresh
//! `prepare` would.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use lucidb_execution::scheduler::RowStream;
use lucidb_execution::ExecCtx;
use lucidb_expr::{InList, RelExpr, ScalarExpr};
use lucidb_physical_plan::PhysicalPlan;
use lucidb_primitives::TableId;
use lucidb_sats::{compare::validate_against, LogicalType, Row, Value};
use lucidb_schema::SubscriptionHandle;
use lucidb_sql_ast as ast;

use crate::database::Database;
use crate::error::{Error, MismatchError, Result};

pub struct Statement {
    db: Database,
    stmt: ast::Stmt,
    plan: PhysicalPlan,
    deps: HashSet<TableId>,
    param_types: HashMap<usize, LogicalType>,
    params: Vec<Value>,
    subscription: Option<SubscriptionHandle>,
    stale: Arc<AtomicBool>,
    finalized: bool,
}

impl Statement {
    pub(crate) fn new(
        db: Database,
        stmt: ast::Stmt,
        plan: PhysicalPlan,
        deps: HashSet<TableId>,
        subscription: SubscriptionHandle,
        stale: Arc<AtomicBool>,
    ) -> Self {
        let param_types = collect_param_types(&plan);
        Self {
            db,
            stmt,
            plan,
            deps,
            param_types,
            params: Vec::new(),
            subscription: Some(subscription),
            stale,
            finalized: false,
        }
    }

    /// Binds one positional parameter, raising `Mismatch` immediately if
    /// the plan already knows this position's expected type and `value`
    /// doesn't fit it (`spec.md` §4.5's "bound-parameter type mismatches
    /// raise MISMATCH before execution").
    pub fn bind(&mut self, index: usize, value: Value) -> Result<()> {
        self.ensure_not_finalized()?;
        if let Some(ty) = self.param_types.get(&index) {
            validate_against(&value, ty).map_err(|kind| Error::Mismatch(MismatchError(format!("parameter {index}: {kind}"))))?;
        }
        if self.params.len() <= index {
            self.params.resize(index + 1, Value::Null);
        }
        self.params[index] = value;
        Ok(())
    }

    pub fn bind_all(&mut self, values: Vec<Value>) -> Result<()> {
        for (index, value) in values.into_iter().enumerate() {
            self.bind(index, value)?;
        }
        Ok(())
    }

    pub fn clear_bindings(&mut self) {
        self.params.clear();
    }

    /// Runs the statement for its side effects (DML) or its full row set
    /// (a query with no caller interested in the rows), returning how
    /// many rows it produced.
    pub async fn run(&mut self) -> Result<usize> {
        let rows = self.all().await?;
        Ok(rows.len())
    }

    pub async fn iterate_rows(&mut self) -> Result<RowStream> {
        self.ensure_not_finalized()?;
        self.ensure_fresh().await?;
        self.execute_current_plan().await
    }

    pub async fn get(&mut self) -> Result<Option<Row>> {
        let mut stream = self.iterate_rows().await?;
        match stream.next().await {
            Some(row) => Ok(Some(row.map_err(Error::from)?)),
            None => Ok(None),
        }
    }

    pub async fn all(&mut self) -> Result<Vec<Row>> {
        let mut stream = self.iterate_rows().await?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await {
            rows.push(row.map_err(Error::from)?);
        }
        Ok(rows)
    }

    /// Unsubscribes from schema-change notifications and marks this
    /// handle unusable; matches §6's `statement.finalize()`.
    pub async fn finalize(mut self) {
        if let Some(handle) = self.subscription.take() {
            let inner = self.db.inner.lock().await;
            inner.catalog.notifier().unsubscribe(handle);
        }
        self.finalized = true;
    }

    fn ensure_not_finalized(&self) -> Result<()> {
        if self.finalized {
            return Err(Error::Misuse("operation on a finalized statement".into()));
        }
        Ok(())
    }

    /// Replans against the current catalog if a dependency changed since
    /// this plan was built or last refreshed.
    async fn ensure_fresh(&mut self) -> Result<()> {
        if !self.stale.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let inner = self.db.inner.lock().await;
        let (physical, deps) = inner.plan(&self.stmt)?;
        if let Some(handle) = self.subscription.take() {
            inner.catalog.notifier().unsubscribe(handle);
        }
        let stale = Arc::new(AtomicBool::new(false));
        let stale_cb = stale.clone();
        let handle = inner.catalog.notifier().subscribe_dependent(deps.clone(), move |_event| {
            stale_cb.store(true, Ordering::SeqCst);
        });
        drop(inner);
        self.param_types = collect_param_types(&physical);
        self.plan = physical;
        self.deps = deps;
        self.subscription = Some(handle);
        self.stale = stale;
        Ok(())
    }

    /// Joins every table this plan reads or writes to the coordinator's
    /// open transaction (a no-op outside one), then runs the plan to
    /// completion under a single hold of `DatabaseInner`'s lock -- the
    /// scheduler already materializes every relational node eagerly
    /// (`lucidb-execution::scheduler`'s own doc comment), so the
    /// resulting stream is independent of the lock by the time this
    /// function returns it.
    async fn execute_current_plan(&self) -> Result<RowStream> {
        let mut inner = self.db.inner.lock().await;
        for table_id in self.deps.iter().copied() {
            let schema = inner.catalog.table_by_id(table_id)?.clone();
            let module = inner.modules.resolve(&schema.module_name).map_err(Error::from)?;
            let table = module.connect(&schema.schema_name, &schema.table_name, &schema.module_args).await.map_err(Error::from)?;
            inner.coordinator.touch(table_id, table.as_ref()).await.map_err(Error::from)?;
        }
        let ctx = ExecCtx {
            catalog: &inner.catalog,
            modules: &inner.modules,
            functions: &inner.functions,
            params: &self.params,
            trace: inner.trace.as_ref(),
            deferred: inner.coordinator.deferred(),
            materialize_cache: Some(&inner.materialize_cache),
        };
        lucidb_execution::execute(self.plan.clone(), &ctx).await.map_err(Error::from)
    }
}

/// Every `Parameter` a plan references, keyed by its positional index, so
/// `Statement::bind` can validate a bound value before the statement ever
/// runs. Walks both the physical tree and any logical subquery embedded
/// in a `ScalarSubquery`/`Exists`/`IN (SELECT ...)` node -- those stay
/// unlowered inside `ScalarExpr` (see `lucidb-physical-plan::lowering`'s
/// doc comment), so a correlated subquery's own parameters would
/// otherwise be invisible here.
fn collect_param_types(plan: &PhysicalPlan) -> HashMap<usize, LogicalType> {
    let mut out = HashMap::new();
    walk_physical(plan, &mut out);
    out
}

fn walk_physical(plan: &PhysicalPlan, out: &mut HashMap<usize, LogicalType>) {
    match plan {
        PhysicalPlan::Scan { filter, .. } => {
            if let Some(e) = &filter.filter {
                walk_scalar(e, out);
            }
            if let Some(e) = &filter.limit {
                walk_scalar(e, out);
            }
            if let Some(e) = &filter.offset {
                walk_scalar(e, out);
            }
        }
        PhysicalPlan::Filter { predicate, .. } => walk_scalar(predicate, out),
        PhysicalPlan::Project { projections, .. } | PhysicalPlan::Returning { projections, .. } => {
            projections.iter().for_each(|e| walk_scalar(e, out));
        }
        PhysicalPlan::NestedLoopJoin { condition, .. } => {
            if let Some(e) = condition {
                walk_scalar(e, out);
            }
        }
        PhysicalPlan::HashJoin { keys, .. } => {
            keys.left.iter().for_each(|e| walk_scalar(e, out));
            keys.right.iter().for_each(|e| walk_scalar(e, out));
            if let Some(e) = &keys.residual {
                walk_scalar(e, out);
            }
        }
        PhysicalPlan::HashAggregate { group_by, reductions, .. } | PhysicalPlan::StreamAggregate { group_by, reductions, .. } => {
            group_by.iter().for_each(|e| walk_scalar(e, out));
            for r in reductions {
                r.args.iter().for_each(|e| walk_scalar(e, out));
            }
        }
        PhysicalPlan::Window { windows, .. } => windows.iter().for_each(|e| walk_scalar(e, out)),
        PhysicalPlan::Limit { limit, offset, .. } => {
            if let Some(e) = limit {
                walk_scalar(e, out);
            }
            if let Some(e) = offset {
                walk_scalar(e, out);
            }
        }
        PhysicalPlan::Values { rows, .. } => rows.iter().flatten().for_each(|e| walk_scalar(e, out)),
        PhysicalPlan::MutationContext { captures, .. } => captures.iter().for_each(|(_, e)| walk_scalar(e, out)),
        PhysicalPlan::ConstraintCheck { checks, .. } => checks.iter().for_each(|c| walk_scalar(&c.expr, out)),
        PhysicalPlan::Update { assignments, .. } => assignments.iter().for_each(|(_, e)| walk_scalar(e, out)),
        PhysicalPlan::Sort { .. }
        | PhysicalPlan::SetOp { .. }
        | PhysicalPlan::Insert { .. }
        | PhysicalPlan::Delete { .. }
        | PhysicalPlan::Block { .. }
        | PhysicalPlan::Materialize { .. } => {}
    }
    for child in plan.children() {
        walk_physical(child, out);
    }
}

fn walk_scalar(expr: &ScalarExpr, out: &mut HashMap<usize, LogicalType>) {
    if let ScalarExpr::Parameter { index, ty, .. } = expr {
        out.entry(*index).or_insert_with(|| ty.clone());
    }
    match expr {
        ScalarExpr::ScalarSubquery { plan, .. } | ScalarExpr::Exists { plan, .. } => walk_rel(plan, out),
        ScalarExpr::In {
            list: InList::Subquery(plan), ..
        } => walk_rel(plan, out),
        _ => {}
    }
    for child in expr.children() {
        walk_scalar(child, out);
    }
}

fn walk_rel(rel: &RelExpr, out: &mut HashMap<usize, LogicalType>) {
    match rel {
        RelExpr::Seq { projections, .. } | RelExpr::Returning { projections, .. } => {
            projections.iter().for_each(|e| walk_scalar(e, out));
        }
        RelExpr::Filter { predicate, .. } => walk_scalar(predicate, out),
        RelExpr::Join {
            condition: lucidb_expr::JoinCondition::On(expr),
            ..
        } => walk_scalar(expr, out),
        RelExpr::Aggregate { group_by, reductions, .. } => {
            group_by.iter().for_each(|e| walk_scalar(e, out));
            for r in reductions {
                r.args.iter().for_each(|e| walk_scalar(e, out));
            }
        }
        RelExpr::Window { windows, .. } => windows.iter().for_each(|e| walk_scalar(e, out)),
        RelExpr::Limit { limit, offset, .. } => {
            if let Some(e) = limit {
                walk_scalar(e, out);
            }
            if let Some(e) = offset {
                walk_scalar(e, out);
            }
        }
        RelExpr::Values { rows, .. } => rows.iter().flatten().for_each(|e| walk_scalar(e, out)),
        RelExpr::Retrieve { pushed, .. } => {
            if let Some(e) = &pushed.filter {
                walk_scalar(e, out);
            }
            if let Some(e) = &pushed.limit {
                walk_scalar(e, out);
            }
            if let Some(e) = &pushed.offset {
                walk_scalar(e, out);
            }
        }
        RelExpr::MutationContext { captures, .. } => captures.iter().for_each(|(_, e)| walk_scalar(e, out)),
        RelExpr::ConstraintCheck { checks, .. } => checks.iter().for_each(|c| walk_scalar(&c.expr, out)),
        RelExpr::Update { assignments, .. } => assignments.iter().for_each(|(_, e)| walk_scalar(e, out)),
        RelExpr::Join { .. }
        | RelExpr::Sort { .. }
        | RelExpr::Set { .. }
        | RelExpr::Cte { .. }
        | RelExpr::Insert { .. }
        | RelExpr::Delete { .. }
        | RelExpr::Block { .. }
        | RelExpr::Cache { .. } => {}
    }
    for child in rel.children() {
        walk_rel(child, out);
    }
}
