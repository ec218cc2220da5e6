//! The default in-memory virtual-table module (`spec.md` §4.6): every
//! `CREATE TABLE` without an explicit `USING <module>` lands here, backed
//! by `lucidb-table`'s layer-chain engine.
//!
//! Table identity is keyed by `schema.table`. `connect()` hands out a
//! fresh [`MemoryTableHandle`] over the *same* shared, mutex-guarded
//! [`lucidb_table::Table`] every time it's called for a given name, so a
//! `Scan` node and an `Insert`/`Update`/`Delete` node opening the table
//! independently mid-statement -- and every statement inside one explicit
//! transaction -- see one consistent row set.
//!
//! [`lucidb_execution::vtab::Table::update`] has no notion of an ambient
//! transaction beyond what `lucidb_table::Table::in_transaction` itself
//! reports, so the autocommit/explicit-transaction split lives right
//! here: if the shared table isn't already inside a transaction when a
//! mutation arrives, this wraps it in a private `begin`/`commit` of its
//! own and forwards the resulting events immediately; if a
//! [`MemoryConnection`] has already called `begin` (or the transaction
//! coordinator touched this table ahead of the statement), the mutation
//! just lands on the already-open layer and waits for that connection's
//! own `commit`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;

use lucidb_execution::error::{ExecError, ExecResult};
use lucidb_execution::vtab::{
    ConflictResolution, Connection, DataChangeEvent, DataChangeKind, Module, RowStream, Table, UpdateArgs, UpdateOutcome,
};
use lucidb_physical_plan::{FilterConstraint, FilterInfo, FilterOp, FilterOrderBy, SortDir};
use lucidb_sats::{compare, order_key, CompareResult, NullOrdering, Row, Value};
use lucidb_schema::TableSchema;
use lucidb_table::{RowChange, ScanBounds, TableError};

use crate::events::DataChangeSink;

fn qualified(schema_name: &str, table_name: &str) -> String {
    format!("{schema_name}.{table_name}")
}

fn to_exec_err(e: TableError) -> ExecError {
    ExecError::VirtualTable {
        module: "memory".into(),
        message: e.to_string(),
    }
}

fn primary_key_of(schema: &TableSchema, row: &Row) -> Vec<Value> {
    schema
        .effective_primary_key()
        .iter()
        .filter_map(|col_id| {
            let pos = schema.columns.iter().position(|c| c.col_id == col_id)?;
            row.get(pos).cloned()
        })
        .collect()
}

fn changed_columns(old: &Row, new: &Row) -> Vec<usize> {
    old.0
        .iter()
        .zip(new.0.iter())
        .enumerate()
        .filter_map(|(i, (a, b))| (a != b).then_some(i))
        .collect()
}

fn to_data_change_event(schema: &TableSchema, module_name: &str, change: RowChange) -> DataChangeEvent {
    match change {
        RowChange::Insert { new_row, .. } => DataChangeEvent {
            schema: schema.schema_name.clone(),
            table: schema.table_name.clone(),
            module_name: module_name.to_string(),
            kind: DataChangeKind::Insert,
            key: primary_key_of(schema, &new_row),
            old_row: None,
            new_row: Some(new_row),
            changed_columns: None,
            remote: false,
        },
        RowChange::Update { old_row, new_row, .. } => {
            let changed = changed_columns(&old_row, &new_row);
            DataChangeEvent {
                schema: schema.schema_name.clone(),
                table: schema.table_name.clone(),
                module_name: module_name.to_string(),
                kind: DataChangeKind::Update,
                key: primary_key_of(schema, &new_row),
                old_row: Some(old_row),
                new_row: Some(new_row),
                changed_columns: Some(changed),
                remote: false,
            }
        }
        RowChange::Delete { old_row, .. } => DataChangeEvent {
            schema: schema.schema_name.clone(),
            table: schema.table_name.clone(),
            module_name: module_name.to_string(),
            kind: DataChangeKind::Delete,
            key: primary_key_of(schema, &old_row),
            old_row: Some(old_row),
            new_row: None,
            changed_columns: None,
            remote: false,
        },
    }
}

/// What every `Table`/`Connection` handle `connect()` hands out for one
/// table shares: the engine itself, plus the sink committed events are
/// forwarded to.
pub(crate) struct SharedTable {
    pub(crate) inner: Mutex<lucidb_table::Table>,
    sink: Arc<dyn DataChangeSink>,
}

impl SharedTable {
    fn forward(&self, schema: &TableSchema, events: Vec<RowChange>) {
        for change in events {
            self.sink.on_commit(to_data_change_event(schema, "memory", change));
        }
    }
}

/// Applies one [`UpdateArgs`] to the engine. `Replace`/`Ignore` conflict
/// resolution is only honored against a primary-key conflict -- a
/// secondary unique-index conflict always aborts regardless of the
/// requested resolution, since recovering "the other row" from an index
/// violation alone isn't something `lucidb_table::Table`'s API exposes.
fn apply_update(table: &mut lucidb_table::Table, args: UpdateArgs) -> Result<UpdateOutcome, TableError> {
    match args {
        UpdateArgs::Insert { new_row, conflict } => match table.insert(new_row.clone()) {
            Ok(_row_id) => Ok(UpdateOutcome::Written(new_row)),
            Err(TableError::DuplicatePrimaryKey) if conflict == ConflictResolution::Ignore => {
                let key = primary_key_of(&table.schema, &new_row);
                let (_, existing) = table.get_by_key(&key).expect("duplicate key implies an existing row");
                Ok(UpdateOutcome::Written(existing))
            }
            Err(TableError::DuplicatePrimaryKey) if conflict == ConflictResolution::Replace => {
                let key = primary_key_of(&table.schema, &new_row);
                table.delete_by_key(&key)?;
                table.insert(new_row.clone())?;
                Ok(UpdateOutcome::Written(new_row))
            }
            Err(e) => Err(e),
        },
        UpdateArgs::Update { old_key, new_row } => {
            table.update(&old_key, new_row.clone())?;
            Ok(UpdateOutcome::Written(new_row))
        }
        UpdateArgs::Delete { old_key } => {
            let old_row = table.delete_by_key(&old_key)?;
            Ok(UpdateOutcome::Deleted(old_row))
        }
    }
}

pub struct MemoryTableHandle {
    shared: Arc<SharedTable>,
    schema: TableSchema,
}

#[async_trait]
impl Table for MemoryTableHandle {
    fn schema(&self) -> &TableSchema {
        &self.schema
    }

    async fn query<'a>(&'a self, filter: &FilterInfo) -> ExecResult<RowStream<'a>> {
        let mut rows: Vec<(u64, Row)> = {
            let table = self.shared.inner.lock();
            table.scan(&ScanBounds::full()).into_iter().map(|(id, row)| (id.value(), row)).collect()
        };

        rows.retain(|(_, row)| filter.constraints.iter().all(|c| constraint_admits(c, row, &filter.params)));

        if !filter.order_by.is_empty() {
            rows.sort_by(|a, b| order_rows(a, b, &filter.order_by));
        }

        if let Some(offset) = filter.offset {
            rows = rows.into_iter().skip(offset as usize).collect();
        }
        if let Some(limit) = filter.limit {
            rows.truncate(limit as usize);
        }

        let projection = filter.projection.clone();
        let items: Vec<ExecResult<(Vec<u8>, Row)>> = rows
            .into_iter()
            .map(|(id, row)| {
                let row = match &projection {
                    Some(cols) => row.project(cols),
                    None => row,
                };
                Ok((id.to_le_bytes().to_vec(), row))
            })
            .collect();
        Ok(stream::iter(items).boxed())
    }

    async fn update(&self, args: UpdateArgs) -> ExecResult<UpdateOutcome> {
        let mut events = Vec::new();
        let outcome = {
            let mut table = self.shared.inner.lock();
            let autocommit = !table.in_transaction();
            if autocommit {
                table.begin();
            }
            match apply_update(&mut table, args) {
                Ok(outcome) => {
                    if autocommit {
                        events = table.commit().map_err(to_exec_err)?;
                    }
                    Ok(outcome)
                }
                Err(e) => {
                    if autocommit {
                        let _ = table.rollback();
                    }
                    Err(to_exec_err(e))
                }
            }
        };
        if !events.is_empty() {
            self.shared.forward(&self.schema, events);
        }
        outcome
    }

    async fn create_connection(&self) -> ExecResult<Box<dyn Connection>> {
        Ok(Box::new(MemoryConnection {
            shared: self.shared.clone(),
            schema: self.schema.clone(),
        }))
    }

    async fn disconnect(&self) -> ExecResult<()> {
        Ok(())
    }
}

pub struct MemoryConnection {
    shared: Arc<SharedTable>,
    schema: TableSchema,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn begin(&self) -> ExecResult<()> {
        self.shared.inner.lock().begin();
        Ok(())
    }

    async fn commit(&self) -> ExecResult<()> {
        let events = self.shared.inner.lock().commit().map_err(to_exec_err)?;
        self.shared.forward(&self.schema, events);
        Ok(())
    }

    async fn rollback(&self) -> ExecResult<()> {
        self.shared.inner.lock().rollback().map_err(to_exec_err)
    }

    async fn create_savepoint(&self, name: &str) -> ExecResult<()> {
        self.shared.inner.lock().savepoint(name.to_string());
        Ok(())
    }

    async fn release_savepoint(&self, name: &str) -> ExecResult<()> {
        self.shared.inner.lock().release_savepoint(name).map_err(to_exec_err)
    }

    async fn rollback_to_savepoint(&self, name: &str) -> ExecResult<()> {
        self.shared.inner.lock().rollback_to_savepoint(name).map_err(to_exec_err)
    }
}

pub struct MemoryModule {
    tables: Mutex<HashMap<String, Arc<SharedTable>>>,
    sink: Arc<dyn DataChangeSink>,
}

impl MemoryModule {
    pub fn new(sink: Arc<dyn DataChangeSink>) -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            sink,
        }
    }
}

#[async_trait]
impl Module for MemoryModule {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create(&self, schema: &TableSchema, _args: &str) -> ExecResult<Box<dyn Table>> {
        let key = qualified(&schema.schema_name, &schema.table_name);
        let mut tables = self.tables.lock();
        if tables.contains_key(&key) {
            return Err(ExecError::VirtualTable {
                module: "memory".into(),
                message: format!("table `{key}` already has an open memory-engine handle"),
            });
        }
        let engine = lucidb_table::Table::new(schema.clone(), |_| lucidb_sats::Collation::Binary);
        let shared = Arc::new(SharedTable {
            inner: Mutex::new(engine),
            sink: self.sink.clone(),
        });
        tables.insert(key, shared.clone());
        Ok(Box::new(MemoryTableHandle {
            shared,
            schema: schema.clone(),
        }))
    }

    async fn connect(&self, schema_name: &str, table_name: &str, _args: &str) -> ExecResult<Box<dyn Table>> {
        let key = qualified(schema_name, table_name);
        let shared = self.tables.lock().get(&key).cloned().ok_or_else(|| ExecError::VirtualTable {
            module: "memory".into(),
            message: format!("no memory-engine table registered for `{key}`"),
        })?;
        let schema = shared.inner.lock().schema.clone();
        Ok(Box::new(MemoryTableHandle { shared, schema }))
    }

    async fn destroy(&self, schema_name: &str, table_name: &str) -> ExecResult<()> {
        let key = qualified(schema_name, table_name);
        self.tables.lock().remove(&key);
        Ok(())
    }
}

// -- filter/sort application over a full scan ----------------------------

fn constraint_admits(c: &FilterConstraint, row: &Row, params: &[Value]) -> bool {
    let idx = c.column.raw() as usize;
    let Some(value) = row.get(idx) else { return false };
    let arg = c.arg_pos.and_then(|p| params.get(p));
    match c.op {
        FilterOp::IsNull => value.is_null(),
        FilterOp::IsNotNull => !value.is_null(),
        FilterOp::Eq => arg.is_some_and(|a| matches!(compare(value, a, None), CompareResult::Equal)),
        FilterOp::Lt => arg.is_some_and(|a| matches!(compare(value, a, None), CompareResult::Less)),
        FilterOp::LtEq => arg.is_some_and(|a| matches!(compare(value, a, None), CompareResult::Less | CompareResult::Equal)),
        FilterOp::Gt => arg.is_some_and(|a| matches!(compare(value, a, None), CompareResult::Greater)),
        FilterOp::GtEq => arg.is_some_and(|a| matches!(compare(value, a, None), CompareResult::Greater | CompareResult::Equal)),
        FilterOp::Like => arg.is_some_and(|a| text_pattern(value, a, false)),
        FilterOp::Glob => arg.is_some_and(|a| text_pattern(value, a, true)),
        // Not produced by the scheduler's constraint classifier today --
        // any `IN`/full-text term always stays a residual `Filter` above
        // the scan, so a constraint of this shape should never reach
        // here. Admit rather than silently drop rows if one ever does.
        FilterOp::In | FilterOp::Match => true,
    }
}

fn text_pattern(value: &Value, pattern: &Value, glob: bool) -> bool {
    match (value, pattern) {
        (Value::Text(t), Value::Text(p)) if glob => glob_match(p, t),
        (Value::Text(t), Value::Text(p)) => like_match(p, t),
        _ => false,
    }
}

/// SQL `LIKE`: `%` matches any run of characters, `_` matches exactly
/// one. Case-insensitive over ASCII, matching `lucidb-execution`'s own
/// residual-filter evaluator so a pushed-down `LIKE` and one left
/// residual agree on what matches.
fn like_match(pattern: &str, text: &str) -> bool {
    let t: Vec<char> = text.to_ascii_lowercase().chars().collect();
    let p: Vec<char> = pattern.chars().map(|c| c.to_ascii_lowercase()).collect();
    like_rec(&p, &t)
}

fn like_rec(p: &[char], t: &[char]) -> bool {
    match p.first() {
        None => t.is_empty(),
        Some('%') => like_rec(&p[1..], t) || (!t.is_empty() && like_rec(p, &t[1..])),
        Some('_') => !t.is_empty() && like_rec(&p[1..], &t[1..]),
        Some(c) => t.first() == Some(c) && like_rec(&p[1..], &t[1..]),
    }
}

/// `GLOB`: `*` matches any run, `?` matches one character, `[...]`
/// matches a bracketed character class; case-sensitive.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    glob_rec(&p, &t)
}

fn glob_rec(p: &[char], t: &[char]) -> bool {
    match p.first() {
        None => t.is_empty(),
        Some('*') => glob_rec(&p[1..], t) || (!t.is_empty() && glob_rec(p, &t[1..])),
        Some('?') => !t.is_empty() && glob_rec(&p[1..], &t[1..]),
        Some('[') => match p.iter().position(|&c| c == ']') {
            Some(end) if !t.is_empty() && char_class_matches(&p[1..end], t[0]) => glob_rec(&p[end + 1..], &t[1..]),
            _ => false,
        },
        Some(c) => t.first() == Some(c) && glob_rec(&p[1..], &t[1..]),
    }
}

fn char_class_matches(class: &[char], c: char) -> bool {
    let (negate, class) = match class.first() {
        Some('^') => (true, &class[1..]),
        _ => (false, class),
    };
    let mut matched = false;
    let mut i = 0;
    while i < class.len() {
        if i + 2 < class.len() && class[i + 1] == '-' {
            if class[i] <= c && c <= class[i + 2] {
                matched = true;
            }
            i += 3;
        } else {
            if class[i] == c {
                matched = true;
            }
            i += 1;
        }
    }
    matched != negate
}

fn order_rows(a: &(u64, Row), b: &(u64, Row), order_by: &[FilterOrderBy]) -> std::cmp::Ordering {
    for ob in order_by {
        let idx = ob.column.raw() as usize;
        let av = a.1.get(idx).cloned().unwrap_or(Value::Null);
        let bv = b.1.get(idx).cloned().unwrap_or(Value::Null);
        let ord = order_key(&av, &bv, None, NullOrdering::Last);
        let ord = match ob.dir {
            SortDir::Asc => ord,
            SortDir::Desc => ord.reverse(),
        };
        if ord != std::cmp::Ordering::Equal {
            return ord;
        }
    }
    std::cmp::Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::test_support::RecordingSink;
    use lucidb_physical_plan::FilterOp;
    use lucidb_primitives::{AttributeId, ColId, TableId};
    use lucidb_sats::{LogicalType, PhysicalType};
    use lucidb_schema::ColumnDef;

    fn users_schema() -> TableSchema {
        TableSchema {
            table_id: TableId::new(0),
            schema_name: "main".into(),
            table_name: "users".into(),
            columns: vec![
                ColumnDef::new(ColId::new(0), "id", LogicalType::not_null(PhysicalType::Integer)),
                ColumnDef::new(ColId::new(1), "name", LogicalType::nullable(PhysicalType::Text)),
            ],
            primary_key: [ColId::new(0)].into(),
            indexes: vec![],
            checks: vec![],
            module_name: "memory".into(),
            module_args: String::new(),
        }
    }

    fn row(id: i64, name: &str) -> Row {
        Row::new(vec![Value::Integer(id), Value::Text(name.to_string())])
    }

    #[tokio::test]
    async fn autocommit_insert_is_visible_to_the_next_query_and_emits_an_event() {
        let sink = Arc::new(RecordingSink::default());
        let module = MemoryModule::new(sink.clone());
        let schema = users_schema();
        let table = module.create(&schema, "").await.unwrap();

        table
            .update(UpdateArgs::Insert {
                new_row: row(1, "Alice"),
                conflict: ConflictResolution::Abort,
            })
            .await
            .unwrap();

        let mut stream = table.query(&FilterInfo::default()).await.unwrap();
        let mut seen = Vec::new();
        while let Some(item) = stream.next().await {
            seen.push(item.unwrap().1);
        }
        assert_eq!(seen, vec![row(1, "Alice")]);
        assert_eq!(sink.events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn explicit_transaction_defers_events_until_commit() {
        let sink = Arc::new(RecordingSink::default());
        let module = MemoryModule::new(sink.clone());
        let schema = users_schema();
        let table = module.create(&schema, "").await.unwrap();
        let conn = table.create_connection().await.unwrap();

        conn.begin().await.unwrap();
        table
            .update(UpdateArgs::Insert {
                new_row: row(1, "Alice"),
                conflict: ConflictResolution::Abort,
            })
            .await
            .unwrap();
        assert!(sink.events.lock().unwrap().is_empty());
        conn.commit().await.unwrap();
        assert_eq!(sink.events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rollback_discards_the_insert_and_never_emits_an_event() {
        let sink = Arc::new(RecordingSink::default());
        let module = MemoryModule::new(sink.clone());
        let schema = users_schema();
        let table = module.create(&schema, "").await.unwrap();
        let conn = table.create_connection().await.unwrap();

        conn.begin().await.unwrap();
        table
            .update(UpdateArgs::Insert {
                new_row: row(1, "Alice"),
                conflict: ConflictResolution::Abort,
            })
            .await
            .unwrap();
        conn.rollback().await.unwrap();

        let mut stream = table.query(&FilterInfo::default()).await.unwrap();
        assert!(stream.next().await.is_none());
        assert!(sink.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn insert_or_ignore_keeps_the_existing_row() {
        let sink = Arc::new(RecordingSink::default());
        let module = MemoryModule::new(sink);
        let schema = users_schema();
        let table = module.create(&schema, "").await.unwrap();

        table
            .update(UpdateArgs::Insert {
                new_row: row(1, "Alice"),
                conflict: ConflictResolution::Abort,
            })
            .await
            .unwrap();
        let outcome = table
            .update(UpdateArgs::Insert {
                new_row: row(1, "Someone Else"),
                conflict: ConflictResolution::Ignore,
            })
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::Written(row(1, "Alice")));
    }

    #[tokio::test]
    async fn query_honors_equality_constraint_limit_and_projection() {
        let sink = Arc::new(RecordingSink::default());
        let module = MemoryModule::new(sink);
        let schema = users_schema();
        let table = module.create(&schema, "").await.unwrap();
        for (id, name) in [(1, "Alice"), (2, "Bob"), (3, "Alice")] {
            table
                .update(UpdateArgs::Insert {
                    new_row: row(id, name),
                    conflict: ConflictResolution::Abort,
                })
                .await
                .unwrap();
        }

        let filter = FilterInfo {
            constraints: vec![FilterConstraint {
                column: AttributeId::from_raw(1),
                op: FilterOp::Eq,
                arg_pos: Some(0),
            }],
            params: vec![Value::Text("Alice".into())],
            projection: Some(vec![0]),
            limit: Some(1),
            ..Default::default()
        };
        let mut stream = table.query(&filter).await.unwrap();
        let (_, row) = stream.next().await.unwrap().unwrap();
        assert_eq!(row, Row::new(vec![Value::Integer(1)]));
        assert!(stream.next().await.is_none());
    }
}
