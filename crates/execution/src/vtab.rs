//! The running half of the virtual-table contract (`spec.md` §4.6): the
//! structural shapes (`FilterInfo`, `AccessPlan`, ...) live in
//! `lucidb-physical-plan`; this module adds the async `Module`/`Table`/
//! `Connection` traits that exchange them, plus the post-commit event
//! payloads (§6). `lucidb-datastore` implements these for the default
//! in-memory module; `lucidb-core` lets hosts register others.

use async_trait::async_trait;
use futures::stream::BoxStream;
use lucidb_physical_plan::{AccessPlan, FilterInfo};
use lucidb_primitives::TableId;
use lucidb_sats::{Row, Value};
use lucidb_schema::TableSchema;
pub use lucidb_schema::{SchemaChangeEvent, SchemaChangeKind};

use crate::error::ExecResult;

pub type RowStream<'a> = BoxStream<'a, ExecResult<(Vec<u8>, Row)>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConflictResolution {
    Abort,
    Replace,
    Ignore,
}

#[derive(Clone, Debug, PartialEq)]
pub enum UpdateArgs {
    Insert { new_row: Row, conflict: ConflictResolution },
    Update { old_key: Vec<Value>, new_row: Row },
    Delete { old_key: Vec<Value> },
}

/// What a mutation returns: the written row (bound into a `RETURNING`
/// clause) or, for a delete, a receipt carrying the row that was removed.
#[derive(Clone, Debug, PartialEq)]
pub enum UpdateOutcome {
    Written(Row),
    Deleted(Row),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DataChangeEvent {
    pub schema: String,
    pub table: String,
    pub module_name: String,
    pub kind: DataChangeKind,
    pub key: Vec<Value>,
    pub old_row: Option<Row>,
    pub new_row: Option<Row>,
    pub changed_columns: Option<Vec<usize>>,
    pub remote: bool,
}

/// A module's open connection: the unit `begin`/`commit`/savepoints scope
/// over (§4.6). Modules that don't support true isolation (e.g. a module
/// wrapping an external read-only feed) may implement these as no-ops.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn begin(&self) -> ExecResult<()>;
    async fn commit(&self) -> ExecResult<()>;
    async fn rollback(&self) -> ExecResult<()>;
    async fn create_savepoint(&self, name: &str) -> ExecResult<()>;
    async fn release_savepoint(&self, name: &str) -> ExecResult<()>;
    async fn rollback_to_savepoint(&self, name: &str) -> ExecResult<()>;
}

/// A module's open table handle (§4.6).
#[async_trait]
pub trait Table: Send + Sync {
    fn schema(&self) -> &TableSchema;

    async fn query<'a>(&'a self, filter: &FilterInfo) -> ExecResult<RowStream<'a>>;

    async fn update(&self, args: UpdateArgs) -> ExecResult<UpdateOutcome>;

    async fn create_connection(&self) -> ExecResult<Box<dyn Connection>>;

    async fn disconnect(&self) -> ExecResult<()>;
}

/// A registered virtual-table module (§4.6): the factory every `CREATE
/// TABLE USING <module>` and existing-table `connect` goes through.
#[async_trait]
pub trait Module: Send + Sync {
    fn name(&self) -> &str;

    async fn create(&self, schema: &TableSchema, args: &str) -> ExecResult<Box<dyn Table>>;

    async fn connect(&self, schema_name: &str, table_name: &str, args: &str) -> ExecResult<Box<dyn Table>>;

    async fn destroy(&self, schema_name: &str, table_name: &str) -> ExecResult<()>;

    /// Declares pushdown capabilities and a row-count estimate for a
    /// specific candidate filter; `None` means "use the default,
    /// conservative (no pushdown) assumption" (mirrors
    /// `lucidb_expr::CapabilityProvider`'s planning-time contract, but is
    /// allowed to consult live statistics since it runs per-query).
    async fn get_best_access_plan(&self, _table_id: TableId, _filter: &FilterInfo) -> ExecResult<Option<AccessPlan>> {
        Ok(None)
    }
}
