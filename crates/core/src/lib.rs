//! LucidB's public entry point (`spec.md` §6): a single [`Database`]
//! handle owns the catalog, transaction coordinator, module/function
//! registries, and fans commits out to whatever a host subscribed with
//! [`Database::on_data_change`]/[`Database::on_schema_change`]. A
//! [`Statement`] is a reusable, bindable, replan-on-staleness handle over
//! one prepared plan; [`Database::eval`] is the one-shot convenience form.
//!
//! Re-exports `lucidb-sql-ast` as [`ast`] so a host building statements by
//! hand never needs that crate as a direct dependency, and the lower
//! crates' own public types (`Row`, `Value`, `LogicalType`, ...) so a host
//! only needs this one crate on its own `Cargo.toml`.

pub mod capabilities;
pub mod config;
pub mod database;
pub mod ddl;
pub mod error;
pub mod explain;
pub mod modules;
pub mod statement;

pub use config::{ColumnNullability, DatabaseConfig, DatabaseConfigBuilder};
pub use database::Database;
pub use error::{Error, MismatchError, Result};
pub use explain::PlanDescription;
pub use statement::Statement;

pub use lucidb_sql_ast as ast;

pub use lucidb_execution::{
    ConflictResolution, Connection, DataChangeEvent, DataChangeKind, Module, SchemaChangeEvent, SchemaChangeKind, Table,
    UpdateArgs, UpdateOutcome,
};
pub use lucidb_execution::scheduler::RowStream;
pub use lucidb_expr::capabilities::VtabCapabilities;
pub use lucidb_physical_plan::{AccessPlan, FilterInfo};
pub use lucidb_sats::{Collation, LogicalType, PhysicalType, Row, Value};
pub use lucidb_schema::{FunctionArity, FunctionDef, FunctionKind, SubscriptionHandle};
