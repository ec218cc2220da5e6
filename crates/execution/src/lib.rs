//! Turns a [`lucidb_physical_plan::PhysicalPlan`] into rows (`spec.md`
//! §4.5), plus the virtual-table contract (§4.6, §6) a module implements
//! to actually hold the data a plan reads and writes.
//!
//! [`scheduler::execute`] is the statement-level entry point;
//! [`vtab::Module`]/[`vtab::Table`]/[`vtab::Connection`] are what
//! `lucidb-datastore`'s memory module implements and what `lucidb-core`
//! lets a host register its own implementations of.

pub mod cache;
pub mod context;
pub mod deferred;
pub mod error;
pub mod eval;
pub mod functions;
pub mod row;
pub mod scheduler;
pub mod trace;
pub mod vtab;

pub use cache::MaterializeCache;
pub use context::{ExecCtx, ModuleResolver};
pub use deferred::{DeferredChecks, PendingCheck};
pub use error::{ExecError, ExecResult};
pub use eval::evaluate;
pub use functions::{FunctionRegistry, ScalarFn};
pub use row::{EvalEnv, RowDescriptor, Slot};
pub use scheduler::{execute, execute_correlated};
pub use trace::{TraceRecord, TraceSink};
pub use vtab::{
    ConflictResolution, Connection, DataChangeEvent, DataChangeKind, Module, RowStream, SchemaChangeEvent, SchemaChangeKind, Table,
    UpdateArgs, UpdateOutcome,
};
