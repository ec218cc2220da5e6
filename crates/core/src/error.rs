//! The public error taxonomy (`spec.md` §7): every failure a host sees
//! from `prepare`/`bind`/`run`/`all`/`exec` collapses into one of these
//! ten variants, each wrapping the lower crate's richer error type so a
//! host can match coarsely or drill into `source()` for detail.

use lucidb_datastore::CoordinatorError;
use lucidb_execution::ExecError;
use lucidb_expr::PlanError;
use lucidb_physical_plan::VtabError;
use lucidb_schema::SchemaError;
use lucidb_table::TableError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The AST handed to `prepare` could not be resolved into a plan --
    /// unknown identifiers, arity mismatches, malformed set operations.
    /// Named `Parse` to match §7's taxonomy even though this crate has no
    /// lexer of its own (`lucidb-sql-ast`'s doc comment explains why).
    #[error(transparent)]
    Parse(#[from] PlanError),

    /// A syntactically valid plan that the optimizer or physical lowering
    /// could not turn into something runnable -- in practice this is
    /// narrower than `Parse` since both passes in this engine are total
    /// functions over a valid `RelExpr`, but the variant is kept distinct
    /// per §7's taxonomy for a future fallible rewrite rule.
    #[error("planning failed: {0}")]
    Planning(String),

    /// A prepared statement's plan referenced a table, index, function,
    /// or module that no longer exists -- typically because a DDL
    /// statement ran since `prepare` and the statement's subscription
    /// fired before the next `run`.
    #[error("schema object no longer exists: {0}")]
    SchemaMissing(String),

    /// A bound parameter or stored value did not match the type the plan
    /// expected it to have.
    #[error(transparent)]
    Mismatch(#[from] MismatchError),

    /// A CHECK constraint, NOT NULL, or primary-key/unique constraint was
    /// violated.
    #[error("{0}")]
    Constraint(String),

    /// The host called the API in a way the contract forbids: binding
    /// past the parameter count, calling `run` on a finalized statement,
    /// issuing `COMMIT` with no open transaction, and the like.
    #[error("{0}")]
    Misuse(String),

    /// An invariant internal to this engine was violated -- never the
    /// host's fault; worth a bug report.
    #[error("internal error: {0}")]
    Internal(String),

    /// The statement asked for something this engine deliberately does
    /// not implement (see `spec.md`'s Non-goals for each module).
    #[error("not supported: {0}")]
    Unsupported(String),

    /// The statement was cancelled mid-execution by a host-supplied
    /// cancellation signal.
    #[error("cancelled")]
    Cancelled,

    /// A registered virtual-table module reported a failure of its own
    /// (a constraint the module itself enforces, a connectivity problem
    /// for a module backed by something outside this process, ...).
    #[error("virtual table error: {0}")]
    VirtualTable(String),
}

/// A parameter or stored value's physical type did not match what the
/// plan expected at that position.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("type mismatch: {0}")]
pub struct MismatchError(pub String);

pub type Result<T> = std::result::Result<T, Error>;

impl From<ExecError> for Error {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::Mismatch { index, expected, actual } => {
                Error::Mismatch(MismatchError(format!("parameter {index} expected {expected}, got {actual}")))
            }
            ExecError::Constraint { constraint_name, expr_text } => {
                Error::Constraint(format!("constraint `{constraint_name}` violated by `{expr_text}`"))
            }
            ExecError::VirtualTable { module, message } => Error::VirtualTable(format!("`{module}`: {message}")),
            ExecError::Cancelled => Error::Cancelled,
            ExecError::Internal(msg) => Error::Internal(msg),
        }
    }
}

impl From<SchemaError> for Error {
    fn from(err: SchemaError) -> Self {
        match &err {
            SchemaError::TableNotFound(_)
            | SchemaError::TableIdNotFound(_)
            | SchemaError::IndexIdNotFound(_)
            | SchemaError::FunctionNotFound(_)
            | SchemaError::CollationNotFound(_)
            | SchemaError::ModuleNotFound(_) => Error::SchemaMissing(err.to_string()),
            SchemaError::TableAlreadyExists(_)
            | SchemaError::IndexAlreadyExists(_)
            | SchemaError::FunctionAlreadyExists(_)
            | SchemaError::CollationAlreadyExists(_)
            | SchemaError::ModuleAlreadyExists(_)
            | SchemaError::ModuleInUse(..)
            | SchemaError::ReservedName(_)
            | SchemaError::ColumnNotFound(..) => Error::Misuse(err.to_string()),
        }
    }
}

impl From<CoordinatorError> for Error {
    fn from(err: CoordinatorError) -> Self {
        match err {
            CoordinatorError::NoActiveTransaction(_) | CoordinatorError::AlreadyInTransaction | CoordinatorError::UnknownSavepoint(_) => {
                Error::Misuse(err.to_string())
            }
            CoordinatorError::Exec(e) => e.into(),
        }
    }
}

impl From<TableError> for Error {
    fn from(err: TableError) -> Self {
        match err {
            TableError::DuplicatePrimaryKey | TableError::DuplicateUniqueIndex(_) => Error::Constraint(err.to_string()),
            TableError::RowNotFound | TableError::RowIdNotFound(_) => Error::Internal(err.to_string()),
            TableError::UnknownSavepoint(_) | TableError::NoActiveTransaction => Error::Misuse(err.to_string()),
        }
    }
}

impl From<VtabError> for Error {
    fn from(err: VtabError) -> Self {
        Error::VirtualTable(err.to_string())
    }
}
