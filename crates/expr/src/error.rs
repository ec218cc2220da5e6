use lucidb_schema::SchemaError;

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("no table named `{0}` is in scope")]
    UnknownTable(String),
    #[error("no column named `{0}` is in scope")]
    UnknownColumn(String),
    #[error("column reference `{0}` is ambiguous")]
    AmbiguousColumn(String),
    #[error("no function named `{0}` is registered")]
    UnknownFunction(String),
    #[error("function `{name}` expects {expected} argument(s), got {got}")]
    ArityMismatch { name: String, expected: String, got: usize },
    #[error("aggregate function `{0}` used outside of an aggregate context")]
    AggregateMisuse(String),
    #[error("a scalar subquery must return exactly one column, this one returns {0}")]
    ScalarSubqueryArity(usize),
    #[error("set operation operands have {left} and {right} columns")]
    SetOpArityMismatch { left: usize, right: usize },
    #[error("`{0}` is not supported")]
    Unsupported(String),
    #[error("internal plan builder invariant violated: {0}")]
    Internal(String),
}

pub type PlanResult<T> = Result<T, PlanError>;
