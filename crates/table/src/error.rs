use lucidb_primitives::RowId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    #[error("duplicate key violates the table's primary key")]
    DuplicatePrimaryKey,
    #[error("duplicate key violates unique index `{0}`")]
    DuplicateUniqueIndex(String),
    #[error("no row with the given key exists")]
    RowNotFound,
    #[error("row id {0:?} does not exist in this layer chain")]
    RowIdNotFound(RowId),
    #[error("no savepoint named `{0}` is on the active transaction stack")]
    UnknownSavepoint(String),
    #[error("cannot commit or rollback: no transaction is active")]
    NoActiveTransaction,
}

pub type TableResult<T> = Result<T, TableError>;
