use lucidb_primitives::{IndexId, TableId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("table `{0}` already exists")]
    TableAlreadyExists(String),
    #[error("table `{0}` does not exist")]
    TableNotFound(String),
    #[error("table id {0:?} does not exist")]
    TableIdNotFound(TableId),
    #[error("index `{0}` already exists")]
    IndexAlreadyExists(String),
    #[error("index id {0:?} does not exist")]
    IndexIdNotFound(IndexId),
    #[error("column `{0}` does not exist on table `{1}`")]
    ColumnNotFound(String, String),
    #[error("function `{0}` already exists")]
    FunctionAlreadyExists(String),
    #[error("function `{0}` does not exist")]
    FunctionNotFound(String),
    #[error("collation `{0}` already exists")]
    CollationAlreadyExists(String),
    #[error("collation `{0}` does not exist")]
    CollationNotFound(String),
    #[error("module `{0}` already exists")]
    ModuleAlreadyExists(String),
    #[error("module `{0}` does not exist")]
    ModuleNotFound(String),
    #[error("module `{0}` still owns {1} table(s)")]
    ModuleInUse(String, usize),
    #[error("`{0}` is reserved for system catalog tables (the `st_` prefix)")]
    ReservedName(String),
}

pub type SchemaResult<T> = Result<T, SchemaError>;
