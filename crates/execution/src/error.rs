#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecError {
    #[error("parameter {index} expected {expected}, got {actual}")]
    Mismatch {
        index: usize,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("constraint `{constraint_name}` violated by `{expr_text}`")]
    Constraint { constraint_name: String, expr_text: String },
    #[error("virtual-table module `{module}` reported: {message}")]
    VirtualTable { module: String, message: String },
    #[error("statement cancelled")]
    Cancelled,
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

pub type ExecResult<T> = Result<T, ExecError>;
