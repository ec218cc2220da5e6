#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VtabError {
    #[error("virtual-table module `{0}` rejected the operation: {1}")]
    Rejected(String, String),
    #[error("virtual-table module `{0}` has no open connection")]
    NoConnection(String),
}

pub type VtabResult<T> = Result<T, VtabError>;
