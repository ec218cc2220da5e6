#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OptimizeError {
    #[error("rule `{0}` produced a node whose attribute set dropped a survivor attribute")]
    AttributeSetShrank(&'static str),
    #[error("rule `{0}` did not reach a fixpoint within {1} iterations")]
    FixpointNotReached(&'static str, u32),
}

pub type OptimizeResult<T> = Result<T, OptimizeError>;
