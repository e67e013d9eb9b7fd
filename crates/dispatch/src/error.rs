use thiserror::Error;

/// Account state no longer satisfies its invariants. Fatal: the process must
/// stop rather than keep trading on an inconsistent balance.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AccountError {
    #[error("account invariant violated: {0}")]
    InvariantViolation(String),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Account(#[from] AccountError),
    #[error("engine task panicked: {0}")]
    TaskPanicked(String),
}
