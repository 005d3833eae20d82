use cairn::DbError;
use thiserror::Error;

use crate::aggregate::AggregateOp;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Storage(#[from] DbError),
    #[error("no more tuples")]
    NoSuchElement,
    #[error("operator is not open")]
    NotOpen,
    #[error("illegal argument: {0}")]
    IllegalArgument(String),
    #[error("unsupported aggregate operator {0}")]
    UnsupportedOp(AggregateOp),
    #[error("aggregate result {0} does not fit in an INT")]
    Overflow(i64),
    #[error("schema error: {0}")]
    Schema(String),
}

impl ExecutionError {
    /// True if the caller must abort the transaction this error happened in.
    pub fn is_transaction_aborted(&self) -> bool {
        matches!(self, ExecutionError::Storage(e) if e.is_transaction_aborted())
    }
}

pub type Result<T> = std::result::Result<T, ExecutionError>;
