//! Error types shared by every layer of the storage kernel.

use thiserror::Error;

use crate::lock_manager::LockError;
use crate::page_id::{PageId, TableId};
use crate::transaction::TransactionId;

pub type Result<T> = std::result::Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    /// Field, type or arity mismatch between a tuple and a descriptor.
    #[error("schema error: {0}")]
    Schema(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("index {index} out of range for {len} fields")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("page {0} has no empty slot")]
    PageFull(PageId),

    #[error("tuple not found on page {page_id} slot {slot:?}")]
    TupleNotFound { page_id: PageId, slot: Option<u16> },

    #[error("page {page_id} is not a member of table {table_id}")]
    NotMember { page_id: PageId, table_id: TableId },

    #[error("buffer pool is full: all {0} cached pages are dirty or locked")]
    BufferPoolFull(usize),

    #[error("transaction {tid} aborted: {reason}")]
    TransactionAborted { tid: TransactionId, reason: LockError },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt page {page_id}: {reason}")]
    CorruptPage { page_id: PageId, reason: String },

    #[error("no more tuples")]
    NoSuchElement,

    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    #[error("{0}")]
    Db(String),
}

impl DbError {
    pub fn is_transaction_aborted(&self) -> bool {
        matches!(self, DbError::TransactionAborted { .. })
    }
}
