//! Transaction management.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::buffer_pool::BufferPool;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx{}", self.0)
    }
}

/// Hands out transaction ids and drives commit/abort through the buffer pool.
/// Designed to be shared across threads.
#[derive(Debug)]
pub struct TransactionManager {
    next_transaction_id: AtomicU64,
    active_transactions: Mutex<HashSet<TransactionId>>,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new(1)
    }
}

impl TransactionManager {
    pub fn new(initial_tx_id: u64) -> Self {
        Self {
            next_transaction_id: AtomicU64::new(initial_tx_id),
            active_transactions: Mutex::new(HashSet::new()),
        }
    }

    /// Begins a new transaction and returns its ID.
    pub fn begin(&self) -> TransactionId {
        let tid = TransactionId(self.next_transaction_id.fetch_add(1, Ordering::SeqCst));
        self.active_transactions.lock().insert(tid);
        crate::cairn_debug_log!("[TM::begin] started {}", tid);
        tid
    }

    /// Forces the transaction's dirty pages to disk and releases its locks.
    pub fn commit(&self, pool: &BufferPool, tid: TransactionId) -> Result<()> {
        self.active_transactions.lock().remove(&tid);
        pool.transaction_complete(tid, true)
    }

    /// Throws away the transaction's dirty pages and releases its locks.
    pub fn abort(&self, pool: &BufferPool, tid: TransactionId) -> Result<()> {
        self.active_transactions.lock().remove(&tid);
        pool.transaction_complete(tid, false)
    }

    pub fn is_active(&self, tid: TransactionId) -> bool {
        self.active_transactions.lock().contains(&tid)
    }

    pub fn active_count(&self) -> usize {
        self.active_transactions.lock().len()
    }
}
