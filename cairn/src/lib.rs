//! Storage kernel: heap pages and files, a bounded page cache, and page-level
//! strict two-phase locking.

pub mod buffer_pool;

pub mod catalog;

pub mod config;

pub mod database;

pub mod error;

pub mod heap_file;

pub mod heap_page;

pub mod lock_manager;

pub mod page_id;

pub mod transaction;

pub mod tuple;

pub mod types;

pub use buffer_pool::{BufferPool, PageGuard, Permission};
pub use database::Database;
pub use error::{DbError, Result};
pub use page_id::{PageId, RecordId, TableId};
pub use transaction::TransactionId;
pub use tuple::{Tuple, TupleDesc};
pub use types::{Field, Type};

pub fn debug_logs_enabled() -> bool {
    std::env::var_os("CAIRN_DEBUG_LOG").is_some()
}

#[macro_export]
macro_rules! cairn_debug_log {
    ($($arg:tt)*) => {
        if $crate::debug_logs_enabled() {
            println!($($arg)*);
        }
    };
}
