//! The explicit context object that owns the catalog, the buffer pool and the
//! transaction manager. Create one at startup and pass it to whatever needs pages.

use std::path::Path;
use std::sync::Arc;

use crate::buffer_pool::BufferPool;
use crate::catalog::Catalog;
use crate::config::Config;
use crate::error::Result;
use crate::heap_file::HeapFile;
use crate::page_id::TableId;
use crate::transaction::{TransactionId, TransactionManager};
use crate::tuple::TupleDesc;

pub struct Database {
    config: Config,
    catalog: Arc<Catalog>,
    buffer_pool: BufferPool,
    transactions: TransactionManager,
}

impl Database {
    pub fn new(config: Config) -> Self {
        let catalog = Arc::new(Catalog::new());
        let buffer_pool = BufferPool::new(&config, catalog.clone());
        Self {
            config,
            catalog,
            buffer_pool,
            transactions: TransactionManager::default(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn buffer_pool(&self) -> &BufferPool {
        &self.buffer_pool
    }

    pub fn transactions(&self) -> &TransactionManager {
        &self.transactions
    }

    /// Opens (or creates) a heap file with the configured page size and registers it.
    pub fn open_table<P: AsRef<Path>>(
        &self,
        path: P,
        desc: TupleDesc,
        name: &str,
    ) -> Result<TableId> {
        let file = HeapFile::open(path, desc, self.config.page_size)?;
        Ok(self.catalog.add_table(file, name))
    }

    pub fn begin(&self) -> TransactionId {
        self.transactions.begin()
    }

    pub fn commit(&self, tid: TransactionId) -> Result<()> {
        self.transactions.commit(&self.buffer_pool, tid)
    }

    pub fn abort(&self, tid: TransactionId) -> Result<()> {
        self.transactions.abort(&self.buffer_pool, tid)
    }
}
