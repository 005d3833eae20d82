//! In-memory registry of the tables the buffer pool can load pages for.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{DbError, Result};
use crate::heap_file::HeapFile;
use crate::page_id::TableId;
use crate::tuple::TupleDesc;

#[derive(Debug)]
struct TableEntry {
    file: Arc<HeapFile>,
    name: String,
}

#[derive(Debug, Default)]
pub struct Catalog {
    tables: RwLock<HashMap<TableId, TableEntry>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a table. A table already registered under `name` is replaced.
    pub fn add_table(&self, file: HeapFile, name: &str) -> TableId {
        let table_id = file.id();
        let mut tables = self.tables.write();
        tables.retain(|_, entry| entry.name != name);
        tables.insert(
            table_id,
            TableEntry {
                file: Arc::new(file),
                name: name.to_string(),
            },
        );
        table_id
    }

    pub fn file(&self, table_id: TableId) -> Result<Arc<HeapFile>> {
        self.tables
            .read()
            .get(&table_id)
            .map(|entry| entry.file.clone())
            .ok_or_else(|| DbError::NotFound(format!("table {table_id}")))
    }

    pub fn tuple_desc(&self, table_id: TableId) -> Result<Arc<TupleDesc>> {
        self.file(table_id).map(|file| file.tuple_desc().clone())
    }

    pub fn table_id(&self, name: &str) -> Result<TableId> {
        self.tables
            .read()
            .iter()
            .find(|(_, entry)| entry.name == name)
            .map(|(id, _)| *id)
            .ok_or_else(|| DbError::NotFound(format!("table {name}")))
    }

    pub fn table_name(&self, table_id: TableId) -> Result<String> {
        self.tables
            .read()
            .get(&table_id)
            .map(|entry| entry.name.clone())
            .ok_or_else(|| DbError::NotFound(format!("table {table_id}")))
    }

    pub fn table_ids(&self) -> Vec<TableId> {
        self.tables.read().keys().copied().collect()
    }
}
