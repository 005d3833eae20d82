//! Sequential table scans.

use std::sync::Arc;

use cairn::heap_file::HeapFileIterator;
use cairn::{BufferPool, TableId, TransactionId, Tuple, TupleDesc};

use crate::errors::{ExecutionError, Result};
use crate::op_iterator::OpIterator;

/// Scans a table page by page under shared locks. Output field names are
/// qualified with the table alias (`alias.field`).
pub struct SeqScan<'a> {
    inner: HeapFileIterator<'a>,
    desc: Arc<TupleDesc>,
    alias: String,
}

impl<'a> SeqScan<'a> {
    pub fn new(
        pool: &'a BufferPool,
        tid: TransactionId,
        table_id: TableId,
        alias: &str,
    ) -> Result<Self> {
        let file = pool.catalog().file(table_id)?;
        let desc = Arc::new(qualified_desc(file.tuple_desc(), alias)?);
        Ok(Self {
            inner: file.iter(pool, tid),
            desc,
            alias: alias.to_string(),
        })
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }
}

fn qualified_desc(desc: &TupleDesc, alias: &str) -> Result<TupleDesc> {
    let types: Vec<_> = desc.items().map(|item| item.field_type).collect();
    let names: Vec<String> = desc
        .items()
        .map(|item| format!("{alias}.{}", item.field_name.as_deref().unwrap_or("null")))
        .collect();
    let names: Vec<Option<&str>> = names.iter().map(|n| Some(n.as_str())).collect();
    Ok(TupleDesc::new(&types, &names)?)
}

impl OpIterator for SeqScan<'_> {
    fn open(&mut self) -> Result<()> {
        Ok(self.inner.open()?)
    }

    fn has_next(&mut self) -> Result<bool> {
        Ok(self.inner.has_next()?)
    }

    fn next(&mut self) -> Result<Tuple> {
        if !self.inner.has_next()? {
            return Err(ExecutionError::NoSuchElement);
        }
        Ok(self.inner.next()?)
    }

    fn rewind(&mut self) -> Result<()> {
        if !self.inner.is_open() {
            return Err(ExecutionError::NotOpen);
        }
        Ok(self.inner.rewind()?)
    }

    fn close(&mut self) {
        self.inner.close();
    }

    fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }
}
