//! Insert and delete operators. Each drains its child on the first `next`,
//! applies every tuple through the buffer pool under its transaction and yields
//! a single `(count)` tuple.

use std::sync::Arc;

use cairn::{BufferPool, Field, TableId, TransactionId, Tuple, TupleDesc, Type};

use crate::errors::{ExecutionError, Result};
use crate::op_iterator::OpIterator;

fn count_desc() -> Result<Arc<TupleDesc>> {
    Ok(Arc::new(TupleDesc::new(&[Type::Int], &[Some("count")])?))
}

/// Shared state of the count-producing operators. A rewind replays the count
/// without applying the child a second time.
struct CountState {
    desc: Arc<TupleDesc>,
    open: bool,
    count: Option<i32>,
    emitted: bool,
}

impl CountState {
    fn new() -> Result<Self> {
        Ok(Self {
            desc: count_desc()?,
            open: false,
            count: None,
            emitted: false,
        })
    }

    fn has_next(&self) -> bool {
        self.open && !self.emitted
    }

    fn emit(&mut self, count: i32) -> Result<Tuple> {
        self.count = Some(count);
        self.emitted = true;
        Ok(Tuple::with_fields(self.desc.clone(), vec![Field::Int(count)])?)
    }

    fn rewind(&mut self) -> Result<()> {
        if !self.open {
            return Err(ExecutionError::NotOpen);
        }
        self.emitted = false;
        Ok(())
    }
}

fn drain(child: &mut dyn OpIterator, mut apply: impl FnMut(Tuple) -> Result<()>) -> Result<i32> {
    let mut count = 0i32;
    while child.has_next()? {
        apply(child.next()?)?;
        count = count
            .checked_add(1)
            .ok_or(ExecutionError::Overflow(i64::from(i32::MAX) + 1))?;
    }
    Ok(count)
}

/// Inserts every tuple of its child into a table.
pub struct Insert<'a> {
    pool: &'a BufferPool,
    tid: TransactionId,
    table_id: TableId,
    child: Box<dyn OpIterator + 'a>,
    state: CountState,
}

impl<'a> Insert<'a> {
    pub fn new(
        pool: &'a BufferPool,
        tid: TransactionId,
        child: Box<dyn OpIterator + 'a>,
        table_id: TableId,
    ) -> Result<Self> {
        let table_desc = pool.catalog().tuple_desc(table_id)?;
        if **child.tuple_desc() != *table_desc {
            return Err(ExecutionError::Schema(format!(
                "cannot insert ({}) into table with schema ({table_desc})",
                child.tuple_desc()
            )));
        }
        Ok(Self {
            pool,
            tid,
            table_id,
            child,
            state: CountState::new()?,
        })
    }
}

impl OpIterator for Insert<'_> {
    fn open(&mut self) -> Result<()> {
        self.child.open()?;
        self.state.open = true;
        self.state.emitted = false;
        Ok(())
    }

    fn has_next(&mut self) -> Result<bool> {
        Ok(self.state.has_next())
    }

    fn next(&mut self) -> Result<Tuple> {
        if !self.state.has_next() {
            return Err(ExecutionError::NoSuchElement);
        }
        if let Some(count) = self.state.count {
            return self.state.emit(count);
        }
        let (pool, tid, table_id) = (self.pool, self.tid, self.table_id);
        let count = drain(self.child.as_mut(), |mut tuple| {
            Ok(pool.insert_tuple(tid, table_id, &mut tuple)?)
        })?;
        cairn::cairn_debug_log!(
            "[Insert::next] {} inserted {} tuples into {:?}",
            tid,
            count,
            table_id
        );
        self.state.emit(count)
    }

    fn rewind(&mut self) -> Result<()> {
        self.state.rewind()
    }

    fn close(&mut self) {
        self.state.open = false;
        self.child.close();
    }

    fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.state.desc
    }
}

/// Deletes every tuple of its child from the table its record id points at.
pub struct Delete<'a> {
    pool: &'a BufferPool,
    tid: TransactionId,
    child: Box<dyn OpIterator + 'a>,
    state: CountState,
}

impl<'a> Delete<'a> {
    pub fn new(
        pool: &'a BufferPool,
        tid: TransactionId,
        child: Box<dyn OpIterator + 'a>,
    ) -> Result<Self> {
        Ok(Self {
            pool,
            tid,
            child,
            state: CountState::new()?,
        })
    }
}

impl OpIterator for Delete<'_> {
    fn open(&mut self) -> Result<()> {
        self.child.open()?;
        self.state.open = true;
        self.state.emitted = false;
        Ok(())
    }

    fn has_next(&mut self) -> Result<bool> {
        Ok(self.state.has_next())
    }

    fn next(&mut self) -> Result<Tuple> {
        if !self.state.has_next() {
            return Err(ExecutionError::NoSuchElement);
        }
        if let Some(count) = self.state.count {
            return self.state.emit(count);
        }
        let (pool, tid) = (self.pool, self.tid);
        let count = drain(self.child.as_mut(), |tuple| Ok(pool.delete_tuple(tid, &tuple)?))?;
        cairn::cairn_debug_log!("[Delete::next] {} deleted {} tuples", tid, count);
        self.state.emit(count)
    }

    fn rewind(&mut self) -> Result<()> {
        self.state.rewind()
    }

    fn close(&mut self) {
        self.state.open = false;
        self.child.close();
    }

    fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.state.desc
    }
}
