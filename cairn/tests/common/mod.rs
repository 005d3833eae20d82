#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use cairn::config::Config;
use cairn::{Database, Field, TableId, TransactionId, Tuple, TupleDesc, Type};
use tempfile::{tempdir, TempDir};

pub const PAGE_SIZE: usize = 256;

pub struct TestDb {
    pub db: Database,
    pub dir: TempDir,
}

pub fn setup(buffer_pool_pages: usize) -> TestDb {
    let config = Config {
        page_size: PAGE_SIZE,
        buffer_pool_pages,
        lock_timeout: Duration::from_millis(200),
    };
    TestDb {
        db: Database::new(config),
        dir: tempdir().unwrap(),
    }
}

pub fn two_ints() -> TupleDesc {
    TupleDesc::new(&[Type::Int, Type::Int], &[Some("a"), Some("b")]).unwrap()
}

impl TestDb {
    pub fn table(&self, name: &str) -> TableId {
        let path = self.dir.path().join(format!("{name}.dat"));
        self.db.open_table(path, two_ints(), name).unwrap()
    }

    pub fn desc(&self, table: TableId) -> Arc<TupleDesc> {
        self.db.catalog().tuple_desc(table).unwrap()
    }

    pub fn row(&self, table: TableId, a: i32, b: i32) -> Tuple {
        Tuple::with_fields(self.desc(table), vec![Field::Int(a), Field::Int(b)]).unwrap()
    }

    pub fn insert(&self, tid: TransactionId, table: TableId, a: i32, b: i32) -> Tuple {
        let mut t = self.row(table, a, b);
        self.db.buffer_pool().insert_tuple(tid, table, &mut t).unwrap();
        t
    }

    /// All `(a, b)` pairs of the table, sorted.
    pub fn scan(&self, tid: TransactionId, table: TableId) -> Vec<(i32, i32)> {
        let file = self.db.catalog().file(table).unwrap();
        let mut it = file.iter(self.db.buffer_pool(), tid);
        it.open().unwrap();
        let mut rows = Vec::new();
        while it.has_next().unwrap() {
            let t = it.next().unwrap();
            rows.push((
                t.field(0).unwrap().unwrap().as_int().unwrap(),
                t.field(1).unwrap().unwrap().as_int().unwrap(),
            ));
        }
        it.close();
        rows.sort();
        rows
    }
}
