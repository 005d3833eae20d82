//! A table stored as a flat sequence of fixed-size heap pages in one disk file.
//!
//! There is no file header: page `n` lives at byte offset `n * page_size` and the
//! page count is derived from the file length.

use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer_pool::{BufferPool, Permission};
use crate::error::{DbError, Result};
use crate::config::PAGE_SIZE_RANGE;
use crate::heap_page::{HeapPage, PageLayout};
use crate::page_id::{PageId, TableId};
use crate::transaction::TransactionId;
use crate::tuple::{Tuple, TupleDesc};

pub struct HeapFile {
    path: PathBuf,
    file: Mutex<File>,
    desc: Arc<TupleDesc>,
    table_id: TableId,
    page_size: usize,
}

impl HeapFile {
    /// Opens the table file, creating it and its parent directories if they don't exist.
    /// The page size must lie in [`PAGE_SIZE_RANGE`] and fit at least one tuple.
    pub fn open<P: AsRef<Path>>(path: P, desc: TupleDesc, page_size: usize) -> Result<Self> {
        if !PAGE_SIZE_RANGE.contains(&page_size) {
            return Err(DbError::IllegalArgument(format!(
                "page size {page_size} is outside {PAGE_SIZE_RANGE:?}"
            )));
        }
        PageLayout::new(&desc, page_size).check()?;
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path_ref)?;
        let path = path_ref.canonicalize()?;
        let table_id = TableId(crc32fast::hash(path.to_string_lossy().as_bytes()));
        crate::cairn_debug_log!(
            "[HeapFile::open] {:?} as table {} ({} bytes)",
            path,
            table_id,
            file.metadata()?.len()
        );

        Ok(Self {
            path,
            file: Mutex::new(file),
            desc: Arc::new(desc),
            table_id,
            page_size,
        })
    }

    /// Stable across restarts: derived from the canonical path of the file.
    pub fn id(&self) -> TableId {
        self.table_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn num_pages(&self) -> Result<u32> {
        let len = self.file.lock().metadata()?.len();
        Ok((len / self.page_size as u64) as u32)
    }

    /// Reads and parses one page. Takes no locks; callers go through the buffer pool.
    pub fn read_page(&self, page_id: PageId) -> Result<HeapPage> {
        self.check_member(page_id)?;
        let mut data = vec![0u8; self.page_size];
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(self.offset(page_id)))?;
            file.read_exact(&mut data).map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => DbError::CorruptPage {
                    page_id,
                    reason: "short read past end of file".to_string(),
                },
                _ => DbError::Io(e),
            })?;
        }
        HeapPage::from_bytes(page_id, self.desc.clone(), self.page_size, &data)
    }

    /// Writes a whole page image at its offset, extending the file if needed.
    pub fn write_page(&self, page: &HeapPage) -> Result<()> {
        let page_id = page.page_id();
        self.check_member(page_id)?;
        // serialize first so a bad page never produces a partial write
        let data = page.to_bytes()?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(self.offset(page_id)))?;
        file.write_all(&data)?;
        file.sync_all()?;
        Ok(())
    }

    /// Inserts into the first page with a free slot, appending a page if all are
    /// full. Returns the pages that were modified.
    pub fn insert_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: &mut Tuple,
    ) -> Result<Vec<PageId>> {
        if **tuple.tuple_desc() != *self.desc {
            return Err(DbError::Schema(format!(
                "tuple schema ({}) does not match table schema ({})",
                tuple.tuple_desc(),
                self.desc
            )));
        }

        for page_no in 0..self.num_pages()? {
            let page_id = PageId::new(self.table_id, page_no);
            let held_before = pool.holds_lock(tid, page_id);
            let guard = pool.get_page(tid, page_id, Permission::ReadWrite)?;
            if guard.read().num_empty_slots() > 0 {
                guard.write()?.insert_tuple(tuple)?;
                return Ok(vec![page_id]);
            }
            drop(guard);
            // nothing was read from or written to a full page we had not locked
            if !held_before {
                pool.release_page(tid, page_id);
            }
        }

        loop {
            let page_id = self.append_empty_page()?;
            let guard = pool.get_page(tid, page_id, Permission::ReadWrite)?;
            // another inserter may have filled the fresh page before we locked it
            if guard.read().num_empty_slots() > 0 {
                guard.write()?.insert_tuple(tuple)?;
                return Ok(vec![page_id]);
            }
        }
    }

    /// Removes the tuple from the page named by its record id.
    pub fn delete_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: &Tuple,
    ) -> Result<Vec<PageId>> {
        let rid = tuple
            .record_id()
            .ok_or_else(|| DbError::NotFound("tuple has no record id".to_string()))?;
        self.check_member(rid.page_id)?;
        let guard = pool.get_page(tid, rid.page_id, Permission::ReadWrite)?;
        guard.write()?.delete_tuple(tuple)?;
        Ok(vec![rid.page_id])
    }

    /// A lazy scan over every tuple in page then slot order.
    pub fn iter<'a>(
        self: &Arc<Self>,
        pool: &'a BufferPool,
        tid: TransactionId,
    ) -> HeapFileIterator<'a> {
        HeapFileIterator {
            file: self.clone(),
            pool,
            tid,
            next_page_no: 0,
            current: None,
        }
    }

    /// Writes an empty page at the end of the file and returns its id. The file
    /// latch makes concurrent appends pick distinct page numbers.
    fn append_empty_page(&self) -> Result<PageId> {
        let mut file = self.file.lock();
        let page_no = (file.metadata()?.len() / self.page_size as u64) as u32;
        let page_id = PageId::new(self.table_id, page_no);
        file.seek(SeekFrom::Start(self.offset(page_id)))?;
        file.write_all(&HeapPage::empty_page_bytes(self.page_size))?;
        file.sync_all()?;
        crate::cairn_debug_log!("[HeapFile::append_empty_page] extended to page {}", page_id);
        Ok(page_id)
    }

    fn check_member(&self, page_id: PageId) -> Result<()> {
        if page_id.table_id != self.table_id {
            return Err(DbError::NotMember {
                page_id,
                table_id: self.table_id,
            });
        }
        Ok(())
    }

    fn offset(&self, page_id: PageId) -> u64 {
        page_id.page_no as u64 * self.page_size as u64
    }
}

impl std::fmt::Debug for HeapFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapFile")
            .field("path", &self.path)
            .field("table_id", &self.table_id)
            .field("page_size", &self.page_size)
            .finish()
    }
}

/// Cursor over a heap file. Holds at most one page's tuples at a time; each page
/// is fetched read-only through the buffer pool when the cursor reaches it.
pub struct HeapFileIterator<'a> {
    file: Arc<HeapFile>,
    pool: &'a BufferPool,
    tid: TransactionId,
    next_page_no: u32,
    current: Option<std::vec::IntoIter<Tuple>>,
}

impl<'a> HeapFileIterator<'a> {
    pub fn open(&mut self) -> Result<()> {
        self.next_page_no = 0;
        self.current = Some(Vec::new().into_iter());
        Ok(())
    }

    pub fn has_next(&mut self) -> Result<bool> {
        loop {
            let Some(current) = &self.current else {
                return Ok(false);
            };
            if !current.as_slice().is_empty() {
                return Ok(true);
            }
            if self.next_page_no >= self.file.num_pages()? {
                return Ok(false);
            }
            self.load_next_page()?;
        }
    }

    pub fn next(&mut self) -> Result<Tuple> {
        if !self.has_next()? {
            return Err(DbError::NoSuchElement);
        }
        self.current
            .as_mut()
            .and_then(Iterator::next)
            .ok_or(DbError::NoSuchElement)
    }

    pub fn rewind(&mut self) -> Result<()> {
        if self.current.is_none() {
            return Err(DbError::Db("rewind on a closed scan".to_string()));
        }
        self.close();
        self.open()
    }

    pub fn close(&mut self) {
        self.current = None;
        self.next_page_no = 0;
    }

    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    fn load_next_page(&mut self) -> Result<()> {
        let page_id = PageId::new(self.file.id(), self.next_page_no);
        let guard = self.pool.get_page(self.tid, page_id, Permission::ReadOnly)?;
        let tuples: Vec<Tuple> = guard.read().iter().cloned().collect();
        self.current = Some(tuples.into_iter());
        self.next_page_no += 1;
        Ok(())
    }
}
