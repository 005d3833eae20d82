//! Manages the buffer pool, a bounded set of in-memory frames that cache heap pages.
//!
//! Every page access goes through [`BufferPool::get_page`], which first takes the
//! page lock for the calling transaction and then returns a pinned [`PageGuard`].
//! The pool never writes back a page dirtied by an uncommitted transaction
//! (no-steal); dirty pages are forced to disk at commit and dropped at abort.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::catalog::Catalog;
use crate::config::Config;
use crate::error::{DbError, Result};
use crate::heap_page::HeapPage;
use crate::lock_manager::{LockManager, LockMode};
use crate::page_id::{PageId, TableId};
use crate::transaction::TransactionId;
use crate::tuple::Tuple;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    ReadOnly,
    ReadWrite,
}

impl Permission {
    pub fn lock_mode(self) -> LockMode {
        match self {
            Permission::ReadOnly => LockMode::Shared,
            Permission::ReadWrite => LockMode::Exclusive,
        }
    }
}

/// A single frame in the buffer pool.
#[derive(Debug)]
struct Frame {
    page_id: PageId,
    page: RwLock<HeapPage>,
    /// The transaction whose uncommitted changes the page holds, if any.
    dirtied_by: Mutex<Option<TransactionId>>,
    pin_count: AtomicU32,
    last_used: AtomicU64,
}

impl Frame {
    fn is_dirty(&self) -> bool {
        self.dirtied_by.lock().is_some()
    }
}

#[derive(Debug)]
struct PoolState {
    frames: Vec<Option<Arc<Frame>>>,
    page_table: HashMap<PageId, usize>,
    free_list: Vec<usize>,
    clock: u64,
}

impl PoolState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn frame(&self, page_id: PageId) -> Option<&Arc<Frame>> {
        let &index = self.page_table.get(&page_id)?;
        self.frames[index].as_ref()
    }

    fn remove(&mut self, page_id: PageId) -> Option<Arc<Frame>> {
        let index = self.page_table.remove(&page_id)?;
        self.free_list.push(index);
        self.frames[index].take()
    }

    fn cached(&self) -> impl Iterator<Item = &Arc<Frame>> {
        self.frames.iter().flatten()
    }
}

/// A pinned reference to a cached page. The page cannot be evicted while a guard
/// for it is alive.
#[derive(Debug)]
pub struct PageGuard {
    frame: Arc<Frame>,
    tid: TransactionId,
    permission: Permission,
}

impl PageGuard {
    pub fn page_id(&self) -> PageId {
        self.frame.page_id
    }

    pub fn read(&self) -> RwLockReadGuard<'_, HeapPage> {
        self.frame.page.read()
    }

    /// Write access marks the page dirty on behalf of the guard's transaction.
    pub fn write(&self) -> Result<RwLockWriteGuard<'_, HeapPage>> {
        if self.permission != Permission::ReadWrite {
            return Err(DbError::Db(format!(
                "page {} was fetched read-only by {}",
                self.frame.page_id, self.tid
            )));
        }
        *self.frame.dirtied_by.lock() = Some(self.tid);
        Ok(self.frame.page.write())
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        self.frame.pin_count.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The buffer pool manager.
pub struct BufferPool {
    capacity: usize,
    catalog: Arc<Catalog>,
    lock_manager: LockManager,
    state: Mutex<PoolState>,
}

impl BufferPool {
    pub fn new(config: &Config, catalog: Arc<Catalog>) -> Self {
        let capacity = config.buffer_pool_pages;
        Self {
            capacity,
            catalog,
            lock_manager: LockManager::new(config.lock_timeout),
            state: Mutex::new(PoolState {
                frames: vec![None; capacity],
                page_table: HashMap::with_capacity(capacity),
                free_list: (0..capacity).rev().collect(),
                clock: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    /// Locks the page for `tid` (blocking if needed) and returns it pinned, loading
    /// it from its heap file on a miss.
    pub fn get_page(
        &self,
        tid: TransactionId,
        page_id: PageId,
        permission: Permission,
    ) -> Result<PageGuard> {
        self.lock_manager
            .acquire(tid, page_id, permission.lock_mode())
            .map_err(|reason| DbError::TransactionAborted { tid, reason })?;

        let mut state = self.state.lock();
        let now = state.tick();

        // 1. Check if page is already in buffer pool.
        if let Some(frame) = state.frame(page_id) {
            return Ok(Self::pin(frame.clone(), now, tid, permission));
        }

        // 2. If not, read it from disk.
        let page = self.catalog.file(page_id.table_id)?.read_page(page_id)?;

        // 3. Find a free frame or evict one.
        let index = match state.free_list.pop() {
            Some(index) => index,
            None => self.evict_page(&mut state)?,
        };

        let frame = Arc::new(Frame {
            page_id,
            page: RwLock::new(page),
            dirtied_by: Mutex::new(None),
            pin_count: AtomicU32::new(0),
            last_used: AtomicU64::new(now),
        });
        state.frames[index] = Some(frame.clone());
        state.page_table.insert(page_id, index);
        crate::cairn_debug_log!("[BufferPool::get_page] loaded {} into frame {}", page_id, index);
        Ok(Self::pin(frame, now, tid, permission))
    }

    fn pin(frame: Arc<Frame>, now: u64, tid: TransactionId, permission: Permission) -> PageGuard {
        frame.pin_count.fetch_add(1, Ordering::SeqCst);
        frame.last_used.store(now, Ordering::SeqCst);
        PageGuard {
            frame,
            tid,
            permission,
        }
    }

    /// Frees the least recently used frame whose page is clean, unpinned and
    /// unlocked. A page any transaction holds a lock on counts as pinned. Fails
    /// when no such frame exists.
    fn evict_page(&self, state: &mut PoolState) -> Result<usize> {
        let victim = state
            .cached()
            .filter(|frame| {
                !frame.is_dirty()
                    && frame.pin_count.load(Ordering::SeqCst) == 0
                    && !self.lock_manager.is_locked(frame.page_id)
            })
            .min_by_key(|frame| frame.last_used.load(Ordering::SeqCst))
            .map(|frame| frame.page_id)
            .ok_or(DbError::BufferPoolFull(self.capacity))?;

        state.remove(victim);
        let index = state
            .free_list
            .pop()
            .ok_or(DbError::BufferPoolFull(self.capacity))?;
        crate::cairn_debug_log!("[BufferPool::evict_page] evicted {} from frame {}", victim, index);
        Ok(index)
    }

    /// Releases one page lock before the transaction ends. This breaks strict
    /// two-phase locking and is only safe when the page was not used.
    pub fn release_page(&self, tid: TransactionId, page_id: PageId) {
        self.lock_manager.release(tid, page_id);
    }

    pub fn holds_lock(&self, tid: TransactionId, page_id: PageId) -> bool {
        self.lock_manager.lock_mode(tid, page_id).is_some()
    }

    /// Adds a tuple to the table and marks every page it touched dirty.
    pub fn insert_tuple(
        &self,
        tid: TransactionId,
        table_id: TableId,
        tuple: &mut Tuple,
    ) -> Result<()> {
        let file = self.catalog.file(table_id)?;
        for page_id in file.insert_tuple(self, tid, tuple)? {
            self.mark_dirty(page_id, tid);
        }
        Ok(())
    }

    /// Removes a tuple from the table its record id points at.
    pub fn delete_tuple(&self, tid: TransactionId, tuple: &Tuple) -> Result<()> {
        let rid = tuple
            .record_id()
            .ok_or_else(|| DbError::NotFound("tuple has no record id".to_string()))?;
        let file = self.catalog.file(rid.page_id.table_id)?;
        for page_id in file.delete_tuple(self, tid, tuple)? {
            self.mark_dirty(page_id, tid);
        }
        Ok(())
    }

    fn mark_dirty(&self, page_id: PageId, tid: TransactionId) {
        if let Some(frame) = self.state.lock().frame(page_id) {
            *frame.dirtied_by.lock() = Some(tid);
        }
    }

    pub fn is_dirty(&self, page_id: PageId) -> bool {
        self.state
            .lock()
            .frame(page_id)
            .is_some_and(|frame| frame.is_dirty())
    }

    pub fn num_cached_pages(&self) -> usize {
        self.state.lock().page_table.len()
    }

    /// Ends a transaction. On commit its dirty pages are forced to disk; on abort
    /// (or a failed flush) they are dropped so the next read sees the disk version.
    /// All of its locks are released either way.
    pub fn transaction_complete(&self, tid: TransactionId, commit: bool) -> Result<()> {
        let result = if commit { self.flush_pages(tid) } else { Ok(()) };
        if !commit || result.is_err() {
            self.discard_pages_of(tid);
        }
        self.lock_manager.release_all(tid);
        crate::cairn_debug_log!(
            "[BufferPool::transaction_complete] {} {}",
            tid,
            if commit && result.is_ok() { "committed" } else { "aborted" }
        );
        result
    }

    /// Writes the page to its file if it is dirty and marks it clean.
    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        let frame = self.state.lock().frame(page_id).cloned();
        match frame {
            Some(frame) => self.flush_frame(&frame),
            None => Ok(()),
        }
    }

    /// Flushes every page dirtied by `tid`.
    pub fn flush_pages(&self, tid: TransactionId) -> Result<()> {
        let frames: Vec<Arc<Frame>> = self
            .state
            .lock()
            .cached()
            .filter(|frame| *frame.dirtied_by.lock() == Some(tid))
            .cloned()
            .collect();
        frames.iter().try_for_each(|frame| self.flush_frame(frame))
    }

    /// Flushes every dirty page, including uncommitted ones. Meant for shutdown
    /// and tests; it bypasses the no-steal rule.
    pub fn flush_all_pages(&self) -> Result<()> {
        let frames: Vec<Arc<Frame>> = self.state.lock().cached().cloned().collect();
        frames.iter().try_for_each(|frame| self.flush_frame(frame))
    }

    /// Drops a page from the cache without writing it back.
    pub fn discard_page(&self, page_id: PageId) {
        self.state.lock().remove(page_id);
    }

    fn discard_pages_of(&self, tid: TransactionId) {
        let mut state = self.state.lock();
        let dirtied: Vec<PageId> = state
            .cached()
            .filter(|frame| *frame.dirtied_by.lock() == Some(tid))
            .map(|frame| frame.page_id)
            .collect();
        for page_id in dirtied {
            crate::cairn_debug_log!("[BufferPool::discard_pages_of] reverting {}", page_id);
            state.remove(page_id);
        }
    }

    fn flush_frame(&self, frame: &Frame) -> Result<()> {
        let mut dirtied_by = frame.dirtied_by.lock();
        if dirtied_by.is_none() {
            return Ok(());
        }
        let file = self.catalog.file(frame.page_id.table_id)?;
        file.write_page(&frame.page.read())?;
        *dirtied_by = None;
        crate::cairn_debug_log!("[BufferPool::flush_frame] flushed {}", frame.page_id);
        Ok(())
    }
}
