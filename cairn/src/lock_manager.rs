//! Manages page-level shared/exclusive locks held by transactions.
//!
//! Locks are held until the owning transaction completes (strict 2PL). A request
//! that cannot be granted waits on a condition variable; it fails when waiting
//! would close a cycle in the waits-for graph, or when the configured timeout
//! elapses, so no transaction waits forever.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::page_id::PageId;
use crate::transaction::TransactionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LockError {
    #[error("deadlock detected")]
    Deadlock,
    #[error("lock wait timed out")]
    Timeout,
}

#[derive(Debug, Default)]
struct PageLocks {
    sharing: HashSet<TransactionId>,
    exclusive: Option<TransactionId>,
}

impl PageLocks {
    fn is_free(&self) -> bool {
        self.sharing.is_empty() && self.exclusive.is_none()
    }

    /// Returns the transactions whose locks conflict with `tx_id` taking `mode`.
    fn conflicting_holders(&self, tx_id: TransactionId, mode: LockMode) -> Vec<TransactionId> {
        let mut holders = Vec::new();
        if let Some(ex_holder) = self.exclusive {
            if ex_holder != tx_id {
                holders.push(ex_holder);
            }
        }
        if mode == LockMode::Exclusive {
            holders.extend(self.sharing.iter().copied().filter(|h| *h != tx_id));
        }
        holders
    }
}

#[derive(Debug, Default)]
struct LockTable {
    pages: HashMap<PageId, PageLocks>,
    held: HashMap<TransactionId, HashSet<PageId>>,
    waits_for: HashMap<TransactionId, Vec<TransactionId>>,
}

impl LockTable {
    /// Grants the lock if nothing conflicts. An exclusive request from the sole
    /// shared holder upgrades in place.
    fn try_acquire(&mut self, tx_id: TransactionId, page_id: PageId, mode: LockMode) -> bool {
        let locks = self.pages.entry(page_id).or_default();
        if !locks.conflicting_holders(tx_id, mode).is_empty() {
            return false;
        }
        match mode {
            LockMode::Shared => {
                if locks.exclusive != Some(tx_id) {
                    locks.sharing.insert(tx_id);
                }
            }
            LockMode::Exclusive => {
                locks.sharing.remove(&tx_id);
                locks.exclusive = Some(tx_id);
            }
        }
        self.held.entry(tx_id).or_default().insert(page_id);
        true
    }

    fn mode_held(&self, tx_id: TransactionId, page_id: PageId) -> Option<LockMode> {
        let locks = self.pages.get(&page_id)?;
        if locks.exclusive == Some(tx_id) {
            Some(LockMode::Exclusive)
        } else if locks.sharing.contains(&tx_id) {
            Some(LockMode::Shared)
        } else {
            None
        }
    }

    fn release(&mut self, tx_id: TransactionId, page_id: PageId) -> bool {
        let Some(locks) = self.pages.get_mut(&page_id) else {
            return false;
        };
        let mut changed = locks.sharing.remove(&tx_id);
        if locks.exclusive == Some(tx_id) {
            locks.exclusive = None;
            changed = true;
        }
        if locks.is_free() {
            self.pages.remove(&page_id);
        }
        if let Some(pages) = self.held.get_mut(&tx_id) {
            pages.remove(&page_id);
            if pages.is_empty() {
                self.held.remove(&tx_id);
            }
        }
        changed
    }

    fn has_cycle_from(&self, start: TransactionId) -> bool {
        let mut visited = HashSet::new();
        let mut recursion_stack = HashSet::new();
        self.has_cycle_util(start, &mut visited, &mut recursion_stack)
    }

    fn has_cycle_util(
        &self,
        tx_id: TransactionId,
        visited: &mut HashSet<TransactionId>,
        recursion_stack: &mut HashSet<TransactionId>,
    ) -> bool {
        if recursion_stack.contains(&tx_id) {
            return true;
        }
        if !visited.insert(tx_id) {
            return false;
        }
        recursion_stack.insert(tx_id);
        if let Some(waited) = self.waits_for.get(&tx_id) {
            for next in waited {
                if self.has_cycle_util(*next, visited, recursion_stack) {
                    return true;
                }
            }
        }
        recursion_stack.remove(&tx_id);
        false
    }
}

#[derive(Debug)]
pub struct LockManager {
    table: Mutex<LockTable>,
    cvar: Condvar,
    timeout: Duration,
}

impl LockManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            table: Mutex::new(LockTable::default()),
            cvar: Condvar::new(),
            timeout,
        }
    }

    /// Blocks until `tx_id` holds `page_id` in at least `mode`.
    pub fn acquire(
        &self,
        tx_id: TransactionId,
        page_id: PageId,
        mode: LockMode,
    ) -> Result<(), LockError> {
        let deadline = Instant::now() + self.timeout;
        let mut table = self.table.lock();

        // If we already hold the lock in a compatible or stronger mode, we are good.
        match (table.mode_held(tx_id, page_id), mode) {
            (Some(LockMode::Exclusive), _) | (Some(LockMode::Shared), LockMode::Shared) => {
                return Ok(())
            }
            _ => {}
        }

        loop {
            if table.try_acquire(tx_id, page_id, mode) {
                table.waits_for.remove(&tx_id);
                return Ok(());
            }

            let holders = table
                .pages
                .get(&page_id)
                .map(|locks| locks.conflicting_holders(tx_id, mode))
                .unwrap_or_default();
            table.waits_for.insert(tx_id, holders);
            if table.has_cycle_from(tx_id) {
                table.waits_for.remove(&tx_id);
                crate::cairn_debug_log!(
                    "[LockManager::acquire] deadlock: {} waiting for {:?} on {}",
                    tx_id,
                    mode,
                    page_id
                );
                return Err(LockError::Deadlock);
            }

            if self.cvar.wait_until(&mut table, deadline).timed_out() {
                let granted = table.try_acquire(tx_id, page_id, mode);
                table.waits_for.remove(&tx_id);
                if granted {
                    return Ok(());
                }
                crate::cairn_debug_log!(
                    "[LockManager::acquire] timeout: {} waiting for {:?} on {}",
                    tx_id,
                    mode,
                    page_id
                );
                return Err(LockError::Timeout);
            }
        }
    }

    /// Drops one lock early. No-op if it is not held.
    pub fn release(&self, tx_id: TransactionId, page_id: PageId) {
        let mut table = self.table.lock();
        if table.release(tx_id, page_id) {
            self.cvar.notify_all();
        }
    }

    /// Drops every lock `tx_id` holds and forgets any wait it was part of.
    pub fn release_all(&self, tx_id: TransactionId) {
        let mut table = self.table.lock();
        table.waits_for.remove(&tx_id);
        let pages: Vec<PageId> = table
            .held
            .get(&tx_id)
            .map(|pages| pages.iter().copied().collect())
            .unwrap_or_default();
        for page_id in pages {
            table.release(tx_id, page_id);
        }
        drop(table);
        self.cvar.notify_all();
    }

    /// True if `tx_id` holds `page_id` in `mode` or a stronger mode.
    pub fn holds_lock(&self, tx_id: TransactionId, page_id: PageId, mode: LockMode) -> bool {
        match self.table.lock().mode_held(tx_id, page_id) {
            Some(LockMode::Exclusive) => true,
            Some(LockMode::Shared) => mode == LockMode::Shared,
            None => false,
        }
    }

    pub fn lock_mode(&self, tx_id: TransactionId, page_id: PageId) -> Option<LockMode> {
        self.table.lock().mode_held(tx_id, page_id)
    }

    /// True if any transaction holds any lock on `page_id`.
    pub fn is_locked(&self, page_id: PageId) -> bool {
        self.table
            .lock()
            .pages
            .get(&page_id)
            .is_some_and(|locks| !locks.is_free())
    }

    pub fn pages_locked_by(&self, tx_id: TransactionId) -> Vec<PageId> {
        self.table
            .lock()
            .held
            .get(&tx_id)
            .map(|pages| pages.iter().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_id::TableId;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;

    fn page(n: u32) -> PageId {
        PageId::new(TableId(1), n)
    }

    const T1: TransactionId = TransactionId(1);
    const T2: TransactionId = TransactionId(2);
    const T3: TransactionId = TransactionId(3);

    #[test]
    fn test_shared_locks_are_compatible() {
        let lm = LockManager::new(Duration::from_millis(50));
        lm.acquire(T1, page(0), LockMode::Shared).unwrap();
        lm.acquire(T2, page(0), LockMode::Shared).unwrap();
        assert!(lm.holds_lock(T1, page(0), LockMode::Shared));
        assert!(lm.holds_lock(T2, page(0), LockMode::Shared));
        assert!(!lm.holds_lock(T1, page(0), LockMode::Exclusive));
    }

    #[test]
    fn test_sole_shared_holder_upgrades() {
        let lm = LockManager::new(Duration::from_millis(50));
        lm.acquire(T1, page(0), LockMode::Shared).unwrap();
        lm.acquire(T1, page(0), LockMode::Exclusive).unwrap();
        assert_eq!(lm.lock_mode(T1, page(0)), Some(LockMode::Exclusive));
        // asking for shared again keeps the exclusive lock
        lm.acquire(T1, page(0), LockMode::Shared).unwrap();
        assert_eq!(lm.lock_mode(T1, page(0)), Some(LockMode::Exclusive));
    }

    #[test]
    fn test_upgrade_blocked_by_other_reader_times_out() {
        let lm = LockManager::new(Duration::from_millis(50));
        lm.acquire(T1, page(0), LockMode::Shared).unwrap();
        lm.acquire(T2, page(0), LockMode::Shared).unwrap();
        assert_eq!(
            lm.acquire(T1, page(0), LockMode::Exclusive),
            Err(LockError::Timeout)
        );
        // the failed upgrade leaves the shared lock in place
        assert_eq!(lm.lock_mode(T1, page(0)), Some(LockMode::Shared));
    }

    #[test]
    fn test_exclusive_waits_for_release() {
        let lm = Arc::new(LockManager::new(Duration::from_secs(5)));
        lm.acquire(T1, page(0), LockMode::Shared).unwrap();

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let lm = lm.clone();
            thread::spawn(move || {
                let result = lm.acquire(T2, page(0), LockMode::Exclusive);
                tx.send(()).unwrap();
                result
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        lm.release_all(T1);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap().unwrap();
        assert!(lm.holds_lock(T2, page(0), LockMode::Exclusive));
    }

    #[test]
    fn test_deadlock_is_detected() {
        let lm = Arc::new(LockManager::new(Duration::from_secs(10)));
        lm.acquire(T1, page(0), LockMode::Exclusive).unwrap();
        lm.acquire(T2, page(1), LockMode::Exclusive).unwrap();

        let waiter = {
            let lm = lm.clone();
            thread::spawn(move || lm.acquire(T1, page(1), LockMode::Exclusive))
        };
        // let T1 register its wait before T2 closes the cycle
        while lm.table.lock().waits_for.get(&T1).is_none() {
            thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(
            lm.acquire(T2, page(0), LockMode::Exclusive),
            Err(LockError::Deadlock)
        );
        lm.release_all(T2);
        waiter.join().unwrap().unwrap();
        assert!(lm.holds_lock(T1, page(1), LockMode::Exclusive));
    }

    #[test]
    fn test_release_and_release_all() {
        let lm = LockManager::new(Duration::from_millis(50));
        lm.acquire(T3, page(0), LockMode::Shared).unwrap();
        lm.acquire(T3, page(1), LockMode::Exclusive).unwrap();
        lm.release(T3, page(0));
        lm.release(T3, page(9));
        assert!(!lm.is_locked(page(0)));
        assert!(lm.is_locked(page(1)));
        assert_eq!(lm.pages_locked_by(T3), vec![page(1)]);

        lm.release_all(T3);
        assert!(!lm.is_locked(page(1)));
        assert!(lm.pages_locked_by(T3).is_empty());
    }
}
