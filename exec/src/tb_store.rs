use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard,
    RwLockWriteGuard,
};

use dbt_core::{TbId, TbKey, TranslationBlock};
use dbt_frontend::GUEST_PAGE_SIZE;
use tracing::debug;

/// Thread-safe storage and key lookup for translation blocks.
///
/// Blocks are appended to an arena and never move; a [`TbId`] stays
/// meaningful until the next [`flush`](Self::flush). The key map holds
/// only valid blocks. Link state lives in each block's own lock, and
/// at most one such lock is held at a time.
pub struct TbStore {
    tbs: RwLock<Vec<Arc<TranslationBlock>>>,
    map: Mutex<HashMap<TbKey, TbId>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TbStore {
    pub fn new() -> Self {
        Self {
            tbs: RwLock::new(Vec::new()),
            map: Mutex::new(HashMap::new()),
        }
    }

    fn arena(&self) -> RwLockReadGuard<'_, Vec<Arc<TranslationBlock>>> {
        self.tbs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn arena_mut(&self) -> RwLockWriteGuard<'_, Vec<Arc<TranslationBlock>>> {
        self.tbs.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Valid block for `key`, if one is cached.
    pub fn lookup(&self, key: TbKey) -> Option<TbId> {
        lock(&self.map).get(&key).copied()
    }

    /// Publish a finalized block.
    ///
    /// The first block inserted for a key wins: a racing duplicate is
    /// dropped and the existing id returned.
    pub fn insert(&self, tb: TranslationBlock) -> TbId {
        let mut map = lock(&self.map);
        if let Some(&id) = map.get(&tb.key) {
            debug!(pc = tb.key.pc, id, "tb insert lost race");
            return id;
        }
        let key = tb.key;
        let mut tbs = self.arena_mut();
        let id = tbs.len();
        tbs.push(Arc::new(tb));
        map.insert(key, id);
        debug!(pc = key.pc, flags = key.flags, id, "tb insert");
        id
    }

    pub fn get(&self, id: TbId) -> Option<Arc<TranslationBlock>> {
        self.arena().get(id).cloned()
    }

    /// Block that `src`'s `slot` is chained to, if any.
    pub fn linked(&self, src: TbId, slot: usize) -> Option<TbId> {
        let tb = self.get(src)?;
        let dest = lock(&tb.jmp).jmp_dest[slot];
        dest
    }

    /// Chain `src`'s direct exit `slot` to `dst`.
    ///
    /// Returns `false` without linking when either block is invalid or
    /// the slot's exit edge names a different key than `dst`.
    pub fn add_jump(&self, src: TbId, slot: usize, dst: TbId) -> bool {
        let (Some(src_tb), Some(dst_tb)) = (self.get(src), self.get(dst))
        else {
            return false;
        };
        if !src_tb.is_valid() || !dst_tb.is_valid() {
            return false;
        }
        if src_tb.direct_target(slot) != Some(dst_tb.key) {
            return false;
        }
        {
            let mut jmp = lock(&src_tb.jmp);
            if jmp.jmp_dest[slot] == Some(dst) {
                return true;
            }
            jmp.jmp_dest[slot] = Some(dst);
        }
        lock(&dst_tb.jmp).jmp_list.push((src, slot));
        debug!(src, slot, dst, "tb link");
        true
    }

    /// Mark a block invalid, unlink its incoming and outgoing edges
    /// and drop it from the key map.
    pub fn invalidate(&self, id: TbId) {
        let Some(tb) = self.get(id) else {
            return;
        };
        if tb.invalid.swap(true, Ordering::AcqRel) {
            return;
        }

        // 1. Unlink incoming edges.
        let incoming = std::mem::take(&mut lock(&tb.jmp).jmp_list);
        for (src, slot) in incoming {
            if let Some(src_tb) = self.get(src) {
                let mut jmp = lock(&src_tb.jmp);
                if jmp.jmp_dest[slot] == Some(id) {
                    jmp.jmp_dest[slot] = None;
                }
            }
        }

        // 2. Unlink outgoing edges.
        let outgoing = {
            let mut jmp = lock(&tb.jmp);
            [jmp.jmp_dest[0].take(), jmp.jmp_dest[1].take()]
        };
        for (slot, dst) in outgoing.into_iter().enumerate() {
            let Some(dst_tb) = dst.and_then(|d| self.get(d)) else {
                continue;
            };
            lock(&dst_tb.jmp)
                .jmp_list
                .retain(|&(s, n)| !(s == id && n == slot));
        }

        // 3. Remove from the key map.
        let mut map = lock(&self.map);
        if map.get(&tb.key) == Some(&id) {
            map.remove(&tb.key);
        }
        debug!(pc = tb.key.pc, id, "tb invalidate");
    }

    /// Invalidate every valid block whose guest bytes overlap the
    /// physical page containing `page`. Returns how many were hit.
    pub fn invalidate_phys_page(&self, page: u64) -> usize {
        let base = page & !(GUEST_PAGE_SIZE - 1);
        let hits: Vec<TbId> = self
            .arena()
            .iter()
            .enumerate()
            .filter(|(_, tb)| {
                tb.is_valid() && tb.overlaps_page(base, GUEST_PAGE_SIZE)
            })
            .map(|(id, _)| id)
            .collect();
        for &id in &hits {
            self.invalidate(id);
        }
        hits.len()
    }

    /// Drop every block. Outstanding `Arc`s stay usable but are marked
    /// invalid, and old ids no longer resolve.
    pub fn flush(&self) {
        let mut map = lock(&self.map);
        let mut tbs = self.arena_mut();
        for tb in tbs.iter() {
            tb.invalid.store(true, Ordering::Release);
        }
        debug!(count = tbs.len(), "tb flush");
        tbs.clear();
        map.clear();
    }

    pub fn len(&self) -> usize {
        self.arena().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TbStore {
    fn default() -> Self {
        Self::new()
    }
}
