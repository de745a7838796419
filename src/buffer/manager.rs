//! Buffer manager: a bounded pool of frames caching disk pages.
//!
//! A single latch serializes pin/unpin/flush over the frame table and
//! the page table; page *content* is not covered by the latch. Callers
//! coordinate content access through pin counts and MVCC timestamps.

use crate::buffer::frame::{Frame, FrameInfo};
use crate::buffer::replacement::{
    create_strategy, ReplacementPolicy, ReplacementStrategy,
};
use crate::common::{FrameId, PageId, INVALID_PAGE_ID};
use crate::error::{DbError, Result};
use crate::storage::disk::StorageManager;
use crate::storage::page::PageKind;
use parking_lot::{Mutex, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

// ============================================================================
// Page handle
// ============================================================================

/// Handle to a pinned page. The bytes behind it stay valid until the
/// matching [`BufferManager::unpin`]; callers that need tuples to outlive
/// the pin must copy them out first.
#[derive(Debug)]
pub struct PageRef {
    page_id: PageId,
    frame: Arc<Frame>,
}

impl PageRef {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.frame.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Box<[u8]>> {
        self.frame.write()
    }
}

// ============================================================================
// Buffer manager
// ============================================================================

struct PoolState {
    infos: Vec<FrameInfo>,
    page_table: HashMap<PageId, FrameId>,
    strategy: Box<dyn ReplacementStrategy>,
}

/// Counters snapshot for observability and tests.
#[derive(Debug, Clone, Default)]
pub struct BufferPoolStats {
    pub total_frames: usize,
    pub resident_pages: usize,
    pub pinned_frames: usize,
    pub dirty_frames: usize,
    pub hits: u64,
    pub misses: u64,
    pub page_writes: u64,
    pub evictions: u64,
}

/// In-memory pool of frames holding pages, with pin/unpin discipline and
/// pluggable victim selection.
pub struct BufferManager {
    storage: Arc<StorageManager>,
    frames: Vec<Arc<Frame>>,
    state: Mutex<PoolState>,
    pin_sequence: AtomicU64,
    evicted_frames: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    page_writes: AtomicU64,
}

impl BufferManager {
    pub fn builder() -> BufferManagerBuilder {
        BufferManagerBuilder::new()
    }

    /// Pin `page_id`, loading it from disk on a miss (evicting a victim
    /// if the pool is full).
    pub fn pin(&self, page_id: PageId) -> Result<PageRef> {
        let mut state = self.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let sequence = self.next_pin_sequence();
            state.infos[frame_id].record_pin(sequence);
            state.strategy.on_pin(frame_id, sequence);
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(page_id, frame_id, "pin hit");
            return Ok(self.handle(page_id, frame_id));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let frame_id = match state.infos.iter().position(|info| !info.is_occupied()) {
            Some(free) => free,
            None => self.evict(&mut state)?,
        };

        // The frame is unoccupied here, so taking the data lock cannot
        // block on a content reader.
        {
            let mut data = self.frames[frame_id].write();
            self.storage.read_page(page_id, &mut data)?;
        }

        let sequence = self.next_pin_sequence();
        state.infos[frame_id].occupy(page_id, sequence);
        state.page_table.insert(page_id, frame_id);
        state.strategy.on_pin(frame_id, sequence);
        trace!(page_id, frame_id, "pin miss, loaded from disk");
        Ok(self.handle(page_id, frame_id))
    }

    /// Drop one pin of `page_id`, folding `is_dirty` into the frame's
    /// dirty bit (a true bit is never cleared by unpin).
    pub fn unpin(&self, page_id: PageId, is_dirty: bool) -> Result<()> {
        let mut state = self.state.lock();
        let frame_id = *state
            .page_table
            .get(&page_id)
            .ok_or(DbError::PageNotPinned(page_id))?;
        let info = &mut state.infos[frame_id];
        if info.pin_count() == 0 {
            return Err(DbError::PageNotPinned(page_id));
        }
        info.record_unpin(is_dirty);
        Ok(())
    }

    /// Allocate a fresh page through the storage manager and return it
    /// pinned.
    pub fn allocate(&self, kind: PageKind) -> Result<PageRef> {
        let page_id = self.storage.allocate(kind)?;
        self.pin(page_id)
    }

    /// Write every dirty, unpinned frame back to disk and clear its
    /// dirty bit.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        for frame_id in 0..state.infos.len() {
            let info = &state.infos[frame_id];
            if !info.is_dirty() || info.is_pinned() {
                continue;
            }
            let Some(page_id) = info.page_id() else {
                continue;
            };
            let data = self.frames[frame_id].read();
            self.storage.write_page(page_id, &data)?;
            drop(data);
            state.infos[frame_id].clear_dirty();
            self.page_writes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Install a different replacement strategy.
    pub fn set_replacement_strategy(&self, strategy: Box<dyn ReplacementStrategy>) {
        let mut state = self.state.lock();
        debug!(name = strategy.name(), "replacement strategy installed");
        state.strategy = strategy;
    }

    /// Number of successful evictions since construction.
    pub fn evicted_frames(&self) -> u64 {
        self.evicted_frames.load(Ordering::Relaxed)
    }

    /// Snapshot of the pool counters.
    pub fn stats(&self) -> BufferPoolStats {
        let state = self.state.lock();
        BufferPoolStats {
            total_frames: state.infos.len(),
            resident_pages: state.page_table.len(),
            pinned_frames: state.infos.iter().filter(|info| info.is_pinned()).count(),
            dirty_frames: state.infos.iter().filter(|info| info.is_dirty()).count(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            page_writes: self.page_writes.load(Ordering::Relaxed),
            evictions: self.evicted_frames.load(Ordering::Relaxed),
        }
    }

    /// Whether `page_id` currently occupies a frame.
    pub fn is_resident(&self, page_id: PageId) -> bool {
        self.state.lock().page_table.contains_key(&page_id)
    }

    /// Pin count of a resident page, 0 otherwise.
    pub fn pin_count(&self, page_id: PageId) -> u32 {
        let state = self.state.lock();
        state
            .page_table
            .get(&page_id)
            .map(|&frame_id| state.infos[frame_id].pin_count())
            .unwrap_or(0)
    }

    pub fn storage(&self) -> &Arc<StorageManager> {
        &self.storage
    }

    fn handle(&self, page_id: PageId, frame_id: FrameId) -> PageRef {
        PageRef {
            page_id,
            frame: self.frames[frame_id].clone(),
        }
    }

    fn next_pin_sequence(&self) -> u64 {
        self.pin_sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Free up a frame by evicting a victim chosen by the strategy.
    fn evict(&self, state: &mut PoolState) -> Result<FrameId> {
        let PoolState {
            infos, strategy, ..
        } = state;
        let victim = strategy.choose_victim(infos).ok_or(DbError::NoFreeFrame)?;

        let info = &state.infos[victim];
        let old_page = info.page_id().unwrap_or(INVALID_PAGE_ID);
        if info.is_pinned() {
            return Err(DbError::EvictedPagePinned(old_page));
        }

        if info.is_dirty() {
            warn!(page_id = old_page, frame_id = victim, "flushing dirty victim");
            let data = self.frames[victim].read();
            self.storage.write_page(old_page, &data)?;
            self.page_writes.fetch_add(1, Ordering::Relaxed);
        }

        state.page_table.remove(&old_page);
        state.infos[victim].vacate();
        self.evicted_frames.fetch_add(1, Ordering::Relaxed);
        debug!(page_id = old_page, frame_id = victim, "evicted page");
        Ok(victim)
    }
}

impl Drop for BufferManager {
    fn drop(&mut self) {
        let state = self.state.lock();
        for (frame_id, info) in state.infos.iter().enumerate() {
            if !info.is_dirty() {
                continue;
            }
            let Some(page_id) = info.page_id() else {
                continue;
            };
            let data = self.frames[frame_id].read();
            if let Err(e) = self.storage.write_page(page_id, &data) {
                error!(page_id, "flush on shutdown failed: {e}");
            }
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`BufferManager`].
pub struct BufferManagerBuilder {
    frame_count: usize,
    policy: ReplacementPolicy,
    lru_k: usize,
}

impl BufferManagerBuilder {
    pub fn new() -> Self {
        Self {
            frame_count: 1024,
            policy: ReplacementPolicy::Lru,
            lru_k: 2,
        }
    }

    /// Number of frames in the pool.
    pub fn frame_count(mut self, frames: usize) -> Self {
        self.frame_count = frames;
        self
    }

    pub fn replacement_policy(mut self, policy: ReplacementPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// `k` for the LRU-K policy.
    pub fn lru_k(mut self, k: usize) -> Self {
        self.lru_k = k;
        self
    }

    pub fn build(self, storage: Arc<StorageManager>) -> BufferManager {
        let frames = (0..self.frame_count).map(|_| Arc::new(Frame::new())).collect();
        let strategy = create_strategy(self.policy, self.lru_k, self.frame_count);
        BufferManager {
            storage,
            frames,
            state: Mutex::new(PoolState {
                infos: vec![FrameInfo::default(); self.frame_count],
                page_table: HashMap::new(),
                strategy,
            }),
            pin_sequence: AtomicU64::new(0),
            evicted_frames: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            page_writes: AtomicU64::new(0),
        }
    }
}

impl Default for BufferManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
