//! Buffer pool manager.

use crate::frame::{Frame, FrameId};
use crate::hash_index::ExtendibleHashIndex;
use crate::replacer::{LruKReplacer, Replacer};
use crate::store::DiskStore;
use parking_lot::Mutex;
use quarry_common::page::{PageId, PAGE_SIZE};
use quarry_common::{QuarryError, Result, StorageConfig};
use std::sync::Arc;
use sysinfo::System;
use tracing::debug;

/// Key/value pairs per page-table bucket.
const PAGE_TABLE_BUCKET_SIZE: usize = 8;

/// Configuration for the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub num_frames: usize,
    /// Access-history depth for the LRU-K replacer.
    pub replacer_k: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            num_frames: 1024,
            replacer_k: 10,
        }
    }
}

impl From<&StorageConfig> for BufferPoolConfig {
    fn from(config: &StorageConfig) -> Self {
        Self {
            num_frames: config.buffer_pool_pages,
            replacer_k: config.replacer_k,
        }
    }
}

/// State serialized under the pool latch.
struct PoolState {
    /// Frames holding no page.
    free_list: Vec<FrameId>,
    /// Monotonic allocator for fresh page IDs.
    next_page_id: u64,
}

/// Buffer pool manager.
///
/// Manages a fixed-size pool of page frames with:
/// - Page ID to frame ID mapping (extendible hash directory)
/// - Free frame list for empty frames
/// - LRU-K replacement for eviction
/// - Pin counting and dirty tracking per frame
///
/// Pages are read from and written back to the `DiskStore` the pool is
/// constructed with. Every public operation serializes on the pool latch;
/// the directory and replacer latches are only ever taken inside it. A
/// pinned frame's data stays accessible through the frame's own lock
/// without touching the pool latch.
pub struct BufferPool {
    /// Configuration.
    config: BufferPoolConfig,
    /// Array of buffer frames.
    frames: Vec<Frame>,
    /// Page ID to frame ID mapping.
    page_table: ExtendibleHashIndex<PageId, FrameId>,
    /// Page replacement policy.
    replacer: LruKReplacer,
    /// Backing store for pages.
    disk: Arc<dyn DiskStore>,
    /// Pool latch: free list and page ID allocator.
    state: Mutex<PoolState>,
}

impl BufferPool {
    /// Creates a new buffer pool over the given store.
    pub fn new(config: BufferPoolConfig, disk: Arc<dyn DiskStore>) -> Self {
        assert!(config.num_frames > 0, "pool must have at least one frame");
        let num_frames = config.num_frames;

        let frames: Vec<_> = (0..num_frames)
            .map(|i| Frame::new(FrameId(i as u32)))
            .collect();

        // All frames start in the free list.
        let free_list: Vec<_> = (0..num_frames).map(|i| FrameId(i as u32)).collect();

        Self {
            replacer: LruKReplacer::new(num_frames, config.replacer_k),
            config,
            frames,
            page_table: ExtendibleHashIndex::new(PAGE_TABLE_BUCKET_SIZE),
            disk,
            state: Mutex::new(PoolState {
                free_list,
                next_page_id: 0,
            }),
        }
    }

    /// Creates a buffer pool sized to 25% of available system RAM.
    ///
    /// Queries the system for available memory and allocates 25% of it
    /// for the buffer pool. Minimum 1,000 frames to ensure useful caching
    /// even on low-memory systems.
    pub fn auto_sized(disk: Arc<dyn DiskStore>, replacer_k: usize) -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let target_bytes = available_bytes / 4;
        let num_frames = (target_bytes / PAGE_SIZE).max(1_000);

        Self::new(
            BufferPoolConfig {
                num_frames,
                replacer_k,
            },
            disk,
        )
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.config.num_frames
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.state.lock().free_list.len()
    }

    /// Returns the number of pages currently resident in the pool.
    pub fn page_count(&self) -> usize {
        self.page_table.len()
    }

    /// Checks if a page is resident in the buffer pool.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.page_table.contains(&page_id)
    }

    /// Allocates a fresh page and pins it.
    ///
    /// The new page's frame is zero-filled and pinned with count 1; the
    /// caller must `unpin_page` when done. Fails with
    /// [`QuarryError::PoolExhausted`] when no frame is free and none is
    /// evictable.
    pub fn new_page(&self) -> Result<(PageId, &Frame)> {
        let mut state = self.state.lock();

        let frame_id = self.acquire_frame(&mut state)?;
        let frame = &self.frames[frame_id.0 as usize];
        frame.reset();

        let page_id = PageId::new(state.next_page_id);
        state.next_page_id += 1;

        if let Err(err) = self.page_table.insert(page_id, frame_id) {
            frame.reset();
            state.free_list.push(frame_id);
            return Err(err);
        }

        frame.set_page_id(Some(page_id));
        frame.pin();
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);

        Ok((page_id, frame))
    }

    /// Fetches a page, reading it from the store if not resident.
    ///
    /// The page is pinned before being returned; the caller must
    /// `unpin_page` when done. Fails with [`QuarryError::PoolExhausted`]
    /// when the page is not resident, no frame is free, and none is
    /// evictable.
    pub fn fetch_page(&self, page_id: PageId) -> Result<&Frame> {
        let mut state = self.state.lock();

        if let Some(frame_id) = self.page_table.find(&page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            frame.pin();
            self.replacer.access_and_pin(frame_id);
            return Ok(frame);
        }

        let frame_id = self.acquire_frame(&mut state)?;
        let frame = &self.frames[frame_id.0 as usize];

        {
            let mut data = frame.write_data();
            if let Err(err) = self.disk.read_page(page_id, &mut data) {
                drop(data);
                frame.reset();
                state.free_list.push(frame_id);
                return Err(err);
            }
        }

        if let Err(err) = self.page_table.insert(page_id, frame_id) {
            frame.reset();
            state.free_list.push(frame_id);
            return Err(err);
        }

        frame.set_page_id(Some(page_id));
        frame.set_dirty(false);
        frame.pin();
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);

        Ok(frame)
    }

    /// Acquires a frame for a new residency: free list first, then the
    /// replacer. A dirty victim is written back before its mapping is
    /// dropped.
    fn acquire_frame(&self, state: &mut PoolState) -> Result<FrameId> {
        if let Some(frame_id) = state.free_list.pop() {
            return Ok(frame_id);
        }

        let Some(victim) = self.replacer.evict() else {
            return Err(QuarryError::PoolExhausted);
        };
        let frame = &self.frames[victim.0 as usize];

        if frame.is_dirty() {
            if let Some(old_page) = frame.page_id() {
                let data = frame.read_data();
                if let Err(err) = self.disk.write_page(old_page, &data) {
                    drop(data);
                    // The mapping still reflects the last successful disk
                    // state; hand the frame back to the replacer.
                    self.replacer.record_access(victim);
                    self.replacer.set_evictable(victim, true);
                    return Err(err);
                }
                drop(data);
                frame.set_dirty(false);
                debug!(page = %old_page, frame = %victim, "wrote back dirty page before frame reuse");
            }
        }

        if let Some(old_page) = frame.page_id() {
            self.page_table.remove(&old_page);
        }

        Ok(victim)
    }

    /// Unpins a page, optionally marking it dirty.
    ///
    /// Dirtiness accumulates: `is_dirty = false` never clears an earlier
    /// mark. When the pin count reaches 0 the frame becomes evictable.
    /// Returns false if the page is not resident or was not pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let _state = self.state.lock();

        let Some(frame_id) = self.page_table.find(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.0 as usize];

        debug_assert!(frame.pin_count() > 0, "unpin of unpinned {page_id}");
        if frame.pin_count() == 0 {
            return false;
        }

        if is_dirty {
            frame.set_dirty(true);
        }
        if frame.unpin() == 0 {
            self.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Writes a resident page to the store and clears its dirty flag.
    ///
    /// The write is unconditional; pin count and evictability are
    /// untouched. Returns Ok(false) if the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let _state = self.state.lock();

        let Some(frame_id) = self.page_table.find(&page_id) else {
            return Ok(false);
        };
        let frame = &self.frames[frame_id.0 as usize];

        let data = frame.read_data();
        self.disk.write_page(page_id, &data)?;
        drop(data);
        frame.set_dirty(false);
        Ok(true)
    }

    /// Writes every resident page to the store, clearing dirty flags.
    pub fn flush_all_pages(&self) -> Result<()> {
        let _state = self.state.lock();

        let mut resident = Vec::new();
        self.page_table.for_each(|page_id, frame_id| {
            resident.push((*page_id, *frame_id));
            true
        });

        for (page_id, frame_id) in resident {
            let frame = &self.frames[frame_id.0 as usize];
            let data = frame.read_data();
            self.disk.write_page(page_id, &data)?;
            drop(data);
            frame.set_dirty(false);
        }
        Ok(())
    }

    /// Deletes a page from the pool and deallocates it in the store.
    ///
    /// Returns Ok(true) if the page is not resident (nothing to do) or was
    /// removed; Ok(false) if it is resident and pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut state = self.state.lock();

        let Some(frame_id) = self.page_table.find(&page_id) else {
            return Ok(true);
        };
        let frame = &self.frames[frame_id.0 as usize];

        if frame.is_pinned() {
            return Ok(false);
        }

        self.page_table.remove(&page_id);
        self.replacer.remove(frame_id);
        frame.reset();
        state.free_list.push(frame_id);
        self.disk.deallocate_page(page_id)?;
        debug!(page = %page_id, frame = %frame_id, "deleted page");
        Ok(true)
    }

    /// Returns an RAII read handle for a page, pinning it for the guard's
    /// lifetime.
    pub fn read_page(&self, page_id: PageId) -> Result<PageReadGuard<'_>> {
        let frame = self.fetch_page(page_id)?;
        Ok(PageReadGuard {
            pool: self,
            page_id,
            frame,
        })
    }

    /// Returns an RAII write handle for a page, pinning it for the guard's
    /// lifetime.
    pub fn write_page(&self, page_id: PageId) -> Result<PageWriteGuard<'_>> {
        let frame = self.fetch_page(page_id)?;
        Ok(PageWriteGuard {
            pool: self,
            page_id,
            frame,
        })
    }

    /// Returns statistics about the buffer pool.
    pub fn stats(&self) -> BufferPoolStats {
        let mut pinned_frames = 0;
        let mut dirty_frames = 0;

        self.page_table.for_each(|_, frame_id| {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_pinned() {
                pinned_frames += 1;
            }
            if frame.is_dirty() {
                dirty_frames += 1;
            }
            true
        });

        BufferPoolStats {
            total_frames: self.config.num_frames,
            free_frames: self.free_count(),
            used_frames: self.page_table.len(),
            pinned_frames,
            dirty_frames,
        }
    }
}

/// Statistics about the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Number of free frames.
    pub free_frames: usize,
    /// Number of frames holding pages.
    pub used_frames: usize,
    /// Number of pinned frames.
    pub pinned_frames: usize,
    /// Number of dirty frames.
    pub dirty_frames: usize,
}

/// RAII guard for reading a page.
pub struct PageReadGuard<'a> {
    pool: &'a BufferPool,
    page_id: PageId,
    frame: &'a Frame,
}

impl<'a> PageReadGuard<'a> {
    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the page data.
    pub fn data(&self) -> parking_lot::RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.frame.read_data()
    }
}

impl Drop for PageReadGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin_page(self.page_id, false);
    }
}

/// RAII guard for writing a page.
pub struct PageWriteGuard<'a> {
    pool: &'a BufferPool,
    page_id: PageId,
    frame: &'a Frame,
}

impl<'a> PageWriteGuard<'a> {
    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns mutable access to page data.
    pub fn data_mut(&self) -> parking_lot::RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.frame.write_data()
    }

    /// Marks the page as dirty.
    pub fn set_dirty(&self) {
        self.frame.set_dirty(true);
    }
}

impl Drop for PageWriteGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin_page(self.page_id, self.frame.is_dirty());
    }
}
