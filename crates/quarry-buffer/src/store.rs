//! Disk collaborator interface consumed by the buffer pool.

use parking_lot::Mutex;
use quarry_common::page::{PageId, PAGE_SIZE};
use quarry_common::Result;
use std::collections::HashMap;

/// Backing store for fixed-size pages.
///
/// The buffer pool reads pages through this trait on a cache miss and
/// writes dirty pages back through it on eviction and flush. All calls
/// are synchronous; `write_page` is durable on return.
pub trait DiskStore: Send + Sync {
    /// Fills `buf` with the page's bytes.
    fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()>;

    /// Persists the page's bytes.
    fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()>;

    /// Reserves a fresh page ID in the store.
    fn allocate_page(&self) -> Result<PageId>;

    /// Marks a page ID reclaimable.
    fn deallocate_page(&self, page_id: PageId) -> Result<()>;
}

struct MemoryStoreInner {
    pages: HashMap<PageId, Box<[u8; PAGE_SIZE]>>,
    next_page_id: u64,
    free: Vec<PageId>,
}

/// In-memory page store.
///
/// Pages never written read back as zeroes, so it accepts any page ID the
/// pool asks for. Useful for tests and ephemeral embedding.
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

impl MemoryStore {
    /// Creates an empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryStoreInner {
                pages: HashMap::new(),
                next_page_id: 0,
                free: Vec::new(),
            }),
        }
    }

    /// Number of pages that have been written at least once.
    pub fn page_count(&self) -> usize {
        self.inner.lock().pages.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskStore for MemoryStore {
    fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        let inner = self.inner.lock();
        match inner.pages.get(&page_id) {
            Some(data) => buf.copy_from_slice(&**data),
            None => buf.fill(0),
        }
        Ok(())
    }

    fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut inner = self.inner.lock();
        let mut page = Box::new([0u8; PAGE_SIZE]);
        page.copy_from_slice(data);
        inner.pages.insert(page_id, page);
        Ok(())
    }

    fn allocate_page(&self) -> Result<PageId> {
        let mut inner = self.inner.lock();
        if let Some(page_id) = inner.free.pop() {
            return Ok(page_id);
        }
        let page_id = PageId::new(inner.next_page_id);
        inner.next_page_id += 1;
        Ok(page_id)
    }

    fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.pages.remove(&page_id);
        inner.free.push(page_id);
        Ok(())
    }
}
