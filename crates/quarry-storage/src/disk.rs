//! Disk manager for page-level file I/O.

use parking_lot::Mutex;
use quarry_buffer::DiskStore;
use quarry_common::page::{PageId, PAGE_SIZE};
use quarry_common::{Result, StorageConfig};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Configuration for the disk manager.
#[derive(Debug, Clone)]
pub struct DiskManagerConfig {
    /// Base directory for the data file.
    pub data_dir: PathBuf,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            fsync_enabled: true,
        }
    }
}

impl From<&StorageConfig> for DiskManagerConfig {
    fn from(config: &StorageConfig) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            fsync_enabled: config.fsync_enabled,
        }
    }
}

struct DiskState {
    /// The data file handle.
    file: File,
    /// Number of pages the file currently spans.
    num_pages: u64,
    /// Deallocated page IDs available for reuse.
    free_pages: Vec<PageId>,
}

/// Manages reading and writing pages in a single data file.
///
/// The file is a flat array of PAGE_SIZE pages addressed by `PageId`.
/// Reads beyond the current end of file return zeroed pages, so page IDs
/// handed out by an allocator are readable before their first write.
/// Deallocated IDs are tracked in memory and handed back by
/// `allocate_page` before the file is extended.
pub struct DiskManager {
    /// Configuration.
    config: DiskManagerConfig,
    /// File handle and allocation state.
    state: Mutex<DiskState>,
}

impl DiskManager {
    /// Data file name within the data directory.
    const DATA_FILE: &'static str = "pages.dat";

    /// Creates a disk manager, opening or creating the data file.
    pub fn new(config: DiskManagerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let path = config.data_dir.join(Self::DATA_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let file_size = file.metadata()?.len();
        let num_pages = file_size / PAGE_SIZE as u64;
        debug!(path = %path.display(), num_pages, "opened page store");

        Ok(Self {
            config,
            state: Mutex::new(DiskState {
                file,
                num_pages,
                free_pages: Vec::new(),
            }),
        })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Returns the number of pages the data file currently spans.
    pub fn num_pages(&self) -> u64 {
        self.state.lock().num_pages
    }

    /// Flushes all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        let state = self.state.lock();
        state.file.sync_all()?;
        Ok(())
    }
}

impl DiskStore for DiskManager {
    fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        let mut state = self.state.lock();

        // Pages past the end of file have never been written: all zeroes.
        if page_id.0 >= state.num_pages {
            buf.fill(0);
            return Ok(());
        }

        let offset = page_id.0 * PAGE_SIZE as u64;
        state.file.seek(SeekFrom::Start(offset))?;
        state.file.read_exact(buf)?;
        Ok(())
    }

    fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut state = self.state.lock();

        let offset = page_id.0 * PAGE_SIZE as u64;
        state.file.seek(SeekFrom::Start(offset))?;
        state.file.write_all(data)?;

        if self.config.fsync_enabled {
            state.file.sync_all()?;
        }

        // Track file growth if the write extended it.
        if page_id.0 >= state.num_pages {
            state.num_pages = page_id.0 + 1;
        }
        Ok(())
    }

    fn allocate_page(&self) -> Result<PageId> {
        let mut state = self.state.lock();

        if let Some(page_id) = state.free_pages.pop() {
            return Ok(page_id);
        }

        let page_id = PageId::new(state.num_pages);

        // Write an empty page to extend the file.
        let offset = page_id.0 * PAGE_SIZE as u64;
        state.file.seek(SeekFrom::Start(offset))?;
        state.file.write_all(&[0u8; PAGE_SIZE])?;
        if self.config.fsync_enabled {
            state.file.sync_all()?;
        }

        state.num_pages = page_id.0 + 1;
        Ok(page_id)
    }

    fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        let mut state = self.state.lock();
        state.free_pages.push(page_id);
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let state = self.state.lock();
        let _ = state.file.sync_all();
    }
}
