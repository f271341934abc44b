//! Buffer pool management for QuarryDB.
//!
//! This crate provides in-memory page caching with:
//! - Fixed-size buffer pool with configurable page count
//! - Extendible hashing page directory
//! - LRU-K eviction policy for cache management
//! - Pin counting for concurrent access
//! - Dirty page tracking with write-back on eviction

mod frame;
mod hash_index;
mod pool;
mod replacer;
mod store;

pub use frame::{Frame, FrameId};
pub use hash_index::ExtendibleHashIndex;
pub use pool::{BufferPool, BufferPoolConfig, BufferPoolStats, PageReadGuard, PageWriteGuard};
pub use replacer::{LruKReplacer, Replacer};
pub use store::{DiskStore, MemoryStore};
