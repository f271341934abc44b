//! Page identity and sizing for QuarryDB storage.

use serde::{Deserialize, Serialize};

/// Size of every on-disk page and every buffer frame, in bytes (4 KB).
pub const PAGE_SIZE: usize = 4096;

/// Unique identifier for an on-disk page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageId(pub u64);

impl PageId {
    /// Sentinel for "no page". Never handed out by an allocator.
    pub const INVALID: PageId = PageId(u64::MAX);

    /// Creates a new PageId.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns true if this is a valid page ID.
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }

    /// Returns the PageId as a u64 for compact storage.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "page:{}", self.0)
    }
}
