//! Page replacement policies for the buffer pool.

use crate::frame::FrameId;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Trait for page replacement algorithms.
pub trait Replacer: Send + Sync {
    /// Records that the given frame was accessed.
    fn record_access(&self, frame_id: FrameId);

    /// Marks a frame as evictable (unpinned) or not.
    ///
    /// Ignored for frames with no recorded access.
    fn set_evictable(&self, frame_id: FrameId, evictable: bool);

    /// Combined operation: records access and pins the frame (sets
    /// non-evictable). Single lock acquisition instead of two calls.
    fn access_and_pin(&self, frame_id: FrameId);

    /// Selects a victim frame for eviction, dropping its access history.
    ///
    /// Returns None if no frames are evictable.
    fn evict(&self) -> Option<FrameId>;

    /// Removes an evictable frame's record from the replacer.
    fn remove(&self, frame_id: FrameId);

    /// Returns the number of evictable frames.
    fn size(&self) -> usize;
}

/// Per-frame access record.
struct FrameRecord {
    /// Up to `k` most recent access timestamps, oldest first. Empty means
    /// the frame is not tracked.
    history: VecDeque<u64>,
    /// Timestamp of the frame's very first access since it was last
    /// tracked; tie-breaker for victim selection.
    first_access: u64,
    /// Whether the frame may be chosen as a victim.
    evictable: bool,
}

impl FrameRecord {
    fn new(k: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(k),
            first_access: 0,
            evictable: false,
        }
    }
}

struct LruKInner {
    records: Vec<FrameRecord>,
    /// Logical clock, advanced on every recorded access.
    clock: u64,
    /// Number of tracked, evictable frames.
    curr_size: usize,
}

/// LRU-K replacement policy.
///
/// The victim is the evictable frame with the largest backward k-distance:
/// the gap between now and its k-th most recent access. Frames with fewer
/// than `k` recorded accesses have infinite k-distance and are evicted
/// first, ordered by their first access. Finite-distance ties also break
/// toward the earlier first access.
pub struct LruKReplacer {
    num_frames: usize,
    k: usize,
    inner: Mutex<LruKInner>,
}

impl LruKReplacer {
    /// Creates a replacer tracking `num_frames` frames with history depth `k`.
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k > 0, "history depth k must be positive");
        Self {
            num_frames,
            k,
            inner: Mutex::new(LruKInner {
                records: (0..num_frames).map(|_| FrameRecord::new(k)).collect(),
                clock: 0,
                curr_size: 0,
            }),
        }
    }

    /// Returns the total capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.num_frames
    }

    fn record_access_locked(&self, inner: &mut LruKInner, frame_id: FrameId) {
        let record = &mut inner.records[frame_id.0 as usize];
        if record.history.is_empty() {
            record.first_access = inner.clock;
        }
        record.history.push_back(inner.clock);
        if record.history.len() > self.k {
            record.history.pop_front();
        }
        inner.clock += 1;
    }
}

impl Replacer for LruKReplacer {
    fn record_access(&self, frame_id: FrameId) {
        let idx = frame_id.0 as usize;
        debug_assert!(idx < self.num_frames, "frame id out of range");
        if idx >= self.num_frames {
            return;
        }
        let mut inner = self.inner.lock();
        self.record_access_locked(&mut inner, frame_id);
    }

    fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let idx = frame_id.0 as usize;
        debug_assert!(idx < self.num_frames, "frame id out of range");
        if idx >= self.num_frames {
            return;
        }
        let mut inner = self.inner.lock();
        let record = &mut inner.records[idx];
        if record.history.is_empty() {
            return;
        }
        match (record.evictable, evictable) {
            (false, true) => {
                record.evictable = true;
                inner.curr_size += 1;
            }
            (true, false) => {
                record.evictable = false;
                inner.curr_size -= 1;
            }
            _ => {}
        }
    }

    fn access_and_pin(&self, frame_id: FrameId) {
        let idx = frame_id.0 as usize;
        debug_assert!(idx < self.num_frames, "frame id out of range");
        if idx >= self.num_frames {
            return;
        }
        let mut inner = self.inner.lock();
        self.record_access_locked(&mut inner, frame_id);
        let record = &mut inner.records[idx];
        if record.evictable {
            record.evictable = false;
            inner.curr_size -= 1;
        }
    }

    fn evict(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();
        if inner.curr_size == 0 {
            return None;
        }

        // Selection key, smaller wins: frames with fewer than k accesses
        // (infinite k-distance) come first, then the smallest k-th most
        // recent timestamp, then the earliest first access.
        let mut victim: Option<(usize, (bool, u64, u64))> = None;
        for (idx, record) in inner.records.iter().enumerate() {
            if !record.evictable || record.history.is_empty() {
                continue;
            }
            let key = if record.history.len() < self.k {
                (false, record.first_access, record.first_access)
            } else {
                (true, record.history[0], record.first_access)
            };
            if victim.as_ref().map_or(true, |(_, best)| key < *best) {
                victim = Some((idx, key));
            }
        }

        let (idx, _) = victim?;
        let record = &mut inner.records[idx];
        record.history.clear();
        record.evictable = false;
        inner.curr_size -= 1;
        Some(FrameId(idx as u32))
    }

    fn remove(&self, frame_id: FrameId) {
        let idx = frame_id.0 as usize;
        debug_assert!(idx < self.num_frames, "frame id out of range");
        if idx >= self.num_frames {
            return;
        }
        let mut inner = self.inner.lock();
        let record = &mut inner.records[idx];
        if record.history.is_empty() {
            return;
        }
        debug_assert!(record.evictable, "cannot remove a non-evictable frame");
        let was_evictable = record.evictable;
        if was_evictable {
            record.evictable = false;
        }
        record.history.clear();
        if was_evictable {
            inner.curr_size -= 1;
        }
    }

    fn size(&self) -> usize {
        self.inner.lock().curr_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(replacer: &LruKReplacer, frame: u32) {
        replacer.record_access(FrameId(frame));
    }

    fn release(replacer: &LruKReplacer, frame: u32) {
        replacer.set_evictable(FrameId(frame), true);
    }

    #[test]
    fn test_replacer_new() {
        let replacer = LruKReplacer::new(10, 2);
        assert_eq!(replacer.capacity(), 10);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    #[should_panic(expected = "history depth k must be positive")]
    fn test_replacer_zero_k_panics() {
        let _ = LruKReplacer::new(10, 0);
    }

    #[test]
    fn test_evict_empty() {
        let replacer = LruKReplacer::new(10, 2);
        assert!(replacer.evict().is_none());
    }

    #[test]
    fn test_set_evictable_requires_access() {
        let replacer = LruKReplacer::new(10, 2);

        // Untracked frame: no effect.
        replacer.set_evictable(FrameId(3), true);
        assert_eq!(replacer.size(), 0);

        touch(&replacer, 3);
        release(&replacer, 3);
        assert_eq!(replacer.size(), 1);

        replacer.set_evictable(FrameId(3), false);
        assert_eq!(replacer.size(), 0);

        // Repeated sets do not double count.
        release(&replacer, 3);
        release(&replacer, 3);
        assert_eq!(replacer.size(), 1);
    }

    #[test]
    fn test_under_k_frames_evicted_first() {
        let replacer = LruKReplacer::new(4, 2);

        // Frames 0 and 1 reach k accesses; frame 2 stays under k.
        touch(&replacer, 0);
        touch(&replacer, 1);
        touch(&replacer, 2);
        touch(&replacer, 0);
        touch(&replacer, 1);
        for frame in 0..3 {
            release(&replacer, frame);
        }

        // Frame 2 has infinite k-distance and goes first despite frames 0
        // and 1 having older first accesses.
        assert_eq!(replacer.evict(), Some(FrameId(2)));
        assert_eq!(replacer.size(), 2);
    }

    #[test]
    fn test_under_k_ordered_by_first_access() {
        let replacer = LruKReplacer::new(4, 3);

        touch(&replacer, 1);
        touch(&replacer, 0);
        touch(&replacer, 2);
        // A later access does not change frame 1's first-access rank.
        touch(&replacer, 1);
        for frame in 0..3 {
            release(&replacer, frame);
        }

        assert_eq!(replacer.evict(), Some(FrameId(1)));
        assert_eq!(replacer.evict(), Some(FrameId(0)));
        assert_eq!(replacer.evict(), Some(FrameId(2)));
        assert!(replacer.evict().is_none());
    }

    #[test]
    fn test_largest_k_distance_wins() {
        let replacer = LruKReplacer::new(3, 2);

        // Access order: 0, 1, 0, 1, 1. Second-most-recent timestamps:
        // frame 0 -> 0, frame 1 -> 3.
        touch(&replacer, 0);
        touch(&replacer, 1);
        touch(&replacer, 0);
        touch(&replacer, 1);
        touch(&replacer, 1);
        release(&replacer, 0);
        release(&replacer, 1);

        // Frame 0's k-th most recent access is older: larger k-distance.
        assert_eq!(replacer.evict(), Some(FrameId(0)));
        assert_eq!(replacer.evict(), Some(FrameId(1)));
    }

    #[test]
    fn test_eviction_clears_history() {
        let replacer = LruKReplacer::new(2, 2);

        touch(&replacer, 0);
        touch(&replacer, 0);
        release(&replacer, 0);

        assert_eq!(replacer.evict(), Some(FrameId(0)));
        assert_eq!(replacer.size(), 0);

        // The frame is untracked again: set_evictable is a no-op until a
        // fresh access arrives.
        release(&replacer, 0);
        assert_eq!(replacer.size(), 0);

        touch(&replacer, 0);
        release(&replacer, 0);
        assert_eq!(replacer.size(), 1);
    }

    #[test]
    fn test_non_evictable_frames_skipped() {
        let replacer = LruKReplacer::new(3, 2);

        touch(&replacer, 0);
        touch(&replacer, 1);
        touch(&replacer, 2);
        release(&replacer, 1);

        // Only frame 1 is evictable.
        assert_eq!(replacer.evict(), Some(FrameId(1)));
        assert!(replacer.evict().is_none());
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_remove_drops_record() {
        let replacer = LruKReplacer::new(3, 2);

        touch(&replacer, 0);
        touch(&replacer, 1);
        release(&replacer, 0);
        release(&replacer, 1);
        assert_eq!(replacer.size(), 2);

        replacer.remove(FrameId(0));
        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.evict(), Some(FrameId(1)));

        // Removing an untracked frame is a no-op.
        replacer.remove(FrameId(2));
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_access_and_pin() {
        let replacer = LruKReplacer::new(2, 2);

        touch(&replacer, 0);
        release(&replacer, 0);
        assert_eq!(replacer.size(), 1);

        replacer.access_and_pin(FrameId(0));
        assert_eq!(replacer.size(), 0);
        assert!(replacer.evict().is_none());

        // The access was still recorded: frame 0 now has two timestamps,
        // so its k-distance is finite once evictable again.
        touch(&replacer, 1);
        release(&replacer, 0);
        release(&replacer, 1);
        assert_eq!(replacer.evict(), Some(FrameId(1)));
    }

    #[test]
    fn test_out_of_range_ignored_in_release() {
        let replacer = LruKReplacer::new(5, 2);

        // Out-of-range ids must not panic in release builds; the calls are
        // ignored. (Debug builds assert.)
        if cfg!(not(debug_assertions)) {
            replacer.record_access(FrameId(100));
            replacer.set_evictable(FrameId(100), true);
            replacer.remove(FrameId(100));
            assert_eq!(replacer.size(), 0);
        }
    }

    #[test]
    fn test_mixed_workload() {
        let replacer = LruKReplacer::new(7, 2);

        // Scenario: frames 1-5 accessed, then 1-4 re-accessed, 1-4 set
        // evictable. Frame 5 has a single access (infinite distance).
        for frame in 1..=5 {
            touch(&replacer, frame);
        }
        for frame in 1..=4 {
            touch(&replacer, frame);
        }
        for frame in 1..=5 {
            release(&replacer, frame);
        }
        assert_eq!(replacer.size(), 5);

        // Frame 5 goes first, then 1..4 by their second access order.
        assert_eq!(replacer.evict(), Some(FrameId(5)));
        assert_eq!(replacer.evict(), Some(FrameId(1)));
        assert_eq!(replacer.evict(), Some(FrameId(2)));

        // Pin frame 3; frame 4 is next.
        replacer.set_evictable(FrameId(3), false);
        assert_eq!(replacer.evict(), Some(FrameId(4)));
        assert!(replacer.evict().is_none());

        // Unpin frame 3 again.
        replacer.set_evictable(FrameId(3), true);
        assert_eq!(replacer.evict(), Some(FrameId(3)));
        assert_eq!(replacer.size(), 0);
    }
}
