//! Extendible hashing directory used as the pool's page table.
//!
//! Maps keys to values through a directory indexed by the low
//! `global_depth` bits of the key's hash. Directory slots point into a
//! bucket arena; several slots may alias one bucket until a split
//! separates them. The directory doubles when a full bucket's local depth
//! has caught up with the global depth, and never shrinks.

use parking_lot::Mutex;
use quarry_common::{QuarryError, Result};
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};

/// A bucket holding up to `bucket_size` key/value pairs.
struct Bucket<K, V> {
    items: Vec<(K, V)>,
    local_depth: u32,
}

struct IndexInner<K, V> {
    /// Directory: slot index -> bucket arena index.
    dir: Vec<usize>,
    /// Bucket arena. Buckets are never freed; empty buckets stay attached.
    buckets: Vec<Bucket<K, V>>,
    /// Number of hash bits the directory currently uses.
    global_depth: u32,
    /// Total key/value pairs stored.
    num_entries: usize,
}

/// Thread-safe extendible hash index.
///
/// All operations serialize on one internal mutex. The hasher is a type
/// parameter so tests can steer keys into chosen buckets; production use
/// keeps the `RandomState` default.
pub struct ExtendibleHashIndex<K, V, S = RandomState> {
    bucket_size: usize,
    hash_builder: S,
    inner: Mutex<IndexInner<K, V>>,
}

impl<K: Hash + Eq, V: Clone> ExtendibleHashIndex<K, V> {
    /// Creates an index with the given bucket capacity and a randomly
    /// seeded hasher.
    pub fn new(bucket_size: usize) -> Self {
        Self::with_hasher(bucket_size, RandomState::new())
    }
}

impl<K: Hash + Eq, V: Clone, S: BuildHasher> ExtendibleHashIndex<K, V, S> {
    /// Creates an index with the given bucket capacity and hasher.
    pub fn with_hasher(bucket_size: usize, hash_builder: S) -> Self {
        assert!(bucket_size > 0, "bucket_size must be positive");
        Self {
            bucket_size,
            hash_builder,
            inner: Mutex::new(IndexInner {
                dir: vec![0],
                buckets: vec![Bucket {
                    items: Vec::with_capacity(bucket_size),
                    local_depth: 0,
                }],
                global_depth: 0,
                num_entries: 0,
            }),
        }
    }

    #[inline]
    fn hash_of(&self, key: &K) -> u64 {
        self.hash_builder.hash_one(key)
    }

    /// Directory slot for a hash under the given depth (low `depth` bits).
    #[inline]
    fn slot_of(hash: u64, depth: u32) -> usize {
        if depth == 0 {
            0
        } else {
            (hash & (u64::MAX >> (64 - depth))) as usize
        }
    }

    /// Looks up a key and returns a copy of its value if present.
    pub fn find(&self, key: &K) -> Option<V> {
        let hash = self.hash_of(key);
        let inner = self.inner.lock();
        let slot = Self::slot_of(hash, inner.global_depth);
        let bucket = &inner.buckets[inner.dir[slot]];
        bucket
            .items
            .iter()
            .find(|entry| entry.0 == *key)
            .map(|entry| entry.1.clone())
    }

    /// Returns true if the key is present.
    pub fn contains(&self, key: &K) -> bool {
        self.find(key).is_some()
    }

    /// Inserts a key/value pair, overwriting any existing value for the key.
    ///
    /// Splits the target bucket (doubling the directory when needed) until
    /// the pair fits. Fails only when every key in the full target bucket
    /// shares the incoming key's full 64-bit hash, in which case no number
    /// of splits can separate them.
    pub fn insert(&self, key: K, value: V) -> Result<()> {
        let hash = self.hash_of(&key);
        let mut inner = self.inner.lock();
        loop {
            let slot = Self::slot_of(hash, inner.global_depth);
            let bucket_id = inner.dir[slot];

            let bucket = &mut inner.buckets[bucket_id];
            if let Some(entry) = bucket.items.iter_mut().find(|entry| entry.0 == key) {
                entry.1 = value;
                return Ok(());
            }
            if bucket.items.len() < self.bucket_size {
                bucket.items.push((key, value));
                inner.num_entries += 1;
                return Ok(());
            }

            // Full bucket. A split only helps if some resident key hashes
            // differently from the incoming one.
            if bucket.items.iter().all(|(k, _)| self.hash_of(k) == hash) {
                return Err(QuarryError::PathologicalHashCollision {
                    bucket_size: self.bucket_size,
                });
            }
            self.split_bucket(&mut inner, bucket_id);
        }
    }

    /// Removes a key. Returns whether it was present.
    ///
    /// Buckets are never merged; an emptied bucket stays attached to its
    /// directory slots.
    pub fn remove(&self, key: &K) -> bool {
        let hash = self.hash_of(key);
        let mut inner = self.inner.lock();
        let slot = Self::slot_of(hash, inner.global_depth);
        let bucket_id = inner.dir[slot];
        let bucket = &mut inner.buckets[bucket_id];
        match bucket.items.iter().position(|entry| entry.0 == *key) {
            Some(pos) => {
                bucket.items.swap_remove(pos);
                inner.num_entries -= 1;
                true
            }
            None => false,
        }
    }

    /// Splits `bucket_id`, doubling the directory first when its local
    /// depth has caught up with the global depth.
    fn split_bucket(&self, inner: &mut IndexInner<K, V>, bucket_id: usize) {
        let local = inner.buckets[bucket_id].local_depth;
        if local == inner.global_depth {
            // New upper-half slots alias the bucket of the slot without
            // the new top bit.
            inner.dir.extend_from_within(..);
            inner.global_depth += 1;
        }

        let new_local = local + 1;
        inner.buckets[bucket_id].local_depth = new_local;

        let sibling_id = inner.buckets.len();
        inner.buckets.push(Bucket {
            items: Vec::with_capacity(self.bucket_size),
            local_depth: new_local,
        });

        // Slots that aliased the old bucket and carry the new high bit now
        // point at the sibling.
        let high_bit = 1usize << (new_local - 1);
        for slot in 0..inner.dir.len() {
            if inner.dir[slot] == bucket_id && slot & high_bit != 0 {
                inner.dir[slot] = sibling_id;
            }
        }

        // Redistribute the old bucket's pairs between itself and the sibling.
        let items = std::mem::take(&mut inner.buckets[bucket_id].items);
        let global_depth = inner.global_depth;
        for (key, value) in items {
            let slot = Self::slot_of(self.hash_of(&key), global_depth);
            let target = inner.dir[slot];
            inner.buckets[target].items.push((key, value));
        }
    }

    /// Number of hash bits the directory currently uses.
    pub fn global_depth(&self) -> u32 {
        self.inner.lock().global_depth
    }

    /// Local depth of the bucket behind the given directory slot.
    pub fn local_depth(&self, dir_index: usize) -> u32 {
        let inner = self.inner.lock();
        inner.buckets[inner.dir[dir_index]].local_depth
    }

    /// Number of buckets allocated so far.
    pub fn num_buckets(&self) -> usize {
        self.inner.lock().buckets.len()
    }

    /// Number of key/value pairs stored.
    pub fn len(&self) -> usize {
        self.inner.lock().num_entries
    }

    /// Returns true if the index holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over all entries, calling the provided function for each.
    /// Returns early if the function returns false.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V) -> bool,
    {
        let inner = self.inner.lock();
        for bucket in &inner.buckets {
            for (key, value) in &bucket.items {
                if !f(key, value) {
                    return;
                }
            }
        }
    }
}
