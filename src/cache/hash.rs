use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;

use crate::core::Hash32;
use crate::graph::PlugId;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HashCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub capacity: usize,
}

/// Per-engine memo of output hashes, keyed by plug and context.
///
/// An entry records the dirty count of the plug when it was made and only
/// answers while that count is current, so graph edits invalidate entries
/// without visiting them.
pub(crate) struct HashCache {
    entries: Mutex<LruCache<(PlugId, Hash32), (u64, Hash32)>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl HashCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, plug: PlugId, context: Hash32, dirty: u64) -> Option<Hash32> {
        let mut entries = self.entries.lock();
        match entries.get(&(plug, context)) {
            Some((count, hash)) if *count == dirty => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(*hash)
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, plug: PlugId, context: Hash32, dirty: u64, hash: Hash32) {
        self.entries.lock().put((plug, context), (dirty, hash));
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    pub fn stats(&self) -> HashCacheStats {
        let entries = self.entries.lock();
        HashCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: entries.len(),
            capacity: entries.cap().get(),
        }
    }
}
