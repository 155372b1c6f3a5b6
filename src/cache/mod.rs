//! Memory-bounded cache of computed plug values.
//!
//! Values are keyed by the hash of the computation that produced them, so
//! any two plugs that hash identically (for instance a pass-through output
//! and its input) share one entry. Entries are charged by their approximate
//! memory footprint and evicted least recently used first once the budget
//! is exceeded.
//!
//! Concurrent requests for a key that is being computed wait for the first
//! computation instead of repeating it. A thread that asks for a key it is
//! itself computing gets an uncached computation, since waiting would never
//! finish.

mod hash;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, ThreadId};

use lru::LruCache;
use parking_lot::{Condvar, Mutex};

pub(crate) use crate::cache::hash::HashCache;
pub use crate::cache::hash::HashCacheStats;

use crate::core::Hash32;
use crate::error::{EvalError, EvalResult};
use crate::value::{Value, ValueType};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub(crate) struct CacheKey {
    pub hash: Hash32,
    pub ty: ValueType,
}

struct Entry {
    value: Value,
    cost: usize,
}

/// A computation in progress.
struct InFlight {
    owner: ThreadId,
    result: Mutex<Option<EvalResult<Value>>>,
    ready: Condvar,
}

impl InFlight {
    fn publish(&self, result: EvalResult<Value>) {
        *self.result.lock() = Some(result);
        self.ready.notify_all();
    }

    fn wait(&self) -> EvalResult<Value> {
        let mut result = self.result.lock();
        loop {
            if let Some(result) = result.as_ref() {
                return result.clone();
            }
            self.ready.wait(&mut result);
        }
    }
}

struct State {
    entries: LruCache<CacheKey, Entry>,
    in_flight: HashMap<CacheKey, Arc<InFlight>>,
    usage: usize,
}

/// Counters describing cache behaviour since creation or the last `clear`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub memory_usage: usize,
    pub memory_limit: usize,
}

pub struct ValueCache {
    state: Mutex<State>,
    limit: AtomicUsize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ValueCache {
    /// A cache holding at most `memory_limit` bytes of values.
    pub fn new(memory_limit: usize) -> Self {
        Self {
            state: Mutex::new(State {
                entries: LruCache::unbounded(),
                in_flight: HashMap::new(),
                usage: 0,
            }),
            limit: AtomicUsize::new(memory_limit),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn memory_limit(&self) -> usize {
        self.limit.load(Ordering::Relaxed)
    }

    /// Changes the budget, evicting immediately if it shrank.
    pub fn set_memory_limit(&self, limit: usize) {
        self.limit.store(limit, Ordering::Relaxed);
        let mut state = self.state.lock();
        self.evict(&mut state);
    }

    pub fn memory_usage(&self) -> usize {
        self.state.lock().usage
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every stored value and resets the counters. Computations in
    /// progress are unaffected.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.usage = 0;
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: state.entries.len(),
            memory_usage: state.usage,
            memory_limit: self.memory_limit(),
        }
    }

    pub(crate) fn contains(&self, key: &CacheKey) -> bool {
        self.state.lock().entries.contains(key)
    }

    /// Returns the cached value for `key` or runs `compute` to produce it.
    ///
    /// Failed computations are handed to everyone waiting on them but never
    /// stored. A cancelled computation is retried by its waiters, each under
    /// its own cancellation.
    pub(crate) fn get_or_compute<F>(&self, key: CacheKey, compute: F) -> EvalResult<Value>
    where
        F: FnOnce() -> EvalResult<Value>,
    {
        let me = thread::current().id();

        let flight = loop {
            let mut state = self.state.lock();

            if let Some(entry) = state.entries.get(&key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(entry.value.clone());
            }

            match state.in_flight.get(&key).cloned() {
                Some(flight) if flight.owner == me => {
                    drop(state);
                    tracing::trace!(hash = %key.hash, "reentrant request, computing uncached");
                    return compute();
                }
                Some(flight) => {
                    drop(state);
                    match flight.wait() {
                        Err(EvalError::Cancelled) => continue,
                        result => return result,
                    }
                }
                None => {
                    let flight = Arc::new(InFlight {
                        owner: me,
                        result: Mutex::new(None),
                        ready: Condvar::new(),
                    });
                    state.in_flight.insert(key, flight.clone());
                    break flight;
                }
            }
        };

        self.misses.fetch_add(1, Ordering::Relaxed);
        let mut claim = Claim {
            cache: self,
            key,
            flight,
            done: false,
        };

        let result = compute();
        claim.finish(&result);
        result
    }

    fn evict(&self, state: &mut State) {
        let limit = self.memory_limit();
        while state.usage > limit {
            let Some((_, entry)) = state.entries.pop_lru() else {
                break;
            };
            state.usage -= entry.cost;
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Default for ValueCache {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MEMORY_LIMIT)
    }
}

impl std::fmt::Debug for ValueCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueCache").field("stats", &self.stats()).finish()
    }
}

/// Ownership of an in-flight computation. Dropping an unfinished claim
/// (the computation unwound) releases the waiters so they can retry.
struct Claim<'c> {
    cache: &'c ValueCache,
    key: CacheKey,
    flight: Arc<InFlight>,
    done: bool,
}

impl Claim<'_> {
    fn finish(&mut self, result: &EvalResult<Value>) {
        {
            let mut state = self.cache.state.lock();
            state.in_flight.remove(&self.key);

            if let Ok(value) = result {
                let cost = value.memory_usage();
                if let Some(old) = state.entries.put(self.key, Entry {
                    value: value.clone(),
                    cost,
                }) {
                    state.usage -= old.cost;
                }
                state.usage += cost;
                self.cache.evict(&mut state);
            }
        }

        self.flight.publish(result.clone());
        self.done = true;
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.cache.state.lock().in_flight.remove(&self.key);
            self.flight.publish(Err(EvalError::Cancelled));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;
    use crate::error::ComputeError;

    fn key(n: u8) -> CacheKey {
        CacheKey {
            hash: Hash32::hash([n]),
            ty: ValueType::FloatVector,
        }
    }

    fn floats(len: usize) -> Value {
        Value::from(vec![0.5f32; len])
    }

    #[test]
    fn test_hit_after_miss() {
        let cache = ValueCache::new(1 << 20);
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_compute(key(1), || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(floats(4))
                })
                .unwrap();
            assert_eq!(value, floats(4));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (2, 1, 1));
    }

    #[test]
    fn test_errors_are_not_stored() {
        let cache = ValueCache::new(1 << 20);
        let err = cache.get_or_compute(key(1), || {
            Err(ComputeError::new("n", "n.out", "{}", anyhow::anyhow!("boom")).into())
        });
        assert!(err.is_err());
        assert!(!cache.contains(&key(1)));

        let ok = cache.get_or_compute(key(1), || Ok(floats(1)));
        assert_eq!(ok.unwrap(), floats(1));
    }

    #[test]
    fn test_budget_evicts_least_recently_used() {
        let one = floats(1000).memory_usage();
        let cache = ValueCache::new(one * 2 + one / 2);

        cache.get_or_compute(key(1), || Ok(floats(1000))).unwrap();
        cache.get_or_compute(key(2), || Ok(floats(1000))).unwrap();
        // Touch 1 so that 2 is the oldest.
        cache.get_or_compute(key(1), || Ok(floats(1000))).unwrap();
        cache.get_or_compute(key(3), || Ok(floats(1000))).unwrap();

        assert!(cache.contains(&key(1)));
        assert!(!cache.contains(&key(2)));
        assert!(cache.contains(&key(3)));
        assert!(cache.memory_usage() <= cache.memory_limit());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_shrinking_limit_evicts() {
        let cache = ValueCache::new(1 << 20);
        cache.get_or_compute(key(1), || Ok(floats(100))).unwrap();
        cache.set_memory_limit(0);
        assert!(cache.is_empty());
        assert_eq!(cache.memory_usage(), 0);
    }

    #[test]
    fn test_concurrent_requests_compute_once() {
        let cache = ValueCache::new(1 << 20);
        let calls = AtomicUsize::new(0);
        let barrier = Barrier::new(8);

        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    barrier.wait();
                    let value = cache
                        .get_or_compute(key(7), || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(50));
                            Ok(floats(3))
                        })
                        .unwrap();
                    assert_eq!(value, floats(3));
                });
            }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_waiters_retry_after_cancellation() {
        let cache = ValueCache::new(1 << 20);
        let started = Barrier::new(2);

        thread::scope(|s| {
            s.spawn(|| {
                let result = cache.get_or_compute(key(9), || {
                    started.wait();
                    thread::sleep(Duration::from_millis(50));
                    Err(EvalError::Cancelled)
                });
                assert!(result.unwrap_err().is_cancelled());
            });

            s.spawn(|| {
                started.wait();
                let value = cache.get_or_compute(key(9), || Ok(floats(2))).unwrap();
                assert_eq!(value, floats(2));
            });
        });
    }

    #[test]
    fn test_reentrant_request_does_not_deadlock() {
        let cache = ValueCache::new(1 << 20);
        let value = cache
            .get_or_compute(key(4), || cache.get_or_compute(key(4), || Ok(floats(1))))
            .unwrap();
        assert_eq!(value, floats(1));
    }
}
