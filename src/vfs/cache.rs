//! Metadata caches owned by the filesystem adapter.
//!
//! Neither type locks internally; `BundleFs` keeps each behind its own mutex
//! so compound check-then-update sequences stay atomic.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

/// Bounded name -> size map with least-recently-used eviction.
pub struct SizeCache {
    entries: LruCache<String, u64>,
}

impl SizeCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Looks up `name` and marks it most recently used.
    pub fn get(&mut self, name: &str) -> Option<u64> {
        self.entries.get(name).copied()
    }

    /// Inserts or overwrites; evicts the least recently used entry when full.
    pub fn set(&mut self, name: &str, size: u64) {
        self.entries.put(name.to_string(), size);
    }

    /// Inserts only when `name` has no entry yet. Lookups use this so a size
    /// learned from a fetch never replaces one recorded by a later save.
    pub fn populate(&mut self, name: &str, size: u64) {
        if !self.entries.contains(name) {
            self.entries.put(name.to_string(), size);
        }
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.pop(name);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Snapshot of the whole flat namespace.
#[derive(Default)]
pub struct ListingCache {
    names: Vec<String>,
    last_refresh: Option<Instant>,
}

impl ListingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.last_refresh.is_some_and(|t| t.elapsed() <= ttl)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Swaps in a fresh listing and restarts the freshness window.
    pub fn replace(&mut self, names: Vec<String>) {
        self.names = names;
        self.last_refresh = Some(Instant::now());
    }

    /// Forces the next access to refetch. The old names stay as the fallback
    /// if that refetch fails.
    pub fn invalidate(&mut self) {
        self.last_refresh = None;
    }
}
