//! Delivery deduplication cache.
//!
//! DESIGN
//! ======
//! Relays can deliver the same logical event more than once: a reconnect
//! replays recent traffic, and hosted channels echo client events under both
//! their `client-` prefixed and bare names. Every event that renders a
//! durable entity carries a dedupe key; this cache remembers the last
//! thousand and the router drops repeats.
//!
//! Eviction is insertion-order, not LRU: a re-delivered key does not renew
//! its slot. `insert` never evicts; the engine's maintenance tick calls
//! [`DedupCache::trim`] every five minutes, so the cache may transiently
//! exceed capacity between ticks.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

pub const DEDUP_CAPACITY: usize = 1_000;
pub const DEDUP_TRIM_INTERVAL: Duration = Duration::from_secs(300);

pub struct DedupCache {
    seen: HashSet<String>,
    /// Keys in insertion order, oldest at the front.
    order: VecDeque<String>,
    capacity: usize,
}

impl DedupCache {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEDUP_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self { seen: HashSet::new(), order: VecDeque::new(), capacity }
    }

    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    /// Record a key. Returns `false` when the key was already present, in
    /// which case nothing changes.
    pub fn insert(&mut self, key: impl Into<String>) -> bool {
        let key = key.into();
        if !self.seen.insert(key.clone()) {
            return false;
        }
        self.order.push_back(key);
        true
    }

    /// Evict oldest-inserted keys down to capacity. Returns how many were
    /// evicted.
    pub fn trim(&mut self) -> usize {
        let mut evicted = 0;
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
                evicted += 1;
            }
        }
        evicted
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "dedup_test.rs"]
mod tests;
