//! Bounded, expiring key/value cache
//!
//! Holds loaded model handles. Entries expire a fixed TTL after insertion,
//! regardless of access, and the oldest-inserted entry is evicted when the
//! cache is full. Reads never refresh an entry.
//!
//! The backing `LinkedHashMap` doubles as the insertion-order eviction queue:
//! `put` always appends at the back, so with a fixed TTL the expired entries
//! always form a prefix of the map.

use hashlink::LinkedHashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Time source for expiry decisions
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock backed by `Instant::now`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// Manually advanced clock for deterministic expiry tests
///
/// Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    base: Instant,
    offset_nanos: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset_nanos: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let nanos = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        self.offset_nanos.fetch_add(nanos, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + Duration::from_nanos(self.offset_nanos.load(Ordering::SeqCst))
    }
}

/// Capacity and time-to-live limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    /// Maximum number of live entries (at least 1)
    pub capacity: usize,
    /// Entry lifetime measured from insertion
    pub ttl: Duration,
}

impl EvictionPolicy {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
        }
    }
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self::new(10, Duration::from_secs(3600))
    }
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

/// Capacity- and time-limited map
#[derive(Debug)]
pub struct BoundedExpiringCache<K, V, C = SystemClock> {
    policy: EvictionPolicy,
    clock: C,
    entries: LinkedHashMap<K, Entry<V>>,
}

impl<K: Eq + Hash, V> BoundedExpiringCache<K, V, SystemClock> {
    pub fn new(policy: EvictionPolicy) -> Self {
        Self::with_clock(policy, SystemClock)
    }
}

impl<K: Eq + Hash, V, C: Clock> BoundedExpiringCache<K, V, C> {
    pub fn with_clock(policy: EvictionPolicy, clock: C) -> Self {
        Self {
            policy: EvictionPolicy::new(policy.capacity, policy.ttl),
            clock,
            entries: LinkedHashMap::new(),
        }
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    fn is_live(&self, entry: &Entry<V>, now: Instant) -> bool {
        now.saturating_duration_since(entry.inserted_at) < self.policy.ttl
    }

    /// Live value for `key`; an expired entry is removed and reported absent
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let now = self.clock.now();
        let live = self.entries.get(key).map(|entry| self.is_live(entry, now))?;
        if !live {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|entry| &entry.value)
    }

    /// Insert or overwrite `key`
    ///
    /// Overwriting refreshes the insertion time and moves the key to the back
    /// of the eviction order. Inserting a new key into a full cache first
    /// drops expired entries, then evicts the oldest-inserted live entries.
    pub fn put(&mut self, key: K, value: V) {
        let now = self.clock.now();

        if self.entries.remove(&key).is_none() {
            self.purge_expired();
            while self.entries.len() >= self.policy.capacity {
                if self.entries.pop_front().is_none() {
                    break;
                }
            }
        }

        self.entries.insert(
            key,
            Entry {
                value,
                inserted_at: now,
            },
        );
    }

    /// Remove `key`, returning its value if it was live
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let entry = self.entries.remove(key)?;
        self.is_live(&entry, now).then_some(entry.value)
    }

    /// Whether `key` is present and live (does not purge)
    pub fn contains_key(&self, key: &K) -> bool {
        let now = self.clock.now();
        self.entries
            .get(key)
            .is_some_and(|entry| self.is_live(entry, now))
    }

    /// Drop every expired entry; returns how many were removed
    pub fn purge_expired(&mut self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;
        while let Some((_, entry)) = self.entries.front() {
            if self.is_live(entry, now) {
                break;
            }
            self.entries.pop_front();
            removed += 1;
        }
        removed
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .values()
            .filter(|entry| self.is_live(entry, now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live keys, oldest insertion first
    pub fn keys(&self) -> Vec<&K> {
        let now = self.clock.now();
        self.entries
            .iter()
            .filter(|(_, entry)| self.is_live(entry, now))
            .map(|(key, _)| key)
            .collect()
    }
}
