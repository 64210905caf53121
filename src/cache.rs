//! Per-process memo cache with TTL
//!
//! Entries are copies of store data and may be stale by up to the TTL.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::clock::Clock;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

/// Bounded TTL cache
pub struct MemoCache<K, V> {
    entries: DashMap<K, Entry<V>>,
    ttl: chrono::Duration,
    capacity: usize,
    clock: Arc<dyn Clock>,
}

impl<K, V> MemoCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration, capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero()),
            capacity: capacity.max(1),
            clock,
        }
    }

    /// Get a live entry, dropping it if it has expired
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let expired = match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        }
        None
    }

    /// Store a value. A live entry keeps the deadline it was first stored
    /// with, so the TTL counts from the first load.
    pub fn insert(&self, key: K, value: V) {
        let now = self.clock.now();
        if let Some(mut entry) = self.entries.get_mut(&key) {
            if entry.expires_at > now {
                entry.value = value;
                return;
            }
        }
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict(now);
        }
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at: now + self.ttl,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired entries, then the soonest-expiring one if still full
    fn evict(&self, now: DateTime<Utc>) {
        self.entries.retain(|_, entry| entry.expires_at > now);
        if self.entries.len() < self.capacity {
            return;
        }
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().expires_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}
