//! In-process backend
//!
//! Mirrors the Redis semantics the balancer relies on (NX+EX writes, INCR,
//! hashes, sets, TTLs, cursor scans) for local runs and tests. Expiry is
//! driven by an injectable clock.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use super::backend::KvBackend;
use crate::clock::{Clock, SystemClock};
use crate::error::{BalancerError, Result};

#[derive(Debug, Clone)]
enum Data {
    Text(String),
    Hash(HashMap<String, String>),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Slot {
    data: Data,
    expires_at: Option<DateTime<Utc>>,
}

/// Backend keeping everything in a mutex-guarded map
pub struct MemoryBackend {
    slots: Mutex<BTreeMap<String, Slot>>,
    ready: AtomicBool,
    clock: Arc<dyn Clock>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: Mutex::new(BTreeMap::new()),
            ready: AtomicBool::new(true),
            clock,
        }
    }

    /// Simulate a dropped or restored connection
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    fn check_ready(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(BalancerError::NotReady)
        }
    }

    /// Run `f` over the live slots, after dropping expired ones
    fn with_slots<R>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, Slot>, DateTime<Utc>) -> R,
    ) -> Result<R> {
        self.check_ready()?;
        let now = self.clock.now();
        let mut slots = self.slots.lock();
        slots.retain(|_, slot| slot.expires_at.map_or(true, |at| at > now));
        Ok(f(&mut slots, now))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn wrong_type(key: &str) -> BalancerError {
    BalancerError::Backend(format!(
        "WRONGTYPE Operation against a key holding the wrong kind of value: {key}"
    ))
}

fn expiry(now: DateTime<Utc>, ttl_secs: u64) -> Option<DateTime<Utc>> {
    Some(now + Duration::seconds(ttl_secs.min(i64::MAX as u64) as i64))
}

#[async_trait]
impl KvBackend for MemoryBackend {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_slots(|slots, _| match slots.get(key) {
            None => Ok(None),
            Some(Slot {
                data: Data::Text(text),
                ..
            }) => Ok(Some(text.clone())),
            Some(_) => Err(wrong_type(key)),
        })?
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.with_slots(|slots, _| {
            slots.insert(
                key.to_string(),
                Slot {
                    data: Data::Text(value.to_string()),
                    expires_at: None,
                },
            );
        })
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        self.with_slots(|slots, now| {
            if slots.contains_key(key) {
                return false;
            }
            slots.insert(
                key.to_string(),
                Slot {
                    data: Data::Text(value.to_string()),
                    expires_at: expiry(now, ttl_secs),
                },
            );
            true
        })
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        self.with_slots(|slots, _| {
            let slot = slots.entry(key.to_string()).or_insert(Slot {
                data: Data::Text("0".to_string()),
                expires_at: None,
            });
            match &mut slot.data {
                Data::Text(text) => {
                    let current: i64 = text.parse().map_err(|_| {
                        BalancerError::Backend(
                            "ERR value is not an integer or out of range".to_string(),
                        )
                    })?;
                    let next = current + 1;
                    *text = next.to_string();
                    Ok(next)
                }
                _ => Err(wrong_type(key)),
            }
        })?
    }

    async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        self.with_slots(|slots, _| {
            let slot = slots.entry(key.to_string()).or_insert(Slot {
                data: Data::Hash(HashMap::new()),
                expires_at: None,
            });
            match &mut slot.data {
                Data::Hash(hash) => {
                    hash.extend(fields.iter().cloned());
                    Ok(())
                }
                _ => Err(wrong_type(key)),
            }
        })?
    }

    async fn hset_all_nx_ex(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl_secs: u64,
    ) -> Result<bool> {
        self.with_slots(|slots, now| {
            if slots.contains_key(key) {
                return false;
            }
            slots.insert(
                key.to_string(),
                Slot {
                    data: Data::Hash(fields.iter().cloned().collect()),
                    expires_at: expiry(now, ttl_secs),
                },
            );
            true
        })
    }

    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>> {
        self.with_slots(|slots, _| match slots.get(key) {
            None => Ok(HashMap::new()),
            Some(Slot {
                data: Data::Hash(hash),
                ..
            }) => Ok(hash.clone()),
            Some(_) => Err(wrong_type(key)),
        })?
    }

    async fn sadd(&self, key: &str, members: &[&str]) -> Result<usize> {
        self.with_slots(|slots, _| {
            let slot = slots.entry(key.to_string()).or_insert(Slot {
                data: Data::Set(BTreeSet::new()),
                expires_at: None,
            });
            match &mut slot.data {
                Data::Set(set) => Ok(members
                    .iter()
                    .filter(|member| set.insert(member.to_string()))
                    .count()),
                _ => Err(wrong_type(key)),
            }
        })?
    }

    async fn srem(&self, key: &str, members: &[&str]) -> Result<usize> {
        self.with_slots(|slots, _| {
            let removed = match slots.get_mut(key) {
                None => return Ok(0),
                Some(Slot {
                    data: Data::Set(set),
                    ..
                }) => members.iter().filter(|member| set.remove(**member)).count(),
                Some(_) => return Err(wrong_type(key)),
            };
            if matches!(slots.get(key), Some(Slot { data: Data::Set(set), .. }) if set.is_empty()) {
                slots.remove(key);
            }
            Ok(removed)
        })?
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        self.with_slots(|slots, _| match slots.get(key) {
            None => Ok(false),
            Some(Slot {
                data: Data::Set(set),
                ..
            }) => Ok(set.contains(member)),
            Some(_) => Err(wrong_type(key)),
        })?
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.with_slots(|slots, _| slots.contains_key(key))
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        self.with_slots(|slots, now| {
            if ttl_secs == 0 {
                return slots.remove(key).is_some();
            }
            match slots.get_mut(key) {
                Some(slot) => {
                    slot.expires_at = expiry(now, ttl_secs);
                    true
                }
                None => false,
            }
        })
    }

    async fn ttl(&self, key: &str) -> Result<i64> {
        self.with_slots(|slots, now| match slots.get(key) {
            None => -2,
            Some(Slot {
                expires_at: None, ..
            }) => -1,
            Some(Slot {
                expires_at: Some(at),
                ..
            }) => (*at - now).num_seconds(),
        })
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)> {
        self.with_slots(|slots, _| {
            let start = cursor as usize;
            let count = count.max(1);
            let window: Vec<&String> = slots.keys().skip(start).take(count).collect();
            let next = if start + window.len() >= slots.len() {
                0
            } else {
                (start + window.len()) as u64
            };
            let matched = window
                .into_iter()
                .filter(|key| glob_match(pattern, key))
                .cloned()
                .collect();
            (next, matched)
        })
    }

    async fn del(&self, keys: &[String]) -> Result<usize> {
        self.with_slots(|slots, _| keys.iter().filter(|key| slots.remove(*key).is_some()).count())
    }
}

/// Glob matching with `*` and `?`, as used by SCAN MATCH
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            t = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}
