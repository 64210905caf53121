//! Shared key-value data layer
//!
//! [`KeyValueStore`] is constructed once per process and handed to every
//! component. It scopes all keys under the configured data prefix, encodes
//! values, and refuses work while the backend is not ready.

mod backend;
pub mod codec;
pub mod keys;
mod memory;
mod redis_backend;

pub use backend::KvBackend;
pub use codec::{StoredValue, ValueCodec};
pub use keys::Key;
pub use memory::MemoryBackend;
pub use redis_backend::{RedisBackend, RetryPolicy};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::RedisConfig;
use crate::error::{BalancerError, Result};

/// Batch size for pattern deletes
const DELETE_SCAN_COUNT: usize = 10_000;

/// Prefix-scoped handle over a [`KvBackend`]
#[derive(Clone)]
pub struct KeyValueStore {
    backend: Arc<dyn KvBackend>,
    prefix: String,
}

impl KeyValueStore {
    pub fn new(backend: Arc<dyn KvBackend>, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
        }
    }

    /// Connect to Redis and wrap the backend. Only an invalid URL fails; an
    /// unreachable server leaves the store not ready while it reconnects.
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let backend = RedisBackend::connect(config).await?;
        Ok(Self::new(Arc::new(backend), config.data_prefix.clone()))
    }

    /// Store over a fresh in-memory backend
    pub fn in_memory(backend: MemoryBackend, prefix: impl Into<String>) -> Self {
        Self::new(Arc::new(backend), prefix)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn is_ready(&self) -> bool {
        self.backend.is_ready()
    }

    fn scoped(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.backend.is_ready() {
            Ok(())
        } else {
            Err(BalancerError::NotReady)
        }
    }

    // ----- untyped scalars -----

    /// Read a scalar, decoding numeric-looking text as a number
    pub async fn get_value(&self, key: &str) -> Result<StoredValue> {
        self.ensure_ready()?;
        let raw = self.backend.get(&self.scoped(key)).await?;
        Ok(StoredValue::decode(raw.as_deref()))
    }

    /// Write a scalar.
    ///
    /// With a lifetime the write only happens if the key is absent; the
    /// returned flag tells whether it was written.
    pub async fn set_value(
        &self,
        key: &str,
        value: &StoredValue,
        ttl_secs: Option<u64>,
    ) -> Result<bool> {
        self.write_raw(key, &value.to_string(), ttl_secs).await
    }

    async fn write_raw(&self, key: &str, raw: &str, ttl_secs: Option<u64>) -> Result<bool> {
        self.ensure_ready()?;
        let key = self.scoped(key);
        match ttl_secs {
            Some(ttl) => self.backend.set_nx_ex(&key, raw, ttl).await,
            None => {
                self.backend.set(&key, raw).await?;
                Ok(true)
            }
        }
    }

    // ----- typed keys -----

    /// Read a typed key. A value that fails its codec is `Malformed`.
    pub async fn get<T: ValueCodec>(&self, key: &Key<T>) -> Result<Option<T>> {
        self.ensure_ready()?;
        let raw = self.backend.get(&self.scoped(key.name())).await?;
        match raw.as_deref() {
            None | Some("null") => Ok(None),
            Some(raw) => T::decode(raw).map(Some).ok_or_else(|| BalancerError::Malformed {
                key: key.name().to_string(),
            }),
        }
    }

    /// Write a typed key; same conditional semantics as [`set_value`](Self::set_value)
    pub async fn set<T: ValueCodec>(
        &self,
        key: &Key<T>,
        value: &T,
        ttl_secs: Option<u64>,
    ) -> Result<bool> {
        let raw = value.encode()?;
        self.write_raw(key.name(), &raw, ttl_secs).await
    }

    /// Atomic counter increment; returns the new count
    pub async fn increment(&self, key: &Key<u64>) -> Result<u64> {
        self.ensure_ready()?;
        let count = self.backend.incr(&self.scoped(key.name())).await?;
        Ok(count.max(0) as u64)
    }

    // ----- flat objects -----

    /// Write a flat field map; conditional on absence when a lifetime is given
    pub async fn set_object(
        &self,
        key: &str,
        fields: &BTreeMap<String, StoredValue>,
        ttl_secs: Option<u64>,
    ) -> Result<bool> {
        self.ensure_ready()?;
        if fields.is_empty() {
            return Err(BalancerError::EmptyInput {
                key: key.to_string(),
            });
        }
        let encoded: Vec<(String, String)> = fields
            .iter()
            .map(|(field, value)| (field.clone(), value.to_string()))
            .collect();
        let key = self.scoped(key);
        match ttl_secs {
            Some(ttl) => self.backend.hset_all_nx_ex(&key, &encoded, ttl).await,
            None => {
                self.backend.hset_all(&key, &encoded).await?;
                Ok(true)
            }
        }
    }

    /// Read a flat field map; `None` when nothing is stored
    pub async fn get_object(&self, key: &str) -> Result<Option<HashMap<String, StoredValue>>> {
        self.ensure_ready()?;
        let raw = self.backend.hget_all(&self.scoped(key)).await?;
        if raw.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            raw.into_iter()
                .map(|(field, value)| {
                    let decoded = StoredValue::decode(Some(&value));
                    (field, decoded)
                })
                .collect(),
        ))
    }

    // ----- sets -----

    pub async fn add_to_set(&self, key: &str, members: &[&str]) -> Result<usize> {
        self.ensure_ready()?;
        if members.is_empty() {
            return Err(BalancerError::EmptyInput {
                key: key.to_string(),
            });
        }
        self.backend.sadd(&self.scoped(key), members).await
    }

    pub async fn remove_from_set(&self, key: &str, member: &str) -> Result<bool> {
        self.ensure_ready()?;
        Ok(self.backend.srem(&self.scoped(key), &[member]).await? > 0)
    }

    pub async fn is_member(&self, key: &str, member: &str) -> Result<bool> {
        self.ensure_ready()?;
        self.backend.sismember(&self.scoped(key), member).await
    }

    // ----- key maintenance -----

    pub async fn exists(&self, key: &str) -> Result<bool> {
        self.ensure_ready()?;
        self.backend.exists(&self.scoped(key)).await
    }

    /// Set or refresh a key's lifetime
    pub async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        self.ensure_ready()?;
        self.backend.expire(&self.scoped(key), ttl_secs).await
    }

    /// Remaining lifetime in seconds; `None` for a missing key or one without expiry
    pub async fn time_to_live(&self, key: &str) -> Result<Option<u64>> {
        self.ensure_ready()?;
        let ttl = self.backend.ttl(&self.scoped(key)).await?;
        Ok((ttl >= 0).then_some(ttl as u64))
    }

    fn scan_pattern(&self, pattern: &str) -> String {
        format!("{}*{}", self.prefix, pattern)
    }

    /// Enumerate keys matching `pattern` under the prefix, following the
    /// cursor until the backend reports `0`
    pub async fn scan_keys_by_pattern(
        &self,
        pattern: &str,
        batch_size: usize,
        strip_prefix: bool,
    ) -> Result<Vec<String>> {
        self.ensure_ready()?;
        let pattern = self.scan_pattern(pattern);
        let mut cursor = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch) = self.backend.scan(cursor, &pattern, batch_size).await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        if strip_prefix {
            for key in keys.iter_mut() {
                if let Some(stripped) = key.strip_prefix(&self.prefix) {
                    *key = stripped.to_string();
                }
            }
        }
        Ok(keys)
    }

    /// Delete every key matching `pattern`, batch by batch.
    ///
    /// A failed delete is logged and the scan continues. Returns the number
    /// of keys deleted.
    pub async fn delete_keys_by_pattern(&self, pattern: &str) -> Result<usize> {
        self.ensure_ready()?;
        let scan_pattern = self.scan_pattern(pattern);
        let mut cursor = 0;
        let mut total = 0;

        loop {
            let (next, batch) = self
                .backend
                .scan(cursor, &scan_pattern, DELETE_SCAN_COUNT)
                .await?;
            if !batch.is_empty() {
                match self.backend.del(&batch).await {
                    Ok(deleted) => {
                        total += deleted;
                        debug!(pattern, deleted, total, "Deleted key batch");
                    }
                    Err(e) => warn!(pattern, error = %e, "Failed to delete key batch"),
                }
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }

        info!(pattern, total, "Deleted keys by pattern");
        Ok(total)
    }
}
