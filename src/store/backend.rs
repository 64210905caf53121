//! Backend seam under [`KeyValueStore`](super::KeyValueStore)
//!
//! Keys passed here are already prefixed.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;

/// Raw key-value operations
///
/// Implementations must fail with `NotReady` instead of queueing while the
/// backend is disconnected.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Whether operations can currently be issued
    fn is_ready(&self) -> bool;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Create-if-absent with expiry; `false` when the key already existed
    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool>;

    /// Atomic increment, creating the key at 1
    async fn incr(&self, key: &str) -> Result<i64>;

    async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<()>;

    /// Create-if-absent hash with expiry; `false` when the key already existed
    async fn hset_all_nx_ex(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl_secs: u64,
    ) -> Result<bool>;

    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Returns the number of members actually added
    async fn sadd(&self, key: &str, members: &[&str]) -> Result<usize>;

    /// Returns the number of members actually removed
    async fn srem(&self, key: &str, members: &[&str]) -> Result<usize>;

    async fn sismember(&self, key: &str, member: &str) -> Result<bool>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// `false` when the key does not exist
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool>;

    /// Remaining lifetime in seconds: `-2` missing key, `-1` no expiry
    async fn ttl(&self, key: &str) -> Result<i64>;

    /// One cursor step; a returned cursor of `0` ends the scan
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)>;

    async fn del(&self, keys: &[String]) -> Result<usize>;
}
