//! Redis backend with managed reconnection
//!
//! A connect cycle retries transient failures a bounded number of times and
//! gives up at once when the server refuses the connection. When the first
//! cycle fails, or a live connection drops, a background task reconnects
//! indefinitely; commands issued meanwhile fail with `NotReady` instead of
//! queueing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, Cmd, FromRedisValue, RedisError, Script};
use tracing::{debug, error, info, warn};

use super::backend::KvBackend;
use crate::config::RedisConfig;
use crate::error::{BalancerError, Result};

/// Connection retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first failed attempt of a connect cycle
    pub max_retries: u32,
    /// Fixed delay between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            delay: Duration::from_secs(1),
        }
    }
}

/// Create-if-absent hash write with expiry
const HSET_NX_EX: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return 0
end
redis.call('HSET', KEYS[1], unpack(ARGV, 2))
redis.call('EXPIRE', KEYS[1], ARGV[1])
return 1
";

struct Shared {
    client: Client,
    connection: ArcSwapOption<MultiplexedConnection>,
    ready: AtomicBool,
    reconnecting: AtomicBool,
    policy: RetryPolicy,
}

impl Shared {
    fn install(&self, connection: MultiplexedConnection) {
        self.connection.store(Some(Arc::new(connection)));
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Drop the live connection and start the reconnect loop once
    fn mark_down(self: &Arc<Self>) {
        self.ready.store(false, Ordering::SeqCst);
        self.connection.store(None);

        if self
            .reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        warn!("Redis connection unavailable. Reconnecting");
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            shared.reconnect_forever().await;
        });
    }

    async fn reconnect_forever(&self) {
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            match self.client.get_multiplexed_async_connection().await {
                Ok(connection) => {
                    self.install(connection);
                    self.reconnecting.store(false, Ordering::SeqCst);
                    info!(attempt, "Redis connection re-established");
                    return;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Redis reconnect attempt failed");
                    tokio::time::sleep(self.policy.delay).await;
                }
            }
        }
    }
}

/// Redis-backed [`KvBackend`]
#[derive(Clone)]
pub struct RedisBackend {
    shared: Arc<Shared>,
}

impl RedisBackend {
    /// Backend for the configured URL, not yet connected
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url())?;
        Ok(Self {
            shared: Arc::new(Shared {
                client,
                connection: ArcSwapOption::empty(),
                ready: AtomicBool::new(false),
                reconnecting: AtomicBool::new(false),
                policy: config.retry_policy(),
            }),
        })
    }

    /// Run the first connect cycle. If it fails the backend is returned
    /// anyway and keeps reconnecting in the background.
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let backend = Self::new(config)?;
        match backend.connect_cycle().await {
            Ok(()) => info!(host = %config.host, port = config.port, "Connected to Redis"),
            Err(e) => {
                error!(error = %e, "Initial Redis connection failed");
                backend.shared.mark_down();
            }
        }
        Ok(backend)
    }

    async fn connect_cycle(&self) -> Result<()> {
        let connection = establish(&self.shared.client, self.shared.policy).await?;
        self.shared.install(connection);
        Ok(())
    }

    fn connection(&self) -> Result<MultiplexedConnection> {
        if !self.shared.ready.load(Ordering::SeqCst) {
            return Err(BalancerError::NotReady);
        }
        self.shared
            .connection
            .load_full()
            .map(|connection| (*connection).clone())
            .ok_or(BalancerError::NotReady)
    }

    fn observe(&self, err: RedisError) -> BalancerError {
        if is_disconnect(&err) {
            self.shared.mark_down();
        }
        BalancerError::from(err)
    }

    async fn run<T: FromRedisValue>(&self, cmd: &Cmd) -> Result<T> {
        let mut connection = self.connection()?;
        cmd.query_async(&mut connection)
            .await
            .map_err(|e| self.observe(e))
    }
}

/// One connect cycle: bounded retries, fail fast on refusal
async fn establish(client: &Client, policy: RetryPolicy) -> Result<MultiplexedConnection> {
    let mut retries = 0;
    loop {
        match client.get_multiplexed_async_connection().await {
            Ok(connection) => return Ok(connection),
            Err(e) if e.is_connection_refusal() => {
                error!(error = %e, "Redis server refused connection");
                return Err(BalancerError::Backend(format!(
                    "Redis server refused connection: {e}"
                )));
            }
            Err(e) => {
                retries += 1;
                if retries > policy.max_retries {
                    error!(
                        attempts = policy.max_retries,
                        error = %e,
                        "Giving up on Redis connection"
                    );
                    return Err(BalancerError::Backend(format!(
                        "Exhausted all attempts ({}) to connect to Redis: {e}",
                        policy.max_retries
                    )));
                }
                warn!(retry = retries, error = %e, "Redis connection attempt failed, retrying");
                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}

fn is_disconnect(err: &RedisError) -> bool {
    err.is_connection_dropped() || err.is_io_error() || err.is_connection_refusal()
}

fn hset_cmd(key: &str, fields: &[(String, String)]) -> Cmd {
    let mut cmd = redis::cmd("HSET");
    cmd.arg(key);
    for (field, value) in fields {
        cmd.arg(field).arg(value);
    }
    cmd
}

#[async_trait]
impl KvBackend for RedisBackend {
    fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::SeqCst)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.run(redis::cmd("GET").arg(key)).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.run(redis::cmd("SET").arg(key).arg(value)).await
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        let reply: Option<String> = self
            .run(
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("EX")
                    .arg(ttl_secs),
            )
            .await?;
        Ok(reply.is_some())
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        self.run(redis::cmd("INCR").arg(key)).await
    }

    async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        let _: i64 = self.run(&hset_cmd(key, fields)).await?;
        Ok(())
    }

    async fn hset_all_nx_ex(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl_secs: u64,
    ) -> Result<bool> {
        let mut connection = self.connection()?;
        let script = Script::new(HSET_NX_EX);
        let mut invocation = script.key(key);
        invocation.arg(ttl_secs);
        for (field, value) in fields {
            invocation.arg(field).arg(value);
        }
        let created: i64 = invocation
            .invoke_async(&mut connection)
            .await
            .map_err(|e| self.observe(e))?;
        Ok(created == 1)
    }

    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>> {
        self.run(redis::cmd("HGETALL").arg(key)).await
    }

    async fn sadd(&self, key: &str, members: &[&str]) -> Result<usize> {
        self.run(redis::cmd("SADD").arg(key).arg(members)).await
    }

    async fn srem(&self, key: &str, members: &[&str]) -> Result<usize> {
        self.run(redis::cmd("SREM").arg(key).arg(members)).await
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        self.run(redis::cmd("SISMEMBER").arg(key).arg(member)).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.run(redis::cmd("EXISTS").arg(key)).await
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        self.run(redis::cmd("EXPIRE").arg(key).arg(ttl_secs)).await
    }

    async fn ttl(&self, key: &str) -> Result<i64> {
        self.run(redis::cmd("TTL").arg(key)).await
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)> {
        debug!(cursor, pattern, "SCAN step");
        self.run(
            redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(count),
        )
        .await
    }

    async fn del(&self, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.run(redis::cmd("DEL").arg(keys)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_retry_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.delay, Duration::from_secs(1));
    }

    #[test]
    fn test_hset_cmd_flattens_fields() {
        let cmd = hset_cmd(
            "p_uid_domainRequest",
            &[("date".to_string(), "1700000000000".to_string())],
        );
        let packed = String::from_utf8_lossy(&cmd.get_packed_command()).to_string();
        assert!(packed.contains("HSET"));
        assert!(packed.contains("p_uid_domainRequest"));
        assert!(packed.contains("1700000000000"));
    }

    /// A local port with nothing listening on it
    fn closed_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    fn config(port: u16, connect_retries: u32, retry_delay_ms: u64) -> RedisConfig {
        RedisConfig {
            url: Some(format!("redis://127.0.0.1:{port}/")),
            host: "127.0.0.1".to_string(),
            port,
            data_prefix: "t_".to_string(),
            connect_retries,
            retry_delay_ms,
        }
    }

    /// Split one RESP command array off the front of `buf`
    fn parse_command(buf: &[u8]) -> Option<(Vec<Vec<u8>>, usize)> {
        fn line(buf: &[u8], from: usize) -> Option<(&[u8], usize)> {
            let end = buf[from..].windows(2).position(|w| w == b"\r\n")? + from;
            Some((&buf[from..end], end + 2))
        }

        let (header, mut pos) = line(buf, 0)?;
        let count: usize = std::str::from_utf8(header.strip_prefix(b"*")?)
            .ok()?
            .parse()
            .ok()?;
        let mut parts = Vec::with_capacity(count);
        for _ in 0..count {
            let (len_line, start) = line(buf, pos)?;
            let len: usize = std::str::from_utf8(len_line.strip_prefix(b"$")?)
                .ok()?
                .parse()
                .ok()?;
            let end = start + len;
            if buf.len() < end + 2 {
                return None;
            }
            parts.push(buf[start..end].to_vec());
            pos = end + 2;
        }
        Some((parts, pos))
    }

    /// Minimal RESP server: PONG to PING, OK to everything else
    async fn serve_resp(listener: tokio::net::TcpListener) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                loop {
                    let n = match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => n,
                    };
                    buf.extend_from_slice(&chunk[..n]);
                    while let Some((command, used)) = parse_command(&buf) {
                        buf.drain(..used);
                        let is_ping = command
                            .first()
                            .is_some_and(|name| name.eq_ignore_ascii_case(b"PING"));
                        let reply: &[u8] = if is_ping { b"+PONG\r\n" } else { b"+OK\r\n" };
                        if socket.write_all(reply).await.is_err() {
                            return;
                        }
                    }
                }
            });
        }
    }

    async fn wait_until_ready(backend: &RedisBackend) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !backend.is_ready() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("backend never became ready");
    }

    #[test]
    fn test_parse_command() {
        let (parts, used) = parse_command(b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n*1").unwrap();
        assert_eq!(parts, vec![b"GET".to_vec(), b"k".to_vec()]);
        assert_eq!(used, 20);
        assert!(parse_command(b"*2\r\n$3\r\nGET\r\n").is_none());
    }

    #[tokio::test]
    async fn test_refused_connection_skips_retry_delay() {
        let backend = RedisBackend::new(&config(closed_port(), 3, 1500)).unwrap();

        let started = std::time::Instant::now();
        let result = backend.connect_cycle().await;

        assert!(matches!(result, Err(BalancerError::Backend(_))));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!backend.is_ready());
    }

    #[tokio::test]
    async fn test_failed_first_connect_keeps_reconnecting() {
        let port = closed_port();
        let backend = RedisBackend::connect(&config(port, 0, 20)).await.unwrap();

        assert!(!backend.is_ready());
        assert!(matches!(backend.get("k").await, Err(BalancerError::NotReady)));

        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .unwrap();
        tokio::spawn(serve_resp(listener));

        wait_until_ready(&backend).await;
        backend.set("k", "v").await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_connection_recovers() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(serve_resp(listener));

        let backend = RedisBackend::connect(&config(port, 0, 20)).await.unwrap();
        assert!(backend.is_ready());

        backend.shared.mark_down();
        assert!(matches!(backend.get("k").await, Err(BalancerError::NotReady)));

        wait_until_ready(&backend).await;
        assert_eq!(backend.get("k").await.unwrap().as_deref(), Some("OK"));
    }
}
