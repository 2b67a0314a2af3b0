//! Redis client implementation with connection management

use crate::Result;
use redis::{aio::ConnectionManager, AsyncCommands};
use std::collections::HashMap;

/// Redis client with automatic reconnection.
///
/// Cloning is cheap and shares the underlying multiplexed connection, so one
/// client can be handed to every worker task.
#[derive(Clone)]
pub struct RedisClient {
    conn: ConnectionManager,
}

impl RedisClient {
    /// Connect to Redis server.
    ///
    /// Supports both redis:// and rediss:// (TLS) URLs.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    /// Connection manager handle (for raw commands and scripts).
    pub fn connection_mut(&mut self) -> &mut ConnectionManager {
        &mut self.conn
    }

    /// PING - connectivity probe.
    pub async fn ping(&mut self) -> Result<()> {
        redis::cmd("PING").query_async(&mut self.conn).await
    }

    // ========================================================================
    // Key-Value Operations
    // ========================================================================

    /// GET - Get value by key.
    pub async fn get<T: redis::FromRedisValue>(&mut self, key: &str) -> Result<Option<T>> {
        self.conn.get(key).await
    }

    /// SETEX - Set key with expiry in seconds.
    pub async fn set_ex<V>(&mut self, key: &str, value: V, seconds: u64) -> Result<()>
    where
        V: redis::ToRedisArgs + Send + Sync,
    {
        self.conn.set_ex(key, value, seconds).await
    }

    /// SET key value NX PX ttl - acquire-style set, true when the key was
    /// absent.
    pub async fn set_nx_px(&mut self, key: &str, value: &str, ttl_ms: u64) -> Result<bool> {
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut self.conn)
            .await?;
        Ok(reply.is_some())
    }

    /// DEL - Delete one or more keys.
    pub async fn del(&mut self, key: &str) -> Result<i64> {
        self.conn.del(key).await
    }

    /// EXPIRE - Set expiry time in seconds.
    pub async fn expire(&mut self, key: &str, seconds: i64) -> Result<bool> {
        self.conn.expire(key, seconds).await
    }

    // ========================================================================
    // Atomic Counters
    // ========================================================================

    /// INCRBY - Increment by specific amount.
    pub async fn incr_by(&mut self, key: &str, delta: i64) -> Result<i64> {
        self.conn.incr(key, delta).await
    }

    // ========================================================================
    // Sorted Sets / Hashes
    // ========================================================================

    /// ZCARD - Sorted set cardinality.
    pub async fn zcard(&mut self, key: &str) -> Result<u64> {
        self.conn.zcard(key).await
    }

    /// HLEN - Hash field count.
    pub async fn hlen(&mut self, key: &str) -> Result<u64> {
        self.conn.hlen(key).await
    }

    /// HGET - Single hash field.
    pub async fn hget<T: redis::FromRedisValue>(
        &mut self,
        key: &str,
        field: &str,
    ) -> Result<Option<T>> {
        self.conn.hget(key, field).await
    }

    /// HSET - Single hash field write.
    pub async fn hset<V>(&mut self, key: &str, field: &str, value: V) -> Result<()>
    where
        V: redis::ToRedisArgs + Send + Sync,
    {
        self.conn.hset(key, field, value).await
    }

    /// HGETALL - Full hash as a string map.
    pub async fn hgetall(&mut self, key: &str) -> Result<HashMap<String, String>> {
        self.conn.hgetall(key).await
    }

    // ========================================================================
    // Key Scan
    // ========================================================================

    /// SCAN MATCH pattern - collect all matching keys.
    ///
    /// Used for small, bounded keyspaces (worker heartbeats); never for job
    /// data.
    pub async fn scan_keys(&mut self, pattern: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut self.conn)
                .await?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(keys)
    }
}
