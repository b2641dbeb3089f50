//! TTL Key-Value Stores
//!
//! `TtlStore` is the only capability the idempotency guard needs:
//! existence check and set-with-expiry. Redis is the production backend
//! (shared across instances); the DashMap store serves single-instance
//! deployments and tests.
//!
//! Created: 2026-10-19

use crate::clock::Clock;
use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[async_trait]
pub trait TtlStore: Send + Sync {
    /// Returns true if `key` is present and not expired
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Store `value` under `key`, expiring after `ttl`
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
}

/// Redis-backed store (`EXISTS` / `SET key value EX secs`)
#[derive(Clone)]
pub struct RedisTtlStore {
    conn: ConnectionManager,
}

impl RedisTtlStore {
    /// Connect and verify with PING
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("Invalid REDIS_URL")?;
        let mut conn = ConnectionManager::new(client)
            .await
            .context("Failed to establish Redis connection")?;

        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .context("Redis PING failed")?;

        info!("Connected to Redis idempotency store");
        Ok(Self { conn })
    }
}

#[async_trait]
impl TtlStore for RedisTtlStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let count: i64 = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .with_context(|| format!("Redis EXISTS {} failed", key))?;
        Ok(count > 0)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        // EX takes whole seconds and rejects 0
        let secs = ttl.as_secs().max(1);
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(secs)
            .query_async::<_, ()>(&mut conn)
            .await
            .with_context(|| format!("Redis SET {} failed", key))?;
        Ok(())
    }
}

struct MemoryEntry {
    value: String,
    expires_at: Duration,
}

/// In-process store; expiry evaluated against a `Clock`
pub struct MemoryTtlStore {
    entries: DashMap<String, MemoryEntry>,
    clock: Arc<dyn Clock>,
}

impl MemoryTtlStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Drop expired entries to bound memory. Call periodically.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.elapsed();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!("TTL store cleanup: removed {} expired keys", removed);
        }
        removed
    }

    /// Value stored under `key`, if live
    pub fn get(&self, key: &str) -> Option<String> {
        let now = self.clock.elapsed();
        self.entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl TtlStore for MemoryTtlStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        let now = self.clock.elapsed();
        let live = match self.entries.get(key) {
            Some(entry) => entry.expires_at > now,
            None => return Ok(false),
        };
        if !live {
            self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        }
        Ok(live)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let expires_at = self.clock.elapsed() + ttl;
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[tokio::test]
    async fn test_memory_store_expires_keys() {
        let clock = Arc::new(ManualClock::new());
        let store = MemoryTtlStore::new(clock.clone());

        assert!(!store.exists("tx:a").await.unwrap());
        store.set("tx:a", "1", Duration::from_secs(300)).await.unwrap();
        assert!(store.exists("tx:a").await.unwrap());
        assert_eq!(store.get("tx:a").as_deref(), Some("1"));

        clock.advance(Duration::from_secs(299));
        assert!(store.exists("tx:a").await.unwrap());

        clock.advance(Duration::from_secs(1));
        assert!(!store.exists("tx:a").await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_purge_removes_only_expired() {
        let clock = Arc::new(ManualClock::new());
        let store = MemoryTtlStore::new(clock.clone());
        store.set("short", "1", Duration::from_secs(10)).await.unwrap();
        store.set("long", "1", Duration::from_secs(100)).await.unwrap();

        clock.advance(Duration::from_secs(50));
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.exists("long").await.unwrap());
    }
}
