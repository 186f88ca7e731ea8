//! Key-value backends for cached pages.
//!
//! The cache only reads whole values and writes batches of whole values
//! under one TTL.

use async_trait::async_trait;
use deadpool_redis::redis::{self, AsyncCommands};
use deadpool_redis::{Config as RedisConfig, Pool};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::error::StoreError;

#[async_trait]
pub trait PageStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    /// Write every entry with the same TTL as one atomic batch.
    async fn set_many_ex(&self, entries: &[(String, String)], ttl: Duration)
        -> anyhow::Result<()>;
}

pub struct RedisPageStore {
    pub pool: Pool,
}

impl RedisPageStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn from_url(url: &str) -> anyhow::Result<Self> {
        let pool = RedisConfig::from_url(url)
            .create_pool(None)
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Build from `REDIS_URL` when it is set and a pool can be created.
    pub fn from_env() -> Option<Self> {
        let url = env::var("REDIS_URL").ok()?;
        match Self::from_url(&url) {
            Ok(store) => Some(store),
            Err(e) => {
                tracing::warn!(error = %e, "could not create redis pool from REDIS_URL");
                None
            }
        }
    }
}

#[async_trait]
impl PageStore for RedisPageStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.pool.get().await.map_err(StoreError::from)?;
        let v: Option<String> = conn.get(key).await.map_err(StoreError::from)?;
        Ok(v)
    }

    async fn set_many_ex(
        &self,
        entries: &[(String, String)],
        ttl: Duration,
    ) -> anyhow::Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        // redis rejects EX 0
        let ttl_secs = ttl.as_secs().max(1);
        let mut conn = self.pool.get().await.map_err(StoreError::from)?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value) in entries {
            pipe.cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(ttl_secs)
                .ignore();
        }
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }
}

/// Process-local store with per-entry expiry. Used when no redis is
/// configured and in tests.
#[derive(Default)]
pub struct InMemoryPageStore {
    entries: RwLock<HashMap<String, (String, Instant)>>,
    batches: AtomicUsize,
}

impl InMemoryPageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `set_many_ex` calls that wrote at least one entry.
    pub fn batch_count(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    /// Entries held in memory, expired or not.
    pub fn held_count(&self) -> usize {
        self.entries.read().len()
    }

    /// Drop `key` if it is still expired at `now`. A writer may have
    /// refreshed it after the caller saw it expire.
    fn evict_if_expired(&self, key: &str, now: Instant) -> bool {
        let mut guard = self.entries.write();
        if guard.get(key).is_some_and(|(_, until)| *until <= now) {
            guard.remove(key);
            return true;
        }
        false
    }

    /// Keys currently held and not yet expired, sorted.
    pub fn live_keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .read()
            .iter()
            .filter(|(_, (_, until))| *until > now)
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl PageStore for InMemoryPageStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let now = Instant::now();
        {
            let guard = self.entries.read();
            match guard.get(key) {
                Some((value, until)) if *until > now => return Ok(Some(value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }
        self.evict_if_expired(key, now);
        Ok(None)
    }

    async fn set_many_ex(
        &self,
        entries: &[(String, String)],
        ttl: Duration,
    ) -> anyhow::Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let now = Instant::now();
        let until = now + ttl;
        let mut guard = self.entries.write();
        // look-ahead pages are often never read, so sweep on every write
        guard.retain(|_, (_, expires)| *expires > now);
        for (key, value) in entries {
            guard.insert(key.clone(), (value.clone(), until));
        }
        self.batches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
