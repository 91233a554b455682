//! Cache backend implementations.

use super::key::Fingerprint;
use crate::Result;
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

struct CacheEntry {
    data: Vec<u8>,
    created_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn new(data: Vec<u8>, ttl: Duration) -> Self {
        Self {
            data,
            created_at: Instant::now(),
            ttl,
        }
    }

    fn is_expired(&self) -> bool {
        self.created_at.elapsed() >= self.ttl
    }
}

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &Fingerprint) -> Result<Option<Vec<u8>>>;
    /// Store a value; returns how many other entries were evicted to make room.
    async fn set(&self, key: &Fingerprint, value: &[u8], ttl: Duration) -> Result<usize>;
    async fn delete(&self, key: &Fingerprint) -> Result<bool>;
    async fn clear(&self) -> Result<()>;
    /// Live (unexpired) entries.
    async fn len(&self) -> Result<usize>;
    /// Drop expired entries, then least recently used ones until at most `max_entries` remain.
    async fn trim(&self, max_entries: usize) -> Result<usize>;
    fn name(&self) -> &'static str;
}

/// In-process LRU store with per-entry TTL. Expired entries are purged lazily.
pub struct MemoryCache {
    entries: Mutex<LruCache<Fingerprint, CacheEntry>>,
}

impl MemoryCache {
    /// A capacity of zero is treated as one.
    pub fn new(max_entries: usize) -> Self {
        let cap = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<Fingerprint, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &Fingerprint) -> Result<Option<Vec<u8>>> {
        let mut entries = self.lock();
        let expired = match entries.get(key) {
            Some(entry) if !entry.is_expired() => return Ok(Some(entry.data.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &Fingerprint, value: &[u8], ttl: Duration) -> Result<usize> {
        let mut entries = self.lock();
        let displaced = entries.push(key.clone(), CacheEntry::new(value.to_vec(), ttl));
        // `push` also returns the old value when the key was already present.
        Ok(match displaced {
            Some((old_key, _)) if &old_key != key => 1,
            _ => 0,
        })
    }

    async fn delete(&self, key: &Fingerprint) -> Result<bool> {
        Ok(self.lock().pop(key).is_some())
    }

    async fn clear(&self) -> Result<()> {
        self.lock().clear();
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.lock().iter().filter(|(_, e)| !e.is_expired()).count())
    }

    async fn trim(&self, max_entries: usize) -> Result<usize> {
        let mut entries = self.lock();
        let expired: Vec<Fingerprint> = entries
            .iter()
            .filter(|(_, e)| e.is_expired())
            .map(|(k, _)| k.clone())
            .collect();
        for k in &expired {
            entries.pop(k);
        }
        let mut evicted = 0;
        while entries.len() > max_entries {
            if entries.pop_lru().is_none() {
                break;
            }
            evicted += 1;
        }
        Ok(evicted)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullCache;

impl NullCache {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CacheBackend for NullCache {
    async fn get(&self, _: &Fingerprint) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
    async fn set(&self, _: &Fingerprint, _: &[u8], _: Duration) -> Result<usize> {
        Ok(0)
    }
    async fn delete(&self, _: &Fingerprint) -> Result<bool> {
        Ok(false)
    }
    async fn clear(&self) -> Result<()> {
        Ok(())
    }
    async fn len(&self) -> Result<usize> {
        Ok(0)
    }
    async fn trim(&self, _: usize) -> Result<usize> {
        Ok(0)
    }
    fn name(&self) -> &'static str {
        "null"
    }
}
