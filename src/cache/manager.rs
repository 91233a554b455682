//! Cache manager.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use super::backend::{CacheBackend, MemoryCache, NullCache};
use super::key::Fingerprint;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
    #[serde(rename = "ttl_secs", with = "secs")]
    pub default_ttl: Duration,
    /// Serialized values larger than this are not stored.
    pub max_entry_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1000,
            default_ttl: Duration::from_secs(3600),
            max_entry_size: 10 * 1024 * 1024,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
    pub fn with_max_entries(mut self, n: usize) -> Self {
        self.max_entries = n;
        self
    }
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions: u64,
    pub size: usize,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    evictions: AtomicU64,
}

pub struct CacheManager {
    config: CacheConfig,
    backend: Box<dyn CacheBackend>,
    stats: AtomicStats,
}

impl CacheManager {
    pub fn new(config: CacheConfig, backend: Box<dyn CacheBackend>) -> Self {
        Self {
            config,
            backend,
            stats: AtomicStats::default(),
        }
    }

    /// Memory backend when enabled, null backend otherwise.
    pub fn from_config(config: CacheConfig) -> Self {
        let backend: Box<dyn CacheBackend> = if config.enabled {
            Box::new(MemoryCache::new(config.max_entries))
        } else {
            Box::new(NullCache::new())
        };
        Self::new(config, backend)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Stored value for `key`; an undecodable entry is dropped and reported as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &Fingerprint) -> Result<Option<T>> {
        if !self.config.enabled {
            return Ok(None);
        }
        match self.backend.get(key).await? {
            Some(data) => match serde_json::from_slice(&data) {
                Ok(val) => {
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(fingerprint = %key, "cache hit");
                    Ok(Some(val))
                }
                Err(_) => {
                    self.backend.delete(key).await?;
                    self.stats.misses.fetch_add(1, Ordering::Relaxed);
                    Ok(None)
                }
            },
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                debug!(fingerprint = %key, "cache miss");
                Ok(None)
            }
        }
    }

    pub async fn set<T: Serialize>(&self, key: &Fingerprint, value: &T) -> Result<()> {
        self.set_with_ttl(key, value, self.config.default_ttl).await
    }

    pub async fn set_with_ttl<T: Serialize>(
        &self,
        key: &Fingerprint,
        value: &T,
        ttl: Duration,
    ) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }
        let data = serde_json::to_vec(value)?;
        if data.len() > self.config.max_entry_size {
            debug!(fingerprint = %key, size = data.len(), "value too large to cache");
            return Ok(());
        }
        let evicted = self.backend.set(key, &data, ttl).await?;
        self.stats.sets.fetch_add(1, Ordering::Relaxed);
        self.stats
            .evictions
            .fetch_add(evicted as u64, Ordering::Relaxed);
        Ok(())
    }

    pub async fn delete(&self, key: &Fingerprint) -> Result<bool> {
        self.backend.delete(key).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.backend.clear().await
    }

    /// Shrink to at most `max_entries`; returns entries evicted.
    pub async fn trim(&self, max_entries: usize) -> Result<usize> {
        let evicted = self.backend.trim(max_entries).await?;
        self.stats
            .evictions
            .fetch_add(evicted as u64, Ordering::Relaxed);
        Ok(evicted)
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            sets: self.stats.sets.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            size: self.backend.len().await.unwrap_or(0),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn test_set_get_and_stats() {
        let cache = CacheManager::from_config(CacheConfig::new().with_max_entries(2));
        let k = Fingerprint::from("k");
        assert!(cache.get::<Value>(&k).await.unwrap().is_none());
        cache.set(&k, &json!({"a": 1})).await.unwrap();
        assert_eq!(cache.get::<Value>(&k).await.unwrap(), Some(json!({"a": 1})));

        let stats = cache.stats().await;
        assert_eq!((stats.hits, stats.misses, stats.sets, stats.size), (1, 1, 1, 1));
        assert!((stats.hit_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_capacity_plus_one_evicts_exactly_one() {
        let cache = CacheManager::from_config(CacheConfig::new().with_max_entries(3));
        for i in 0..4 {
            cache
                .set(&Fingerprint::from(format!("k{}", i).as_str()), &i)
                .await
                .unwrap();
        }
        let stats = cache.stats().await;
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.size, 3);
        assert!(cache.get::<i32>(&Fingerprint::from("k0")).await.unwrap().is_none());
        assert_eq!(cache.get::<i32>(&Fingerprint::from("k3")).await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = CacheManager::from_config(CacheConfig::new());
        let k = Fingerprint::from("short");
        cache
            .set_with_ttl(&k, &"v", Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(cache.get::<String>(&k).await.unwrap().as_deref(), Some("v"));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get::<String>(&k).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_disabled_cache_stores_nothing() {
        let cache = CacheManager::from_config(CacheConfig::new().with_enabled(false));
        let k = Fingerprint::from("k");
        cache.set(&k, &1).await.unwrap();
        assert!(cache.get::<i32>(&k).await.unwrap().is_none());
        assert_eq!(cache.backend_name(), "null");
        assert_eq!(cache.stats().await, CacheStats::default());
    }

    #[tokio::test]
    async fn test_trim_and_clear() {
        let cache = CacheManager::from_config(CacheConfig::new());
        for i in 0..5 {
            cache
                .set(&Fingerprint::from(i.to_string().as_str()), &i)
                .await
                .unwrap();
        }
        assert_eq!(cache.trim(2).await.unwrap(), 3);
        assert_eq!(cache.stats().await.evictions, 3);
        cache.clear().await.unwrap();
        assert_eq!(cache.stats().await.size, 0);
    }
}
