//! Thread-safe TTL cache with lazy expiry and hit/miss statistics
//!
//! All reads, writes and statistic updates go through one mutex. That includes
//! the producer call inside [`TtlCache::get_or_compute`], so concurrent callers
//! for the same key wait for the first computation instead of repeating it.
//! Producers are expected to be cheap aggregations, not network calls.

use super::policy::ExpiryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Entry count above which a forced cleanup also drops old-but-unexpired entries
pub const DEFAULT_SOFT_CAP: usize = 100;

/// Shortest period accepted for the background sweep
pub const MIN_CLEANUP_INTERVAL: Duration = Duration::from_millis(1);

/// Cache entry with the TTL it was stored with
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// Cached value
    pub value: V,

    /// When the entry was stored
    pub stored_at: Instant,

    /// Time-to-live duration
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            stored_at: Instant::now(),
            ttl,
        }
    }

    /// Age of the entry at `now`
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.stored_at)
    }

    /// An entry is logically gone once its age reaches the TTL
    pub fn is_expired_at(&self, now: Instant, ttl: Duration) -> bool {
        self.age(now) >= ttl
    }
}

/// Cache statistics snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CacheStats {
    /// Entries physically present (expired ones included until swept)
    pub size: usize,

    /// Total cache hits
    pub hits: u64,

    /// Total cache misses
    pub misses: u64,

    /// Hit percentage in `[0, 100]`, 0 when nothing was requested
    pub hit_rate: f64,

    /// Time since the cache was constructed
    #[serde(with = "humantime_serde")]
    pub uptime: Duration,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// TTL used by `set` when neither the caller nor the policy supplies one
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,

    /// Soft entry limit consulted by forced cleanups
    pub soft_cap: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(5),
            soft_cap: DEFAULT_SOFT_CAP,
        }
    }
}

impl CacheConfig {
    /// Config with the given default TTL and the standard soft cap
    pub fn with_default_ttl(default_ttl: Duration) -> Self {
        Self {
            default_ttl,
            ..Default::default()
        }
    }
}

#[derive(Debug)]
struct CacheInner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    hits: u64,
    misses: u64,
}

impl<V: Clone> CacheInner<V> {
    fn lookup(&mut self, key: &str, ttl_override: Option<Duration>) -> Option<V> {
        let now = Instant::now();
        let fresh = match self.entries.get(key) {
            Some(entry) => {
                let ttl = ttl_override.unwrap_or(entry.ttl);
                if entry.is_expired_at(now, ttl) {
                    self.entries.remove(key);
                    trace!(key, "Cache entry expired and removed");
                    None
                } else {
                    Some(entry.value.clone())
                }
            }
            None => None,
        };

        if fresh.is_some() {
            self.hits += 1;
            trace!(key, "Cache hit");
        } else {
            self.misses += 1;
            trace!(key, "Cache miss");
        }
        fresh
    }

    fn sweep(&mut self, force: bool, config: &CacheConfig) -> usize {
        let now = Instant::now();
        let initial_count = self.entries.len();
        let over_cap = force && initial_count > config.soft_cap;
        let max_age = config.default_ttl.saturating_mul(2);

        self.entries.retain(|_, entry| {
            if entry.is_expired_at(now, entry.ttl) {
                false
            } else {
                !(over_cap && entry.age(now) > max_age)
            }
        });

        initial_count - self.entries.len()
    }
}

/// Generic TTL cache keyed by opaque strings
///
/// TTL resolution on `set`: explicit argument, then the injected
/// [`ExpiryPolicy`], then [`CacheConfig::default_ttl`].
pub struct TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    inner: Arc<Mutex<CacheInner<V>>>,
    config: CacheConfig,
    policy: Option<Arc<dyn ExpiryPolicy<V>>>,
    created_at: Instant,
}

impl<V> TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache with default configuration
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    /// Create a cache with custom configuration
    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheInner {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
            })),
            config,
            policy: None,
            created_at: Instant::now(),
        }
    }

    /// Create a cache whose TTLs are derived from the stored values
    pub fn with_policy<P>(config: CacheConfig, policy: P) -> Self
    where
        P: ExpiryPolicy<V> + 'static,
    {
        let mut cache = Self::with_config(config);
        cache.policy = Some(Arc::new(policy));
        cache
    }

    /// Cache configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn resolve_ttl(&self, value: &V, ttl: Option<Duration>) -> Duration {
        ttl.or_else(|| self.policy.as_ref().map(|p| p.ttl_for(value)))
            .unwrap_or(self.config.default_ttl)
    }

    /// Get a fresh value, evicting it if it has expired
    ///
    /// `ttl_override` replaces the entry's own TTL for this comparison only.
    pub async fn get(&self, key: &str, ttl_override: Option<Duration>) -> Option<V> {
        self.inner.lock().await.lookup(key, ttl_override)
    }

    /// Store a value, replacing whatever was there
    pub async fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let key = key.into();
        let ttl = self.resolve_ttl(&value, ttl);
        let mut inner = self.inner.lock().await;
        debug!(key = %key, ttl_ms = ttl.as_millis() as u64, "Cache entry stored");
        inner.entries.insert(key, CacheEntry::new(value, ttl));
    }

    /// Remove one key, or everything when `key` is `None`
    ///
    /// Returns how many entries were removed.
    pub async fn invalidate(&self, key: Option<&str>) -> usize {
        let mut inner = self.inner.lock().await;
        match key {
            Some(key) => {
                let removed = usize::from(inner.entries.remove(key).is_some());
                debug!(key, removed, "Cache key invalidated");
                removed
            }
            None => {
                let count = inner.entries.len();
                inner.entries.clear();
                debug!("Cache cleared: {} entries", count);
                count
            }
        }
    }

    /// Return the cached value or compute, store and return a new one
    ///
    /// The producer runs at most once per call, under the cache lock. A
    /// `None` result is returned without being stored; an error is returned
    /// unchanged and leaves the cache as it was.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        key: &str,
        producer: F,
        ttl: Option<Duration>,
    ) -> std::result::Result<Option<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Option<V>, E>>,
    {
        let mut inner = self.inner.lock().await;

        if let Some(value) = inner.lookup(key, ttl) {
            return Ok(Some(value));
        }

        let computed = producer().await?;
        if let Some(value) = &computed {
            let ttl = self.resolve_ttl(value, ttl);
            debug!(key, ttl_ms = ttl.as_millis() as u64, "Cache entry computed");
            inner
                .entries
                .insert(key.to_string(), CacheEntry::new(value.clone(), ttl));
        }
        Ok(computed)
    }

    /// Drop expired entries; with `force`, also trim old entries over the soft cap
    pub async fn cleanup(&self, force: bool) -> usize {
        let evicted = self.inner.lock().await.sweep(force, &self.config);
        if evicted > 0 {
            debug!("Cache cleanup: removed {} entries", evicted);
        }
        evicted
    }

    /// Statistics snapshot
    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        let total = inner.hits + inner.misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            inner.hits as f64 / total as f64 * 100.0
        };

        CacheStats {
            size: inner.entries.len(),
            hits: inner.hits,
            misses: inner.misses,
            hit_rate,
            uptime: self.created_at.elapsed(),
        }
    }

    /// Number of physically present entries
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    /// Check if cache is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.entries.is_empty()
    }

    /// Start a background sweep running every `interval`
    ///
    /// The sweep stops when the returned handle is dropped. Periods shorter
    /// than [`MIN_CLEANUP_INTERVAL`] are raised to it.
    pub fn spawn_cleanup(&self, interval: Duration) -> CleanupTask {
        let interval = interval.max(MIN_CLEANUP_INTERVAL);
        let inner = self.inner.clone();
        let config = self.config.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = inner.lock().await.sweep(false, &config);
                if evicted > 0 {
                    trace!("Background cleanup: removed {} expired entries", evicted);
                }
            }
        });

        CleanupTask { handle }
    }
}

impl<V> Default for TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> std::fmt::Debug for TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("config", &self.config)
            .field("has_policy", &self.policy.is_some())
            .finish()
    }
}

/// Handle for a background sweep; aborts the task on drop
#[derive(Debug)]
pub struct CleanupTask {
    handle: JoinHandle<()>,
}

impl Drop for CleanupTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Cache key for a device's last polled value
pub fn device_value_key(device_id: &str) -> String {
    format!("device:{device_id}:value")
}
