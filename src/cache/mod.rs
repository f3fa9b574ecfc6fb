//! Caching layer between the poll scheduler and its consumers
//!
//! [`TtlCache`] is a single generic cache type; specialised behaviour (how long
//! a fleet summary stays fresh, for example) is injected as an
//! [`ExpiryPolicy`] rather than by wrapping the cache.

pub mod policy;
pub mod ttl_cache;

// Re-export main types for convenience
pub use policy::{fleet_statistics_ttl, summary_ttl, ExpiryPolicy, TtlBounds};
pub use ttl_cache::{device_value_key, CacheConfig, CacheEntry, CacheStats, CleanupTask, TtlCache};
