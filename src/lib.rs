//! Fleet core for networked lever encoders
//!
//! This crate finds lever devices on the local network, keeps polling their
//! calibrated values and serves aggregates through TTL caches with adaptive
//! expiry.
//!
//! # Features
//!
//! - UDP broadcast discovery with per-scan deduplication
//! - Concurrent poll scheduler on a bounded worker pool
//! - Generic async TTL cache with hit/miss statistics
//! - Adaptive expiry policies for fleet summaries and statistics
//! - Device change events over a broadcast channel

pub mod cache;
pub mod config;
pub mod discovery;
pub mod error;
pub mod logging;
pub mod polling;
pub mod services;

// Re-export main types for convenience
pub use cache::{CacheStats, ExpiryPolicy, TtlBounds, TtlCache};
pub use config::FleetConfig;
pub use discovery::{DiscoveredDevice, DiscoveryClient};
pub use error::{LeverError, Result};
pub use polling::{DeviceEvent, DeviceSnapshot, PollScheduler};
pub use services::{FleetStatistics, FleetSummary, FleetView};
