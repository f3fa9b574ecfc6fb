//! Fleet-wide aggregates over device snapshots
//!
//! [`FleetView`] serves the summary and statistics through two TTL caches
//! whose expiry comes from the adaptive policies, so aggregate reads stay
//! cheap while the scheduler keeps writing.

use crate::cache::{
    fleet_statistics_ttl, summary_ttl, CacheStats, ExpiryPolicy, TtlBounds, TtlCache,
};
use crate::config::CacheSettings;
use crate::error::{LeverError, Result};
use crate::polling::{DeviceRegistry, DeviceSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace};

const SUMMARY_KEY: &str = "summary";
const STATISTICS_KEY: &str = "statistics";

/// Liveness derived from `last_seen`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
}

impl DeviceStatus {
    /// Online iff the last successful fetch is at most `offline_after` old
    pub fn classify(
        last_seen: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        offline_after: Duration,
    ) -> Self {
        let online = match last_seen {
            // A timestamp ahead of `now` means clock skew, not silence
            Some(seen) => (now - seen)
                .to_std()
                .map_or(true, |age| age <= offline_after),
            None => false,
        };
        if online {
            Self::Online
        } else {
            Self::Offline
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, Self::Online)
    }
}

/// One device as shown in a summary
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceRecord {
    pub id: String,
    pub address: String,
    pub status: DeviceStatus,

    /// `None` until the device has answered a poll
    pub value: Option<f64>,
    pub last_seen: Option<DateTime<Utc>>,
    pub enabled: bool,
}

impl DeviceRecord {
    fn from_snapshot(
        snapshot: &DeviceSnapshot,
        now: DateTime<Utc>,
        offline_after: Duration,
    ) -> Self {
        Self {
            id: snapshot.id.clone(),
            address: snapshot.address.clone(),
            status: DeviceStatus::classify(snapshot.last_seen, now, offline_after),
            value: snapshot.last_seen.map(|_| snapshot.value),
            last_seen: snapshot.last_seen,
            enabled: snapshot.enabled,
        }
    }
}

/// Fleet statistics over online devices
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FleetStatistics {
    /// All tracked devices
    pub count: usize,
    pub online_count: usize,
    pub average_value: Option<f64>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
}

impl FleetStatistics {
    pub fn from_records(records: &[DeviceRecord]) -> Self {
        let values: Vec<f64> = records
            .iter()
            .filter(|r| r.status.is_online())
            .filter_map(|r| r.value)
            .collect();

        let (average_value, min_value, max_value) = if values.is_empty() {
            (None, None, None)
        } else {
            let sum: f64 = values.iter().sum();
            (
                Some(sum / values.len() as f64),
                values.iter().copied().reduce(f64::min),
                values.iter().copied().reduce(f64::max),
            )
        };

        Self {
            count: records.len(),
            online_count: records.iter().filter(|r| r.status.is_online()).count(),
            average_value,
            min_value,
            max_value,
        }
    }
}

/// Device list plus statistics at one point in time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FleetSummary {
    pub devices: Vec<DeviceRecord>,
    pub statistics: FleetStatistics,
    pub generated_at: DateTime<Utc>,
}

impl FleetSummary {
    pub fn from_snapshots(
        snapshots: &[DeviceSnapshot],
        now: DateTime<Utc>,
        offline_after: Duration,
    ) -> Self {
        let devices: Vec<_> = snapshots
            .iter()
            .map(|s| DeviceRecord::from_snapshot(s, now, offline_after))
            .collect();
        let statistics = FleetStatistics::from_records(&devices);
        Self {
            devices,
            statistics,
            generated_at: now,
        }
    }
}

/// Policy for cached [`FleetStatistics`]
#[derive(Debug, Clone, Copy, Default)]
pub struct FleetStatisticsPolicy {
    bounds: TtlBounds,
}

impl FleetStatisticsPolicy {
    pub fn new(bounds: TtlBounds) -> Self {
        Self { bounds }
    }
}

impl ExpiryPolicy<FleetStatistics> for FleetStatisticsPolicy {
    fn ttl_for(&self, value: &FleetStatistics) -> Duration {
        let ttl = fleet_statistics_ttl(value.online_count, self.bounds);
        trace!(
            count = value.count,
            online = value.online_count,
            ttl_ms = ttl.as_millis() as u64,
            "Adaptive statistics TTL"
        );
        ttl
    }
}

/// Policy for cached [`FleetSummary`] values
#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryPolicy {
    bounds: TtlBounds,
}

impl SummaryPolicy {
    pub fn new(bounds: TtlBounds) -> Self {
        Self { bounds }
    }
}

impl ExpiryPolicy<FleetSummary> for SummaryPolicy {
    fn ttl_for(&self, value: &FleetSummary) -> Duration {
        let total = value.devices.len();
        let online = value.devices.iter().filter(|d| d.status.is_online()).count();
        let ttl = summary_ttl(online, total, self.bounds);
        trace!(total, online, ttl_ms = ttl.as_millis() as u64, "Adaptive summary TTL");
        ttl
    }
}

/// Cached read side of the registry
#[derive(Debug)]
pub struct FleetView {
    registry: DeviceRegistry,
    summaries: TtlCache<FleetSummary>,
    statistics: TtlCache<FleetStatistics>,
    offline_after: Duration,
}

impl FleetView {
    pub fn new(registry: DeviceRegistry, settings: &CacheSettings) -> Self {
        Self {
            registry,
            summaries: TtlCache::with_policy(
                settings.summary_cache(),
                SummaryPolicy::new(settings.adaptive_bounds),
            ),
            statistics: TtlCache::with_policy(
                settings.statistics_cache(),
                FleetStatisticsPolicy::new(settings.adaptive_bounds),
            ),
            offline_after: settings.offline_after,
        }
    }

    async fn build_summary(&self) -> FleetSummary {
        let snapshots = self.registry.snapshots().await;
        FleetSummary::from_snapshots(&snapshots, Utc::now(), self.offline_after)
    }

    /// Fleet summary, recomputed once the cached one expires
    pub async fn summary(&self) -> Result<FleetSummary> {
        self.summaries
            .get_or_compute(
                SUMMARY_KEY,
                || async { Ok::<_, LeverError>(Some(self.build_summary().await)) },
                None,
            )
            .await?
            .ok_or_else(|| LeverError::internal("summary producer returned nothing"))
    }

    /// Fleet statistics, recomputed once the cached ones expire
    pub async fn statistics(&self) -> Result<FleetStatistics> {
        self.statistics
            .get_or_compute(
                STATISTICS_KEY,
                || async { Ok::<_, LeverError>(Some(self.build_summary().await.statistics)) },
                None,
            )
            .await?
            .ok_or_else(|| LeverError::internal("statistics producer returned nothing"))
    }

    /// Drop both cached aggregates
    pub async fn invalidate(&self) {
        let removed =
            self.summaries.invalidate(None).await + self.statistics.invalidate(None).await;
        debug!(removed, "Fleet view invalidated");
    }

    /// Sweep expired aggregates
    pub async fn cleanup(&self) -> usize {
        self.summaries.cleanup(false).await + self.statistics.cleanup(false).await
    }

    /// `(summary, statistics)` cache stats
    pub async fn cache_stats(&self) -> (CacheStats, CacheStats) {
        (self.summaries.stats().await, self.statistics.stats().await)
    }
}
