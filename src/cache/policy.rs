//! Adaptive expiry policies
//!
//! A policy turns the value about to be cached into a TTL. This module holds
//! the trait and the pure TTL curves; the fleet types implement the trait
//! next to their definitions. The two curves slope in opposite directions:
//! fleet composition is stable when many devices are online (long TTL), while
//! live values change more often as the online share grows (short TTL).

use crate::error::{LeverError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Seconds of TTL granted per online device by the fleet-statistics policy
const SECONDS_PER_ONLINE_DEVICE: f64 = 0.3;

/// Summary TTL at zero online ratio, in seconds
const SUMMARY_BASE_SECONDS: f64 = 3.0;

/// Summary TTL reduction at full online ratio, in seconds
const SUMMARY_RATIO_SLOPE: f64 = 2.0;

/// Strategy that derives a TTL from a cached value
pub trait ExpiryPolicy<V>: Send + Sync {
    /// TTL to store `value` with
    fn ttl_for(&self, value: &V) -> Duration;
}

impl<V, F> ExpiryPolicy<V> for F
where
    F: Fn(&V) -> Duration + Send + Sync,
{
    fn ttl_for(&self, value: &V) -> Duration {
        self(value)
    }
}

/// Inclusive TTL range a policy result is clamped to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TtlBounds {
    #[serde(with = "humantime_serde")]
    min: Duration,
    #[serde(with = "humantime_serde")]
    max: Duration,
}

impl TtlBounds {
    /// Validated bounds; `min > max` is a caller bug
    pub fn new(min: Duration, max: Duration) -> Result<Self> {
        if min > max {
            return Err(LeverError::invalid_input(format!(
                "TTL bounds inverted: min {min:?} > max {max:?}"
            )));
        }
        Ok(Self { min, max })
    }

    /// Lower bound
    pub fn min(&self) -> Duration {
        self.min
    }

    /// Upper bound
    pub fn max(&self) -> Duration {
        self.max
    }

    /// Re-check bounds that came in through deserialization
    pub fn validate(&self) -> Result<()> {
        Self::new(self.min, self.max).map(|_| ())
    }

    fn clamp_secs(&self, secs: f64) -> Duration {
        if !secs.is_finite() || secs <= 0.0 {
            return self.min;
        }
        Duration::from_secs_f64(secs).clamp(self.min, self.max)
    }
}

impl Default for TtlBounds {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(500),
            max: Duration::from_secs(5),
        }
    }
}

/// TTL for fleet statistics: grows with the number of online devices
pub fn fleet_statistics_ttl(online_count: usize, bounds: TtlBounds) -> Duration {
    if online_count == 0 {
        return bounds.min;
    }
    bounds.clamp_secs(online_count as f64 * SECONDS_PER_ONLINE_DEVICE)
}

/// TTL for fleet summaries: shrinks as the online ratio grows
pub fn summary_ttl(online_count: usize, total_count: usize, bounds: TtlBounds) -> Duration {
    if total_count == 0 {
        return bounds.min;
    }
    let ratio = online_count.min(total_count) as f64 / total_count as f64;
    bounds.clamp_secs(SUMMARY_BASE_SECONDS - SUMMARY_RATIO_SLOPE * ratio)
}
