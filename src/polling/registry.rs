//! Registry of tracked devices
//!
//! The registry is the single owner of device state. Everything outside of it
//! works on [`DeviceSnapshot`] copies.

use crate::discovery::DiscoveredDevice;
use crate::error::{LeverError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, trace};

/// Lowest value a device reports after clamping
pub const VALUE_MIN: f64 = 0.0;

/// Highest value a device reports after clamping
pub const VALUE_MAX: f64 = 100.0;

/// Smallest change that counts as a new value
pub const VALUE_EPSILON: f64 = 1e-6;

/// Clamp a raw reading into the device value range
pub fn clamp_value(raw: f64) -> f64 {
    raw.clamp(VALUE_MIN, VALUE_MAX)
}

#[derive(Debug, Clone)]
struct Device {
    id: String,
    address: String,
    last_value: f64,
    last_seen: Option<DateTime<Utc>>,
    enabled: bool,
}

impl Device {
    fn new(id: String, address: String) -> Self {
        Self {
            id,
            address,
            last_value: VALUE_MIN,
            last_seen: None,
            enabled: true,
        }
    }

    fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            id: self.id.clone(),
            address: self.address.clone(),
            value: self.last_value,
            last_seen: self.last_seen,
            enabled: self.enabled,
        }
    }
}

/// Point-in-time copy of one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub id: String,
    pub address: String,

    /// Last accepted value, in `[0, 100]`
    pub value: f64,

    /// Last successful fetch, `None` until the first one
    pub last_seen: Option<DateTime<Utc>>,

    /// Disabled devices stay registered but are not polled
    pub enabled: bool,
}

/// Result of registering a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// Device was not tracked before
    Added,
    /// Known device announced a new address
    AddressChanged { previous: String },
    /// Known device, same address
    Unchanged,
}

/// Result of applying a fetched value
#[derive(Debug, Clone, PartialEq)]
pub enum ReadingOutcome {
    /// Device is gone or disabled; the reading was dropped
    Discarded,
    /// Value within epsilon of the previous one; only `last_seen` moved
    Touched(DeviceSnapshot),
    /// Value moved
    Changed {
        previous: f64,
        snapshot: DeviceSnapshot,
    },
}

/// Shared, lock-guarded device table
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    devices: Arc<RwLock<HashMap<String, Device>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a device or update its address; idempotent
    pub async fn add(&self, id: &str, address: &str) -> Result<UpsertOutcome> {
        let id = id.trim();
        let address = address.trim();
        if id.is_empty() || address.is_empty() {
            return Err(LeverError::invalid_input(
                "device id and address must not be empty",
            ));
        }

        let mut devices = self.devices.write().await;
        let outcome = match devices.get_mut(id) {
            Some(device) if device.address == address => UpsertOutcome::Unchanged,
            Some(device) => {
                let previous = std::mem::replace(&mut device.address, address.to_string());
                debug!(id, %previous, address, "Device address changed");
                UpsertOutcome::AddressChanged { previous }
            }
            None => {
                devices.insert(
                    id.to_string(),
                    Device::new(id.to_string(), address.to_string()),
                );
                debug!(id, address, "Device added");
                UpsertOutcome::Added
            }
        };
        Ok(outcome)
    }

    /// Register a device found by a discovery scan
    ///
    /// Re-discovery never touches `last_seen` or the stored value.
    pub async fn upsert_discovered(&self, device: &DiscoveredDevice) -> Result<UpsertOutcome> {
        // `last_seen` stays fetch-driven; a discovery reply only moves the address
        self.add(&device.id, &device.address).await
    }

    /// Stop tracking a device; returns its final snapshot if it was tracked
    pub async fn remove(&self, id: &str) -> Option<DeviceSnapshot> {
        let id = id.trim();
        let removed = self.devices.write().await.remove(id);
        if removed.is_some() {
            debug!(id, "Device removed");
        }
        removed.map(|device| device.snapshot())
    }

    /// Enable or disable polling for a device
    ///
    /// Returns whether the flag actually changed.
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<bool> {
        let id = id.trim();
        let mut devices = self.devices.write().await;
        let device = devices
            .get_mut(id)
            .ok_or_else(|| LeverError::not_found(format!("device '{id}'")))?;
        let changed = device.enabled != enabled;
        device.enabled = enabled;
        Ok(changed)
    }

    /// `(id, address)` of every device that should be polled
    pub async fn enabled_targets(&self) -> Vec<(String, String)> {
        let devices = self.devices.read().await;
        let mut targets: Vec<_> = devices
            .values()
            .filter(|device| device.enabled)
            .map(|device| (device.id.clone(), device.address.clone()))
            .collect();
        targets.sort();
        targets
    }

    /// Apply a fetched reading, clamping it first
    pub async fn apply_reading(&self, id: &str, raw: f64, at: DateTime<Utc>) -> ReadingOutcome {
        let id = id.trim();
        let mut devices = self.devices.write().await;
        let Some(device) = devices.get_mut(id).filter(|device| device.enabled) else {
            trace!(id, "Reading for untracked device discarded");
            return ReadingOutcome::Discarded;
        };

        let value = clamp_value(raw);
        device.last_seen = Some(at);
        if (value - device.last_value).abs() > VALUE_EPSILON {
            let previous = std::mem::replace(&mut device.last_value, value);
            ReadingOutcome::Changed {
                previous,
                snapshot: device.snapshot(),
            }
        } else {
            ReadingOutcome::Touched(device.snapshot())
        }
    }

    /// Snapshot of one device
    pub async fn get(&self, id: &str) -> Option<DeviceSnapshot> {
        self.devices.read().await.get(id.trim()).map(Device::snapshot)
    }

    /// Snapshots of all devices, ordered by id
    pub async fn snapshots(&self) -> Vec<DeviceSnapshot> {
        let devices = self.devices.read().await;
        let mut snapshots: Vec<_> = devices.values().map(Device::snapshot).collect();
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        snapshots
    }

    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }
}
