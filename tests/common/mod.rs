//! Common test utilities
//!
//! Each integration test binary pulls in only what it needs.
#![allow(dead_code)]

pub mod lever_mock;
pub mod udp_device;

use async_trait::async_trait;
use lever_fleet::config::FleetConfig;
use lever_fleet::polling::{DeviceFetcher, DeviceSnapshot, PollScheduler};
use lever_fleet::{LeverError, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Config tuned for fast tests
pub fn test_config() -> FleetConfig {
    let mut config = FleetConfig::default();
    config.polling.interval = Duration::from_millis(50);
    config.polling.timeout = Duration::from_millis(200);
    config.discovery.timeout = Duration::from_millis(300);
    config
}

/// Poll the scheduler until `predicate` holds for the device, or panic
pub async fn wait_for_device<F>(scheduler: &PollScheduler, id: &str, predicate: F) -> DeviceSnapshot
where
    F: Fn(&DeviceSnapshot) -> bool,
{
    for _ in 0..100 {
        if let Some(device) = scheduler.device(id).await {
            if predicate(&device) {
                return device;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "device {id} never reached the expected state: {:?}",
        scheduler.device(id).await
    );
}

/// Wait until every submitted pool job has finished
pub async fn wait_for_idle(scheduler: &PollScheduler) {
    for _ in 0..100 {
        let stats = scheduler.pool_stats();
        if stats.completed == stats.submitted {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("worker pool never drained: {:?}", scheduler.pool_stats());
}

/// In-memory fetcher answering by address
#[derive(Debug, Default)]
pub struct StaticFetcher {
    values: Mutex<HashMap<String, f64>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, address: &str, value: f64) {
        self.values
            .lock()
            .unwrap()
            .insert(address.to_string(), value);
    }
}

#[async_trait]
impl DeviceFetcher for StaticFetcher {
    async fn fetch(&self, address: &str) -> Result<f64> {
        let value = self.values.lock().unwrap().get(address).copied();
        value.ok_or_else(|| LeverError::network_error(format!("{address} unreachable")))
    }
}
