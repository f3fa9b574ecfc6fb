//! Concurrent poll scheduler
//!
//! A ticker task snapshots the enabled devices every interval and submits one
//! fetch per device to the worker pool without waiting for earlier fetches.
//! Overlapping fetches for the same device are allowed; the latest write wins.
//! Fetch failures never leave this module: they are logged and dropped.

use super::fetcher::{DeviceFetcher, HttpFetcher};
use super::registry::{DeviceRegistry, DeviceSnapshot, ReadingOutcome, UpsertOutcome};
use super::worker_pool::{PoolStats, WorkerPool};
use crate::cache::{device_value_key, TtlCache};
use crate::config::{FleetConfig, MIN_POLL_INTERVAL};
use crate::discovery::{DiscoveredDevice, DiscoveryClient};
use crate::error::{ErrorKind, LeverError, Result};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Change notification published by the scheduler
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeviceEvent {
    Added {
        id: String,
        address: String,
    },
    AddressChanged {
        id: String,
        previous: String,
        address: String,
    },
    ValueChanged {
        id: String,
        previous: f64,
        value: f64,
    },
    Removed {
        id: String,
    },
}

impl DeviceEvent {
    /// Device the event is about
    pub fn device_id(&self) -> &str {
        match self {
            DeviceEvent::Added { id, .. }
            | DeviceEvent::AddressChanged { id, .. }
            | DeviceEvent::ValueChanged { id, .. }
            | DeviceEvent::Removed { id } => id,
        }
    }
}

/// State shared between the scheduler handle, the ticker and fetch jobs
struct Shared {
    registry: DeviceRegistry,
    pool: WorkerPool,
    fetcher: Arc<dyn DeviceFetcher>,
    discovery: DiscoveryClient,
    events: broadcast::Sender<DeviceEvent>,
    values: Arc<TtlCache<DeviceSnapshot>>,
    fetch_timeout: Duration,
}

impl Shared {
    fn publish(&self, event: DeviceEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn publish_upsert(&self, id: &str, address: &str, outcome: &UpsertOutcome) {
        match outcome {
            UpsertOutcome::Added => self.publish(DeviceEvent::Added {
                id: id.to_string(),
                address: address.to_string(),
            }),
            UpsertOutcome::AddressChanged { previous } => {
                self.publish(DeviceEvent::AddressChanged {
                    id: id.to_string(),
                    previous: previous.clone(),
                    address: address.to_string(),
                })
            }
            UpsertOutcome::Unchanged => {}
        }
    }

    /// Submit one fetch per enabled device; returns how many were submitted
    async fn dispatch_tick(self: &Arc<Self>) -> usize {
        let targets = self.registry.enabled_targets().await;
        let count = targets.len();
        for (id, address) in targets {
            let shared = Arc::clone(self);
            // Fire and forget; the handle is dropped on purpose
            let _ = self.pool.submit(async move {
                shared.poll_device(&id, &address).await;
            });
        }
        trace!(count, "Poll tick dispatched");
        count
    }

    async fn poll_device(&self, id: &str, address: &str) {
        let result = match tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(address)).await
        {
            Ok(result) => result,
            Err(_) => Err(LeverError::timeout(format!(
                "no response from {address} within {:?}",
                self.fetch_timeout
            ))),
        };

        match result {
            Ok(raw) => self.record_reading(id, raw).await,
            Err(e) => match e.kind() {
                ErrorKind::Transient => debug!(id, address, "Poll failed: {}", e),
                _ => warn!(id, address, "Poll failed: {}", e),
            },
        }
    }

    async fn record_reading(&self, id: &str, raw: f64) {
        match self.registry.apply_reading(id, raw, Utc::now()).await {
            ReadingOutcome::Discarded => {
                trace!(id, "Dropped reading for device no longer tracked");
            }
            ReadingOutcome::Touched(snapshot) => self.store_value(id, snapshot).await,
            ReadingOutcome::Changed { previous, snapshot } => {
                let value = snapshot.value;
                debug!(id, previous, value, "Device value changed");
                self.store_value(id, snapshot).await;
                self.publish(DeviceEvent::ValueChanged {
                    id: id.to_string(),
                    previous,
                    value,
                });
            }
        }
    }

    /// Cache a device's latest snapshot unless it was removed meanwhile
    async fn store_value(&self, id: &str, snapshot: DeviceSnapshot) {
        let key = device_value_key(id);
        self.values.set(key.clone(), snapshot, None).await;
        // A removal between the registry write and the set must not leave a value behind
        if self.registry.get(id).await.is_none() {
            self.values.invalidate(Some(key.as_str())).await;
            trace!(id, "Dropped cached value for removed device");
        }
    }

    async fn track(&self, devices: &[DiscoveredDevice]) -> Result<()> {
        for device in devices {
            let outcome = self.registry.upsert_discovered(device).await?;
            self.publish_upsert(&device.id, &device.address, &outcome);
        }
        Ok(())
    }
}

struct TickerRun {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Poll scheduler owning the device registry
pub struct PollScheduler {
    shared: Arc<Shared>,
    interval: watch::Sender<Duration>,
    ticker: Mutex<Option<TickerRun>>,
}

impl PollScheduler {
    /// Scheduler polling devices over HTTP
    pub fn new(config: &FleetConfig) -> Result<Self> {
        let fetcher = HttpFetcher::new(&config.polling)?;
        Self::with_fetcher(config, Arc::new(fetcher))
    }

    /// Scheduler using a custom fetcher
    pub fn with_fetcher(config: &FleetConfig, fetcher: Arc<dyn DeviceFetcher>) -> Result<Self> {
        config.validate()?;

        let (events, _) = broadcast::channel(config.polling.event_capacity);
        let (interval, _) = watch::channel(config.polling.interval);

        let shared = Shared {
            registry: DeviceRegistry::new(),
            pool: WorkerPool::new(
                config.polling.max_workers,
                config.polling.queue_warn_threshold,
            ),
            fetcher,
            discovery: DiscoveryClient::new(config.discovery.clone()),
            events,
            values: Arc::new(TtlCache::with_config(config.cache.device_cache())),
            fetch_timeout: config.polling.timeout,
        };

        Ok(Self {
            shared: Arc::new(shared),
            interval,
            ticker: Mutex::new(None),
        })
    }

    /// Start the ticker; returns `false` if it was already running
    pub async fn start(&self) -> bool {
        let mut ticker = self.ticker.lock().await;
        if ticker.is_some() {
            return false;
        }

        let token = CancellationToken::new();
        let run_token = token.clone();
        let shared = Arc::clone(&self.shared);
        let mut interval_rx = self.interval.subscribe();

        let handle = tokio::spawn(async move {
            let mut period = *interval_rx.borrow_and_update();
            let mut ticks = tokio::time::interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = run_token.cancelled() => break,
                    _ = ticks.tick() => {
                        shared.dispatch_tick().await;
                    }
                    changed = interval_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        period = *interval_rx.borrow_and_update();
                        ticks = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        debug!(?period, "Poll interval changed");
                    }
                }
            }
            debug!("Poll ticker stopped");
        });

        info!(interval = ?*self.interval.borrow(), "Poll scheduler started");
        *ticker = Some(TickerRun { token, handle });
        true
    }

    /// Stop the ticker; fetches already submitted still complete
    pub async fn stop(&self) {
        let run = self.ticker.lock().await.take();
        if let Some(run) = run {
            run.token.cancel();
            if let Err(e) = run.handle.await {
                warn!("Poll ticker ended abnormally: {}", e);
            }
            info!("Poll scheduler stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.ticker.lock().await.is_some()
    }

    /// Run one poll tick now; returns the number of fetches submitted
    pub async fn tick(&self) -> usize {
        self.shared.dispatch_tick().await
    }

    /// Run one discovery scan on the worker pool
    pub async fn discover(&self) -> Result<Vec<DiscoveredDevice>> {
        let discovery = self.shared.discovery.clone();
        let handle = self.shared.pool.submit(async move { discovery.scan().await });

        match handle.await {
            Ok(Some(result)) => result,
            Ok(None) => Err(LeverError::resource_exhausted("worker pool is shut down")),
            Err(e) => Err(LeverError::internal(format!("discovery task failed: {e}"))),
        }
    }

    /// Scan and register every device found
    pub async fn discover_and_track(&self) -> Result<Vec<DiscoveredDevice>> {
        let devices = self.discover().await?;
        self.shared.track(&devices).await?;
        info!(
            found = devices.len(),
            tracked = self.shared.registry.len().await,
            "Discovery merged into registry"
        );
        Ok(devices)
    }

    /// Track a device explicitly; re-adding only updates its address
    pub async fn add_device(&self, id: &str, address: &str) -> Result<UpsertOutcome> {
        let outcome = self.shared.registry.add(id, address).await?;
        self.shared.publish_upsert(id.trim(), address.trim(), &outcome);
        Ok(outcome)
    }

    /// Stop tracking a device; returns whether it was tracked
    ///
    /// In-flight fetches are not cancelled; their results are discarded.
    pub async fn remove_device(&self, id: &str) -> bool {
        let id = id.trim();
        let removed = self.shared.registry.remove(id).await.is_some();
        if removed {
            self.shared.values.invalidate(Some(&device_value_key(id))).await;
            self.shared.publish(DeviceEvent::Removed { id: id.to_string() });
        }
        removed
    }

    /// Enable or disable polling for a tracked device
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        if self.shared.registry.set_enabled(id, enabled).await? {
            debug!(id, enabled, "Device polling toggled");
        }
        Ok(())
    }

    /// Snapshots of all tracked devices
    pub async fn devices(&self) -> Vec<DeviceSnapshot> {
        self.shared.registry.snapshots().await
    }

    /// Snapshot of one device
    pub async fn device(&self, id: &str) -> Option<DeviceSnapshot> {
        self.shared.registry.get(id).await
    }

    /// Change the tick interval; takes effect on the running ticker
    pub fn set_poll_interval(&self, interval: Duration) -> Result<()> {
        if interval < MIN_POLL_INTERVAL {
            return Err(LeverError::config(format!(
                "Poll interval {interval:?} is below the {MIN_POLL_INTERVAL:?} minimum"
            )));
        }
        self.interval.send_replace(interval);
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        *self.interval.borrow()
    }

    /// Subscribe to device change events
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.shared.events.subscribe()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.shared.pool.stats()
    }

    /// Device registry, for read-side consumers such as the fleet view
    pub fn registry(&self) -> &DeviceRegistry {
        &self.shared.registry
    }

    /// Cache of the last reading per device, keyed by `device_value_key`
    pub fn value_cache(&self) -> Arc<TtlCache<DeviceSnapshot>> {
        Arc::clone(&self.shared.values)
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        if let Ok(mut ticker) = self.ticker.try_lock() {
            if let Some(run) = ticker.take() {
                run.token.cancel();
                run.handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::fetcher::MockDeviceFetcher;
    use super::*;
    use pretty_assertions::assert_eq;

    fn config() -> FleetConfig {
        let mut config = FleetConfig::default();
        config.polling.interval = Duration::from_millis(50);
        config.polling.timeout = Duration::from_millis(100);
        config
    }

    async fn settle(scheduler: &PollScheduler) {
        for _ in 0..50 {
            let stats = scheduler.pool_stats();
            if stats.completed == stats.submitted {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_tick_applies_clamped_reading() {
        let mut fetcher = MockDeviceFetcher::new();
        fetcher
            .expect_fetch()
            .returning(|_| Ok(150.0));

        let scheduler = PollScheduler::with_fetcher(&config(), Arc::new(fetcher)).unwrap();
        let mut events = scheduler.subscribe();
        scheduler.add_device("A", "10.0.0.5").await.unwrap();

        assert_eq!(scheduler.tick().await, 1);
        settle(&scheduler).await;

        let device = scheduler.device("A").await.unwrap();
        assert_eq!(device.value, 100.0);
        assert!(device.last_seen.is_some());

        assert_eq!(
            events.recv().await.unwrap(),
            DeviceEvent::Added {
                id: "A".to_string(),
                address: "10.0.0.5".to_string()
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            DeviceEvent::ValueChanged {
                id: "A".to_string(),
                previous: 0.0,
                value: 100.0
            }
        );

        let cached = scheduler
            .value_cache()
            .get(&device_value_key("A"), None)
            .await
            .unwrap();
        assert_eq!(cached.value, 100.0);
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let mut fetcher = MockDeviceFetcher::new();
        fetcher
            .expect_fetch()
            .returning(|_| Err(LeverError::network_error("unreachable")));

        let scheduler = PollScheduler::with_fetcher(&config(), Arc::new(fetcher)).unwrap();
        scheduler.add_device("A", "10.0.0.5").await.unwrap();
        scheduler.tick().await;
        settle(&scheduler).await;

        let device = scheduler.device("A").await.unwrap();
        assert_eq!(device.value, 0.0);
        assert_eq!(device.last_seen, None);
    }

    #[tokio::test]
    async fn test_disabled_devices_not_polled() {
        let mut fetcher = MockDeviceFetcher::new();
        fetcher.expect_fetch().times(1).returning(|_| Ok(10.0));

        let scheduler = PollScheduler::with_fetcher(&config(), Arc::new(fetcher)).unwrap();
        scheduler.add_device("A", "10.0.0.5").await.unwrap();
        scheduler.add_device("B", "10.0.0.6").await.unwrap();
        scheduler.set_enabled("B", false).await.unwrap();

        assert_eq!(scheduler.tick().await, 1);
        settle(&scheduler).await;
        assert!(matches!(
            scheduler.set_enabled("missing", true).await,
            Err(LeverError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let fetcher = MockDeviceFetcher::new();
        let scheduler = PollScheduler::with_fetcher(&config(), Arc::new(fetcher)).unwrap();
        scheduler.add_device("A", "10.0.0.5").await.unwrap();
        assert!(scheduler.remove_device("A").await);
        assert!(!scheduler.remove_device("A").await);
        assert!(scheduler.devices().await.is_empty());
    }

    #[tokio::test]
    async fn test_value_for_removed_device_not_cached() {
        let scheduler =
            PollScheduler::with_fetcher(&config(), Arc::new(MockDeviceFetcher::new())).unwrap();
        scheduler.add_device("A", "10.0.0.5").await.unwrap();
        let snapshot = scheduler.device("A").await.unwrap();

        // Reading applied, then the device is removed before the cache write
        assert!(scheduler.remove_device("A").await);
        scheduler.shared.store_value("A", snapshot.clone()).await;
        assert!(scheduler
            .value_cache()
            .get(&device_value_key("A"), None)
            .await
            .is_none());

        scheduler.add_device("B", "10.0.0.6").await.unwrap();
        scheduler.shared.store_value("B", snapshot).await;
        assert!(scheduler
            .value_cache()
            .get(&device_value_key("B"), None)
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_ids_are_trimmed_on_every_entry_point() {
        let scheduler =
            PollScheduler::with_fetcher(&config(), Arc::new(MockDeviceFetcher::new())).unwrap();
        scheduler.add_device(" A ", "10.0.0.5").await.unwrap();

        scheduler.set_enabled("A ", false).await.unwrap();
        assert!(!scheduler.device(" A").await.unwrap().enabled);
        assert!(scheduler.remove_device(" A ").await);
        assert!(scheduler.devices().await.is_empty());
    }

    #[tokio::test]
    async fn test_poll_interval_minimum() {
        let scheduler =
            PollScheduler::with_fetcher(&config(), Arc::new(MockDeviceFetcher::new())).unwrap();
        assert!(matches!(
            scheduler.set_poll_interval(Duration::from_millis(10)),
            Err(LeverError::Config(_))
        ));
        scheduler
            .set_poll_interval(Duration::from_millis(75))
            .unwrap();
        assert_eq!(scheduler.poll_interval(), Duration::from_millis(75));
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let mut fetcher = MockDeviceFetcher::new();
        fetcher.expect_fetch().returning(|_| Ok(42.3));

        let scheduler = PollScheduler::with_fetcher(&config(), Arc::new(fetcher)).unwrap();
        scheduler.add_device("A", "10.0.0.5").await.unwrap();

        assert!(scheduler.start().await);
        assert!(!scheduler.start().await);
        tokio::time::sleep(Duration::from_millis(120)).await;
        scheduler.stop().await;
        assert!(!scheduler.is_running().await);

        settle(&scheduler).await;
        assert_eq!(scheduler.device("A").await.unwrap().value, 42.3);
        assert!(scheduler.pool_stats().submitted >= 2);
    }
}
