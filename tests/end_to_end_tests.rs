//! Discovery, polling and fleet aggregation working together

mod common;

use common::lever_mock::MockLeverDevice;
use common::udp_device::{reply, FakeUdpDevice};
use common::{test_config, wait_for_device, wait_for_idle, StaticFetcher};
use lever_fleet::polling::{DeviceEvent, PollScheduler};
use lever_fleet::services::{DeviceStatus, FleetView};
use pretty_assertions::assert_eq;
use std::sync::Arc;

#[tokio::test]
async fn test_rediscovery_updates_address_without_duplicates() {
    let udp = FakeUdpDevice::spawn(vec![
        vec![reply("lever", "A", "10.0.0.5")],
        vec![reply("lever", "A", "10.0.0.9")],
    ])
    .await;
    let mut config = test_config();
    config.discovery = udp.discovery_config();

    let fetcher = Arc::new(StaticFetcher::new());
    fetcher.set("10.0.0.5", 42.3);
    let scheduler = PollScheduler::with_fetcher(&config, fetcher.clone()).unwrap();
    let mut events = scheduler.subscribe();

    let found = scheduler.discover_and_track().await.unwrap();
    assert_eq!(found.len(), 1);

    scheduler.tick().await;
    let polled = wait_for_device(&scheduler, "A", |d| d.last_seen.is_some()).await;
    wait_for_idle(&scheduler).await;
    assert_eq!(polled.value, 42.3);
    assert_eq!(polled.address, "10.0.0.5");

    scheduler.discover_and_track().await.unwrap();
    let devices = scheduler.devices().await;
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].address, "10.0.0.9");
    assert_eq!(devices[0].value, 42.3);
    assert_eq!(devices[0].last_seen, polled.last_seen);

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    assert_eq!(
        received,
        vec![
            DeviceEvent::Added {
                id: "A".to_string(),
                address: "10.0.0.5".to_string()
            },
            DeviceEvent::ValueChanged {
                id: "A".to_string(),
                previous: 0.0,
                value: 42.3
            },
            DeviceEvent::AddressChanged {
                id: "A".to_string(),
                previous: "10.0.0.5".to_string(),
                address: "10.0.0.9".to_string()
            },
        ]
    );

    assert_eq!(udp.requests().await.len(), 2);
}

#[tokio::test]
async fn test_discovered_http_devices_feed_fleet_view() {
    let lever_a = MockLeverDevice::start(20.0).await;
    let lever_b = MockLeverDevice::start(60.0).await;
    let udp = FakeUdpDevice::spawn(vec![vec![
        reply("lever", "A", &lever_a.address()),
        reply("lever", "B", &lever_b.address()),
    ]])
    .await;

    let mut config = test_config();
    config.discovery = udp.discovery_config();
    let scheduler = PollScheduler::new(&config).unwrap();
    let view = FleetView::new(scheduler.registry().clone(), &config.cache);

    scheduler.discover_and_track().await.unwrap();
    scheduler.add_device("C", "127.0.0.1:9").await.unwrap();
    scheduler.set_enabled("C", false).await.unwrap();
    scheduler.start().await;
    wait_for_device(&scheduler, "A", |d| d.last_seen.is_some()).await;
    wait_for_device(&scheduler, "B", |d| d.last_seen.is_some()).await;
    scheduler.stop().await;

    let summary = view.summary().await.unwrap();
    let statuses: Vec<_> = summary
        .devices
        .iter()
        .map(|d| (d.id.as_str(), d.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("A", DeviceStatus::Online),
            ("B", DeviceStatus::Online),
            ("C", DeviceStatus::Offline)
        ]
    );
    assert_eq!(summary.statistics.count, 3);
    assert_eq!(summary.statistics.online_count, 2);
    assert_eq!(summary.statistics.average_value, Some(40.0));
    assert_eq!(summary.statistics.max_value, Some(60.0));

    let statistics = view.statistics().await.unwrap();
    assert_eq!(statistics.min_value, Some(20.0));
}
