//! Lever Monitor - Main Entry Point
//!
//! Headless fleet monitor: discovers lever devices, keeps polling them,
//! re-scans periodically and logs the cached fleet summary until Ctrl-C.

use lever_fleet::{
    config::FleetConfig,
    logging::init_logging,
    polling::{DeviceEvent, PollScheduler},
    services::FleetView,
};

use clap::Parser;
use humantime_serde::re::humantime;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Longest accepted rescan/report period
const MAX_PERIOD: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Lever fleet monitor
#[derive(Parser, Debug)]
#[command(name = "lever-monitor")]
#[command(about = "Discover lever encoders and keep their values fresh")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "LEVER_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Re-run discovery this often (e.g. "30s")
    #[arg(long, default_value = "30s", value_parser = parse_period)]
    rescan: Duration,

    /// Log the fleet summary this often
    #[arg(long, default_value = "5s", value_parser = parse_period)]
    report: Duration,
}

/// Parse a human-readable period, rejecting zero
fn parse_period(raw: &str) -> Result<Duration, String> {
    let period = humantime::parse_duration(raw).map_err(|e| e.to_string())?;
    if period.is_zero() {
        return Err("period must be greater than 0".to_string());
    }
    // Far-future deadlines overflow the timer
    if period > MAX_PERIOD {
        return Err(format!(
            "period must not exceed {}",
            humantime::format_duration(MAX_PERIOD)
        ));
    }
    Ok(period)
}

impl Args {
    fn load_config(&self) -> lever_fleet::Result<FleetConfig> {
        match &self.config {
            Some(path) => FleetConfig::load_from_file(path),
            None => FleetConfig::from_env(),
        }
    }
}

async fn report_summary(view: &FleetView) {
    match view.summary().await {
        Ok(summary) => {
            let stats = &summary.statistics;
            info!(
                devices = stats.count,
                online = stats.online_count,
                average = ?stats.average_value,
                min = ?stats.min_value,
                max = ?stats.max_value,
                "Fleet summary"
            );
            for device in &summary.devices {
                debug!(
                    id = %device.id,
                    address = %device.address,
                    status = ?device.status,
                    value = ?device.value,
                    "Device"
                );
            }
        }
        Err(e) => warn!("Failed to build fleet summary: {}", e),
    }

    let (summary_stats, statistics_stats) = view.cache_stats().await;
    debug!(
        summary_hit_rate = summary_stats.hit_rate,
        statistics_hit_rate = statistics_stats.hit_rate,
        "Fleet view cache"
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = args.load_config()?;

    let log_config = config.logging.clone().with_debug(args.debug);
    let _log_guard = init_logging(&log_config)?;

    info!("Starting lever monitor v{}", env!("CARGO_PKG_VERSION"));
    info!(
        port = config.discovery.port,
        kind = %config.discovery.device_kind,
        interval = ?config.polling.interval,
        workers = config.polling.max_workers,
        "Configuration loaded"
    );

    let scheduler = PollScheduler::new(&config)?;
    let view = FleetView::new(scheduler.registry().clone(), &config.cache);
    let _sweeper = scheduler
        .value_cache()
        .spawn_cleanup(config.cache.cleanup_interval);
    let mut events = scheduler.subscribe();

    match scheduler.discover_and_track().await {
        Ok(devices) => info!("Initial discovery found {} device(s)", devices.len()),
        Err(e) => warn!("Initial discovery failed: {}", e),
    }
    scheduler.start().await;

    let mut rescan = tokio::time::interval_at(
        tokio::time::Instant::now() + args.rescan,
        args.rescan,
    );
    rescan.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut report = tokio::time::interval(args.report);
    report.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
                info!("Shutdown requested");
                break;
            }
            _ = rescan.tick() => {
                if let Err(e) = scheduler.discover_and_track().await {
                    warn!("Re-discovery failed: {}", e);
                }
            }
            _ = report.tick() => {
                report_summary(&view).await;
                view.cleanup().await;
            }
            event = events.recv() => match event {
                Ok(event @ DeviceEvent::ValueChanged { .. }) => debug!(?event, "Device event"),
                Ok(event) => info!(device = event.device_id(), ?event, "Device event"),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event consumer lagged, {} event(s) skipped", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    scheduler.stop().await;
    info!(pool = ?scheduler.pool_stats(), "Lever monitor stopped");
    Ok(())
}
