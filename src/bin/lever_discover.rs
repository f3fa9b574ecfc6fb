//! One-shot discovery scan for lever devices
//!
//! Broadcasts a single request, waits for the reply window and prints what
//! answered. Socket failures are logged and an empty result is printed.

use lever_fleet::{config::FleetConfig, discovery::DiscoveryClient, Result};

use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Lever discovery tool
#[derive(Parser, Debug)]
#[command(name = "lever-discover")]
#[command(about = "Find lever devices on the local network")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "LEVER_CONFIG")]
    config: Option<PathBuf>,

    /// Discovery port
    #[arg(long)]
    port: Option<u16>,

    /// Discovery token (e.g. DISCOVER_ENCODER)
    #[arg(long)]
    token: Option<String>,

    /// Expected device type in replies (e.g. encoder)
    #[arg(long)]
    kind: Option<String>,

    /// Broadcast address
    #[arg(long)]
    broadcast: Option<IpAddr>,

    /// Reply window (e.g. "800ms")
    #[arg(long, value_parser = humantime_serde::re::humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn discovery_config(&self) -> Result<FleetConfig> {
        let mut config = match &self.config {
            Some(path) => FleetConfig::load_from_file(path)?,
            None => FleetConfig::from_env()?,
        };

        let discovery = &mut config.discovery;
        if let Some(port) = self.port {
            discovery.port = port;
        }
        if let Some(token) = &self.token {
            discovery.token = token.clone();
        }
        if let Some(kind) = &self.kind {
            discovery.device_kind = kind.clone();
        }
        if let Some(broadcast) = self.broadcast {
            discovery.broadcast_address = broadcast;
        }
        if let Some(timeout) = self.timeout {
            discovery.timeout = timeout;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = args.discovery_config()?;
    info!(
        port = config.discovery.port,
        token = %config.discovery.token,
        window = ?config.discovery.timeout,
        "Scanning"
    );

    let devices = DiscoveryClient::new(config.discovery)
        .scan_or_empty()
        .await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!("No devices found");
        return Ok(());
    }

    println!("Found {} device(s):", devices.len());
    for device in &devices {
        println!(
            "  {:<24} {:<16} {}",
            device.id,
            device.address,
            device.seen_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}
