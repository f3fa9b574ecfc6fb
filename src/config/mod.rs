//! Configuration for discovery, polling, caching and logging
//!
//! Values come from built-in defaults, an optional TOML file and `LEVER_*`
//! environment variables, applied in that order.

use crate::cache::{CacheConfig, TtlBounds};
use crate::error::{LeverError, Result};
use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

/// Well-known UDP port devices listen on for discovery requests
pub const DEFAULT_DISCOVERY_PORT: u16 = 4210;

/// Discovery token understood by lever firmware
pub const DEFAULT_DISCOVERY_TOKEN: &str = "DISCOVER_LEVER";

/// `type` field devices put in their discovery reply
pub const DEFAULT_DEVICE_KIND: &str = "lever";

/// Fastest poll tick the scheduler accepts
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct FleetConfig {
    /// UDP discovery configuration
    pub discovery: DiscoveryConfig,

    /// Poll scheduler configuration
    pub polling: PollConfig,

    /// Cache configuration
    pub cache: CacheSettings,

    /// Logging configuration
    pub logging: LogConfig,
}

/// UDP broadcast discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Port discovery requests are broadcast to
    pub port: u16,

    /// ASCII discovery token
    pub token: String,

    /// Expected `type` in replies; others are ignored
    pub device_kind: String,

    /// Broadcast destination
    pub broadcast_address: IpAddr,

    /// Local address the scanning socket binds to
    pub bind_address: IpAddr,

    /// How long replies are collected after the request
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Receive buffer size; longer datagrams are truncated
    pub max_datagram_size: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_DISCOVERY_PORT,
            token: DEFAULT_DISCOVERY_TOKEN.to_string(),
            device_kind: DEFAULT_DEVICE_KIND.to_string(),
            broadcast_address: IpAddr::from([255, 255, 255, 255]),
            bind_address: IpAddr::from([0, 0, 0, 0]),
            timeout: Duration::from_secs(3),
            max_datagram_size: 2048,
        }
    }
}

/// Poll scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PollConfig {
    /// Time between poll ticks
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Worker pool size shared by fetches and scans
    pub max_workers: usize,

    /// HTTP path polled on each device
    pub endpoint: String,

    /// Queue depth at which pool saturation is logged
    pub queue_warn_threshold: usize,

    /// Capacity of the device event channel
    pub event_capacity: usize,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(200),
            timeout: Duration::from_secs(1),
            max_workers: 8,
            endpoint: "api".to_string(),
            queue_warn_threshold: 64,
            event_capacity: 256,
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheSettings {
    /// Default TTL of per-device value entries
    #[serde(with = "humantime_serde")]
    pub device_ttl: Duration,

    /// Default TTL of the fleet summary cache
    #[serde(with = "humantime_serde")]
    pub summary_ttl: Duration,

    /// Default TTL of the fleet statistics cache
    #[serde(with = "humantime_serde")]
    pub statistics_ttl: Duration,

    /// Clamp range for the adaptive policies
    pub adaptive_bounds: TtlBounds,

    /// Devices not heard from for this long count as offline
    #[serde(with = "humantime_serde")]
    pub offline_after: Duration,

    /// Background sweep period
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,

    /// Entry count above which forced cleanups trim old entries
    pub soft_cap: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            device_ttl: Duration::from_secs(5),
            summary_ttl: Duration::from_secs(2),
            statistics_ttl: Duration::from_secs(1),
            adaptive_bounds: TtlBounds::default(),
            offline_after: Duration::from_secs(5),
            cleanup_interval: Duration::from_secs(30),
            soft_cap: crate::cache::ttl_cache::DEFAULT_SOFT_CAP,
        }
    }
}

impl CacheSettings {
    fn cache_config(&self, default_ttl: Duration) -> CacheConfig {
        CacheConfig {
            default_ttl,
            soft_cap: self.soft_cap,
        }
    }

    /// Engine config for per-device value caches
    pub fn device_cache(&self) -> CacheConfig {
        self.cache_config(self.device_ttl)
    }

    /// Engine config for the fleet summary cache
    pub fn summary_cache(&self) -> CacheConfig {
        self.cache_config(self.summary_ttl)
    }

    /// Engine config for the fleet statistics cache
    pub fn statistics_cache(&self) -> CacheConfig {
        self.cache_config(self.statistics_ttl)
    }
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| LeverError::config(format!("Invalid {name}='{raw}': {e}"))),
        Err(_) => Ok(None),
    }
}

fn env_duration(name: &str) -> Result<Option<Duration>> {
    match std::env::var(name) {
        Ok(raw) => humantime_serde::re::humantime::parse_duration(raw.trim())
            .map(Some)
            .map_err(|e| LeverError::config(format!("Invalid {name}='{raw}': {e}"))),
        Err(_) => Ok(None),
    }
}

impl FleetConfig {
    /// Load configuration from a TOML file, then apply environment overrides
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LeverError::config(format!("Failed to read config file: {e}")))?;

        let mut config: Self = toml::from_str(&content)
            .map_err(|e| LeverError::config(format!("Failed to parse config: {e}")))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay LEVER_* variables onto this config
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(port) = env_parse("LEVER_DISCOVERY_PORT")? {
            self.discovery.port = port;
        }
        if let Ok(token) = std::env::var("LEVER_DISCOVERY_TOKEN") {
            self.discovery.token = token;
        }
        if let Ok(kind) = std::env::var("LEVER_DEVICE_KIND") {
            self.discovery.device_kind = kind;
        }
        if let Some(address) = env_parse("LEVER_BROADCAST_ADDRESS")? {
            self.discovery.broadcast_address = address;
        }
        if let Some(timeout) = env_duration("LEVER_DISCOVERY_TIMEOUT")? {
            self.discovery.timeout = timeout;
        }
        if let Some(interval) = env_duration("LEVER_POLL_INTERVAL")? {
            self.polling.interval = interval;
        }
        if let Some(timeout) = env_duration("LEVER_POLL_TIMEOUT")? {
            self.polling.timeout = timeout;
        }
        if let Some(workers) = env_parse("LEVER_POLL_WORKERS")? {
            self.polling.max_workers = workers;
        }
        if let Ok(endpoint) = std::env::var("LEVER_POLL_ENDPOINT") {
            self.polling.endpoint = endpoint;
        }
        if let Some(ttl) = env_duration("LEVER_CACHE_TTL")? {
            self.cache.device_ttl = ttl;
        }

        self.logging.apply_env_overrides();
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.discovery.token.is_empty() || !self.discovery.token.is_ascii() {
            return Err(LeverError::config(
                "Discovery token must be a non-empty ASCII string",
            ));
        }
        if self.discovery.timeout.is_zero() {
            return Err(LeverError::config(
                "Discovery timeout must be greater than 0",
            ));
        }
        if self.discovery.max_datagram_size == 0 {
            return Err(LeverError::config(
                "Discovery datagram size must be greater than 0",
            ));
        }
        if self.polling.interval < MIN_POLL_INTERVAL {
            return Err(LeverError::config(format!(
                "Poll interval {:?} is below the {:?} minimum",
                self.polling.interval, MIN_POLL_INTERVAL
            )));
        }
        if self.polling.timeout.is_zero() {
            return Err(LeverError::config("Poll timeout must be greater than 0"));
        }
        if self.polling.max_workers == 0 {
            return Err(LeverError::config("Worker pool needs at least one worker"));
        }
        if self.polling.event_capacity == 0 {
            return Err(LeverError::config(
                "Event channel capacity must be greater than 0",
            ));
        }
        for (name, ttl) in [
            ("device_ttl", self.cache.device_ttl),
            ("summary_ttl", self.cache.summary_ttl),
            ("statistics_ttl", self.cache.statistics_ttl),
            ("cleanup_interval", self.cache.cleanup_interval),
            ("offline_after", self.cache.offline_after),
        ] {
            if ttl.is_zero() {
                return Err(LeverError::config(format!(
                    "Cache {name} must be greater than 0"
                )));
            }
        }
        self.cache.adaptive_bounds.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = FleetConfig::default();
        config.validate().unwrap();
        assert_eq!(config.discovery.port, 4210);
        assert_eq!(config.polling.interval, Duration::from_millis(200));
        assert_eq!(config.polling.timeout, Duration::from_secs(1));
        assert_eq!(config.polling.max_workers, 8);
        assert_eq!(config.cache.soft_cap, 100);
    }

    #[test]
    fn test_poll_interval_minimum() {
        let mut config = FleetConfig::default();
        config.polling.interval = Duration::from_millis(49);
        assert!(matches!(config.validate(), Err(LeverError::Config(_))));
        config.polling.interval = MIN_POLL_INTERVAL;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_cache_durations_rejected() {
        let zeroed: [fn(&mut CacheSettings); 5] = [
            |c| c.device_ttl = Duration::ZERO,
            |c| c.summary_ttl = Duration::ZERO,
            |c| c.statistics_ttl = Duration::ZERO,
            |c| c.cleanup_interval = Duration::ZERO,
            |c| c.offline_after = Duration::ZERO,
        ];
        for zero in zeroed {
            let mut config = FleetConfig::default();
            zero(&mut config.cache);
            assert!(matches!(config.validate(), Err(LeverError::Config(_))));
        }
    }

    #[test]
    #[serial]
    fn test_zero_cleanup_interval_in_file_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[cache]
cleanup_interval = "0s"
"#
        )
        .unwrap();

        assert!(matches!(
            FleetConfig::load_from_file(file.path()),
            Err(LeverError::Config(_))
        ));
    }

    #[test]
    #[serial]
    fn test_load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[discovery]
token = "DISCOVER_ENCODER"
device_kind = "encoder"
timeout = "800ms"

[polling]
interval = "250ms"
max_workers = 4

[cache.adaptive_bounds]
min = "1s"
max = "10s"
"#
        )
        .unwrap();

        let config = FleetConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.discovery.token, "DISCOVER_ENCODER");
        assert_eq!(config.discovery.device_kind, "encoder");
        assert_eq!(config.discovery.timeout, Duration::from_millis(800));
        assert_eq!(config.discovery.port, DEFAULT_DISCOVERY_PORT);
        assert_eq!(config.polling.interval, Duration::from_millis(250));
        assert_eq!(config.polling.max_workers, 4);
        assert_eq!(config.cache.adaptive_bounds.max(), Duration::from_secs(10));
    }

    #[test]
    #[serial]
    fn test_inverted_bounds_in_file_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[cache.adaptive_bounds]
min = "10s"
max = "1s"
"#
        )
        .unwrap();

        assert!(matches!(
            FleetConfig::load_from_file(file.path()),
            Err(LeverError::InvalidInput(_))
        ));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        temp_env::with_vars(
            [
                ("LEVER_DISCOVERY_PORT", Some("5000")),
                ("LEVER_BROADCAST_ADDRESS", Some("192.168.1.255")),
                ("LEVER_POLL_INTERVAL", Some("500ms")),
                ("LEVER_POLL_WORKERS", Some("2")),
            ],
            || {
                let config = FleetConfig::from_env().unwrap();
                assert_eq!(config.discovery.port, 5000);
                assert_eq!(
                    config.discovery.broadcast_address,
                    "192.168.1.255".parse::<IpAddr>().unwrap()
                );
                assert_eq!(config.polling.interval, Duration::from_millis(500));
                assert_eq!(config.polling.max_workers, 2);
            },
        );
    }

    #[test]
    #[serial]
    fn test_bad_env_value_is_config_error() {
        temp_env::with_var("LEVER_POLL_WORKERS", Some("many"), || {
            assert!(matches!(
                FleetConfig::from_env(),
                Err(LeverError::Config(_))
            ));
        });
    }
}
