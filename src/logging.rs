//! Logging setup for the lever fleet binaries
//!
//! Library code only emits `tracing` events; binaries call [`init_logging`]
//! once at startup to install a subscriber with:
//! - an `EnvFilter` (RUST_LOG wins over the configured level)
//! - compact or JSON output on stderr
//! - an optional daily-rotated log file

use crate::error::{LeverError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive when RUST_LOG is unset
    pub level: String,

    /// Log to file (rotated daily)
    pub file_path: Option<PathBuf>,

    /// Log to stderr
    pub stderr: bool,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,

    /// Include thread IDs
    pub thread_ids: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
            stderr: true,
            json: false,
            thread_ids: false,
        }
    }
}

impl LogConfig {
    /// Create config from environment
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Overlay LEVER_LOG_* variables onto this config
    pub fn apply_env_overrides(&mut self) {
        if let Ok(log_file) = std::env::var("LEVER_LOG_FILE") {
            self.file_path = Some(PathBuf::from(log_file));
        }

        if let Ok(log_stderr) = std::env::var("LEVER_LOG_STDERR") {
            self.stderr = log_stderr.to_lowercase() != "false";
        }

        if let Ok(log_json) = std::env::var("LEVER_LOG_JSON") {
            self.json = matches!(log_json.to_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    /// Force debug level regardless of the configured one
    pub fn with_debug(mut self, debug: bool) -> Self {
        if debug {
            self.level = "debug".to_string();
        }
        self
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn output_layer<W>(writer: W, config: &LogConfig, ansi: bool) -> BoxedLayer
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(true)
        .with_thread_ids(config.thread_ids);

    if config.json {
        layer.json().boxed()
    } else {
        layer.compact().boxed()
    }
}

/// Initialize logging with the given configuration
///
/// Keep the returned guard alive for as long as file logging should flush.
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| LeverError::config(format!("Invalid log level '{}': {e}", config.level)))?;

    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guard = None;

    if config.stderr {
        layers.push(output_layer(std::io::stderr, config, !config.json));
    }

    if let Some(file_path) = &config.file_path {
        // Ensure parent directory exists
        let directory = file_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| std::path::Path::new("."));
        std::fs::create_dir_all(directory)?;

        let file_name = file_path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("lever-fleet.log"));
        let file_appender = tracing_appender::rolling::daily(directory, file_name);
        let (writer, worker_guard) = tracing_appender::non_blocking(file_appender);

        layers.push(output_layer(writer, config, false));
        guard = Some(worker_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .map_err(|e| LeverError::config(format!("Failed to install log subscriber: {e}")))?;

    Ok(guard)
}
