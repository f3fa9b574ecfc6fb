//! Device value fetching over HTTP
//!
//! A device exposes `GET http://<address>/api` returning JSON with a
//! `calibrated_value` field, e.g. `{"calibrated_value": 42.3, "raw": 1731}`.

use crate::config::PollConfig;
use crate::error::{LeverError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::trace;

/// Field carrying the device reading
pub const VALUE_FIELD: &str = "calibrated_value";

/// Source of raw device readings
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceFetcher: Send + Sync {
    /// Fetch the unclamped reading of the device at `address`
    async fn fetch(&self, address: &str) -> Result<f64>;
}

/// Extract the reading from a device response body
///
/// Numbers and numeric strings are accepted; anything else, including a
/// missing field or a non-finite number, is malformed.
pub fn parse_reading(body: &Value) -> Result<f64> {
    let value = match body.get(VALUE_FIELD) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(other) => {
            return Err(LeverError::malformed(format!(
                "'{VALUE_FIELD}' has unexpected type: {other}"
            )))
        }
        None => {
            return Err(LeverError::malformed(format!(
                "response is missing '{VALUE_FIELD}'"
            )))
        }
    };

    value
        .filter(|v| v.is_finite())
        .ok_or_else(|| LeverError::malformed(format!("'{VALUE_FIELD}' is not a finite number")))
}

/// Fetcher backed by a shared `reqwest` client
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    endpoint: String,
}

impl HttpFetcher {
    /// Build a fetcher using the poll timeout and endpoint from `config`
    pub fn new(config: &PollConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_start_matches('/').to_string(),
        })
    }

    fn url_for(&self, address: &str) -> String {
        format!("http://{}/{}", address, self.endpoint)
    }
}

#[async_trait]
impl DeviceFetcher for HttpFetcher {
    async fn fetch(&self, address: &str) -> Result<f64> {
        let url = self.url_for(address);
        trace!(%url, "Fetching device value");

        let response = self.client.get(&url).send().await?.error_for_status()?;
        let body: Value = response.json().await?;
        parse_reading(&body)
    }
}
