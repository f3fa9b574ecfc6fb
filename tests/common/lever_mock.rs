//! WireMock-based lever device
//!
//! Serves `GET /api` the way lever firmware does, so the real HTTP fetcher
//! can be exercised without hardware.

use serde_json::{json, Value};
use std::time::Duration;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

/// Mock lever device
pub struct MockLeverDevice {
    pub server: MockServer,
}

impl MockLeverDevice {
    /// Start a device reporting `value`
    pub async fn start(value: f64) -> Self {
        let device = Self {
            server: MockServer::start().await,
        };
        device.set_value(value).await;
        device
    }

    /// `host:port` to register with the scheduler
    pub fn address(&self) -> String {
        self.server.address().to_string()
    }

    /// Report a new calibrated value
    pub async fn set_value(&self, value: f64) {
        self.respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "calibrated_value": value,
            "raw": 2048,
            "id": "lever-01"
        })))
        .await;
    }

    /// Answer with an arbitrary JSON body
    pub async fn set_body(&self, body: Value) {
        self.respond_with(ResponseTemplate::new(200).set_body_json(body))
            .await;
    }

    /// Answer with an HTTP error status
    pub async fn set_status(&self, status: u16) {
        self.respond_with(ResponseTemplate::new(status)).await;
    }

    /// Answer correctly, but only after `delay`
    pub async fn set_delayed_value(&self, value: f64, delay: Duration) {
        self.respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "calibrated_value": value }))
                .set_delay(delay),
        )
        .await;
    }

    async fn respond_with(&self, response: ResponseTemplate) {
        self.server.reset().await;
        Mock::given(method("GET"))
            .and(path("/api"))
            .respond_with(response)
            .mount(&self.server)
            .await;
    }
}
