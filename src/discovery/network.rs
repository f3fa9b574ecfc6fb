//! UDP broadcast discovery for lever devices
//!
//! One scan sends the discovery token once, then listens until the configured
//! window closes. There are no retries inside a scan; callers wanting retry
//! semantics run repeated scans.

use super::protocol::{DiscoveredDevice, ReplyCollector};
use crate::config::DiscoveryConfig;
use crate::error::{LeverError, Result};
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Scan lifecycle, reported in trace logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Idle,
    Sending,
    Listening,
    Done,
}

/// Broadcast discovery client
#[derive(Debug, Clone)]
pub struct DiscoveryClient {
    config: DiscoveryConfig,
}

impl DiscoveryClient {
    /// Create a new discovery client
    pub fn new(config: DiscoveryConfig) -> Self {
        Self { config }
    }

    /// Discovery configuration
    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    fn transition(state: &mut ScanState, next: ScanState) {
        trace!(from = ?*state, to = ?next, "Discovery scan state");
        *state = next;
    }

    /// Run one scan; socket failures are returned as errors
    pub async fn scan(&self) -> Result<Vec<DiscoveredDevice>> {
        let mut state = ScanState::Idle;

        let socket = UdpSocket::bind(SocketAddr::new(self.config.bind_address, 0)).await?;
        socket.set_broadcast(true)?;
        let target = SocketAddr::new(self.config.broadcast_address, self.config.port);

        Self::transition(&mut state, ScanState::Sending);
        debug!(%target, token = %self.config.token, "Broadcasting discovery request");
        let sent = socket.send_to(self.config.token.as_bytes(), target).await?;
        if sent != self.config.token.len() {
            return Err(LeverError::discovery(format!(
                "request truncated: sent {sent} of {} bytes",
                self.config.token.len()
            )));
        }

        Self::transition(&mut state, ScanState::Listening);
        let deadline = Instant::now()
            .checked_add(self.config.timeout)
            .ok_or_else(|| LeverError::config("Discovery timeout is out of range"))?;
        let mut collector = ReplyCollector::new(self.config.device_kind.clone());
        let mut buffer = vec![0u8; self.config.max_datagram_size];

        loop {
            match tokio::time::timeout_at(deadline, socket.recv_from(&mut buffer)).await {
                Ok(Ok((len, from))) => {
                    collector.accept(&buffer[..len], from);
                }
                Ok(Err(e)) => {
                    Self::transition(&mut state, ScanState::Done);
                    return Err(LeverError::discovery(format!("receive failed: {e}")));
                }
                // Window closed
                Err(_) => break,
            }
        }

        Self::transition(&mut state, ScanState::Done);
        let rejected = collector.rejected();
        let devices = collector.into_devices();
        info!(found = devices.len(), rejected, "Discovery scan finished");
        Ok(devices)
    }

    /// Run one scan, reporting failures instead of raising them
    pub async fn scan_or_empty(&self) -> Vec<DiscoveredDevice> {
        match self.scan().await {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Discovery scan failed: {}", e);
                Vec::new()
            }
        }
    }
}
