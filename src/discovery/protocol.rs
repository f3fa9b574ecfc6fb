//! Discovery reply decoding and per-scan deduplication
//!
//! Devices answer a discovery request with a UTF-8 JSON object such as
//! `{"type": "lever", "id": "lever-01", "ip": "192.168.1.40"}`. Extra fields
//! are ignored.

use crate::error::{LeverError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct RawReply {
    #[serde(rename = "type")]
    kind: Option<String>,
    id: Option<String>,
    ip: Option<String>,
}

/// One decoded discovery reply
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryReply {
    /// Device identity
    pub id: String,

    /// Address the device asked to be polled at
    pub address: String,

    /// Where the datagram came from
    pub source: SocketAddr,

    /// Arrival time
    pub received_at: DateTime<Utc>,
}

/// A device found by a scan, after deduplication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    /// Device identity
    pub id: String,

    /// Most recently announced address
    pub address: String,

    /// When the winning reply arrived
    pub seen_at: DateTime<Utc>,
}

fn required(field: Option<String>, name: &str) -> Result<String> {
    match field.map(|s| s.trim().to_string()) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(LeverError::malformed(format!("reply is missing '{name}'"))),
    }
}

/// Decode and validate one datagram
///
/// Fails for invalid UTF-8/JSON, missing `type`/`id`/`ip`, or a `type` other
/// than `expected_kind`.
pub fn parse_reply(
    data: &[u8],
    expected_kind: &str,
    source: SocketAddr,
    received_at: DateTime<Utc>,
) -> Result<DiscoveryReply> {
    let text = std::str::from_utf8(data)
        .map_err(|e| LeverError::malformed(format!("reply is not UTF-8: {e}")))?;
    let raw: RawReply = serde_json::from_str(text.trim_end_matches('\0'))?;

    let kind = required(raw.kind, "type")?;
    if kind != expected_kind {
        return Err(LeverError::malformed(format!(
            "unexpected device kind '{kind}'"
        )));
    }

    let id = required(raw.id, "id")?;
    let address = required(raw.ip, "ip")?;
    if address.contains(char::is_whitespace) || address.contains('/') {
        return Err(LeverError::malformed(format!(
            "invalid address '{address}'"
        )));
    }

    Ok(DiscoveryReply {
        id,
        address,
        source,
        received_at,
    })
}

/// Collects replies for one scan window, last writer wins per id
#[derive(Debug)]
pub struct ReplyCollector {
    expected_kind: String,
    replies: HashMap<String, DiscoveryReply>,
    order: Vec<String>,
    rejected: usize,
}

impl ReplyCollector {
    pub fn new(expected_kind: impl Into<String>) -> Self {
        Self {
            expected_kind: expected_kind.into(),
            replies: HashMap::new(),
            order: Vec::new(),
            rejected: 0,
        }
    }

    /// Feed one datagram; returns whether it was a valid reply
    pub fn accept(&mut self, data: &[u8], source: SocketAddr) -> bool {
        match parse_reply(data, &self.expected_kind, source, Utc::now()) {
            Ok(reply) => {
                debug!(id = %reply.id, address = %reply.address, %source, "Discovery reply");
                if !self.replies.contains_key(&reply.id) {
                    self.order.push(reply.id.clone());
                }
                self.replies.insert(reply.id.clone(), reply);
                true
            }
            Err(e) => {
                self.rejected += 1;
                debug!(%source, "Ignoring discovery datagram: {}", e);
                false
            }
        }
    }

    /// Number of datagrams that failed validation
    pub fn rejected(&self) -> usize {
        self.rejected
    }

    /// Number of distinct devices seen so far
    pub fn len(&self) -> usize {
        self.replies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replies.is_empty()
    }

    /// Deduplicated devices in first-seen order
    pub fn into_devices(mut self) -> Vec<DiscoveredDevice> {
        self.order
            .iter()
            .filter_map(|id| self.replies.remove(id))
            .map(|reply| DiscoveredDevice {
                id: reply.id,
                address: reply.address,
                seen_at: reply.received_at,
            })
            .collect()
    }
}
