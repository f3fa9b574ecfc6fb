//! Discovery module for lever devices on the local network
//!
//! Devices answer a broadcast request with a small JSON datagram; this module
//! sends the request, collects replies for a bounded window and deduplicates
//! them by device id.

pub mod network;
pub mod protocol;

// Re-export main types for convenience
pub use network::DiscoveryClient;
pub use protocol::{parse_reply, DiscoveredDevice, DiscoveryReply, ReplyCollector};
