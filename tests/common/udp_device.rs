//! Loopback UDP device answering discovery requests

use lever_fleet::config::DiscoveryConfig;
use std::net::{IpAddr, Ipv4Addr};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

/// Fake device bound to 127.0.0.1 on an ephemeral port
pub struct FakeUdpDevice {
    pub port: u16,
    handle: JoinHandle<Vec<Vec<u8>>>,
}

impl FakeUdpDevice {
    /// Answer one request per round with that round's datagrams, in order
    pub async fn spawn(rounds: Vec<Vec<String>>) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();

        let handle = tokio::spawn(async move {
            let mut requests = Vec::new();
            let mut buf = [0u8; 256];
            for replies in rounds {
                let (len, from) = socket.recv_from(&mut buf).await.unwrap();
                requests.push(buf[..len].to_vec());
                for reply in replies {
                    socket.send_to(reply.as_bytes(), from).await.unwrap();
                }
            }
            requests
        });

        Self { port, handle }
    }

    /// Discovery config pointing at this device instead of the broadcast address
    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            port: self.port,
            broadcast_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            timeout: std::time::Duration::from_millis(300),
            ..Default::default()
        }
    }

    /// Requests received, once every round has been answered
    pub async fn requests(self) -> Vec<Vec<u8>> {
        self.handle.await.unwrap()
    }
}

/// Discovery reply JSON
pub fn reply(kind: &str, id: &str, ip: &str) -> String {
    format!(r#"{{"type":"{kind}","id":"{id}","ip":"{ip}"}}"#)
}
