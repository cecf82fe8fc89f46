//! Network reachability via TCP probe

use async_trait::async_trait;
use bridge_traits::{
    error::Result,
    network::{NetworkChangeStream, NetworkInfo, NetworkMonitor, NetworkStatus, NetworkType},
};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

/// Probe settings for [`DesktopNetworkMonitor`]
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// `host:port` to open a TCP connection to. Point this at the remote
    /// store's host to probe the path that actually matters.
    pub address: String,
    pub connect_timeout: Duration,
    /// How often the change stream re-probes
    pub poll_interval: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            address: "1.1.1.1:443".to_string(),
            connect_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// Desktop network monitor
///
/// Desktop OSes have no portable reachability callback, so this opens a TCP
/// connection to a well-known address. A refused connection is
/// `Disconnected`; a probe that neither connects nor fails before the timeout
/// is `Indeterminate`.
#[derive(Debug, Clone, Default)]
pub struct DesktopNetworkMonitor {
    config: ProbeConfig,
}

impl DesktopNetworkMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ProbeConfig) -> Self {
        Self { config }
    }

    async fn probe(&self) -> NetworkStatus {
        match tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(self.config.address.as_str()),
        )
        .await
        {
            Ok(Ok(_)) => NetworkStatus::Connected,
            Ok(Err(e)) => {
                debug!(address = %self.config.address, error = %e, "Reachability probe refused");
                NetworkStatus::Disconnected
            }
            Err(_) => NetworkStatus::Indeterminate,
        }
    }
}

#[async_trait]
impl NetworkMonitor for DesktopNetworkMonitor {
    async fn get_network_info(&self) -> Result<NetworkInfo> {
        let status = self.probe().await;
        debug!(status = ?status, "Network info updated");

        Ok(NetworkInfo {
            status,
            // Desktop cannot tell WiFi from Ethernet without platform APIs
            network_type: (status == NetworkStatus::Connected).then_some(NetworkType::Other),
            is_metered: false,
        })
    }

    async fn subscribe_changes(&self) -> Result<Box<dyn NetworkChangeStream>> {
        Ok(Box::new(DesktopNetworkChangeStream {
            monitor: self.clone(),
            last_status: None,
        }))
    }
}

/// Polls the probe and yields only when the status changes.
/// The first call reports the current status immediately.
struct DesktopNetworkChangeStream {
    monitor: DesktopNetworkMonitor,
    last_status: Option<NetworkStatus>,
}

#[async_trait]
impl NetworkChangeStream for DesktopNetworkChangeStream {
    async fn next(&mut self) -> Option<NetworkInfo> {
        loop {
            if self.last_status.is_some() {
                tokio::time::sleep(self.monitor.config.poll_interval).await;
            }

            if let Ok(info) = self.monitor.get_network_info().await {
                if self.last_status != Some(info.status) {
                    self.last_status = Some(info.status);
                    return Some(info);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn monitor_for(address: String) -> DesktopNetworkMonitor {
        DesktopNetworkMonitor::with_config(ProbeConfig {
            address,
            connect_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(10),
        })
    }

    #[tokio::test]
    async fn test_reachable_listener_is_connected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let monitor = monitor_for(listener.local_addr().unwrap().to_string());

        let info = monitor.get_network_info().await.unwrap();
        assert_eq!(info.status, NetworkStatus::Connected);
        assert!(monitor.is_connected().await);
    }

    #[tokio::test]
    async fn test_closed_port_is_disconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let monitor = monitor_for(address);
        assert!(!monitor.is_connected().await);
    }

    #[tokio::test]
    async fn test_change_stream_reports_initial_status() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let monitor = monitor_for(listener.local_addr().unwrap().to_string());

        let mut stream = monitor.subscribe_changes().await.unwrap();
        let first = stream.next().await.unwrap();
        assert_eq!(first.status, NetworkStatus::Connected);
    }
}
