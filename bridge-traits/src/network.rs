//! Network Reachability Abstraction
//!
//! Lets the sync engine decide whether a cycle is worth attempting and learn
//! about offline/online transitions without knowing how the host detects them.

use async_trait::async_trait;

use crate::error::Result;

/// Network connection type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkType {
    Cellular,
    WiFi,
    Ethernet,
    Other,
}

/// Network connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    /// The remote store is believed to be reachable
    Connected,
    /// No usable network
    Disconnected,
    /// The probe could not decide (captive portal, probe timeout, ...)
    Indeterminate,
}

/// Snapshot reported by a [`NetworkMonitor`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub status: NetworkStatus,
    pub network_type: Option<NetworkType>,
    /// Whether the connection is metered (has data limits/costs)
    pub is_metered: bool,
}

impl NetworkInfo {
    pub fn connected(network_type: Option<NetworkType>) -> Self {
        Self {
            status: NetworkStatus::Connected,
            network_type,
            is_metered: false,
        }
    }

    pub fn disconnected() -> Self {
        Self {
            status: NetworkStatus::Disconnected,
            network_type: None,
            is_metered: false,
        }
    }

    /// Reachability as seen by the sync engine.
    ///
    /// Only [`NetworkStatus::Connected`] counts as online; an indeterminate
    /// status is reported as offline so no cycle is started against a network
    /// that is probably unusable.
    pub fn is_online(&self) -> bool {
        self.status == NetworkStatus::Connected
    }
}

/// Network monitor trait
///
/// # Platform Support
///
/// - **Desktop**: periodic TCP reachability probe (`bridge-desktop`)
/// - **iOS / Android**: NWPathMonitor / ConnectivityManager callbacks
/// - **Web / extension**: `navigator.onLine` plus `online`/`offline` events
///
/// # Example
///
/// ```ignore
/// use bridge_traits::network::NetworkMonitor;
///
/// async fn should_sync(monitor: &dyn NetworkMonitor) -> bool {
///     monitor.is_connected().await
/// }
/// ```
#[async_trait]
pub trait NetworkMonitor: Send + Sync {
    /// Get current network information
    async fn get_network_info(&self) -> Result<NetworkInfo>;

    /// Whether the device is online. Probe errors count as offline.
    async fn is_connected(&self) -> bool {
        self.get_network_info()
            .await
            .map(|info| info.is_online())
            .unwrap_or(false)
    }

    /// Subscribe to network status changes
    ///
    /// Implementations should emit an item whenever the status changes; they
    /// may also emit duplicates, which consumers are expected to collapse.
    async fn subscribe_changes(&self) -> Result<Box<dyn NetworkChangeStream>>;
}

/// Stream of network status changes
#[async_trait]
pub trait NetworkChangeStream: Send {
    /// Get the next network info update
    ///
    /// Returns `None` when the stream is closed.
    async fn next(&mut self) -> Option<NetworkInfo>;
}
