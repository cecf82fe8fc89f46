//! # Core Configuration
//!
//! [`CoreConfig`] collects the host capabilities (durable storage, network
//! monitor, HTTP client, clock) and the remote endpoint the sync engine talks
//! to. The builder fails fast with an actionable message when a required
//! capability is missing.
//!
//! With the `desktop-shims` feature, missing capabilities are filled with the
//! `bridge-desktop` defaults: a SQLite settings store, a TCP-probe network
//! monitor and a reqwest HTTP client.
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, RemoteEndpointConfig};
//!
//! let config = CoreConfig::builder()
//!     .database_path("/var/lib/app/sync-state.db")
//!     .remote(RemoteEndpointConfig::new("https://xyz.supabase.co", "anon-key"))
//!     .build()
//!     .await?;
//! ```
//!
//! Mobile and browser hosts inject their own bridges:
//!
//! ```ignore
//! let config = CoreConfig::builder()
//!     .settings_store(Arc::new(MyKeyValueStore))
//!     .network_monitor(Arc::new(MyReachability))
//!     .http_client(Arc::new(MyFetchClient))
//!     .build()
//!     .await?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{Clock, HttpClient, NetworkMonitor, SettingsStore, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;

/// Default name of the remote table holding synced rows
pub const DEFAULT_REMOTE_TABLE: &str = "sync_data";

#[derive(Clone)]
pub struct CoreConfig {
    /// Location of the durable state database when the desktop store is used
    pub database_path: Option<PathBuf>,
    pub settings_store: Arc<dyn SettingsStore>,
    pub network_monitor: Option<Arc<dyn NetworkMonitor>>,
    pub http_client: Option<Arc<dyn HttpClient>>,
    pub clock: Arc<dyn Clock>,
    /// Remote backend; `None` means the host supplies its own `RemoteStore`
    pub remote: Option<RemoteEndpointConfig>,
    pub features: FeatureFlags,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("settings_store", &"SettingsStore { ... }")
            .field(
                "network_monitor",
                &self.network_monitor.as_ref().map(|_| "NetworkMonitor { ... }"),
            )
            .field(
                "http_client",
                &self.http_client.as_ref().map(|_| "HttpClient { ... }"),
            )
            .field("remote", &self.remote)
            .field("features", &self.features)
            .finish()
    }
}

/// Optional engine behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Run a sync cycle on a recurring timer
    pub enable_periodic_sync: bool,
    /// Subscribe to the network monitor and sync on reconnection.
    /// Without it the engine assumes it is always online.
    pub enable_network_awareness: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_periodic_sync: true,
            enable_network_awareness: true,
        }
    }
}

/// PostgREST-style remote endpoint
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteEndpointConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`
    pub base_url: String,
    pub api_key: String,
    pub table: String,
}

impl RemoteEndpointConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            table: DEFAULT_REMOTE_TABLE.to_string(),
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("https://") || self.base_url.starts_with("http://")) {
            return Err(Error::Config(format!(
                "Remote base URL must start with http:// or https:// (got '{}')",
                self.base_url
            )));
        }
        if self.api_key.trim().is_empty() {
            return Err(Error::Config(
                "Remote API key is empty. Pass the project's anon key to RemoteEndpointConfig::new()."
                    .to_string(),
            ));
        }
        if self.table.trim().is_empty() {
            return Err(Error::Config("Remote table name cannot be empty".to_string()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for RemoteEndpointConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteEndpointConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("table", &self.table)
            .finish()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Checks the remote endpoint and that enabled features have the
    /// capabilities they need.
    pub fn validate(&self) -> Result<()> {
        if let Some(remote) = &self.remote {
            remote.validate()?;
            if self.http_client.is_none() {
                return Err(http_client_missing_error());
            }
        }

        if self.features.enable_network_awareness && self.network_monitor.is_none() {
            return Err(Error::CapabilityMissing {
                capability: "NetworkMonitor".to_string(),
                message: "Network awareness is enabled but no NetworkMonitor was provided. \
                          Disable the feature or inject a NetworkMonitor implementation."
                    .to_string(),
            });
        }

        Ok(())
    }
}

fn http_client_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "A remote endpoint is configured but no HttpClient was provided. \
                  Desktop: enable the 'desktop-shims' feature for the reqwest client. \
                  Mobile/Web: inject the platform HTTP stack."
            .to_string(),
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn settings_store_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "SettingsStore".to_string(),
        message: "A durable SettingsStore is required for the sync queue and local mirror. \
                  Desktop: enable the 'desktop-shims' feature for the SQLite store. \
                  Mobile: inject UserDefaults/DataStore. \
                  Web: inject chrome.storage or IndexedDB."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
async fn provide_default_settings_store(
    database_path: Option<&PathBuf>,
) -> Result<Arc<dyn SettingsStore>> {
    use bridge_desktop::SqliteSettingsStore;

    let path = database_path
        .cloned()
        .unwrap_or_else(SqliteSettingsStore::default_path);

    let store = SqliteSettingsStore::new(path)
        .await
        .map_err(|source| Error::BridgeInit {
            capability: "SettingsStore",
            source,
        })?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "desktop-shims"))]
async fn provide_default_settings_store(
    _database_path: Option<&PathBuf>,
) -> Result<Arc<dyn SettingsStore>> {
    Err(settings_store_missing_error())
}

#[cfg(feature = "desktop-shims")]
fn provide_default_network_monitor() -> Option<Arc<dyn NetworkMonitor>> {
    Some(Arc::new(bridge_desktop::DesktopNetworkMonitor::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_network_monitor() -> Option<Arc<dyn NetworkMonitor>> {
    None
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Option<Arc<dyn HttpClient>>> {
    let client = bridge_desktop::ReqwestHttpClient::new()
        .map_err(|source| Error::BridgeInit {
            capability: "HttpClient",
            source,
        })?;
    Ok(Some(Arc::new(client)))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Option<Arc<dyn HttpClient>>> {
    Ok(None)
}

/// Builder for [`CoreConfig`]
#[derive(Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    settings_store: Option<Arc<dyn SettingsStore>>,
    network_monitor: Option<Arc<dyn NetworkMonitor>>,
    http_client: Option<Arc<dyn HttpClient>>,
    clock: Option<Arc<dyn Clock>>,
    remote: Option<RemoteEndpointConfig>,
    features: FeatureFlags,
}

impl CoreConfigBuilder {
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Durable key/value store for engine state (required unless
    /// `desktop-shims` supplies one)
    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    pub fn network_monitor(mut self, monitor: Arc<dyn NetworkMonitor>) -> Self {
        self.network_monitor = Some(monitor);
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn remote(mut self, remote: RemoteEndpointConfig) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn enable_periodic_sync(mut self, enabled: bool) -> Self {
        self.features.enable_periodic_sync = enabled;
        self
    }

    pub fn enable_network_awareness(mut self, enabled: bool) -> Self {
        self.features.enable_network_awareness = enabled;
        self
    }

    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    /// Resolve defaults and validate.
    ///
    /// # Errors
    ///
    /// - [`Error::CapabilityMissing`] when a required bridge is absent and no
    ///   desktop default is available
    /// - [`Error::Config`] for an invalid remote endpoint
    pub async fn build(self) -> Result<CoreConfig> {
        let settings_store = match self.settings_store {
            Some(store) => store,
            None => provide_default_settings_store(self.database_path.as_ref()).await?,
        };

        let network_monitor = match self.network_monitor {
            Some(monitor) => Some(monitor),
            None if self.features.enable_network_awareness => provide_default_network_monitor(),
            None => None,
        };

        let http_client = match self.http_client {
            Some(client) => Some(client),
            None if self.remote.is_some() => provide_default_http_client()?,
            None => None,
        };

        let config = CoreConfig {
            database_path: self.database_path,
            settings_store,
            network_monitor,
            http_client,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            remote: self.remote,
            features: self.features,
        };

        config.validate()?;
        Ok(config)
    }
}
