//! Core service façade and bootstrap helpers.
//!
//! This crate is the composition root of the sync engine. It turns a
//! [`CoreConfig`] (host bridges, remote endpoint, feature flags) and a
//! [`SyncConfig`] into a running [`SyncService`]. Desktop hosts typically
//! enable `desktop-shims`, which lets [`CoreConfig::builder`] fill in the
//! SQLite settings store, the TCP-probe network monitor and the reqwest client.
//! The `supabase` feature wires the PostgREST remote store from
//! [`CoreConfig::remote`].
//!
//! ```ignore
//! use core_service::{CoreConfig, Platform, StaticIdentity, SyncConfig, SyncService};
//!
//! let config = CoreConfig::builder()
//!     .remote(RemoteEndpointConfig::new("https://xyz.supabase.co", "anon-key"))
//!     .build()
//!     .await?;
//! let identity = Arc::new(StaticIdentity::signed_in(user_id));
//! let service = SyncService::builder(config, SyncConfig::for_platform(Platform::Web))
//!     .identity(identity)
//!     .build()?;
//! service.start().await;
//! ```

pub mod error;

pub use error::{CoreError, Result};

pub use core_runtime::config::{CoreConfig, FeatureFlags, RemoteEndpointConfig};
pub use core_runtime::events::{CoreEvent, EventBus};
pub use core_runtime::logging::{init_logging, LoggingConfig};
pub use core_sync::{
    Category, ConflictResolver, IdentityProvider, InMemoryRemoteStore, ListenerId, Platform,
    RemoteStore, StaticIdentity, StatsListener, SyncConfig, SyncError, SyncRecord, SyncStats,
    SyncStatus,
};

#[cfg(feature = "supabase")]
pub use provider_supabase::SupabaseRemoteStore;

use core_sync::{ConnectivityMonitor, SyncDependencies, SyncOrchestrator};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast::Receiver;
use tracing::info;

/// Assembles a [`SyncService`] from host configuration.
pub struct SyncServiceBuilder {
    config: CoreConfig,
    sync: SyncConfig,
    identity: Option<Arc<dyn IdentityProvider>>,
    remote: Option<Arc<dyn RemoteStore>>,
    resolver: Option<ConflictResolver>,
}

impl SyncServiceBuilder {
    /// Source of the signed-in user id. Required.
    pub fn identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Use this remote store instead of the one derived from
    /// [`CoreConfig::remote`].
    pub fn remote_store(mut self, remote: Arc<dyn RemoteStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Replace the default per-category strategies.
    pub fn resolver(mut self, resolver: ConflictResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// # Errors
    ///
    /// - [`CoreError::CapabilityMissing`] without an identity provider, or
    ///   without any way to reach a remote store
    /// - [`CoreError::Sync`] for an invalid [`SyncConfig`]
    pub fn build(self) -> Result<SyncService> {
        let mut sync = self.sync;
        sync.validate()?;
        sync.periodic_sync = sync.periodic_sync && self.config.features.enable_periodic_sync;

        let identity = self.identity.ok_or_else(|| CoreError::CapabilityMissing {
            capability: "IdentityProvider".to_string(),
            message: "The sync engine needs the signed-in user id. \
                      Pass an IdentityProvider to SyncServiceBuilder::identity()."
                .to_string(),
        })?;

        let remote = match self.remote {
            Some(remote) => RemoteHandle::Injected(remote),
            None => remote_from_config(&self.config)?,
        };

        let events = EventBus::new(sync.event_buffer);
        let connectivity = match &self.config.network_monitor {
            Some(monitor) if self.config.features.enable_network_awareness => {
                ConnectivityMonitor::new(Arc::clone(monitor))
            }
            _ => ConnectivityMonitor::manual(true),
        }
        .with_event_bus(events.clone());

        info!(
            platform = %sync.platform,
            periodic = sync.periodic_sync,
            network_aware = self.config.features.enable_network_awareness,
            "Sync service configured"
        );

        let orchestrator = SyncOrchestrator::new(
            sync,
            SyncDependencies {
                settings: Arc::clone(&self.config.settings_store),
                remote: remote.store(),
                identity,
                connectivity: Arc::new(connectivity),
                resolver: self.resolver.unwrap_or_default(),
                clock: Arc::clone(&self.config.clock),
                events: Some(events),
            },
        );

        Ok(SyncService {
            orchestrator,
            remote,
        })
    }
}

enum RemoteHandle {
    Injected(Arc<dyn RemoteStore>),
    #[cfg(feature = "supabase")]
    Supabase(Arc<SupabaseRemoteStore>),
}

impl RemoteHandle {
    fn store(&self) -> Arc<dyn RemoteStore> {
        match self {
            RemoteHandle::Injected(store) => Arc::clone(store),
            #[cfg(feature = "supabase")]
            RemoteHandle::Supabase(store) => Arc::clone(store) as Arc<dyn RemoteStore>,
        }
    }
}

#[cfg(feature = "supabase")]
fn remote_from_config(config: &CoreConfig) -> Result<RemoteHandle> {
    let (Some(endpoint), Some(http)) = (&config.remote, &config.http_client) else {
        return Err(remote_missing_error());
    };
    let store = SupabaseRemoteStore::new(Arc::clone(http), endpoint)
        .map_err(|e| CoreError::InitializationFailed(e.to_string()))?;
    Ok(RemoteHandle::Supabase(Arc::new(store)))
}

#[cfg(not(feature = "supabase"))]
fn remote_from_config(config: &CoreConfig) -> Result<RemoteHandle> {
    if config.remote.is_some() {
        return Err(CoreError::CapabilityMissing {
            capability: "RemoteStore".to_string(),
            message: "A remote endpoint is configured but the 'supabase' feature is disabled. \
                      Enable it or inject a RemoteStore with SyncServiceBuilder::remote_store()."
                .to_string(),
        });
    }
    Err(remote_missing_error())
}

fn remote_missing_error() -> CoreError {
    CoreError::CapabilityMissing {
        capability: "RemoteStore".to_string(),
        message: "No remote store available. Configure CoreConfig::remote with the \
                  'supabase' feature, or inject one with SyncServiceBuilder::remote_store()."
            .to_string(),
    }
}

/// Primary façade exposed to host applications.
///
/// Dropping the service stops the periodic timer and connectivity tracking.
pub struct SyncService {
    orchestrator: SyncOrchestrator,
    remote: RemoteHandle,
}

impl SyncService {
    pub fn builder(config: CoreConfig, sync: SyncConfig) -> SyncServiceBuilder {
        SyncServiceBuilder {
            config,
            sync,
            identity: None,
            remote: None,
            resolver: None,
        }
    }

    /// Restore persisted state and begin timer and reconnection triggers.
    pub async fn start(&self) {
        self.orchestrator.start().await;
    }

    pub fn stop(&self) {
        self.orchestrator.stop();
    }

    /// Record a local write; `id` defaults to a fresh UUID.
    pub async fn queue_for_sync(
        &self,
        category: Category,
        payload: Value,
        id: Option<String>,
    ) -> SyncRecord {
        self.orchestrator.enqueue(category, payload, id).await
    }

    pub async fn pending_items(&self) -> Vec<SyncRecord> {
        self.orchestrator.pending_items().await
    }

    pub async fn mark_as_synced(&self, ids: &[String]) {
        self.orchestrator.mark_synced(ids).await;
    }

    /// Run a cycle now, rejecting when one is already running.
    pub async fn force_sync(&self) -> Result<SyncStats> {
        Ok(self.orchestrator.force_sync().await?)
    }

    /// Run a cycle now, or join the one already running.
    pub async fn sync_now(&self) -> SyncStats {
        self.orchestrator.sync_now().await
    }

    pub async fn get_status(&self) -> SyncStatus {
        self.orchestrator.get_status().await
    }

    pub fn latest_stats(&self) -> SyncStats {
        self.orchestrator.latest_stats()
    }

    pub fn subscribe(&self, listener: StatsListener) -> ListenerId {
        self.orchestrator.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.orchestrator.unsubscribe(id)
    }

    /// Lifecycle and connectivity events.
    pub fn subscribe_events(&self) -> Receiver<CoreEvent> {
        self.orchestrator.subscribe_events()
    }

    pub async fn get_local_data(&self, category: &Category, id: &str) -> Result<Option<SyncRecord>> {
        Ok(self.orchestrator.get_local_data(category, id).await?)
    }

    /// Wipe the queue, mirror, watermark and statistics. Call on sign-out.
    pub async fn clear_all_sync_state(&self) -> Result<()> {
        Ok(self.orchestrator.clear_all_sync_state().await?)
    }

    /// Session token sent to the remote backend in place of the anon key.
    /// No-op for injected remote stores.
    pub fn set_access_token(&self, token: Option<String>) {
        match &self.remote {
            RemoteHandle::Injected(_) => drop(token),
            #[cfg(feature = "supabase")]
            RemoteHandle::Supabase(store) => store.set_access_token(token),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        self.orchestrator.config()
    }
}

/// Desktop bootstrap: SQLite state at `database_path`, TCP reachability and
/// reqwest against `remote`.
#[cfg(all(feature = "desktop-shims", feature = "supabase"))]
pub async fn bootstrap_desktop(
    database_path: impl Into<std::path::PathBuf>,
    remote: RemoteEndpointConfig,
    sync: SyncConfig,
    identity: Arc<dyn IdentityProvider>,
) -> Result<SyncService> {
    let config = CoreConfig::builder()
        .database_path(database_path)
        .remote(remote)
        .build()
        .await?;
    SyncService::builder(config, sync).identity(identity).build()
}
