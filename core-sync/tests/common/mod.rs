//! Simulated installations sharing one remote store and one wall clock

#![allow(dead_code)]

use bridge_traits::{Clock, ManualClock, MemorySettingsStore, SettingsStore};
use core_sync::{
    Category, ConflictResolver, ConnectivityMonitor, InMemoryRemoteStore, Platform, RemoteStore,
    StaticIdentity, SyncConfig, SyncDependencies, SyncOrchestrator, SyncRecord,
};
use serde_json::Value;
use std::sync::Arc;

pub const USER: &str = "user-4242";

pub struct World {
    pub remote: Arc<InMemoryRemoteStore>,
    pub clock: Arc<ManualClock>,
}

impl World {
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        Self {
            remote: Arc::new(InMemoryRemoteStore::new(clock.clone())),
            clock,
        }
    }

    pub fn device(&self, platform: Platform) -> Device {
        self.device_with_remote(platform, self.remote.clone())
    }

    /// A device that reaches the shared store through `remote`, typically a
    /// wrapper that injects failures.
    pub fn device_with_remote(&self, platform: Platform, remote: Arc<dyn RemoteStore>) -> Device {
        let settings = Arc::new(MemorySettingsStore::new());
        let identity = Arc::new(StaticIdentity::signed_in(USER));
        let connectivity = Arc::new(ConnectivityMonitor::manual(true));

        let config = SyncConfig {
            periodic_sync: false,
            ..SyncConfig::for_platform(platform)
        };
        let orchestrator = SyncOrchestrator::new(
            config,
            SyncDependencies {
                settings: settings.clone(),
                remote,
                identity: identity.clone(),
                connectivity: connectivity.clone(),
                resolver: ConflictResolver::with_defaults(),
                clock: self.clock.clone(),
                events: None,
            },
        );

        Device {
            orchestrator: Arc::new(orchestrator),
            settings,
            identity,
            connectivity,
        }
    }

    /// Seed the remote store as if another installation had pushed.
    pub async fn remote_write(&self, record: SyncRecord) {
        self.remote
            .upsert(USER, &record)
            .await
            .expect("in-memory remote accepts writes");
    }

    pub fn now(&self) -> i64 {
        self.clock.unix_timestamp_millis()
    }

    pub fn tick(&self, millis: i64) {
        self.clock.advance(millis);
    }
}

pub struct Device {
    pub orchestrator: Arc<SyncOrchestrator>,
    pub settings: Arc<MemorySettingsStore>,
    pub identity: Arc<StaticIdentity>,
    pub connectivity: Arc<ConnectivityMonitor>,
}

/// Fields that must agree between converged mirrors. Versions are stamped
/// per installation and are left out.
#[derive(Debug, Clone, PartialEq)]
pub struct Converged {
    pub payload: Value,
    pub timestamp: i64,
    pub origin: Platform,
}

impl Device {
    pub async fn write(&self, category: Category, id: &str, payload: Value) -> SyncRecord {
        self.orchestrator
            .enqueue(category, payload, Some(id.to_string()))
            .await
    }

    pub async fn local(&self, category: Category, id: &str) -> Option<SyncRecord> {
        self.orchestrator
            .get_local_data(&category, id)
            .await
            .expect("mirror read")
    }

    pub async fn converged(&self, category: Category, id: &str) -> Option<Converged> {
        self.local(category, id).await.map(|r| Converged {
            payload: r.payload,
            timestamp: r.timestamp,
            origin: r.origin_platform,
        })
    }

    pub async fn mirror_keys(&self) -> Vec<String> {
        self.settings
            .list_keys_with_prefix("local_")
            .await
            .expect("key listing")
    }
}

pub fn remote_record(
    id: &str,
    category: Category,
    payload: Value,
    timestamp: i64,
    origin: Platform,
    version: u64,
) -> SyncRecord {
    SyncRecord {
        id: id.to_string(),
        category,
        payload,
        timestamp,
        origin_platform: origin,
        version,
        synced: true,
    }
}
