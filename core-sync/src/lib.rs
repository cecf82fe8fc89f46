//! # Multi-Device Sync Engine
//!
//! Keeps locally written data (usage counters, analysis results,
//! preferences, entitlement snapshots) consistent across several client
//! installations that write offline and reconcile through one shared remote
//! store.
//!
//! ## Components
//!
//! - **Connectivity Monitor** (`connectivity`): online flag with transition handlers
//! - **Durable Local Queue** (`queue`): pending local writes, persisted across restarts
//! - **Remote Sync Client** (`remote`): bounded, per-record-isolated push and delta pull
//! - **Conflict Resolver Registry** (`conflict_resolver`): per-category merge strategies
//! - **Sync Orchestrator** (`coordinator`): single-flight cycles on timer, reconnect or demand
//! - **Statistics & Listener Hub** (`stats`): last-cycle snapshot and listener fan-out
//!
//! Persisted state lives in a host [`SettingsStore`](bridge_traits::SettingsStore);
//! see [`state`] for the key layout and [`mirror`] for the local copy of each
//! entity.

pub mod conflict_resolver;
pub mod connectivity;
pub mod coordinator;
pub mod error;
pub mod identity;
pub mod mirror;
pub mod queue;
pub mod record;
pub mod remote;
pub mod state;
pub mod stats;

pub use conflict_resolver::{
    ConflictResolver, ConflictStrategy, CounterSum, MostRecentWins, RemoteWins, Resolution,
};
pub use connectivity::{ConnectivityHandler, ConnectivityMonitor, HandlerId};
pub use coordinator::{SyncConfig, SyncDependencies, SyncOrchestrator};
pub use error::{Result, SyncError};
pub use identity::{IdentityProvider, StaticIdentity};
pub use mirror::{MirrorEntry, MirrorStore};
pub use queue::DurableQueue;
pub use record::{Category, Platform, SyncRecord};
pub use remote::{InMemoryRemoteStore, PullFilter, PushOutcome, RemoteStore, RemoteSyncClient};
pub use state::SyncStateStore;
pub use stats::{ListenerId, StatsHub, StatsListener, SyncStats, SyncStatus};
