//! Persisted engine state in the host key space
//!
//! | key | value |
//! |---|---|
//! | `sync_queue` | JSON array of pending [`SyncRecord`](crate::SyncRecord)s |
//! | `sync_stats` | JSON [`SyncStats`] of the last cycle |
//! | `last_sync_timestamp` | integer pull watermark (ms) |
//! | `local_{category}_{id}` | JSON mirror entry, see [`crate::mirror`] |
//! | `sync_version_{id}` | highest version this installation stamped on `id` |
//!
//! Version floors outlive [`SyncStateStore::clear_all`]: remote rows are
//! keyed by `(id, origin, version)` and a reused version would overwrite an
//! earlier delta.

use crate::error::Result;
use crate::stats::SyncStats;
use bridge_traits::SettingsStore;
use std::sync::Arc;
use tracing::{debug, warn};

pub const QUEUE_KEY: &str = "sync_queue";
pub const STATS_KEY: &str = "sync_stats";
pub const WATERMARK_KEY: &str = "last_sync_timestamp";
pub const MIRROR_PREFIX: &str = "local_";
pub const VERSION_FLOOR_PREFIX: &str = "sync_version_";

pub fn version_floor_key(id: &str) -> String {
    format!("{VERSION_FLOOR_PREFIX}{id}")
}

/// Stats and watermark persistence plus the full wipe used on logout
#[derive(Clone)]
pub struct SyncStateStore {
    store: Arc<dyn SettingsStore>,
}

impl SyncStateStore {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    pub fn settings(&self) -> Arc<dyn SettingsStore> {
        Arc::clone(&self.store)
    }

    /// Unreadable stats are logged and treated as absent.
    pub async fn load_stats(&self) -> Option<SyncStats> {
        let raw = match self.store.get_string(STATS_KEY).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(error = %e, "Failed to read persisted sync stats");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!(error = %e, "Discarding malformed persisted sync stats");
                None
            }
        }
    }

    pub async fn save_stats(&self, stats: &SyncStats) -> Result<()> {
        let json = serde_json::to_string(stats)?;
        self.store.set_string(STATS_KEY, &json).await?;
        Ok(())
    }

    pub async fn watermark(&self) -> Result<Option<i64>> {
        Ok(self.store.get_i64(WATERMARK_KEY).await?)
    }

    pub async fn save_watermark(&self, millis: i64) -> Result<()> {
        self.store.set_i64(WATERMARK_KEY, millis).await?;
        debug!(watermark = millis, "Advanced pull watermark");
        Ok(())
    }

    /// Remove queue, stats, watermark and every mirror entry. Version floors
    /// and keys that do not belong to the engine are left alone.
    pub async fn clear_all(&self) -> Result<()> {
        for key in [QUEUE_KEY, STATS_KEY, WATERMARK_KEY] {
            self.store.delete(key).await?;
        }
        for key in self.store.list_keys_with_prefix(MIRROR_PREFIX).await? {
            self.store.delete(&key).await?;
        }
        Ok(())
    }
}
