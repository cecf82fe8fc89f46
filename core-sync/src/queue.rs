//! # Durable Local Queue
//!
//! Local mutations waiting for the remote store to accept them. The queue is
//! held in memory and rewritten to the `sync_queue` key after every change;
//! when that write fails the in-memory queue stays authoritative and the next
//! successful write catches up.

use crate::mirror::MirrorStore;
use crate::record::{Category, Platform, SyncRecord};
use crate::state::{version_floor_key, QUEUE_KEY};
use bridge_traits::{Clock, SettingsStore};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct DurableQueue {
    store: Arc<dyn SettingsStore>,
    mirror: MirrorStore,
    platform: Platform,
    clock: Arc<dyn Clock>,
    items: Mutex<Vec<SyncRecord>>,
}

impl DurableQueue {
    pub fn new(store: Arc<dyn SettingsStore>, platform: Platform, clock: Arc<dyn Clock>) -> Self {
        Self {
            mirror: MirrorStore::new(Arc::clone(&store)),
            store,
            platform,
            clock,
            items: Mutex::new(Vec::new()),
        }
    }

    /// Record a local write.
    ///
    /// The version continues from the newest local knowledge of `id`: a
    /// pending record, the mirror entry or the persisted version floor,
    /// whichever is higher. The floor survives a state wipe so a version is
    /// never stamped twice by one installation.
    pub async fn enqueue(&self, category: Category, payload: Value, id: Option<String>) -> SyncRecord {
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());

        let mirrored = match self.mirror.get(&category, &id).await {
            Ok(entry) => entry.map(|e| e.record.version),
            Err(e) => {
                warn!(record_id = %id, error = %e, "Mirror lookup failed; versioning from queue only");
                None
            }
        };
        let floor = self.version_floor(&id).await;

        let mut items = self.items.lock().await;
        let pending = items.iter().filter(|r| r.id == id).map(|r| r.version).max();
        let version = pending
            .into_iter()
            .chain(mirrored)
            .chain(floor)
            .max()
            .map_or(1, |v| v + 1);
        self.raise_version_floor(&id, version).await;

        let record = SyncRecord {
            id,
            category,
            payload,
            timestamp: self.clock.unix_timestamp_millis(),
            origin_platform: self.platform.clone(),
            version,
            synced: false,
        };
        items.push(record.clone());
        self.persist(&items).await;

        debug!(
            record_id = %record.id,
            category = %record.category,
            version = record.version,
            pending = items.len(),
            "Enqueued local write"
        );
        record
    }

    /// Snapshot of unconfirmed records in enqueue order
    pub async fn pending_items(&self) -> Vec<SyncRecord> {
        self.items
            .lock()
            .await
            .iter()
            .filter(|r| !r.synced)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }

    /// Drop every pending record with one of `ids`. Unknown ids are ignored
    /// and nothing is rewritten when nothing changed.
    pub async fn mark_synced(&self, ids: &[String]) {
        let mut items = self.items.lock().await;
        let before = items.len();
        items.retain(|r| !ids.contains(&r.id));

        if items.len() != before {
            self.persist(&items).await;
        }
    }

    /// Drop exactly the pushed versions. A newer write to the same id made
    /// while the push was in flight stays queued.
    pub async fn acknowledge(&self, pushed: &[SyncRecord]) {
        let mut items = self.items.lock().await;
        let before = items.len();
        items.retain(|r| !pushed.iter().any(|p| p.same_version(r)));

        if items.len() != before {
            self.persist(&items).await;
        }
    }

    /// Rebuild the queue from `sync_queue`.
    ///
    /// Elements that fail to decode are logged and skipped; records already
    /// enqueued in this process are kept after the restored ones.
    pub async fn load_from_durable_state(&self) {
        let raw = match self.store.get_string(QUEUE_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "Failed to read persisted sync queue");
                return;
            }
        };

        let elements: Vec<Value> = match serde_json::from_str(&raw) {
            Ok(elements) => elements,
            Err(e) => {
                warn!(error = %e, "Persisted sync queue is not a JSON array; starting empty");
                return;
            }
        };

        let mut restored = Vec::with_capacity(elements.len());
        for (index, element) in elements.into_iter().enumerate() {
            match serde_json::from_value::<SyncRecord>(element) {
                Ok(record) => restored.push(record),
                Err(e) => warn!(index, error = %e, "Skipping malformed queued record"),
            }
        }

        let mut items = self.items.lock().await;
        for record in items.drain(..) {
            if !restored.iter().any(|r| r.same_version(&record)) {
                restored.push(record);
            }
        }
        *items = restored;

        info!(pending = items.len(), "Restored sync queue");
    }

    /// Empty the queue and delete its persisted copy
    pub async fn clear(&self) {
        let mut items = self.items.lock().await;
        items.clear();
        if let Err(e) = self.store.delete(QUEUE_KEY).await {
            warn!(error = %e, "Failed to delete persisted sync queue");
        }
    }

    async fn version_floor(&self, id: &str) -> Option<u64> {
        match self.store.get_i64(&version_floor_key(id)).await {
            Ok(floor) => floor.and_then(|v| u64::try_from(v).ok()),
            Err(e) => {
                warn!(record_id = %id, error = %e, "Failed to read version floor");
                None
            }
        }
    }

    async fn raise_version_floor(&self, id: &str, version: u64) {
        let Ok(value) = i64::try_from(version) else {
            warn!(record_id = %id, version, "Version exceeds the persistable range");
            return;
        };
        if let Err(e) = self.store.set_i64(&version_floor_key(id), value).await {
            warn!(record_id = %id, error = %e, "Failed to persist version floor");
        }
    }

    async fn persist(&self, items: &[SyncRecord]) {
        let json = match serde_json::to_string(items) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to encode sync queue");
                return;
            }
        };

        if let Err(e) = self.store.set_string(QUEUE_KEY, &json).await {
            warn!(error = %e, pending = items.len(), "Failed to persist sync queue");
        }
    }
}
