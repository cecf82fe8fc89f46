//! Local mirror: the authoritative local copy of each synced entity
//!
//! Every entry also remembers, per origin platform, the exact remote versions
//! already applied. Pull windows overlap, so the same remote row is usually
//! seen more than once; the second sighting is skipped. A lower version that
//! lands on the remote after a higher one is still applied.

use crate::error::Result;
use crate::record::{Category, SyncRecord};
use crate::state::MIRROR_PREFIX;
use bridge_traits::SettingsStore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorEntry {
    pub record: SyncRecord,
    /// origin platform -> applied remote versions
    #[serde(default)]
    pub seen: BTreeMap<String, BTreeSet<u64>>,
}

impl MirrorEntry {
    pub fn new(record: SyncRecord) -> Self {
        Self {
            record,
            seen: BTreeMap::new(),
        }
    }

    pub fn from_remote(remote: SyncRecord) -> Self {
        let mut entry = Self::new(remote.clone());
        entry.mark_seen(&remote);
        entry
    }

    pub fn has_seen(&self, remote: &SyncRecord) -> bool {
        self.seen
            .get(remote.origin_platform.as_str())
            .is_some_and(|versions| versions.contains(&remote.version))
    }

    pub fn mark_seen(&mut self, remote: &SyncRecord) {
        self.seen
            .entry(remote.origin_platform.as_str().to_string())
            .or_default()
            .insert(remote.version);
    }
}

pub fn mirror_key(category: &Category, id: &str) -> String {
    format!("{}{}_{}", MIRROR_PREFIX, category.as_str(), id)
}

#[derive(Clone)]
pub struct MirrorStore {
    store: Arc<dyn SettingsStore>,
}

impl MirrorStore {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    /// A malformed entry is logged and reported as absent so the next
    /// remote version can replace it.
    pub async fn get(&self, category: &Category, id: &str) -> Result<Option<MirrorEntry>> {
        let key = mirror_key(category, id);
        let Some(raw) = self.store.get_string(&key).await? else {
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!(key = %key, error = %e, "Ignoring malformed mirror entry");
                Ok(None)
            }
        }
    }

    pub async fn put(&self, entry: &MirrorEntry) -> Result<()> {
        let key = mirror_key(&entry.record.category, &entry.record.id);
        let json = serde_json::to_string(entry)?;
        self.store.set_string(&key, &json).await?;
        Ok(())
    }

    pub async fn record(&self, category: &Category, id: &str) -> Result<Option<SyncRecord>> {
        Ok(self.get(category, id).await?.map(|entry| entry.record))
    }

    pub async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.store.list_keys_with_prefix(MIRROR_PREFIX).await?)
    }
}
