//! # Statistics & Listener Hub
//!
//! Holds the latest per-cycle [`SyncStats`] snapshot and fans it out to
//! registered listeners once per completed cycle. A panicking listener is
//! logged and skipped; the others still run.

use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::warn;

/// Snapshot produced by one sync cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    /// Completion time of the last cycle (ms since epoch)
    pub last_sync: Option<i64>,
    pub pending_items: usize,
    pub conflicts_resolved: u64,
    pub sync_errors: u64,
    /// Bytes of JSON payload pushed or applied
    pub data_transferred: u64,
}

/// Cheap status for UI polling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_online: bool,
    pub is_syncing: bool,
    pub pending_items: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

pub type StatsListener = Arc<dyn Fn(&SyncStats) + Send + Sync>;

#[derive(Default)]
pub struct StatsHub {
    latest: RwLock<SyncStats>,
    listeners: Mutex<Vec<(ListenerId, StatsListener)>>,
    next_id: AtomicU64,
}

impl StatsHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: StatsListener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    /// Returns whether the listener was registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn latest(&self) -> SyncStats {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the snapshot without notifying (startup restore)
    pub fn restore(&self, stats: SyncStats) {
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = stats;
    }

    pub fn reset(&self) {
        self.restore(SyncStats::default());
    }

    /// Record a completed cycle and notify every listener.
    pub fn publish(&self, stats: SyncStats) {
        self.restore(stats.clone());

        // Snapshot so listeners may (un)subscribe from inside the callback
        let listeners: Vec<(ListenerId, StatsListener)> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for (id, listener) in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&stats))).is_err() {
                warn!(listener = id.0, "Stats listener panicked");
            }
        }
    }
}

impl std::fmt::Debug for StatsHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsHub")
            .field("latest", &self.latest())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn stats(errors: u64) -> SyncStats {
        SyncStats {
            last_sync: Some(1_000),
            pending_items: 1,
            conflicts_resolved: 2,
            sync_errors: errors,
            data_transferred: 64,
        }
    }

    #[test]
    fn test_publish_notifies_and_updates_latest() {
        let hub = StatsHub::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        hub.subscribe(Arc::new(move |s: &SyncStats| {
            sink.lock().unwrap().push(s.sync_errors)
        }));

        hub.publish(stats(0));
        hub.publish(stats(3));

        assert_eq!(*seen.lock().unwrap(), vec![0, 3]);
        assert_eq!(hub.latest(), stats(3));
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let hub = StatsHub::new();
        let calls = Arc::new(AtomicUsize::new(0));

        hub.subscribe(Arc::new(|_: &SyncStats| panic!("listener bug")));
        let counter = calls.clone();
        hub.subscribe(Arc::new(move |_: &SyncStats| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        hub.publish(stats(0));
        hub.publish(stats(0));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe() {
        let hub = StatsHub::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let id = hub.subscribe(Arc::new(move |_: &SyncStats| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(hub.unsubscribe(id));
        assert!(!hub.unsubscribe(id));
        hub.publish(stats(0));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(hub.listener_count(), 0);
    }

    #[test]
    fn test_restore_and_reset_do_not_notify() {
        let hub = StatsHub::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        hub.subscribe(Arc::new(move |_: &SyncStats| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        hub.restore(stats(1));
        assert_eq!(hub.latest().sync_errors, 1);
        hub.reset();
        assert_eq!(hub.latest(), SyncStats::default());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stats_wire_names() {
        let value = serde_json::to_value(stats(0)).unwrap();
        assert_eq!(value["lastSync"], 1_000);
        assert_eq!(value["dataTransferred"], 64);
        assert_eq!(value["conflictsResolved"], 2);
    }
}
