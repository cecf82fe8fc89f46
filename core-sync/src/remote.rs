//! # Remote Sync Client
//!
//! [`RemoteStore`] is the seam to the shared backend; [`RemoteSyncClient`] is
//! the only engine component that calls it. The client bounds every call
//! with a timeout and isolates push failures per record.
//!
//! ## Row identity and the pull window
//!
//! A remote row is keyed by `(user, id, origin platform, version)`: every
//! pushed version is kept, so a peer that misses a few cycles still sees each
//! counter delta. `query` returns rows that *reached the store* at or after
//! `since`, which lets a device that was offline for days still deliver its
//! writes to peers whose watermark has moved on.

use crate::error::{Result, SyncError};
use crate::record::{Platform, SyncRecord};
use async_trait::async_trait;
use bridge_traits::Clock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Conjunctive filter for [`RemoteStore::query`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullFilter {
    /// Inclusive lower bound on the row's arrival time (ms)
    pub since: i64,
    pub excluding_origin: Platform,
}

/// Backend holding every installation's pushed records
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Insert or replace the row for `record`. Repeating the same
    /// `(id, origin, version)` is a no-op.
    async fn upsert(&self, user_id: &str, record: &SyncRecord) -> Result<()>;

    /// Matching rows ordered by arrival time, then version. No match is an
    /// empty vector.
    async fn query(&self, user_id: &str, filter: &PullFilter) -> Result<Vec<SyncRecord>>;
}

/// Result of pushing a batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushOutcome {
    /// Records the store accepted, in push order
    pub accepted: Vec<SyncRecord>,
    /// id -> error message for records that were not accepted
    pub failures: HashMap<String, String>,
}

impl PushOutcome {
    pub fn accepted_ids(&self) -> HashSet<&str> {
        self.accepted.iter().map(|r| r.id.as_str()).collect()
    }
}

#[derive(Clone)]
pub struct RemoteSyncClient {
    store: Arc<dyn RemoteStore>,
    call_timeout: Duration,
}

impl RemoteSyncClient {
    pub fn new(store: Arc<dyn RemoteStore>, call_timeout: Duration) -> Self {
        Self {
            store,
            call_timeout,
        }
    }

    /// Upsert each record independently; one failure never stops the rest.
    pub async fn push(&self, user_id: &str, records: &[SyncRecord]) -> PushOutcome {
        let mut outcome = PushOutcome::default();

        for record in records {
            let mut remote_copy = record.clone();
            remote_copy.synced = true;

            match timeout(self.call_timeout, self.store.upsert(user_id, &remote_copy)).await {
                Ok(Ok(())) => {
                    debug!(record_id = %record.id, version = record.version, "Pushed record");
                    outcome.accepted.push(record.clone());
                }
                Ok(Err(e)) => {
                    warn!(record_id = %record.id, error = %e, "Push failed");
                    outcome.failures.insert(record.id.clone(), e.to_string());
                }
                Err(_) => {
                    let err = SyncError::Timeout(self.call_timeout.as_secs());
                    warn!(record_id = %record.id, error = %err, "Push timed out");
                    outcome.failures.insert(record.id.clone(), err.to_string());
                }
            }
        }

        outcome
    }

    /// Rows from other installations that arrived at or after `since`
    pub async fn pull(
        &self,
        user_id: &str,
        since: i64,
        excluding_origin: &Platform,
    ) -> Result<Vec<SyncRecord>> {
        let filter = PullFilter {
            since,
            excluding_origin: excluding_origin.clone(),
        };

        let records = timeout(self.call_timeout, self.store.query(user_id, &filter))
            .await
            .map_err(|_| SyncError::Timeout(self.call_timeout.as_secs()))??;

        debug!(since, count = records.len(), "Pulled remote records");
        Ok(records)
    }
}

type RowKey = (String, String, String, u64);

#[derive(Debug, Clone)]
struct StoredRow {
    record: SyncRecord,
    received_at: i64,
}

/// Process-local [`RemoteStore`]
///
/// Stands in for the backend in tests and offline demos. Several engines can
/// share one instance to simulate devices of the same user. Arrival times
/// come from the injected clock.
pub struct InMemoryRemoteStore {
    clock: Arc<dyn Clock>,
    rows: Mutex<HashMap<RowKey, StoredRow>>,
    failing: AtomicBool,
    latency: Mutex<Duration>,
    upserts: AtomicUsize,
    queries: AtomicUsize,
}

impl InMemoryRemoteStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            rows: Mutex::new(HashMap::new()),
            failing: AtomicBool::new(false),
            latency: Mutex::new(Duration::ZERO),
            upserts: AtomicUsize::new(0),
            queries: AtomicUsize::new(0),
        }
    }

    /// Make every call fail with [`SyncError::Remote`]
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Delay applied to every call before it does any work
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    pub fn upsert_calls(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Every stored version for `user_id`, ordered by arrival
    pub fn rows(&self, user_id: &str) -> Vec<SyncRecord> {
        let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        let mut matching: Vec<&StoredRow> =
            rows.iter().filter(|(k, _)| k.0 == user_id).map(|(_, v)| v).collect();
        matching.sort_by_key(|row| (row.received_at, row.record.version));
        matching.into_iter().map(|row| row.record.clone()).collect()
    }

    async fn simulate_network(&self) -> Result<()> {
        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(SyncError::Remote("remote store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn upsert(&self, user_id: &str, record: &SyncRecord) -> Result<()> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.simulate_network().await?;

        let key = (
            user_id.to_string(),
            record.id.clone(),
            record.origin_platform.as_str().to_string(),
            record.version,
        );
        let row = StoredRow {
            record: SyncRecord {
                synced: true,
                ..record.clone()
            },
            received_at: self.clock.unix_timestamp_millis(),
        };
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, row);
        Ok(())
    }

    async fn query(&self, user_id: &str, filter: &PullFilter) -> Result<Vec<SyncRecord>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.simulate_network().await?;

        let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        let mut matching: Vec<&StoredRow> = rows
            .iter()
            .filter(|(key, row)| {
                key.0 == user_id
                    && row.received_at >= filter.since
                    && row.record.origin_platform != filter.excluding_origin
            })
            .map(|(_, row)| row)
            .collect();
        matching.sort_by_key(|row| (row.received_at, row.record.version));

        Ok(matching.into_iter().map(|row| row.record.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Category;
    use bridge_traits::ManualClock;
    use serde_json::json;

    fn record(id: &str, origin: Platform, version: u64) -> SyncRecord {
        SyncRecord {
            id: id.into(),
            category: Category::Preference,
            payload: json!({ "v": version }),
            timestamp: 1,
            origin_platform: origin,
            version,
            synced: false,
        }
    }

    struct FlakyStore {
        reject: &'static str,
        inner: InMemoryRemoteStore,
    }

    #[async_trait]
    impl RemoteStore for FlakyStore {
        async fn upsert(&self, user_id: &str, record: &SyncRecord) -> Result<()> {
            if record.id == self.reject {
                return Err(SyncError::Remote("409 conflict".into()));
            }
            self.inner.upsert(user_id, record).await
        }

        async fn query(&self, user_id: &str, filter: &PullFilter) -> Result<Vec<SyncRecord>> {
            self.inner.query(user_id, filter).await
        }
    }

    #[tokio::test]
    async fn test_push_isolates_failures_per_record() {
        let store = Arc::new(FlakyStore {
            reject: "b",
            inner: InMemoryRemoteStore::new(Arc::new(ManualClock::new(0))),
        });
        let client = RemoteSyncClient::new(store.clone(), Duration::from_secs(1));

        let records = vec![
            record("a", Platform::Mobile, 1),
            record("b", Platform::Mobile, 1),
            record("c", Platform::Mobile, 1),
        ];
        let outcome = client.push("u1", &records).await;

        assert_eq!(outcome.accepted_ids(), HashSet::from(["a", "c"]));
        assert!(outcome.failures["b"].contains("409"));
        assert!(store.inner.rows("u1").iter().all(|r| r.synced));
    }

    #[tokio::test]
    async fn test_pull_filters_origin_user_and_arrival() {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = Arc::new(InMemoryRemoteStore::new(clock.clone()));
        let client = RemoteSyncClient::new(store.clone(), Duration::from_secs(1));

        store.upsert("u1", &record("old", Platform::Web, 1)).await.unwrap();
        clock.set(2_000);
        store.upsert("u1", &record("new", Platform::Web, 1)).await.unwrap();
        store.upsert("u1", &record("mine", Platform::Mobile, 1)).await.unwrap();
        store.upsert("u2", &record("other", Platform::Web, 1)).await.unwrap();

        let pulled = client.pull("u1", 2_000, &Platform::Mobile).await.unwrap();
        let ids: Vec<_> = pulled.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["new"]);

        assert!(client.pull("u3", 0, &Platform::Mobile).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_every_version_is_kept() {
        let store = InMemoryRemoteStore::new(Arc::new(ManualClock::new(0)));
        store.upsert("u1", &record("c1", Platform::Web, 1)).await.unwrap();
        store.upsert("u1", &record("c1", Platform::Web, 2)).await.unwrap();
        store.upsert("u1", &record("c1", Platform::Web, 2)).await.unwrap();

        let versions: Vec<u64> = store.rows("u1").iter().map(|r| r.version).collect();
        assert_eq!(versions, vec![1, 2]);
        assert_eq!(store.upsert_calls(), 3);
    }

    #[tokio::test]
    async fn test_failing_store_surfaces_single_error() {
        let store = Arc::new(InMemoryRemoteStore::new(Arc::new(ManualClock::new(0))));
        store.set_failing(true);
        let client = RemoteSyncClient::new(store.clone(), Duration::from_secs(1));

        let err = client.pull("u1", 0, &Platform::Web).await.unwrap_err();
        assert!(matches!(err, SyncError::Remote(_)));

        let outcome = client.push("u1", &[record("a", Platform::Web, 1)]).await;
        assert!(outcome.accepted.is_empty());
        assert_eq!(outcome.failures.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_are_bounded_by_timeout() {
        let store = Arc::new(InMemoryRemoteStore::new(Arc::new(ManualClock::new(0))));
        store.set_latency(Duration::from_secs(60));
        let client = RemoteSyncClient::new(store, Duration::from_secs(2));

        let err = client.pull("u1", 0, &Platform::Web).await.unwrap_err();
        assert_eq!(err, SyncError::Timeout(2));

        let outcome = client.push("u1", &[record("a", Platform::Web, 1)]).await;
        assert!(outcome.failures["a"].contains("timed out"));
    }
}
