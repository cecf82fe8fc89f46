//! Multi-device reconciliation through a shared remote store
//!
//! Each test builds a `World` (one remote store, one wall clock) and two or
//! more devices signed in as the same user, then drives cycles explicitly.

mod common;

use async_trait::async_trait;
use common::{remote_record, World, USER};
use core_sync::{
    Category, InMemoryRemoteStore, Platform, PullFilter, RemoteStore, SyncError, SyncRecord,
    SyncStats,
};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const MINUTE: i64 = 60_000;

// ============================================================================
// Convergence
// ============================================================================

#[tokio::test]
async fn test_two_devices_converge_after_quiet_cycles() {
    let world = World::new();
    let phone = world.device(Platform::Mobile);
    let extension = world.device(Platform::BrowserExtension);

    phone.write(Category::Preference, "p1", json!({ "theme": "dark" })).await;
    phone.write(Category::UsageCounter, "c1", json!({ "summaries": 2 })).await;
    phone.write(Category::AnalysisResult, "r1", json!({ "score": 0.7 })).await;
    world.tick(MINUTE);
    extension.write(Category::Preference, "p1", json!({ "theme": "light" })).await;
    extension.write(Category::UsageCounter, "c1", json!({ "summaries": 3, "exports": 1 })).await;
    extension.write(Category::AnalysisResult, "r2", json!({ "score": 0.1 })).await;

    for _ in 0..2 {
        world.tick(MINUTE);
        phone.orchestrator.force_sync().await.unwrap();
        world.tick(MINUTE);
        extension.orchestrator.force_sync().await.unwrap();
    }

    for (category, id) in [
        (Category::Preference, "p1"),
        (Category::UsageCounter, "c1"),
        (Category::AnalysisResult, "r1"),
        (Category::AnalysisResult, "r2"),
    ] {
        let on_phone = phone.converged(category.clone(), id).await;
        let on_extension = extension.converged(category.clone(), id).await;
        assert!(on_phone.is_some(), "{id} missing on phone");
        assert_eq!(on_phone, on_extension, "{id} diverged");
    }

    assert_eq!(phone.mirror_keys().await, extension.mirror_keys().await);

    let theme = phone.local(Category::Preference, "p1").await.unwrap();
    assert_eq!(theme.payload["theme"], "light");

    let counter = extension.local(Category::UsageCounter, "c1").await.unwrap();
    assert_eq!(counter.payload, json!({ "summaries": 5, "exports": 1 }));
}

#[tokio::test]
async fn test_quiet_cycles_do_not_change_converged_state() {
    let world = World::new();
    let phone = world.device(Platform::Mobile);
    let web = world.device(Platform::Web);

    phone.write(Category::UsageCounter, "c1", json!({ "n": 1 })).await;
    web.write(Category::UsageCounter, "c1", json!({ "n": 1 })).await;
    phone.orchestrator.force_sync().await.unwrap();
    web.orchestrator.force_sync().await.unwrap();
    phone.orchestrator.force_sync().await.unwrap();

    let settled = phone.local(Category::UsageCounter, "c1").await.unwrap();
    for _ in 0..3 {
        world.tick(MINUTE);
        let stats = phone.orchestrator.force_sync().await.unwrap();
        assert_eq!(stats.conflicts_resolved, 0);
        web.orchestrator.force_sync().await.unwrap();
    }

    assert_eq!(phone.local(Category::UsageCounter, "c1").await, Some(settled));
    assert_eq!(
        web.local(Category::UsageCounter, "c1").await.unwrap().payload["n"],
        2
    );
}

// ============================================================================
// Usage counters
// ============================================================================

async fn counter_after(order_phone_first: bool) -> (i64, i64) {
    let world = World::new();
    let phone = world.device(Platform::Mobile);
    let web = world.device(Platform::Web);

    phone.write(Category::UsageCounter, "usage", json!({ "feature": 2 })).await;
    web.write(Category::UsageCounter, "usage", json!({ "feature": 3 })).await;

    let (first, second) = if order_phone_first {
        (&phone, &web)
    } else {
        (&web, &phone)
    };
    first.orchestrator.force_sync().await.unwrap();
    world.tick(MINUTE);
    second.orchestrator.force_sync().await.unwrap();
    world.tick(MINUTE);
    first.orchestrator.force_sync().await.unwrap();

    let value = |record: Option<core_sync::SyncRecord>| {
        record.unwrap().payload["feature"].as_i64().unwrap()
    };
    (
        value(phone.local(Category::UsageCounter, "usage").await),
        value(web.local(Category::UsageCounter, "usage").await),
    )
}

#[tokio::test]
async fn test_usage_counters_sum_regardless_of_order() {
    assert_eq!(counter_after(true).await, (5, 5));
    assert_eq!(counter_after(false).await, (5, 5));
}

#[tokio::test]
async fn test_later_counter_deltas_keep_accumulating() {
    let world = World::new();
    let phone = world.device(Platform::Mobile);
    let web = world.device(Platform::Web);

    phone.write(Category::UsageCounter, "usage", json!({ "feature": 2 })).await;
    web.write(Category::UsageCounter, "usage", json!({ "feature": 3 })).await;
    phone.orchestrator.force_sync().await.unwrap();
    web.orchestrator.force_sync().await.unwrap();
    phone.orchestrator.force_sync().await.unwrap();

    // Two more deltas on the phone while the web app is not syncing
    world.tick(MINUTE);
    phone.write(Category::UsageCounter, "usage", json!({ "feature": 1 })).await;
    phone.orchestrator.force_sync().await.unwrap();
    world.tick(MINUTE);
    phone.write(Category::UsageCounter, "usage", json!({ "feature": 4 })).await;
    phone.orchestrator.force_sync().await.unwrap();

    world.tick(MINUTE);
    web.orchestrator.force_sync().await.unwrap();

    let on_phone = phone.local(Category::UsageCounter, "usage").await.unwrap();
    let on_web = web.local(Category::UsageCounter, "usage").await.unwrap();
    assert_eq!(on_phone.payload["feature"], 10);
    assert_eq!(on_web.payload["feature"], 10);
}

/// Forwards to the shared store but rejects the first upsert of one
/// `(id, version)`.
struct RejectOnce {
    inner: Arc<InMemoryRemoteStore>,
    id: &'static str,
    version: u64,
    rejected: AtomicBool,
}

impl RejectOnce {
    fn new(inner: Arc<InMemoryRemoteStore>, id: &'static str, version: u64) -> Self {
        Self {
            inner,
            id,
            version,
            rejected: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl RemoteStore for RejectOnce {
    async fn upsert(&self, user_id: &str, record: &SyncRecord) -> core_sync::Result<()> {
        if record.id == self.id
            && record.version == self.version
            && !self.rejected.swap(true, Ordering::SeqCst)
        {
            return Err(SyncError::Remote("503 Service Unavailable".into()));
        }
        self.inner.upsert(user_id, record).await
    }

    async fn query(&self, user_id: &str, filter: &PullFilter) -> core_sync::Result<Vec<SyncRecord>> {
        self.inner.query(user_id, filter).await
    }
}

#[tokio::test]
async fn test_counter_delta_retried_after_newer_version_is_applied() {
    let world = World::new();
    let flaky = Arc::new(RejectOnce::new(world.remote.clone(), "c", 1));
    let web = world.device_with_remote(Platform::Web, flaky.clone());
    let phone = world.device(Platform::Mobile);

    web.write(Category::UsageCounter, "c", json!({ "feature": 1 })).await;
    web.write(Category::UsageCounter, "c", json!({ "feature": 1 })).await;

    for _ in 0..4 {
        world.tick(MINUTE);
        web.orchestrator.force_sync().await.unwrap();
        world.tick(MINUTE);
        phone.orchestrator.force_sync().await.unwrap();
    }

    assert!(flaky.rejected.load(Ordering::SeqCst));
    assert!(web.orchestrator.pending_items().await.is_empty());
    assert_eq!(world.remote.rows(USER).len(), 2);

    let on_web = web.local(Category::UsageCounter, "c").await.unwrap();
    let on_phone = phone.local(Category::UsageCounter, "c").await.unwrap();
    assert_eq!(on_web.payload, json!({ "feature": 2 }));
    assert_eq!(on_phone.payload, json!({ "feature": 2 }));
}

// ============================================================================
// Per-category policies
// ============================================================================

#[tokio::test]
async fn test_remote_entitlement_overrides_local_snapshot() {
    let world = World::new();
    let phone = world.device(Platform::Mobile);

    let now = world.now();
    world
        .remote_write(remote_record(
            "entitlement",
            Category::EntitlementSnapshot,
            json!({ "tier": "free", "limit": 10 }),
            now - 10 * MINUTE,
            Platform::Web,
            3,
        ))
        .await;
    phone
        .write(Category::EntitlementSnapshot, "entitlement", json!({ "tier": "pro", "limit": 500 }))
        .await;

    let stats = phone.orchestrator.force_sync().await.unwrap();

    let local = phone.local(Category::EntitlementSnapshot, "entitlement").await.unwrap();
    assert_eq!(local.payload, json!({ "tier": "free", "limit": 10 }));
    assert_eq!(local.version, 4);
    assert_eq!(stats.conflicts_resolved, 1);
}

#[tokio::test]
async fn test_newer_remote_preference_wins() {
    let world = World::new();
    world.clock.set(100);
    let phone = world.device(Platform::Mobile);

    world
        .remote_write(remote_record(
            "p1",
            Category::Preference,
            json!({ "theme": "light" }),
            200,
            Platform::Web,
            1,
        ))
        .await;
    let local = phone.write(Category::Preference, "p1", json!({ "theme": "dark" })).await;
    assert_eq!(local.timestamp, 100);
    assert_eq!(local.version, 1);

    let stats = phone.orchestrator.force_sync().await.unwrap();

    let mirrored = phone.local(Category::Preference, "p1").await.unwrap();
    assert_eq!(mirrored.payload["theme"], "light");
    assert_eq!(mirrored.version, 2);
    assert!(mirrored.synced);
    assert_eq!(stats.conflicts_resolved, 1);
    assert_eq!(stats.pending_items, 0);
}

#[tokio::test]
async fn test_long_offline_writes_still_reach_peers() {
    let world = World::new();
    let phone = world.device(Platform::Mobile);
    let web = world.device(Platform::Web);

    phone.connectivity.set_online(false);
    phone.write(Category::AnalysisResult, "offline-note", json!({ "text": "on the train" })).await;

    // The web app keeps syncing for two days; its watermark moves far past
    // the phone's write timestamp.
    for _ in 0..48 {
        world.tick(60 * MINUTE);
        web.orchestrator.force_sync().await.unwrap();
    }

    phone.connectivity.set_online(true);
    phone.orchestrator.force_sync().await.unwrap();
    world.tick(MINUTE);
    web.orchestrator.force_sync().await.unwrap();

    let delivered = web.local(Category::AnalysisResult, "offline-note").await.unwrap();
    assert_eq!(delivered.payload["text"], "on the train");
    assert_eq!(delivered.origin_platform, Platform::Mobile);
}

#[tokio::test]
async fn test_devices_never_pull_their_own_writes() {
    let world = World::new();
    let phone = world.device(Platform::Mobile);

    phone.write(Category::Preference, "p1", json!({ "theme": "dark" })).await;
    phone.orchestrator.force_sync().await.unwrap();
    world.tick(MINUTE);
    let stats = phone.orchestrator.force_sync().await.unwrap();

    assert_eq!(stats.conflicts_resolved, 0);
    assert_eq!(stats.data_transferred, 0);
    assert_eq!(world.remote.rows(USER).len(), 1);
}

// ============================================================================
// Failure handling
// ============================================================================

#[tokio::test]
async fn test_failing_remote_never_drops_pending_items() {
    let world = World::new();
    let phone = world.device(Platform::Mobile);
    world.remote.set_failing(true);

    for id in ["a", "b", "c"] {
        phone.write(Category::Preference, id, json!({ "v": id })).await;
    }

    for _ in 0..3 {
        let stats = phone.orchestrator.sync_now().await;
        assert_eq!(stats.pending_items, 3);
        assert_eq!(stats.sync_errors, 4);
        assert_eq!(phone.orchestrator.pending_items().await.len(), 3);

        let status = phone.orchestrator.get_status().await;
        assert!(!status.is_syncing);
        assert_eq!(status.pending_items, 3);
    }

    world.remote.set_failing(false);
    let stats = phone.orchestrator.sync_now().await;
    assert_eq!(stats.pending_items, 0);
    assert_eq!(stats.sync_errors, 0);
    assert_eq!(world.remote.rows(USER).len(), 3);
}

#[tokio::test]
async fn test_mark_synced_unknown_id_is_a_no_op() {
    let world = World::new();
    let phone = world.device(Platform::Mobile);
    let pending = phone.write(Category::Preference, "p1", json!({})).await;
    phone.orchestrator.sync_now().await;
    phone.write(Category::Preference, "p2", json!({})).await;

    let stats_before = phone.orchestrator.latest_stats();
    let queue_before = phone.orchestrator.pending_items().await;

    phone.orchestrator.mark_synced(&["x".to_string()]).await;
    phone.orchestrator.mark_synced(&["x".to_string()]).await;

    assert_eq!(phone.orchestrator.pending_items().await, queue_before);
    assert_eq!(phone.orchestrator.latest_stats(), stats_before);
    assert_ne!(queue_before[0].id, pending.id);
}

// ============================================================================
// Logout
// ============================================================================

#[tokio::test]
async fn test_clear_all_sync_state_wipes_local_data() {
    let world = World::new();
    let phone = world.device(Platform::Mobile);
    phone.write(Category::Preference, "p1", json!({ "theme": "dark" })).await;
    phone.orchestrator.force_sync().await.unwrap();
    phone.write(Category::Preference, "p2", json!({ "theme": "dark" })).await;

    phone.orchestrator.clear_all_sync_state().await.unwrap();

    assert!(phone.orchestrator.pending_items().await.is_empty());
    assert_eq!(phone.local(Category::Preference, "p1").await, None);
    assert_eq!(phone.orchestrator.latest_stats(), SyncStats::default());
    assert!(phone.mirror_keys().await.is_empty());

    // The remote copy is untouched; a device never pulls its own rows back
    phone.orchestrator.force_sync().await.unwrap();
    assert_eq!(phone.local(Category::Preference, "p1").await, None);
    assert_eq!(world.remote.rows(USER).len(), 1);
}

#[tokio::test]
async fn test_writes_after_clear_never_reuse_a_version() {
    let world = World::new();
    let web = world.device(Platform::Web);
    let phone = world.device(Platform::Mobile);

    web.write(Category::UsageCounter, "c", json!({ "feature": 1 })).await;
    web.write(Category::UsageCounter, "c", json!({ "feature": 1 })).await;
    web.orchestrator.force_sync().await.unwrap();
    world.tick(MINUTE);
    phone.orchestrator.force_sync().await.unwrap();

    web.orchestrator.clear_all_sync_state().await.unwrap();
    let fresh = web.write(Category::UsageCounter, "c", json!({ "feature": 5 })).await;
    assert_eq!(fresh.version, 3);

    world.tick(MINUTE);
    web.orchestrator.force_sync().await.unwrap();
    world.tick(MINUTE);
    phone.orchestrator.force_sync().await.unwrap();

    // Every delta keeps its own row
    assert_eq!(world.remote.rows(USER).len(), 3);
    let on_phone = phone.local(Category::UsageCounter, "c").await.unwrap();
    assert_eq!(on_phone.payload, json!({ "feature": 7 }));

    // The cleared device starts over from its own new write
    let on_web = web.local(Category::UsageCounter, "c").await.unwrap();
    assert_eq!(on_web.payload, json!({ "feature": 5 }));
}
