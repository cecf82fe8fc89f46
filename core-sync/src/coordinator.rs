//! # Sync Orchestrator
//!
//! Drives reconciliation cycles between the local queue/mirror and the
//! remote store.
//!
//! ## Cycle
//!
//! 1. **Upload**: push every pending record, fold accepted ones into the
//!    local mirror and drop them from the queue.
//! 2. **Download**: pull rows from other installations that reached the
//!    remote since the watermark (minus an overlap), resolve each against the
//!    mirror and advance the watermark if the pull succeeded.
//! 3. **Publish**: persist the cycle's [`SyncStats`] and notify listeners.
//!
//! Push and pull failures are counted in `sync_errors`, never returned. A
//! panic inside a cycle is caught at the task boundary and also counted.
//!
//! ## Triggers and single-flight
//!
//! At most one cycle runs per orchestrator. The periodic timer, reconnection
//! and [`SyncOrchestrator::sync_now`] join the running cycle and get its
//! result; [`SyncOrchestrator::force_sync`] is rejected with
//! [`SyncError::SyncInProgress`] instead.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let orchestrator = SyncOrchestrator::new(SyncConfig::default(), deps);
//! orchestrator.start().await;
//!
//! orchestrator
//!     .enqueue(Category::Preference, json!({ "theme": "dark" }), Some("p1".into()))
//!     .await;
//! let stats = orchestrator.force_sync().await?;
//! ```

use crate::conflict_resolver::ConflictResolver;
use crate::connectivity::{ConnectivityMonitor, HandlerId};
use crate::error::{Result, SyncError};
use crate::identity::IdentityProvider;
use crate::mirror::{MirrorEntry, MirrorStore};
use crate::queue::DurableQueue;
use crate::record::{Category, Platform, SyncRecord};
use crate::remote::{RemoteStore, RemoteSyncClient};
use crate::state::SyncStateStore;
use crate::stats::{ListenerId, StatsHub, StatsListener, SyncStats, SyncStatus};
use bridge_traits::{Clock, SettingsStore};
use core_runtime::events::{CoreEvent, CycleTrigger, EventBus, SyncEvent, DEFAULT_EVENT_BUFFER_SIZE};
use core_runtime::logging::redact_user_id;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast::Receiver;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Origin tag stamped on local writes and excluded from pulls
    pub platform: Platform,

    /// Period of the background timer started by `start()`
    pub sync_interval: Duration,

    /// Whether `start()` runs the background timer at all
    pub periodic_sync: bool,

    /// Bound on each individual remote call
    pub remote_timeout: Duration,

    /// Pull window on first run, before any watermark exists
    pub initial_lookback: Duration,

    /// Subtracted from the watermark to tolerate clock skew between this
    /// device and the remote store
    pub pull_overlap: Duration,

    /// Capacity of the event bus created when none is injected
    pub event_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            platform: Platform::Mobile,
            sync_interval: Duration::from_secs(30),
            periodic_sync: true,
            remote_timeout: Duration::from_secs(15),
            initial_lookback: Duration::from_secs(24 * 60 * 60),
            pull_overlap: Duration::from_secs(5 * 60),
            event_buffer: DEFAULT_EVENT_BUFFER_SIZE,
        }
    }
}

impl SyncConfig {
    pub fn for_platform(platform: Platform) -> Self {
        Self {
            platform,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.sync_interval.is_zero() {
            return Err(SyncError::Config("sync_interval must be positive".into()));
        }
        if self.remote_timeout.is_zero() {
            return Err(SyncError::Config("remote_timeout must be positive".into()));
        }
        Ok(())
    }
}

/// Collaborators injected by the composition root
pub struct SyncDependencies {
    pub settings: Arc<dyn SettingsStore>,
    pub remote: Arc<dyn RemoteStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub connectivity: Arc<ConnectivityMonitor>,
    pub resolver: ConflictResolver,
    pub clock: Arc<dyn Clock>,
    /// Bus for lifecycle events; a private one is created when absent
    pub events: Option<EventBus>,
}

type CycleFuture = Shared<BoxFuture<'static, SyncStats>>;

struct InFlight {
    id: u64,
    future: CycleFuture,
}

/// Per-cycle counters
#[derive(Debug, Default)]
struct Tally {
    pushed: u64,
    pulled: u64,
    conflicts: u64,
    errors: u64,
    bytes: u64,
}

struct Inner {
    config: SyncConfig,
    queue: DurableQueue,
    mirror: MirrorStore,
    state: SyncStateStore,
    remote: RemoteSyncClient,
    identity: Arc<dyn IdentityProvider>,
    connectivity: Arc<ConnectivityMonitor>,
    resolver: ConflictResolver,
    clock: Arc<dyn Clock>,
    events: EventBus,
    hub: StatsHub,

    /// Bumped by `clear_all_sync_state`; a cycle that started under an older
    /// generation skips its remaining local writes.
    generation: AtomicU64,
    is_syncing: AtomicBool,
    next_cycle_id: AtomicU64,
    in_flight: Mutex<Option<InFlight>>,
    timer: Mutex<Option<CancellationToken>>,
    reconnect_handler: Mutex<Option<HandlerId>>,
}

/// Clears the in-flight slot when the cycle task ends, including by panic.
struct CycleGuard {
    inner: Arc<Inner>,
    id: u64,
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        let mut slot = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|f| f.id == self.id) {
            *slot = None;
            self.inner.is_syncing.store(false, Ordering::SeqCst);
        }
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

impl Inner {
    fn emit(&self, event: SyncEvent) {
        // No subscribers is not an error
        let _ = self.events.emit(CoreEvent::Sync(event));
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn in_flight(&self) -> Option<CycleFuture> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|f| f.future.clone())
    }

    /// Join the running cycle, or start one for `user_id`.
    fn join_or_start(self: &Arc<Self>, trigger: CycleTrigger, user_id: String) -> Option<CycleFuture> {
        let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(running) = slot.as_ref() {
            return Some(running.future.clone());
        }
        self.launch(&mut slot, trigger, user_id)
    }

    /// Start a cycle unless one is running.
    fn try_start(self: &Arc<Self>, trigger: CycleTrigger, user_id: String) -> Result<CycleFuture> {
        let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(SyncError::SyncInProgress);
        }
        self.launch(&mut slot, trigger, user_id)
            .ok_or_else(|| SyncError::Config("sync requires a tokio runtime".into()))
    }

    /// Spawn the cycle task and publish it in `slot`. Both happen under the
    /// slot lock so the task's guard cannot run before the slot is filled.
    fn launch(
        self: &Arc<Self>,
        slot: &mut Option<InFlight>,
        trigger: CycleTrigger,
        user_id: String,
    ) -> Option<CycleFuture> {
        let Ok(runtime) = Handle::try_current() else {
            warn!(%trigger, "No tokio runtime; cycle not started");
            return None;
        };

        let id = self.next_cycle_id.fetch_add(1, Ordering::SeqCst);
        self.is_syncing.store(true, Ordering::SeqCst);

        let inner = Arc::clone(self);
        let task = runtime.spawn(async move {
            let guard = CycleGuard { inner, id };
            guard.inner.run_guarded(trigger, &user_id).await
        });

        let weak = Arc::downgrade(self);
        let future = async move {
            match task.await {
                Ok(stats) => stats,
                Err(e) => {
                    error!(error = %e, "Sync cycle task did not complete");
                    weak.upgrade().map(|inner| inner.hub.latest()).unwrap_or_default()
                }
            }
        }
        .boxed()
        .shared();

        *slot = Some(InFlight {
            id,
            future: future.clone(),
        });
        Some(future)
    }

    async fn run_guarded(&self, trigger: CycleTrigger, user_id: &str) -> SyncStats {
        match AssertUnwindSafe(self.run_cycle(trigger, user_id))
            .catch_unwind()
            .await
        {
            Ok(stats) => stats,
            Err(_) => {
                error!(%trigger, "Sync cycle panicked");
                let mut stats = self.hub.latest();
                stats.sync_errors += 1;
                stats.last_sync = Some(self.clock.unix_timestamp_millis());
                stats.pending_items = self.queue.len().await;
                self.hub.publish(stats.clone());
                self.emit(SyncEvent::CycleFailed {
                    trigger,
                    message: "sync cycle panicked".to_string(),
                });
                stats
            }
        }
    }

    #[instrument(skip_all, fields(trigger = %trigger, user = %redact_user_id(user_id)))]
    async fn run_cycle(&self, trigger: CycleTrigger, user_id: &str) -> SyncStats {
        let generation = self.generation.load(Ordering::SeqCst);
        let started = self.clock.unix_timestamp_millis();
        let timer = Instant::now();
        let mut tally = Tally::default();

        self.emit(SyncEvent::CycleStarted { trigger });
        info!("Sync cycle started");

        self.upload(user_id, generation, &mut tally).await;
        self.download(user_id, generation, started, &mut tally).await;

        let stats = SyncStats {
            last_sync: Some(self.clock.unix_timestamp_millis()),
            pending_items: self.queue.len().await,
            conflicts_resolved: tally.conflicts,
            sync_errors: tally.errors,
            data_transferred: tally.bytes,
        };

        if self.is_current(generation) {
            if let Err(e) = self.state.save_stats(&stats).await {
                warn!(error = %e, "Failed to persist sync stats");
            }
            self.hub.publish(stats.clone());
        } else {
            info!("Sync state was cleared during the cycle; results discarded");
        }

        let duration_ms = u64::try_from(timer.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.emit(SyncEvent::CycleCompleted {
            trigger,
            pushed: tally.pushed,
            pulled: tally.pulled,
            conflicts_resolved: tally.conflicts,
            errors: tally.errors,
            bytes_transferred: tally.bytes,
            duration_ms,
        });
        info!(
            pushed = tally.pushed,
            pulled = tally.pulled,
            conflicts = tally.conflicts,
            errors = tally.errors,
            pending = stats.pending_items,
            duration_ms,
            "Sync cycle completed"
        );

        stats
    }

    async fn upload(&self, user_id: &str, generation: u64, tally: &mut Tally) {
        let pending = self.queue.pending_items().await;
        if pending.is_empty() {
            return;
        }

        let outcome = self.remote.push(user_id, &pending).await;
        tally.errors += outcome.failures.len() as u64;
        if !self.is_current(generation) {
            return;
        }

        for record in &outcome.accepted {
            tally.pushed += 1;
            tally.bytes += record.payload_size();
            if let Err(e) = self.fold_pushed(record).await {
                warn!(record_id = %record.id, error = %e, "Failed to update mirror after push");
                tally.errors += 1;
            }
        }
        self.queue.acknowledge(&outcome.accepted).await;
    }

    /// Merge a record the remote just accepted into the mirror.
    async fn fold_pushed(&self, pushed: &SyncRecord) -> Result<()> {
        let pushed = SyncRecord {
            synced: true,
            ..pushed.clone()
        };

        let entry = match self.mirror.get(&pushed.category, &pushed.id).await? {
            None => MirrorEntry::new(pushed),
            Some(mut existing) => {
                let resolution = self.resolver.resolve(&existing.record, &pushed);
                existing.record = SyncRecord {
                    synced: true,
                    ..resolution.record
                };
                existing
            }
        };
        self.mirror.put(&entry).await
    }

    async fn download(&self, user_id: &str, generation: u64, started: i64, tally: &mut Tally) {
        let watermark = match self.state.watermark().await {
            Ok(Some(watermark)) => watermark,
            Ok(None) => started.saturating_sub(millis(self.config.initial_lookback)),
            Err(e) => {
                warn!(error = %e, "Failed to read pull watermark; using initial lookback");
                started.saturating_sub(millis(self.config.initial_lookback))
            }
        };
        let since = watermark.saturating_sub(millis(self.config.pull_overlap));

        let records = match self.remote.pull(user_id, since, &self.config.platform).await {
            Ok(records) => records,
            Err(e) => {
                warn!(since, error = %e, "Pull failed");
                tally.errors += 1;
                return;
            }
        };

        for remote in records {
            if !self.is_current(generation) {
                return;
            }
            let record_id = remote.id.clone();
            if let Err(e) = self.apply_remote(remote, tally).await {
                warn!(record_id = %record_id, error = %e, "Failed to apply remote record");
                tally.errors += 1;
            }
        }

        if !self.is_current(generation) {
            return;
        }
        if let Err(e) = self.state.save_watermark(started).await {
            warn!(error = %e, "Failed to persist pull watermark");
            tally.errors += 1;
        }
    }

    async fn apply_remote(&self, remote: SyncRecord, tally: &mut Tally) -> Result<()> {
        let remote = SyncRecord {
            synced: true,
            ..remote
        };
        let size = remote.payload_size();

        let applied = match self.mirror.get(&remote.category, &remote.id).await? {
            None => {
                let entry = MirrorEntry::from_remote(remote);
                self.mirror.put(&entry).await?;
                entry.record
            }
            Some(entry) if entry.has_seen(&remote) => {
                debug!(record_id = %remote.id, version = remote.version, "Remote version already applied");
                return Ok(());
            }
            Some(mut entry) => {
                let resolution = self.resolver.resolve(&entry.record, &remote);
                entry.record = SyncRecord {
                    synced: true,
                    ..resolution.record
                };
                entry.mark_seen(&remote);
                self.mirror.put(&entry).await?;

                tally.conflicts += 1;
                self.emit(SyncEvent::ConflictResolved {
                    record_id: entry.record.id.clone(),
                    category: entry.record.category.to_string(),
                    strategy: resolution.strategy.to_string(),
                    fell_back: resolution.fell_back,
                });
                entry.record
            }
        };

        tally.pulled += 1;
        tally.bytes += size;
        self.emit(SyncEvent::RecordUpdated {
            record_id: applied.id,
            category: applied.category.to_string(),
            version: applied.version,
        });
        Ok(())
    }

    /// Cycle for internal triggers: joins a running cycle, otherwise skips
    /// when offline or signed out.
    async fn sync_now(self: &Arc<Self>, trigger: CycleTrigger) -> SyncStats {
        if let Some(running) = self.in_flight() {
            return running.await;
        }
        if !self.connectivity.is_online() {
            debug!(%trigger, "Offline; skipping sync");
            return self.hub.latest();
        }
        let Some(user_id) = self.identity.current_user_id().await else {
            debug!(%trigger, "No signed-in user; skipping sync");
            return self.hub.latest();
        };

        match self.join_or_start(trigger, user_id) {
            Some(cycle) => cycle.await,
            None => self.hub.latest(),
        }
    }
}

/// Owns the sync components and their background tasks.
///
/// Dropping the orchestrator stops the timer and the connectivity watcher; a
/// cycle already running finishes on its own.
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

impl SyncOrchestrator {
    pub fn new(config: SyncConfig, deps: SyncDependencies) -> Self {
        let events = deps
            .events
            .unwrap_or_else(|| EventBus::new(config.event_buffer));
        let queue = DurableQueue::new(
            Arc::clone(&deps.settings),
            config.platform.clone(),
            Arc::clone(&deps.clock),
        );

        Self {
            inner: Arc::new(Inner {
                queue,
                mirror: MirrorStore::new(Arc::clone(&deps.settings)),
                state: SyncStateStore::new(deps.settings),
                remote: RemoteSyncClient::new(deps.remote, config.remote_timeout),
                identity: deps.identity,
                connectivity: deps.connectivity,
                resolver: deps.resolver,
                clock: deps.clock,
                events,
                hub: StatsHub::new(),
                generation: AtomicU64::new(0),
                is_syncing: AtomicBool::new(false),
                next_cycle_id: AtomicU64::new(0),
                in_flight: Mutex::new(None),
                timer: Mutex::new(None),
                reconnect_handler: Mutex::new(None),
                config,
            }),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Restore persisted state, start connectivity tracking and the
    /// periodic timer. Must be called from within a tokio runtime.
    #[instrument(skip(self), fields(platform = %self.inner.config.platform))]
    pub async fn start(&self) {
        let inner = &self.inner;
        inner.queue.load_from_durable_state().await;
        if let Some(stats) = inner.state.load_stats().await {
            inner.hub.restore(stats);
        }

        // The first network check may already flip offline -> online
        self.install_reconnect_handler();
        inner.connectivity.start().await;

        if inner.config.periodic_sync {
            self.start_timer();
        }

        info!(
            online = inner.connectivity.is_online(),
            pending = inner.queue.len().await,
            "Sync orchestrator started"
        );
    }

    fn install_reconnect_handler(&self) {
        let Ok(runtime) = Handle::try_current() else {
            warn!("No tokio runtime; reconnection will not trigger sync");
            return;
        };

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let handler = self.inner.connectivity.on_change(Arc::new(move |online| {
            if !online {
                return;
            }
            if let Some(inner) = weak.upgrade() {
                runtime.spawn(async move {
                    inner.sync_now(CycleTrigger::Reconnected).await;
                });
            }
        }));

        let previous = self
            .inner
            .reconnect_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handler);
        if let Some(previous) = previous {
            self.inner.connectivity.remove_handler(previous);
        }
    }

    fn start_timer(&self) {
        let token = CancellationToken::new();
        if let Some(previous) = self
            .inner
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(token.clone())
        {
            previous.cancel();
        }

        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.config.sync_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        inner.sync_now(CycleTrigger::Periodic).await;
                    }
                }
            }
            debug!("Periodic sync timer stopped");
        });
    }

    /// Cancel the timer, the reconnect trigger and connectivity tracking.
    pub fn stop(&self) {
        if let Some(token) = self
            .inner
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            token.cancel();
        }
        if let Some(handler) = self
            .inner
            .reconnect_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            self.inner.connectivity.remove_handler(handler);
        }
        self.inner.connectivity.stop();
    }

    /// Record a local write. Safe to call while a cycle is running; the
    /// write is picked up by the next cycle.
    pub async fn enqueue(&self, category: Category, payload: Value, id: Option<String>) -> SyncRecord {
        self.inner.queue.enqueue(category, payload, id).await
    }

    pub async fn pending_items(&self) -> Vec<SyncRecord> {
        self.inner.queue.pending_items().await
    }

    /// Drop pending records by id; unknown ids are ignored.
    pub async fn mark_synced(&self, ids: &[String]) {
        self.inner.queue.mark_synced(ids).await;
    }

    /// Run a cycle now and return its stats.
    ///
    /// # Errors
    ///
    /// [`SyncError::SyncInProgress`] while another cycle runs,
    /// [`SyncError::Offline`] when offline and
    /// [`SyncError::NotAuthenticated`] without a signed-in user.
    #[instrument(skip(self))]
    pub async fn force_sync(&self) -> Result<SyncStats> {
        let inner = &self.inner;
        if inner.in_flight().is_some() {
            return Err(SyncError::SyncInProgress);
        }
        if !inner.connectivity.is_online() {
            return Err(SyncError::Offline);
        }
        let Some(user_id) = inner.identity.current_user_id().await else {
            return Err(SyncError::NotAuthenticated);
        };

        let cycle = inner.try_start(CycleTrigger::Forced, user_id)?;
        Ok(cycle.await)
    }

    /// Run or join a cycle. Offline or signed out, returns the latest stats
    /// without touching the network.
    pub async fn sync_now(&self) -> SyncStats {
        self.inner.sync_now(CycleTrigger::Manual).await
    }

    pub async fn get_status(&self) -> SyncStatus {
        SyncStatus {
            is_online: self.inner.connectivity.is_online(),
            is_syncing: self.inner.is_syncing.load(Ordering::SeqCst),
            pending_items: self.inner.queue.len().await,
        }
    }

    pub fn latest_stats(&self) -> SyncStats {
        self.inner.hub.latest()
    }

    pub fn subscribe(&self, listener: StatsListener) -> ListenerId {
        self.inner.hub.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.inner.hub.unsubscribe(id)
    }

    pub fn subscribe_events(&self) -> Receiver<CoreEvent> {
        self.inner.events.subscribe()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.inner.events
    }

    /// Current local copy of an entity, if any
    pub async fn get_local_data(&self, category: &Category, id: &str) -> Result<Option<SyncRecord>> {
        self.inner.mirror.record(category, id).await
    }

    /// Wipe queue, stats, watermark and mirror (logout).
    ///
    /// A cycle still running finishes its network calls but writes nothing
    /// locally and publishes no stats.
    #[instrument(skip(self))]
    pub async fn clear_all_sync_state(&self) -> Result<()> {
        let inner = &self.inner;
        inner.generation.fetch_add(1, Ordering::SeqCst);
        inner.queue.clear().await;
        inner.state.clear_all().await?;
        inner.hub.reset();
        info!("Cleared all sync state");
        Ok(())
    }
}

impl Drop for SyncOrchestrator {
    fn drop(&mut self) {
        self.stop();
    }
}
