//! # Connectivity Monitor
//!
//! Boolean online state with change notification. Handlers run once per
//! transition; repeated reports of the same state are swallowed. A network
//! source that errors or reports an indeterminate status counts as offline.
//!
//! Transitions are serialized: handlers observe them in the order the state
//! changed. A handler must not call [`ConnectivityMonitor::set_online`]
//! itself; spawn a task instead.

use bridge_traits::{NetworkInfo, NetworkMonitor};
use core_runtime::events::{ConnectivityEvent, CoreEvent, EventBus};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

pub type ConnectivityHandler = Arc<dyn Fn(bool) + Send + Sync>;

/// State shared with the background watcher task
struct Shared {
    online: AtomicBool,
    events: Option<EventBus>,
    handlers: Mutex<Vec<(HandlerId, ConnectivityHandler)>>,
    /// Held across swap and notification
    transition: Mutex<()>,
}

impl Shared {
    fn set_online(&self, online: bool) -> bool {
        let _transition = self.transition.lock().unwrap_or_else(PoisonError::into_inner);
        if self.online.swap(online, Ordering::SeqCst) == online {
            return false;
        }

        info!(online, "Connectivity changed");

        if let Some(events) = &self.events {
            // No subscribers is not an error
            let _ = events.emit(CoreEvent::Connectivity(ConnectivityEvent::Changed { online }));
        }

        let handlers: Vec<(HandlerId, ConnectivityHandler)> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for (id, handler) in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(online))).is_err() {
                warn!(handler = id.0, "Connectivity handler panicked");
            }
        }
        true
    }
}

pub struct ConnectivityMonitor {
    shared: Arc<Shared>,
    source: Option<Arc<dyn NetworkMonitor>>,
    next_id: AtomicU64,
    watcher: Mutex<Option<CancellationToken>>,
}

impl ConnectivityMonitor {
    /// Monitor fed by a host network source. Starts offline until the first
    /// probe in [`start`](Self::start).
    pub fn new(source: Arc<dyn NetworkMonitor>) -> Self {
        Self::build(Some(source), false, None)
    }

    /// Monitor without a source; state changes only through
    /// [`set_online`](Self::set_online) and [`report`](Self::report).
    pub fn manual(initially_online: bool) -> Self {
        Self::build(None, initially_online, None)
    }

    fn build(
        source: Option<Arc<dyn NetworkMonitor>>,
        online: bool,
        events: Option<EventBus>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                online: AtomicBool::new(online),
                events,
                handlers: Mutex::new(Vec::new()),
                transition: Mutex::new(()),
            }),
            source,
            next_id: AtomicU64::new(0),
            watcher: Mutex::new(None),
        }
    }

    /// Also publish transitions as [`ConnectivityEvent`]s.
    ///
    /// Call before registering handlers.
    pub fn with_event_bus(self, events: EventBus) -> Self {
        let online = self.is_online();
        Self::build(self.source.clone(), online, Some(events))
    }

    pub fn is_online(&self) -> bool {
        self.shared.online.load(Ordering::SeqCst)
    }

    pub fn on_change(&self, handler: ConnectivityHandler) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.shared
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, handler));
        id
    }

    pub fn remove_handler(&self, id: HandlerId) {
        self.shared
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(existing, _)| *existing != id);
    }

    /// Apply a new state. Returns whether it was a transition.
    pub fn set_online(&self, online: bool) -> bool {
        self.shared.set_online(online)
    }

    pub fn report(&self, info: &NetworkInfo) -> bool {
        self.set_online(info.is_online())
    }

    /// Probe the source once and follow its change stream in the background.
    ///
    /// Requires a tokio runtime when a source is configured. Calling it
    /// again restarts the watcher.
    pub async fn start(&self) {
        let Some(source) = self.source.clone() else {
            return;
        };

        match source.get_network_info().await {
            Ok(info) => {
                self.report(&info);
            }
            Err(e) => {
                warn!(error = %e, "Initial network probe failed; assuming offline");
                self.set_online(false);
            }
        }

        let mut stream = match source.subscribe_changes().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "Network change stream unavailable");
                return;
            }
        };

        let token = CancellationToken::new();
        if let Some(previous) = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(token.clone())
        {
            previous.cancel();
        }

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    next = stream.next() => match next {
                        Some(info) => {
                            shared.set_online(info.is_online());
                        }
                        None => {
                            debug!("Network change stream closed");
                            break;
                        }
                    },
                }
            }
        });
    }

    /// Stop following the source. The current state is kept.
    pub fn stop(&self) {
        if let Some(token) = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            token.cancel();
        }
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("online", &self.is_online())
            .field("has_source", &self.source.is_some())
            .finish()
    }
}
