//! # Event Bus
//!
//! Typed engine events over a `tokio::sync::broadcast` channel. The sync
//! orchestrator and the connectivity monitor publish here; hosts subscribe to
//! drive UI (sync spinners, "last synced" labels, offline banners).
//!
//! ```text
//! ┌──────────────────┐  emit   ┌───────────┐  subscribe  ┌────────────┐
//! │ Sync Orchestrator├────────>│           ├────────────>│ Host UI    │
//! └──────────────────┘         │ EventBus  │             └────────────┘
//! ┌──────────────────┐  emit   │           │  subscribe  ┌────────────┐
//! │ Connectivity     ├────────>│           ├────────────>│ Telemetry  │
//! └──────────────────┘         └───────────┘             └────────────┘
//! ```
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, CycleTrigger, EventBus, SyncEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(16);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(CoreEvent::Sync(SyncEvent::CycleStarted {
//!     trigger: CycleTrigger::Forced,
//! }))
//! .ok();
//!
//! assert!(matches!(rx.recv().await, Ok(CoreEvent::Sync(_))));
//! # }
//! ```
//!
//! Emitting with no subscribers is an `Err` the engine ignores (`.ok()`).
//! Slow subscribers see `RecvError::Lagged(n)` and may keep reading; `Closed`
//! means the engine shut down.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

/// Top-level engine event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Sync(SyncEvent),
    Connectivity(ConnectivityEvent),
}

impl CoreEvent {
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Connectivity(e) => e.description(),
        }
    }

    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Sync(SyncEvent::CycleFailed { .. }) => EventSeverity::Error,
            CoreEvent::Sync(SyncEvent::ConflictResolved { fell_back: true, .. }) => {
                EventSeverity::Warning
            }
            CoreEvent::Sync(SyncEvent::CycleCompleted { errors, .. }) if *errors > 0 => {
                EventSeverity::Warning
            }
            CoreEvent::Sync(SyncEvent::CycleCompleted { .. }) => EventSeverity::Info,
            CoreEvent::Connectivity(_) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

/// What started a sync cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleTrigger {
    /// The recurring timer fired
    Periodic,
    /// Connectivity went from offline to online
    Reconnected,
    /// Caller-requested `force_sync`
    Forced,
    /// Caller-requested `sync_now` (joins an in-flight cycle)
    Manual,
}

impl fmt::Display for CycleTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CycleTrigger::Periodic => "periodic",
            CycleTrigger::Reconnected => "reconnected",
            CycleTrigger::Forced => "forced",
            CycleTrigger::Manual => "manual",
        };
        f.write_str(s)
    }
}

/// Sync engine lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    CycleStarted {
        trigger: CycleTrigger,
    },
    CycleCompleted {
        trigger: CycleTrigger,
        pushed: u64,
        pulled: u64,
        conflicts_resolved: u64,
        errors: u64,
        bytes_transferred: u64,
        duration_ms: u64,
    },
    /// The cycle aborted before finishing (remote unreachable, identity lost)
    CycleFailed {
        trigger: CycleTrigger,
        message: String,
    },
    ConflictResolved {
        record_id: String,
        category: String,
        strategy: String,
        /// The category's strategy failed and the default was used instead
        fell_back: bool,
    },
    /// A record was applied to the local mirror from a remote pull
    RecordUpdated {
        record_id: String,
        category: String,
        version: u64,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::CycleStarted { .. } => "Sync cycle started",
            SyncEvent::CycleCompleted { .. } => "Sync cycle completed",
            SyncEvent::CycleFailed { .. } => "Sync cycle failed",
            SyncEvent::ConflictResolved { .. } => "Conflict resolved",
            SyncEvent::RecordUpdated { .. } => "Record updated from remote",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ConnectivityEvent {
    Changed { online: bool },
}

impl ConnectivityEvent {
    fn description(&self) -> &str {
        match self {
            ConnectivityEvent::Changed { online: true } => "Network connection restored",
            ConnectivityEvent::Changed { online: false } => "Network connection lost",
        }
    }
}

/// Broadcast hub for [`CoreEvent`]s. Cloning shares the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// `capacity` is the per-subscriber backlog before `Lagged` is reported.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Returns the number of subscribers that received the event, or an
    /// error when nobody is listening.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// Receiver with an optional predicate
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::default();
/// let _sync_only = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Sync(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |f| f(event))
    }

    /// Next event passing the filter
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking variant; `None` when nothing matching is queued.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.accepts(&event) => return Some(Ok(event)),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}
