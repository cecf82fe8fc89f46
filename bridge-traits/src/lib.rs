//! # Host Bridge Traits
//!
//! Capability traits the sync core needs from its host platform.
//!
//! ## Overview
//!
//! The sync engine runs inside very different hosts (a phone app, a browser
//! extension, a web dashboard, desktop tools). Everything that differs between
//! them sits behind a trait in this crate, and each host injects concrete
//! adapters at its composition root.
//!
//! ## Traits
//!
//! ### Persistence
//! - [`SettingsStore`](storage::SettingsStore) - Durable key-value storage holding the
//!   pending queue, statistics, the sync watermark and the per-record local mirror
//!
//! ### Networking
//! - [`NetworkMonitor`](network::NetworkMonitor) - Reachability probing and change streams
//! - [`HttpClient`](http::HttpClient) - Async HTTP used by remote store providers
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source, swappable for deterministic tests
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Reference implementations
//!
//! | Implementation | Where |
//! |----------------|-------|
//! | [`MemorySettingsStore`](storage::MemorySettingsStore) | this crate |
//! | [`SystemClock`](time::SystemClock), [`ManualClock`](time::ManualClock) | this crate |
//! | SQLite settings, TCP reachability probe, reqwest client | `bridge-desktop` |
//!
//! ## Error Handling
//!
//! All bridge traits report failures as [`BridgeError`](error::BridgeError).
//! Adapters convert platform errors into it and keep the message actionable
//! (which key, which URL, which status).
//!
//! ## Thread Safety
//!
//! Every trait requires `Send + Sync` so handles can be shared across tokio
//! tasks behind `Arc<dyn Trait>`.

pub mod error;
pub mod http;
pub mod network;
pub mod storage;
pub mod time;

pub use error::BridgeError;

pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use network::{NetworkChangeStream, NetworkInfo, NetworkMonitor, NetworkStatus, NetworkType};
pub use storage::{MemorySettingsStore, SettingsStore};
pub use time::{Clock, ConsoleLogger, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
