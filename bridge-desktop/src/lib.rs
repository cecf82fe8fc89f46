//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux) and command-line hosts.
//!
//! ## Overview
//!
//! - `SettingsStore` using a SQLite-backed key-value table (`sqlx`)
//! - `NetworkMonitor` using a TCP reachability probe with a polling change stream
//! - `HttpClient` using `reqwest` with retry and exponential backoff
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{DesktopNetworkMonitor, ReqwestHttpClient, SqliteSettingsStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let settings = SqliteSettingsStore::new(SqliteSettingsStore::default_path()).await?;
//!     let network = DesktopNetworkMonitor::new();
//!     let http = ReqwestHttpClient::new()?;
//!     // Hand these to CoreConfig::builder()
//! }
//! ```

mod http;
mod network;
mod settings;

pub use http::ReqwestHttpClient;
pub use network::{DesktopNetworkMonitor, ProbeConfig};
pub use settings::SqliteSettingsStore;
