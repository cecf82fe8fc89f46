//! Workspace facade crate.
//!
//! Host applications depend on `sync-workspace` and pick a feature instead of
//! wiring `core-service`, the bridges and the remote provider individually.
//! `desktop-shims` (default) pulls in the SQLite settings store, the desktop
//! network monitor and the reqwest client; `supabase` enables the PostgREST
//! remote store.

#[cfg(any(feature = "desktop-shims", feature = "supabase"))]
pub use core_service::*;
