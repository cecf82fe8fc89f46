//! # Supabase Remote Store
//!
//! Implements `core_sync::RemoteStore` over the PostgREST API of a Supabase
//! project.
//!
//! ## Overview
//!
//! All devices of a user write into one table (`sync_data` by default):
//! - Upserts keyed on `(id, platform, version)`, so every pushed version is kept
//! - `synced_at` stamped at push time; pulls filter and order on it
//! - ISO-8601 timestamps on the wire, milliseconds in the engine
//! - `apikey` plus bearer authentication (session token or anon key)

pub mod connector;
pub mod error;
pub mod types;

pub use connector::SupabaseRemoteStore;
pub use error::{Result, SupabaseError};
pub use types::SyncRow;
