//! # Core Runtime
//!
//! Foundational pieces shared by the sync engine crates:
//! - Logging and tracing bootstrap ([`logging`])
//! - Capability configuration with fail-fast validation ([`config`])
//! - Typed event bus ([`events`])

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
