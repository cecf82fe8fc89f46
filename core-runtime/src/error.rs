use bridge_traits::BridgeError;
use thiserror::Error;

/// Failures while assembling the engine's runtime
#[derive(Error, Debug)]
pub enum Error {
    /// A configuration value is unusable
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    /// A default desktop bridge could not be created
    #[error("Failed to initialize default {capability}: {source}")]
    BridgeInit {
        capability: &'static str,
        #[source]
        source: BridgeError,
    },

    /// The global tracing subscriber could not be installed
    #[error("Logging setup failed: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, Error>;
