use bridge_traits::BridgeError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("A sync cycle is already in progress")]
    SyncInProgress,

    #[error("Device is offline")]
    Offline,

    #[error("No authenticated user")]
    NotAuthenticated,

    #[error("Remote store error: {0}")]
    Remote(String),

    #[error("Remote call timed out after {0} seconds")]
    Timeout(u64),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Conflict resolution failed for {category}: {message}")]
    Resolution { category: String, message: String },

    #[error("Invalid category: {0}")]
    InvalidCategory(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<BridgeError> for SyncError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::NotAvailable(msg) | BridgeError::OperationFailed(msg) => {
                SyncError::Remote(msg)
            }
            other => SyncError::Persistence(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
