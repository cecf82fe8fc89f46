//! Error types for the Supabase provider

use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupabaseError {
    /// The API key or session token was rejected
    #[error("Authentication failed (status {status_code}): {message}")]
    AuthenticationFailed { status_code: u16, message: String },

    /// PostgREST returned a non-success status
    #[error("Supabase API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    /// Rate limit exceeded
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// Failed to parse API response
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    #[error("Invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    /// Endpoint configuration is unusable
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    BridgeError(#[from] BridgeError),
}

/// Result type for Supabase operations
pub type Result<T> = std::result::Result<T, SupabaseError>;

impl SupabaseError {
    /// Classify a non-2xx response
    pub fn from_status(status_code: u16, body: &str) -> Self {
        let message = body.chars().take(512).collect::<String>();
        match status_code {
            401 | 403 => SupabaseError::AuthenticationFailed {
                status_code,
                message,
            },
            429 => SupabaseError::RateLimited(message),
            _ => SupabaseError::ApiError {
                status_code,
                message,
            },
        }
    }
}

impl From<SupabaseError> for BridgeError {
    fn from(error: SupabaseError) -> Self {
        match error {
            SupabaseError::AuthenticationFailed {
                status_code,
                message,
            } => BridgeError::OperationFailed(format!(
                "Authentication failed (status {}): {}",
                status_code, message
            )),
            SupabaseError::ApiError {
                status_code,
                message,
            } => BridgeError::OperationFailed(format!(
                "API error (status {}): {}",
                status_code, message
            )),
            SupabaseError::RateLimited(msg) => {
                BridgeError::OperationFailed(format!("Rate limited: {}", msg))
            }
            SupabaseError::ParseError(msg) => {
                BridgeError::OperationFailed(format!("Parse error: {}", msg))
            }
            SupabaseError::InvalidTimestamp(value) => {
                BridgeError::OperationFailed(format!("Invalid timestamp: {}", value))
            }
            SupabaseError::InvalidConfig(msg) => BridgeError::NotAvailable(msg),
            SupabaseError::BridgeError(e) => e,
        }
    }
}

impl From<SupabaseError> for core_sync::SyncError {
    fn from(error: SupabaseError) -> Self {
        core_sync::SyncError::from(BridgeError::from(error))
    }
}
