//! Error types for provider interactions.

use thiserror::Error;

/// Result type for gateway operations
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Errors surfaced by a voice provider or the transport to it.
///
/// The engine treats every variant the same way at the call-flow level (the
/// affected lead or attempt fails, the containing loop continues); variants
/// exist so logs and operator surfaces can say what actually happened.
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    /// The provider refused to originate the leg.
    #[error("Call placement rejected: {0}")]
    Placement(String),

    /// The provider does not know the referenced call id.
    #[error("Unknown call: {0}")]
    CallNotFound(String),

    /// The provider accepted the request but reported an error.
    #[error("Provider error: {0}")]
    Provider(String),

    /// The provider could not be reached at all.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The request was malformed before it left the process.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl GatewayError {
    pub fn placement<S: Into<String>>(msg: S) -> Self {
        Self::Placement(msg.into())
    }

    pub fn call_not_found<S: Into<String>>(id: S) -> Self {
        Self::CallNotFound(id.into())
    }

    pub fn provider<S: Into<String>>(msg: S) -> Self {
        Self::Provider(msg.into())
    }

    pub fn transport<S: Into<String>>(msg: S) -> Self {
        Self::Transport(msg.into())
    }

    pub fn invalid_request<S: Into<String>>(msg: S) -> Self {
        Self::InvalidRequest(msg.into())
    }
}
