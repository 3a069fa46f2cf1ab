//! Error types for the orchestration engine.
//!
//! Two of these variants are contract, not plumbing: `InvalidState` is the
//! synchronous answer to a lifecycle command that does not apply (the HTTP
//! layer maps it to 409), and `DuplicateEvent` marks an idempotency hit that
//! callers discard after logging. Everything else is recorded on the affected
//! row and the containing loop keeps going.

use thiserror::Error;

use dialcast_gateway_core::GatewayError;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors raised by the orchestration engine.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// A lifecycle command that does not apply to the entity's current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Missing or unusable configuration, such as transfers disabled for an
    /// assistant or out-of-range engine settings.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The voice provider failed a request.
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// A state transition that was already applied. Safe to discard.
    #[error("Duplicate event: {0}")]
    DuplicateEvent(String),

    /// A conservative repair of an orphaned in-progress row could not be
    /// recorded. The row stays as the dead process left it until the next
    /// sweep pass retries.
    #[error("Consistency repair: {0}")]
    ConsistencyRepair(String),

    /// Unknown campaign, lead, assistant, or transfer.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage failure.
    #[error("Database error: {0}")]
    Database(String),

    /// Anything that has no better home.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn duplicate_event<S: Into<String>>(msg: S) -> Self {
        Self::DuplicateEvent(msg.into())
    }

    pub fn consistency_repair<S: Into<String>>(msg: S) -> Self {
        Self::ConsistencyRepair(msg.into())
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn database<S: Into<String>>(msg: S) -> Self {
        Self::Database(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// True for the errors a caller may retry later without harm.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Gateway(_) | Self::Database(_) | Self::Internal(_) | Self::ConsistencyRepair(_)
        )
    }
}

impl From<sqlx::Error> for OrchestratorError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => Self::NotFound("row not found".to_string()),
            other => Self::Database(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for OrchestratorError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        Self::Database(format!("migration failed: {}", e))
    }
}

impl From<anyhow::Error> for OrchestratorError {
    fn from(e: anyhow::Error) -> Self {
        Self::Internal(e.to_string())
    }
}
