//! # Dialcast Call Engine
//!
//! This crate provides call orchestration on top of an AI voice gateway. It
//! drives outbound campaign dialing and warm transfer cascades against a
//! persistent SQLite store, and exposes the operator surface over HTTP.
//!
//! ## Features
//!
//! - **Campaign Dialing**: FIFO lead queues with bounded concurrency, atomic
//!   progress counters, and a full start/pause/cancel/retry lifecycle
//! - **Warm Transfer Cascades**: priority-ordered agent dialing with ring
//!   timeouts, announcement-then-bridge on answer, and an append-only
//!   attempt audit trail
//! - **Event Ingestion**: provider callbacks and status polls feed one
//!   idempotent path; duplicates and regressions are discarded
//! - **Crash Recovery**: startup reconciliation plus a periodic orphan sweep
//!   repair any row a dead process left in flight
//! - **HTTP API**: axum operator surface for lifecycle commands, transfer
//!   settings, and the transfer audit log
//!
//! ## Architecture
//!
//! The engine is organized into several key modules:
//!
//! - [`orchestrator`]: engine facade, campaign dialer loops, cascade tasks,
//!   and recovery
//! - [`store`]: sqlx/SQLite persistence with guarded state transitions
//! - [`ingest`]: the idempotent call-status ingestion path
//! - [`events`]: broadcast channel of engine lifecycle events
//! - [`api`]: HTTP operator surface
//! - [`server`]: deployment wrapper owning the API and background loops
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dialcast_call_engine::prelude::*;
//! use dialcast_gateway_core::MockVoiceGateway;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Initialize storage and the gateway
//!     let store = CallStore::in_memory().await?;
//!     let gateway = Arc::new(MockVoiceGateway::new());
//!
//!     // Create the engine
//!     let engine = OrchestratorEngine::new(OrchestratorConfig::default(), store, gateway);
//!
//!     // Seed and start a campaign
//!     let campaign = engine
//!         .create_campaign(NewCampaign {
//!             workspace_id: "ws-1".to_string(),
//!             name: "Renewal outreach".to_string(),
//!             assistant_id: AssistantId::from("asst-renewals"),
//!             caller_number: "+15550100000".to_string(),
//!             scheduled_at: None,
//!         })
//!         .await?;
//!     engine
//!         .add_leads(&campaign.id, vec![NewLead::new("+15550100001")])
//!         .await?;
//!     engine.start_campaign(&campaign.id).await?;
//!
//!     Ok(())
//! }
//! ```

// Core modules
pub mod config;
pub mod error;
pub mod types;

// Orchestration functionality modules
pub mod events;
pub mod ingest;
pub mod orchestrator;

// External interfaces
pub mod api;
pub mod server;

// Database integration
pub mod store;

// Re-exports for convenience
pub use config::OrchestratorConfig;
pub use error::{OrchestratorError, Result};
pub use orchestrator::{EngineStats, OrchestratorEngine};
pub use server::{OrchestratorServer, OrchestratorServerBuilder};
pub use store::CallStore;

/// Prelude module for convenient imports
pub mod prelude {
    // Core types
    pub use crate::{
        CallStore, EngineStats, OrchestratorConfig, OrchestratorEngine, OrchestratorError,
        OrchestratorServer, OrchestratorServerBuilder, Result,
    };

    // Configuration types
    pub use crate::config::{
        ApiConfig, DatabaseConfig, DialerConfig, GatewayConfig, GeneralConfig, RecoveryConfig,
        TransferConfig,
    };

    // Domain types
    pub use crate::types::{
        AgentId, AssistantId, AttemptStatus, Campaign, CampaignId, CampaignLead, CampaignStatus,
        CascadeStatus, LeadCallStatus, LeadId, NewAgent, NewCampaign, NewLead, TransferAgent,
        TransferAttempt, TransferCascade, TransferId, TransferSettings, TransferSettingsUpdate,
    };

    // Events and ingestion
    pub use crate::events::{EngineEvent, EngineEvents};
    pub use crate::ingest::ApplyOutcome;

    // Gateway re-exports
    pub use dialcast_gateway_core::{
        CallOutcome, CallState, CallStatusUpdate, ExternalCallId, MockVoiceGateway, VoiceGateway,
    };

    // Common external types
    pub use chrono::{DateTime, Utc};
}
