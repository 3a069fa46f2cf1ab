//! # Call Orchestration Module
//!
//! This module is the coordination layer of the engine: it turns persisted
//! campaign and transfer state into live gateway traffic, and turns gateway
//! events back into persisted state. Everything here is built around two
//! async workers — a per-campaign dialer runner and a per-transfer cascade
//! task — supervised by the [`core::OrchestratorEngine`].
//!
//! ## Module Organization
//!
//! - **[`core`]**: The `OrchestratorEngine` itself: lifecycle commands, task
//!   supervision, event ingestion, transfer triggers.
//! - **[`dialer`]**: The campaign runner loop. Claims leads FIFO under the
//!   concurrency bound, places calls, detects queue exhaustion.
//! - **[`cascade`]**: The warm-transfer cascade task. Dials agents in
//!   priority order with a ring deadline, announces, bridges, seals the
//!   audit trail.
//! - **[`recovery`]**: Startup reconciliation and the periodic orphan sweep.
//!
//! ## Concurrency Model
//!
//! Each running campaign owns exactly one runner task, woken by a
//! [`tokio::sync::Notify`] kick whenever a lead finishes or a command lands,
//! with a timer tick as fallback. Each live cascade owns exactly one task,
//! which is the single writer for that cascade's rows; cancellation reaches
//! it through a watch channel so a mid-ring cancel is observed within one
//! poll interval. All cross-task bookkeeping lives in the store, guarded by
//! compare-and-set updates, so a lost race is always detected rather than
//! silently absorbed.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dialcast_call_engine::config::OrchestratorConfig;
//! use dialcast_call_engine::orchestrator::OrchestratorEngine;
//! use dialcast_call_engine::store::CallStore;
//! use dialcast_call_engine::types::{NewCampaign, NewLead, AssistantId};
//! use dialcast_gateway_core::MockVoiceGateway;
//!
//! # async fn example() -> dialcast_call_engine::Result<()> {
//! let store = CallStore::in_memory().await?;
//! let gateway = Arc::new(MockVoiceGateway::new());
//! let engine = OrchestratorEngine::new(OrchestratorConfig::default(), store, gateway);
//!
//! let campaign = engine
//!     .create_campaign(NewCampaign {
//!         workspace_id: "ws-1".into(),
//!         name: "Launch follow-up".into(),
//!         assistant_id: AssistantId::from("asst-1"),
//!         caller_number: "+15550100000".into(),
//!         scheduled_at: None,
//!     })
//!     .await?;
//! engine
//!     .add_leads(&campaign.id, vec![NewLead::new("+15550123456")])
//!     .await?;
//! engine.start_campaign(&campaign.id).await?;
//! # Ok(())
//! # }
//! ```

pub mod cascade;
pub mod core;
pub mod dialer;
pub mod recovery;

pub use self::core::{EngineStats, OrchestratorEngine};
