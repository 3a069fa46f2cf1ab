//! # Gateway-Core
//!
//! Voice provider boundary for dialcast.
//!
//! This crate provides:
//! - The [`VoiceGateway`] trait: call placement, status observation,
//!   cancellation, bridging, and announcement playback against an external
//!   voice-telephony provider
//! - Wire types shared with the orchestration engine ([`ExternalCallId`],
//!   [`CallStatusUpdate`], [`CallState`], [`CallOutcome`])
//! - [`MockVoiceGateway`]: a scriptable in-memory provider used by tests and
//!   the demo server
//! - `HttpVoiceGateway`: a JSON-over-HTTP provider client (behind the `http`
//!   feature)
//!
//! ## Architecture
//!
//! The orchestration engine never talks to a provider directly; everything
//! goes through `Arc<dyn VoiceGateway>`. Provider status has no delivery
//! guarantee, so consumers de-duplicate updates by call id plus
//! [`CallState::rank`] before applying them.

pub mod error;
pub mod gateway;
pub mod mock;
pub mod types;

#[cfg(feature = "http")]
pub mod http;

pub use error::{GatewayError, GatewayResult};
pub use gateway::VoiceGateway;
pub use mock::{CallScript, MockVoiceGateway};
pub use types::{CallOutcome, CallState, CallStatusUpdate, ExternalCallId, PlaceCallRequest};

#[cfg(feature = "http")]
pub use http::HttpVoiceGateway;
