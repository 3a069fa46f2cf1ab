//! The provider contract.

use async_trait::async_trait;

use crate::error::GatewayResult;
use crate::types::{CallStatusUpdate, ExternalCallId, PlaceCallRequest};

/// Boundary trait for an external voice-telephony provider.
///
/// Implementations must be cheap to share (`Arc<dyn VoiceGateway>`) and safe
/// to call from many tasks at once. All methods are best-effort requests to a
/// remote system; callers own retry and timeout policy.
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    /// Originate one call leg. Returns the provider's id for it.
    async fn place_call(&self, request: PlaceCallRequest) -> GatewayResult<ExternalCallId>;

    /// Current provider-side view of a leg. Poll results and callback
    /// payloads share this shape; neither is delivered at-most-once.
    async fn call_status(&self, call_id: &ExternalCallId) -> GatewayResult<CallStatusUpdate>;

    /// Tear down a ringing or active leg.
    async fn cancel_call(&self, call_id: &ExternalCallId) -> GatewayResult<()>;

    /// Join two established legs into one conversation.
    async fn bridge_calls(
        &self,
        call_id: &ExternalCallId,
        peer_call_id: &ExternalCallId,
    ) -> GatewayResult<()>;

    /// Play a private prompt to one leg, audible only there. Used to brief an
    /// agent before their leg is bridged to the customer.
    async fn play_announcement(
        &self,
        call_id: &ExternalCallId,
        message: &str,
    ) -> GatewayResult<()>;
}
