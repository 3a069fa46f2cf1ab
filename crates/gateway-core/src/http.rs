//! JSON-over-HTTP provider client, enabled with the `http` feature.
//!
//! Speaks the minimal REST dialect most hosted voice APIs share: create a
//! call, read it back, delete it to hang up, plus bridge/announce verbs.
//! Endpoint paths are relative to the configured base URL.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use async_trait::async_trait;

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::VoiceGateway;
use crate::types::{CallStatusUpdate, ExternalCallId, PlaceCallRequest};

#[derive(Debug, Deserialize)]
struct CreateCallResponse {
    call_id: ExternalCallId,
}

#[derive(Debug, Serialize)]
struct BridgeRequest<'a> {
    peer_call_id: &'a ExternalCallId,
}

#[derive(Debug, Serialize)]
struct AnnounceRequest<'a> {
    message: &'a str,
}

/// [`VoiceGateway`] backed by a provider's REST API.
pub struct HttpVoiceGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpVoiceGateway {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(
        &self,
        response: reqwest::Response,
        context: &str,
    ) -> GatewayResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let detail = if body.is_empty() {
            format!("{} returned {}", context, status)
        } else {
            format!("{} returned {}: {}", context, status, body)
        };
        Err(match status {
            StatusCode::NOT_FOUND => GatewayError::call_not_found(detail),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                GatewayError::invalid_request(detail)
            }
            status if status.is_client_error() => GatewayError::placement(detail),
            _ => GatewayError::provider(detail),
        })
    }
}

#[async_trait]
impl VoiceGateway for HttpVoiceGateway {
    async fn place_call(&self, request: PlaceCallRequest) -> GatewayResult<ExternalCallId> {
        debug!("📞 placing call to {} via provider", request.to_number);
        let response = self
            .client
            .post(self.url("/calls"))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| GatewayError::transport(e.to_string()))?;
        let response = self.check(response, "place_call").await?;
        let created: CreateCallResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::provider(format!("malformed create response: {}", e)))?;
        Ok(created.call_id)
    }

    async fn call_status(&self, call_id: &ExternalCallId) -> GatewayResult<CallStatusUpdate> {
        let response = self
            .client
            .get(self.url(&format!("/calls/{}", call_id)))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| GatewayError::transport(e.to_string()))?;
        let response = self.check(response, "call_status").await?;
        response
            .json()
            .await
            .map_err(|e| GatewayError::provider(format!("malformed status response: {}", e)))
    }

    async fn cancel_call(&self, call_id: &ExternalCallId) -> GatewayResult<()> {
        let response = self
            .client
            .delete(self.url(&format!("/calls/{}", call_id)))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| GatewayError::transport(e.to_string()))?;
        self.check(response, "cancel_call").await?;
        Ok(())
    }

    async fn bridge_calls(
        &self,
        call_id: &ExternalCallId,
        peer_call_id: &ExternalCallId,
    ) -> GatewayResult<()> {
        let response = self
            .client
            .post(self.url(&format!("/calls/{}/bridge", call_id)))
            .bearer_auth(&self.api_key)
            .json(&BridgeRequest { peer_call_id })
            .send()
            .await
            .map_err(|e| GatewayError::transport(e.to_string()))?;
        self.check(response, "bridge_calls").await?;
        Ok(())
    }

    async fn play_announcement(
        &self,
        call_id: &ExternalCallId,
        message: &str,
    ) -> GatewayResult<()> {
        let response = self
            .client
            .post(self.url(&format!("/calls/{}/announce", call_id)))
            .bearer_auth(&self.api_key)
            .json(&AnnounceRequest { message })
            .send()
            .await
            .map_err(|e| GatewayError::transport(e.to_string()))?;
        self.check(response, "play_announcement").await?;
        Ok(())
    }
}
