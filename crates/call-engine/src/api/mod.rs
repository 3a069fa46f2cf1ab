//! 🌐 HTTP API for the orchestration engine.
//!
//! A thin axum layer over [`OrchestratorEngine`]: lifecycle commands for
//! campaigns, transfer settings management, the transfer audit log, the
//! in-call transfer trigger, and the provider status callback. Handlers do
//! no orchestration of their own; they translate HTTP to engine calls and
//! engine errors back to status codes.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::error::OrchestratorError;
use crate::ingest::ApplyOutcome;
use crate::orchestrator::OrchestratorEngine;
use crate::types::{
    AssistantId, Campaign, CampaignId, CampaignLead, TransferAttempt, TransferCascade,
    TransferId, TransferSettings, TransferSettingsUpdate,
};
use dialcast_gateway_core::{CallOutcome, CallState, CallStatusUpdate, ExternalCallId};

/// Build the operator router. CORS and request tracing are layered on per
/// the engine's API configuration.
pub fn router(engine: Arc<OrchestratorEngine>) -> Router {
    let enable_cors = engine.config().api.enable_cors;

    let mut router = Router::new()
        .route("/health", get(health))
        .route("/campaigns/:id", get(get_campaign))
        .route("/campaigns/:id/start", post(start_campaign))
        .route("/campaigns/:id/pause", post(pause_campaign))
        .route("/campaigns/:id/cancel", post(cancel_campaign))
        .route("/campaigns/:id/retry-failed", post(retry_failed))
        .route("/campaigns/:id/leads", get(campaign_leads))
        .route(
            "/assistants/:id/transfer-settings",
            put(put_transfer_settings).get(get_transfer_settings),
        )
        .route("/auto-transfer-logs", get(transfer_logs))
        .route("/auto-transfer-logs/:transfer_id", get(transfer_detail))
        .route("/transfers", post(start_transfer))
        .route("/calls/:external_call_id/events", post(ingest_call_event))
        .with_state(engine)
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        router = router.layer(CorsLayer::permissive());
    }
    router
}

// ============================================================================
// Error mapping
// ============================================================================

/// HTTP wrapper for engine errors. One variant of JSON body for everything:
/// `{"error": <kind>, "message": <detail>}`.
#[derive(Debug)]
pub struct ApiError(pub OrchestratorError);

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            OrchestratorError::InvalidState(_) => StatusCode::CONFLICT,
            OrchestratorError::Configuration(_) => StatusCode::UNPROCESSABLE_ENTITY,
            OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
            OrchestratorError::Gateway(_) => StatusCode::BAD_GATEWAY,
            OrchestratorError::DuplicateEvent(_) => StatusCode::CONFLICT,
            OrchestratorError::ConsistencyRepair(_)
            | OrchestratorError::Database(_)
            | OrchestratorError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match &self.0 {
            OrchestratorError::InvalidState(_) => "invalid_state",
            OrchestratorError::Configuration(_) => "configuration",
            OrchestratorError::Gateway(_) => "gateway",
            OrchestratorError::DuplicateEvent(_) => "duplicate_event",
            OrchestratorError::ConsistencyRepair(_) => "consistency_repair",
            OrchestratorError::NotFound(_) => "not_found",
            OrchestratorError::Database(_) => "database",
            OrchestratorError::Internal(_) => "internal",
        }
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(serde_json::json!({
            "error": self.kind(),
            "message": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// ============================================================================
// Bodies
// ============================================================================

#[derive(Debug, Serialize)]
struct CampaignStatusBody {
    campaign_id: CampaignId,
    status: String,
}

impl CampaignStatusBody {
    fn from_campaign(campaign: &Campaign) -> Self {
        Self {
            campaign_id: campaign.id.clone(),
            status: campaign.status.as_str().to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct RetryFailedBody {
    campaign_id: CampaignId,
    status: String,
    leads_reset: u64,
}

#[derive(Debug, Deserialize)]
struct TransferLogQuery {
    assistant_id: Option<String>,
    limit: Option<i64>,
}

#[derive(Debug, Serialize)]
struct TransferDetailBody {
    cascade: TransferCascade,
    attempts: Vec<TransferAttempt>,
}

#[derive(Debug, Deserialize)]
struct StartTransferBody {
    source_call_id: String,
    assistant_id: String,
}

/// Provider callback payload; the call id comes from the path.
#[derive(Debug, Deserialize)]
struct CallEventBody {
    state: CallState,
    #[serde(default)]
    outcome: Option<CallOutcome>,
    #[serde(default)]
    duration_seconds: Option<u32>,
    #[serde(default)]
    summary: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn get_campaign(
    State(engine): State<Arc<OrchestratorEngine>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Campaign>> {
    Ok(Json(engine.campaign(&CampaignId::from(id)).await?))
}

async fn start_campaign(
    State(engine): State<Arc<OrchestratorEngine>>,
    Path(id): Path<String>,
) -> ApiResult<Json<CampaignStatusBody>> {
    let campaign = engine.start_campaign(&CampaignId::from(id)).await?;
    Ok(Json(CampaignStatusBody::from_campaign(&campaign)))
}

async fn pause_campaign(
    State(engine): State<Arc<OrchestratorEngine>>,
    Path(id): Path<String>,
) -> ApiResult<Json<CampaignStatusBody>> {
    let campaign = engine.pause_campaign(&CampaignId::from(id)).await?;
    Ok(Json(CampaignStatusBody::from_campaign(&campaign)))
}

async fn cancel_campaign(
    State(engine): State<Arc<OrchestratorEngine>>,
    Path(id): Path<String>,
) -> ApiResult<Json<CampaignStatusBody>> {
    let campaign = engine.cancel_campaign(&CampaignId::from(id)).await?;
    Ok(Json(CampaignStatusBody::from_campaign(&campaign)))
}

async fn retry_failed(
    State(engine): State<Arc<OrchestratorEngine>>,
    Path(id): Path<String>,
) -> ApiResult<Json<RetryFailedBody>> {
    let (campaign, leads_reset) = engine.retry_failed(&CampaignId::from(id)).await?;
    Ok(Json(RetryFailedBody {
        campaign_id: campaign.id.clone(),
        status: campaign.status.as_str().to_string(),
        leads_reset,
    }))
}

async fn campaign_leads(
    State(engine): State<Arc<OrchestratorEngine>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<CampaignLead>>> {
    Ok(Json(engine.campaign_leads(&CampaignId::from(id)).await?))
}

async fn get_transfer_settings(
    State(engine): State<Arc<OrchestratorEngine>>,
    Path(id): Path<String>,
) -> ApiResult<Json<TransferSettings>> {
    Ok(Json(engine.transfer_settings(&AssistantId::from(id)).await?))
}

async fn put_transfer_settings(
    State(engine): State<Arc<OrchestratorEngine>>,
    Path(id): Path<String>,
    Json(update): Json<TransferSettingsUpdate>,
) -> ApiResult<Json<TransferSettings>> {
    let stored = engine
        .update_transfer_settings(&AssistantId::from(id), update)
        .await?;
    Ok(Json(stored))
}

async fn transfer_logs(
    State(engine): State<Arc<OrchestratorEngine>>,
    Query(query): Query<TransferLogQuery>,
) -> ApiResult<Json<Vec<TransferCascade>>> {
    let assistant_id = query.assistant_id.map(AssistantId::from);
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    Ok(Json(engine.transfer_log(assistant_id.as_ref(), limit).await?))
}

async fn transfer_detail(
    State(engine): State<Arc<OrchestratorEngine>>,
    Path(transfer_id): Path<String>,
) -> ApiResult<Json<TransferDetailBody>> {
    let (cascade, attempts) = engine
        .transfer_detail(&TransferId::from(transfer_id))
        .await?;
    Ok(Json(TransferDetailBody { cascade, attempts }))
}

async fn start_transfer(
    State(engine): State<Arc<OrchestratorEngine>>,
    Json(body): Json<StartTransferBody>,
) -> ApiResult<(StatusCode, Json<TransferCascade>)> {
    let cascade = engine
        .start_transfer(
            &AssistantId::from(body.assistant_id),
            &ExternalCallId::from(body.source_call_id),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(cascade)))
}

async fn ingest_call_event(
    State(engine): State<Arc<OrchestratorEngine>>,
    Path(external_call_id): Path<String>,
    Json(body): Json<CallEventBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let update = CallStatusUpdate {
        call_id: ExternalCallId::from(external_call_id),
        state: body.state,
        outcome: body.outcome,
        duration_seconds: body.duration_seconds,
        summary: body.summary,
    };
    let outcome = engine.ingest_update(update).await?;
    let result = match outcome {
        ApplyOutcome::Applied => "applied",
        ApplyOutcome::Duplicate => "duplicate",
        ApplyOutcome::Unmatched => "unmatched",
    };
    Ok(Json(serde_json::json!({ "result": result })))
}
