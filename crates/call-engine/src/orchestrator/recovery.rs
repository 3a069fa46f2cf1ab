//! Crash reconciliation and the periodic orphan sweep.
//!
//! Durable rows are the source of truth; worker tasks are disposable. After
//! a restart every `calling` lead and `dialing` cascade row describes work
//! whose task no longer exists, so startup asks the gateway what actually
//! happened and repairs the rows it cannot account for. The same logic runs
//! periodically to catch calls whose terminal callback never arrived.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::error::OrchestratorError;
use crate::events::EngineEvent;
use crate::ingest::ApplyOutcome;
use crate::orchestrator::core::OrchestratorEngine;
use crate::types::{AttemptStatus, CampaignLead, CascadeStatus, LeadDisposition, TransferCascade};
use crate::Result;
use dialcast_gateway_core::GatewayError;

/// One-shot reconciliation at process start. Every in-progress row is an
/// orphan here because no worker tasks survive a restart.
pub(crate) async fn run_startup(engine: &Arc<OrchestratorEngine>) -> Result<()> {
    let leads = engine.store().calling_leads().await?;
    let lead_count = leads.len();

    let mut repairs = 0usize;
    for outcome in join_all(
        leads
            .into_iter()
            .map(|lead| reconcile_lead(engine, lead, true)),
    )
    .await
    {
        if outcome? {
            repairs += 1;
        }
    }

    let attempts_sealed = seal_orphan_attempts(engine).await?;
    let cascades_closed = close_cascades(
        engine,
        engine.store().dialing_cascades().await?,
        "interrupted by restart",
    )
    .await;

    info!(
        "🔄 Startup reconciliation: {} in-flight leads checked ({} repaired), {} attempts sealed, {} cascades closed",
        lead_count, repairs, attempts_sealed, cascades_closed
    );
    Ok(())
}

/// One pass of the periodic sweep. Returns how many rows were repaired.
pub(crate) async fn sweep(engine: &Arc<OrchestratorEngine>) -> Result<usize> {
    let mut repairs = 0usize;

    for lead in engine.store().calling_leads().await? {
        if !lead_past_grace(engine, &lead) {
            continue;
        }
        match reconcile_lead(engine, lead, false).await {
            Ok(true) => repairs += 1,
            Ok(false) => {}
            // Retried on the next sweep pass.
            Err(e) => warn!("⚠️ {}", e),
        }
    }

    let orphaned: Vec<TransferCascade> = engine
        .store()
        .dialing_cascades()
        .await?
        .into_iter()
        .filter(|cascade| !engine.cascade_task_is_live(&cascade.transfer_id))
        .collect();
    if !orphaned.is_empty() {
        repairs += seal_orphan_attempts(engine).await?;
        repairs += close_cascades(engine, orphaned, "orphaned by task loss").await;
    }

    if repairs > 0 {
        info!("🔄 Orphan sweep repaired {} rows", repairs);
    }
    Ok(repairs)
}

fn lead_past_grace(engine: &Arc<OrchestratorEngine>, lead: &CampaignLead) -> bool {
    let grace = chrono::Duration::seconds(engine.config().recovery.orphan_grace_seconds as i64);
    let basis = lead.called_at.unwrap_or(lead.created_at);
    Utc::now() - basis >= grace
}

/// Ask the gateway about one `calling` lead and repair the row when the call
/// cannot be accounted for. `startup` forgoes the grace window: with no task
/// alive there is nothing to wait for.
async fn reconcile_lead(
    engine: &Arc<OrchestratorEngine>,
    lead: CampaignLead,
    startup: bool,
) -> Result<bool> {
    let Some(call_id) = lead.external_call_id.clone() else {
        // Claimed but the process died before the call was placed.
        return seal_lost_lead(engine, &lead, "interrupted before call placement").await;
    };

    match engine.gateway().call_status(&call_id).await {
        Ok(update) if update.state.is_terminal() => Ok(matches!(
            engine.ingest_update(update).await,
            Ok(ApplyOutcome::Applied)
        )),
        Ok(_) => {
            // Still live at the gateway; the status poller will finish it.
            debug!("Lead {} call {} is still live, leaving it", lead.id, call_id);
            Ok(false)
        }
        Err(GatewayError::CallNotFound(_)) => {
            seal_lost_lead(engine, &lead, "call record lost by gateway").await
        }
        Err(e) => {
            if startup {
                warn!("⚠️ No status for lead {} call {}: {}", lead.id, call_id, e);
                seal_lost_lead(engine, &lead, "gateway unreachable during recovery").await
            } else {
                debug!("Status check for lead {} failed, retrying next sweep: {}", lead.id, e);
                Ok(false)
            }
        }
    }
}

/// Conservatively mark a lost lead failed. A repair the store refuses to
/// record comes back as `ConsistencyRepair`; the row stays inconsistent
/// until a later pass lands it.
async fn seal_lost_lead(
    engine: &Arc<OrchestratorEngine>,
    lead: &CampaignLead,
    summary: &str,
) -> Result<bool> {
    let disposition = LeadDisposition::failed(summary);
    match engine.store().seal_lead(&lead.id, &disposition).await {
        Ok(campaign_id) => {
            warn!("⚠️ Repaired orphaned lead {}: {}", lead.id, summary);
            engine.events().publish(EngineEvent::LeadFinished {
                campaign_id,
                lead_id: lead.id.clone(),
                status: disposition.terminal,
                at: Utc::now(),
            });
            engine.kick_campaign(&lead.campaign_id);
            Ok(true)
        }
        Err(OrchestratorError::DuplicateEvent(_)) => Ok(false),
        Err(e) => Err(OrchestratorError::consistency_repair(format!(
            "orphaned lead {} could not be repaired: {}",
            lead.id, e
        ))),
    }
}

/// Seal every `dialing` attempt whose cascade has no live task, cancelling
/// the agent leg when one was placed.
async fn seal_orphan_attempts(engine: &Arc<OrchestratorEngine>) -> Result<usize> {
    let mut sealed = 0usize;
    for attempt in engine.store().dialing_attempts().await? {
        if engine.cascade_task_is_live(&attempt.transfer_id) {
            continue;
        }
        if let Some(leg) = &attempt.external_call_id {
            if let Err(e) = engine.gateway().cancel_call(leg).await {
                debug!("Cancel of orphaned agent leg {} failed: {}", leg, e);
            }
        }
        let duration = (Utc::now() - attempt.started_at).num_seconds().max(0);
        match engine
            .store()
            .seal_attempt(&attempt.id, AttemptStatus::Failed, Some(duration))
            .await
        {
            Ok(true) => sealed += 1,
            Ok(false) => {}
            Err(e) => warn!("⚠️ Sealing orphaned attempt {} failed: {}", attempt.id, e),
        }
    }
    Ok(sealed)
}

async fn close_cascades(
    engine: &Arc<OrchestratorEngine>,
    cascades: Vec<TransferCascade>,
    reason: &str,
) -> usize {
    let mut closed = 0usize;
    for cascade in cascades {
        match engine
            .store()
            .seal_cascade(&cascade.transfer_id, CascadeStatus::Failed, Some(reason), None)
            .await
        {
            Ok(true) => {
                warn!("⚠️ Closed orphaned cascade {}: {}", cascade.transfer_id, reason);
                engine.events().publish(EngineEvent::TransferFinished {
                    transfer_id: cascade.transfer_id.clone(),
                    status: CascadeStatus::Failed,
                    at: Utc::now(),
                });
                closed += 1;
            }
            Ok(false) => {}
            Err(e) => {
                warn!("⚠️ Closing cascade {} failed: {}", cascade.transfer_id, e)
            }
        }
    }
    closed
}
