//! The per-campaign dialer runner.
//!
//! One task per running campaign works the lead queue: claim the oldest
//! pending lead, place its call, repeat until the concurrency bound is full,
//! then sleep until a kick (lead finished, command landed) or the fallback
//! tick. The claim statement itself re-checks campaign status, so a pause or
//! cancel that lands between wakeup and claim wins and no call is placed.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::events::EngineEvent;
use crate::orchestrator::core::OrchestratorEngine;
use crate::store::ClaimedLead;
use crate::types::{Campaign, CampaignId, CampaignStatus, LeadDisposition};
use dialcast_gateway_core::PlaceCallRequest;

/// Drive one campaign until it leaves `running` or its queue is exhausted.
pub(crate) async fn run_campaign(engine: Arc<OrchestratorEngine>, campaign_id: CampaignId) {
    info!("📞 Campaign runner started for {}", campaign_id);

    let kick = engine.kick_handle(&campaign_id);
    let tick = Duration::from_millis(engine.config().dialer.loop_tick_ms);
    let max_concurrent = engine.config().dialer.max_concurrent_calls as i64;

    loop {
        let campaign = match engine.store().campaign(&campaign_id).await {
            Ok(campaign) => campaign,
            Err(e) => {
                warn!("⚠️ Campaign {} unreadable, runner exiting: {}", campaign_id, e);
                break;
            }
        };
        if campaign.status != CampaignStatus::Running {
            info!(
                "📴 Campaign {} runner parking (status {})",
                campaign_id, campaign.status
            );
            break;
        }

        match dial_pass(&engine, &campaign, max_concurrent).await {
            Ok(DialPass::Placed) => continue,
            Ok(DialPass::Completed) => break,
            Ok(DialPass::Wait) => {}
            Err(e) => {
                warn!("⚠️ Campaign {} dial pass failed: {}", campaign_id, e);
            }
        }

        tokio::select! {
            _ = kick.notified() => {}
            _ = tokio::time::sleep(tick) => {}
        }
    }

    info!("📞 Campaign runner stopped for {}", campaign_id);
}

enum DialPass {
    /// A call was placed; go straight into another pass.
    Placed,
    /// Queue exhausted and the campaign sealed itself completed.
    Completed,
    /// Nothing to do right now.
    Wait,
}

async fn dial_pass(
    engine: &Arc<OrchestratorEngine>,
    campaign: &Campaign,
    max_concurrent: i64,
) -> crate::Result<DialPass> {
    let in_flight = engine.store().count_calling_leads(&campaign.id).await?;
    if in_flight >= max_concurrent {
        return Ok(DialPass::Wait);
    }

    match engine.store().claim_next_pending_lead(&campaign.id).await? {
        Some(lead) => {
            place_lead_call(engine, campaign, lead).await;
            Ok(DialPass::Placed)
        }
        None => {
            // The completion guard re-checks pending and calling counts
            // atomically; a stale in_flight read here cannot seal early.
            if in_flight == 0 && engine.store().try_complete_campaign(&campaign.id).await? {
                engine.events().publish(EngineEvent::CampaignStatusChanged {
                    campaign_id: campaign.id.clone(),
                    status: CampaignStatus::Completed,
                    at: chrono::Utc::now(),
                });
                return Ok(DialPass::Completed);
            }
            Ok(DialPass::Wait)
        }
    }
}

/// Place the call for a claimed lead. Placement failure seals the lead
/// failed on the spot; the campaign keeps dialing.
async fn place_lead_call(
    engine: &Arc<OrchestratorEngine>,
    campaign: &Campaign,
    lead: ClaimedLead,
) {
    let request = PlaceCallRequest::assistant_call(
        &lead.phone_number,
        &campaign.caller_number,
        campaign.assistant_id.as_str(),
    )
    .with_metadata("campaign_id", campaign.id.as_str())
    .with_metadata("lead_id", lead.id.as_str());

    match engine.gateway().place_call(request).await {
        Ok(call_id) => {
            info!(
                "📞 Lead {} ({}) dialing as call {}",
                lead.id, lead.phone_number, call_id
            );
            if let Err(e) = engine.store().attach_lead_call(&lead.id, &call_id).await {
                // The lead left `calling` under us; drop the leg.
                warn!(
                    "⚠️ Lead {} changed state after placement ({}), cancelling call {}",
                    lead.id, e, call_id
                );
                if let Err(cancel_err) = engine.gateway().cancel_call(&call_id).await {
                    warn!("⚠️ Cancel of orphan call {} failed: {}", call_id, cancel_err);
                }
                return;
            }
            engine.events().publish(EngineEvent::LeadCalling {
                campaign_id: campaign.id.clone(),
                lead_id: lead.id.clone(),
                at: chrono::Utc::now(),
            });
        }
        Err(e) => {
            warn!("❌ Placement for lead {} failed: {}", lead.id, e);
            let disposition = LeadDisposition::failed(format!("placement failed: {}", e));
            match engine.store().seal_lead(&lead.id, &disposition).await {
                Ok(campaign_id) => {
                    engine.events().publish(EngineEvent::LeadFinished {
                        campaign_id,
                        lead_id: lead.id.clone(),
                        status: disposition.terminal,
                        at: chrono::Utc::now(),
                    });
                }
                Err(seal_err) => {
                    warn!(
                        "⚠️ Could not seal lead {} after failed placement: {}",
                        lead.id, seal_err
                    );
                }
            }
        }
    }
}
