//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use dialcast_call_engine::prelude::*;

/// Engine over a fresh in-memory store and mock gateway. The store and
/// gateway are returned separately so restart tests can build a second
/// engine over the same state.
pub async fn create_test_engine() -> (Arc<OrchestratorEngine>, CallStore, Arc<MockVoiceGateway>) {
    create_test_engine_with(test_config()).await
}

pub async fn create_test_engine_with(
    config: OrchestratorConfig,
) -> (Arc<OrchestratorEngine>, CallStore, Arc<MockVoiceGateway>) {
    // Opening the store establishes SQLite connections on blocking threads
    // while sqlx's pool-acquire deadline sits on a tokio timer. Under
    // `start_paused` the idle runtime auto-advances straight to that
    // deadline, so acquire times out before the connection ever opens.
    // Holding a live `spawn_blocking` task inhibits auto-advance for the
    // duration of the open, letting it proceed in real time.
    let (guard_tx, guard_rx) = std::sync::mpsc::channel::<()>();
    let guard = tokio::task::spawn_blocking(move || {
        let _ = guard_rx.recv();
    });
    let store = CallStore::in_memory()
        .await
        .expect("in-memory call store should open");
    drop(guard_tx);
    guard.await.expect("auto-advance guard should join");
    let gateway = Arc::new(MockVoiceGateway::new());
    let engine = OrchestratorEngine::new(config, store.clone(), gateway.clone());
    (engine, store, gateway)
}

/// Config tuned for tests: fast loop ticks so paused-clock runs converge
/// within a few virtual seconds.
pub fn test_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.dialer.loop_tick_ms = 100;
    config.gateway.status_poll_interval_ms = 100;
    config.transfer.leg_poll_interval_ms = 50;
    config
}

/// Create a draft campaign holding one lead per phone number, in order.
pub async fn seed_campaign(
    engine: &Arc<OrchestratorEngine>,
    name: &str,
    numbers: &[&str],
) -> Campaign {
    let campaign = engine
        .create_campaign(NewCampaign {
            workspace_id: "ws-test".to_string(),
            name: name.to_string(),
            assistant_id: AssistantId::from("asst-test"),
            caller_number: "+15550100000".to_string(),
            scheduled_at: None,
        })
        .await
        .expect("campaign creation should succeed");

    let leads: Vec<NewLead> = numbers.iter().map(|n| NewLead::new(*n)).collect();
    if !leads.is_empty() {
        engine
            .add_leads(&campaign.id, leads)
            .await
            .expect("lead ingestion should succeed");
    }

    engine
        .campaign(&campaign.id)
        .await
        .expect("campaign reload should succeed")
}

/// Add roster agents as (number, name, priority) triples and enable
/// transfers for the assistant with the given ring timeout and cap.
pub async fn seed_roster(
    engine: &Arc<OrchestratorEngine>,
    assistant_id: &AssistantId,
    agents: &[(&str, &str, i64)],
    ring_timeout_seconds: u32,
    max_attempts: u32,
) -> Vec<TransferAgent> {
    let mut roster = Vec::with_capacity(agents.len());
    for (number, name, priority) in agents {
        let agent = engine
            .add_agent(NewAgent {
                assistant_id: assistant_id.clone(),
                phone_number: number.to_string(),
                display_name: name.to_string(),
                priority: *priority,
            })
            .await
            .expect("agent insert should succeed");
        roster.push(agent);
    }

    engine
        .update_transfer_settings(
            assistant_id,
            TransferSettingsUpdate {
                enabled: Some(true),
                ring_timeout_seconds: Some(ring_timeout_seconds),
                max_attempts: Some(max_attempts),
                announcement_message: Some("Transferring a customer to you now".to_string()),
            },
        )
        .await
        .expect("transfer settings update should succeed");

    roster
}

/// Drive the status poller by hand until the campaign reaches `status`.
/// Panics if it never does within the tick budget.
pub async fn run_campaign_to_status(
    engine: &Arc<OrchestratorEngine>,
    campaign_id: &CampaignId,
    status: CampaignStatus,
) -> Campaign {
    for _ in 0..400 {
        let campaign = engine
            .campaign(campaign_id)
            .await
            .expect("campaign fetch should succeed");
        if campaign.status == status {
            return campaign;
        }
        engine
            .poll_active_calls()
            .await
            .expect("status poll should succeed");
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    panic!("campaign {} never reached {}", campaign_id, status);
}

/// Drive the status poller by hand until `pred` holds for the campaign.
pub async fn run_campaign_until<F>(
    engine: &Arc<OrchestratorEngine>,
    campaign_id: &CampaignId,
    mut pred: F,
) -> Campaign
where
    F: FnMut(&Campaign) -> bool,
{
    for _ in 0..400 {
        let campaign = engine
            .campaign(campaign_id)
            .await
            .expect("campaign fetch should succeed");
        if pred(&campaign) {
            return campaign;
        }
        engine
            .poll_active_calls()
            .await
            .expect("status poll should succeed");
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    panic!("campaign {} never satisfied the wait condition", campaign_id);
}

/// The provider call id attached to the lead at `index`, waiting out the
/// gap between placement and the attach write.
pub async fn lead_call_id(
    engine: &Arc<OrchestratorEngine>,
    campaign_id: &CampaignId,
    index: usize,
) -> ExternalCallId {
    for _ in 0..100 {
        let leads = engine
            .campaign_leads(campaign_id)
            .await
            .expect("leads fetch should succeed");
        if let Some(call_id) = leads.get(index).and_then(|lead| lead.external_call_id.clone()) {
            return call_id;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("lead {} of campaign {} never got a call id", index, campaign_id);
}

/// Wait for a cascade to leave `dialing`. Cascade tasks poll their own
/// legs, so this only needs to let virtual time advance.
pub async fn wait_for_cascade_end(
    engine: &Arc<OrchestratorEngine>,
    transfer_id: &TransferId,
) -> TransferCascade {
    for _ in 0..400 {
        let (cascade, _) = engine
            .transfer_detail(transfer_id)
            .await
            .expect("transfer detail should succeed");
        if cascade.status != CascadeStatus::Dialing {
            return cascade;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    panic!("cascade {} never resolved", transfer_id);
}

/// Wait until the gateway has seen `count` placements.
pub async fn wait_for_placements(gateway: &Arc<MockVoiceGateway>, count: usize) {
    for _ in 0..400 {
        if gateway.placement_count() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("gateway never saw {} placements", count);
}
