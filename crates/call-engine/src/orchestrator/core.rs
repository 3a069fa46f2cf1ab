//! The orchestration engine: command surface and task supervision.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::events::{EngineEvent, EngineEvents};
use crate::ingest::{apply_update, ApplyOutcome, IngestTracker};
use crate::store::CallStore;
use crate::types::{
    AgentId, AssistantId, Campaign, CampaignId, CampaignLead, CascadeStatus, LeadId, NewAgent,
    NewCampaign, NewLead, TransferAgent, TransferAttempt, TransferCascade, TransferId,
    TransferSettings, TransferSettingsUpdate,
};
use dialcast_gateway_core::{CallStatusUpdate, VoiceGateway};

use super::{cascade, dialer, recovery};

/// A snapshot of what the engine is doing right now.
#[derive(Debug, Clone)]
pub struct EngineStats {
    pub campaigns_running: usize,
    pub leads_calling: usize,
    pub cascades_dialing: usize,
    pub tracked_calls: usize,
}

/// Call orchestration engine.
///
/// Owns the store, the gateway handle, and the registries of live worker
/// tasks. All methods take `&self`; the engine is always used behind an
/// [`Arc`] so workers can hold their own reference.
pub struct OrchestratorEngine {
    config: OrchestratorConfig,
    store: CallStore,
    gateway: Arc<dyn VoiceGateway>,
    events: EngineEvents,
    ingest_tracker: IngestTracker,

    /// Per-campaign wakeups. A kick is cheap and never blocks; the runner
    /// collapses any number of kicks into one loop pass.
    campaign_kicks: DashMap<String, Arc<Notify>>,
    runner_tasks: DashMap<String, JoinHandle<()>>,

    /// Cancellation senders for live cascade tasks. The payload is the
    /// cancellation reason; `None` means not cancelled.
    cascade_cancels: DashMap<String, watch::Sender<Option<String>>>,
    cascade_tasks: DashMap<String, JoinHandle<()>>,
}

impl OrchestratorEngine {
    pub fn new(
        config: OrchestratorConfig,
        store: CallStore,
        gateway: Arc<dyn VoiceGateway>,
    ) -> Arc<Self> {
        info!(
            "🎛️ Orchestrator engine created (instance {}, concurrency {})",
            config.general.instance_name, config.dialer.max_concurrent_calls
        );
        Arc::new(Self {
            config,
            store,
            gateway,
            events: EngineEvents::new(),
            ingest_tracker: IngestTracker::new(),
            campaign_kicks: DashMap::new(),
            runner_tasks: DashMap::new(),
            cascade_cancels: DashMap::new(),
            cascade_tasks: DashMap::new(),
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn store(&self) -> &CallStore {
        &self.store
    }

    pub fn gateway(&self) -> &Arc<dyn VoiceGateway> {
        &self.gateway
    }

    pub fn events(&self) -> &EngineEvents {
        &self.events
    }

    pub(crate) fn ingest_tracker(&self) -> &IngestTracker {
        &self.ingest_tracker
    }

    // ========================================================================
    // Campaign commands
    // ========================================================================

    pub async fn create_campaign(&self, new: NewCampaign) -> Result<Campaign> {
        self.store.create_campaign(new).await
    }

    pub async fn add_leads(
        &self,
        campaign_id: &CampaignId,
        leads: Vec<NewLead>,
    ) -> Result<Vec<LeadId>> {
        self.store.add_leads(campaign_id, leads).await
    }

    pub async fn campaign(&self, id: &CampaignId) -> Result<Campaign> {
        self.store.campaign(id).await
    }

    pub async fn list_campaigns(&self) -> Result<Vec<Campaign>> {
        self.store.list_campaigns().await
    }

    pub async fn campaign_leads(&self, id: &CampaignId) -> Result<Vec<CampaignLead>> {
        self.store.leads_for_campaign(id).await
    }

    /// Start (or resume) a campaign and ensure its runner is alive.
    pub async fn start_campaign(self: &Arc<Self>, id: &CampaignId) -> Result<Campaign> {
        let campaign = self.store.try_start_campaign(id).await?;
        self.events.publish(EngineEvent::CampaignStatusChanged {
            campaign_id: campaign.id.clone(),
            status: campaign.status,
            at: chrono::Utc::now(),
        });
        self.spawn_campaign_runner(&campaign.id);
        Ok(campaign)
    }

    /// Pause a running campaign. In-flight calls finish naturally; the
    /// runner notices the status change on its next wakeup and parks.
    pub async fn pause_campaign(&self, id: &CampaignId) -> Result<Campaign> {
        let campaign = self.store.try_pause_campaign(id).await?;
        self.events.publish(EngineEvent::CampaignStatusChanged {
            campaign_id: campaign.id.clone(),
            status: campaign.status,
            at: chrono::Utc::now(),
        });
        self.kick_campaign(id);
        Ok(campaign)
    }

    /// Cancel a running or paused campaign. Terminal, never retried.
    pub async fn cancel_campaign(&self, id: &CampaignId) -> Result<Campaign> {
        let campaign = self.store.try_cancel_campaign(id).await?;
        self.events.publish(EngineEvent::CampaignStatusChanged {
            campaign_id: campaign.id.clone(),
            status: campaign.status,
            at: chrono::Utc::now(),
        });
        self.kick_campaign(id);
        Ok(campaign)
    }

    /// Requeue every failed lead. Returns the refreshed campaign and how
    /// many leads went back to pending.
    pub async fn retry_failed(&self, id: &CampaignId) -> Result<(Campaign, u64)> {
        let before = self.store.campaign(id).await?.status;
        let (campaign, reset) = self.store.retry_failed_leads(id).await?;
        if campaign.status != before {
            self.events.publish(EngineEvent::CampaignStatusChanged {
                campaign_id: campaign.id.clone(),
                status: campaign.status,
                at: chrono::Utc::now(),
            });
        }
        Ok((campaign, reset))
    }

    // ========================================================================
    // Roster and settings
    // ========================================================================

    pub async fn add_agent(&self, new: NewAgent) -> Result<TransferAgent> {
        self.store.add_agent(new).await
    }

    pub async fn set_agent_active(&self, agent_id: &AgentId, active: bool) -> Result<()> {
        self.store.set_agent_active(agent_id, active).await
    }

    pub async fn roster(&self, assistant_id: &AssistantId) -> Result<Vec<TransferAgent>> {
        self.store.active_roster(assistant_id).await
    }

    /// Stored settings, or the configured defaults for an assistant that was
    /// never configured.
    pub async fn transfer_settings(&self, assistant_id: &AssistantId) -> Result<TransferSettings> {
        Ok(match self.store.transfer_settings(assistant_id).await? {
            Some(settings) => settings,
            None => self.config.transfer.default_settings(assistant_id.clone()),
        })
    }

    /// Clamp and persist a settings update, echoing the stored row.
    pub async fn update_transfer_settings(
        &self,
        assistant_id: &AssistantId,
        update: TransferSettingsUpdate,
    ) -> Result<TransferSettings> {
        let current = self.transfer_settings(assistant_id).await?;
        let clamped = self.config.transfer.clamp_settings(&current, update);
        self.store.put_transfer_settings(&clamped).await?;
        Ok(clamped)
    }

    // ========================================================================
    // Transfers
    // ========================================================================

    /// Fire a warm transfer for a live customer call.
    ///
    /// Returns the cascade row: `dialing` with a worker task behind it, or
    /// already sealed `failed` with zero attempts when the roster is empty.
    /// Transfers disabled for the assistant is a `Configuration` error and
    /// records nothing.
    pub async fn start_transfer(
        self: &Arc<Self>,
        assistant_id: &AssistantId,
        source_call_id: &dialcast_gateway_core::ExternalCallId,
    ) -> Result<TransferCascade> {
        let settings = self.transfer_settings(assistant_id).await?;
        if !settings.enabled {
            return Err(OrchestratorError::configuration(format!(
                "transfers are not enabled for assistant {}",
                assistant_id
            )));
        }

        let roster = self.store.active_roster(assistant_id).await?;
        let cascade = self.store.create_cascade(assistant_id, source_call_id).await?;
        self.events.publish(EngineEvent::TransferStarted {
            transfer_id: cascade.transfer_id.clone(),
            assistant_id: assistant_id.clone(),
            at: chrono::Utc::now(),
        });

        if roster.is_empty() {
            self.store
                .seal_cascade(
                    &cascade.transfer_id,
                    CascadeStatus::Failed,
                    Some("no agents configured"),
                    None,
                )
                .await?;
            self.events.publish(EngineEvent::TransferFinished {
                transfer_id: cascade.transfer_id.clone(),
                status: CascadeStatus::Failed,
                at: chrono::Utc::now(),
            });
            warn!(
                "🎯 Transfer {} failed immediately: empty roster for {}",
                cascade.transfer_id, assistant_id
            );
            return self.store.cascade(&cascade.transfer_id).await;
        }

        let (cancel_tx, cancel_rx) = watch::channel(None);
        self.cascade_cancels
            .insert(cascade.transfer_id.as_str().to_string(), cancel_tx);

        let engine = Arc::clone(self);
        let transfer_id = cascade.transfer_id.clone();
        let source = source_call_id.clone();
        let handle = tokio::spawn(async move {
            cascade::run_cascade(engine, transfer_id, source, roster, settings, cancel_rx).await;
        });
        self.cascade_tasks
            .insert(cascade.transfer_id.as_str().to_string(), handle);

        Ok(cascade)
    }

    /// Cancel a live cascade. With a worker behind it the cancel is a
    /// signal and the worker seals; without one (recovery windows) the row
    /// is sealed directly.
    pub async fn cancel_transfer(
        &self,
        transfer_id: &TransferId,
        reason: &str,
    ) -> Result<TransferCascade> {
        if let Some(sender) = self.cascade_cancels.get(transfer_id.as_str()) {
            sender.send_replace(Some(reason.to_string()));
            info!("🛑 Cancel signalled for transfer {} ({})", transfer_id, reason);
            return self.store.cascade(transfer_id).await;
        }

        let sealed = self
            .store
            .seal_cascade(transfer_id, CascadeStatus::Cancelled, Some(reason), None)
            .await?;
        if sealed {
            self.events.publish(EngineEvent::TransferFinished {
                transfer_id: transfer_id.clone(),
                status: CascadeStatus::Cancelled,
                at: chrono::Utc::now(),
            });
            self.store.cascade(transfer_id).await
        } else {
            let cascade = self.store.cascade(transfer_id).await?;
            Err(OrchestratorError::invalid_state(format!(
                "transfer {} already resolved as {}",
                transfer_id, cascade.status
            )))
        }
    }

    pub async fn transfer_log(
        &self,
        assistant_id: Option<&AssistantId>,
        limit: i64,
    ) -> Result<Vec<TransferCascade>> {
        self.store.cascades(assistant_id, limit).await
    }

    pub async fn transfer_detail(
        &self,
        transfer_id: &TransferId,
    ) -> Result<(TransferCascade, Vec<TransferAttempt>)> {
        let cascade = self.store.cascade(transfer_id).await?;
        let attempts = self.store.attempts_for_transfer(transfer_id).await?;
        Ok((cascade, attempts))
    }

    // ========================================================================
    // Event ingestion
    // ========================================================================

    /// Ingest one provider status update and act on its directives.
    pub async fn ingest_update(self: &Arc<Self>, update: CallStatusUpdate) -> Result<ApplyOutcome> {
        if !self.ingest_tracker.advances(&update) {
            debug!(
                "Discarding non-advancing update for call {} ({:?})",
                update.call_id, update.state
            );
            return Ok(ApplyOutcome::Duplicate);
        }

        let result = apply_update(&self.store, &self.events, &update).await?;

        if update.state.is_terminal() {
            self.ingest_tracker.forget(update.call_id.as_str());
        }

        if let Some(campaign_id) = &result.kick_campaign {
            self.spawn_campaign_runner(campaign_id);
        }

        if let Some((transfer_id, reason)) = &result.cancel_cascade {
            match self.cancel_transfer(transfer_id, reason).await {
                Ok(_) => {}
                // The cascade resolved on its own in the meantime.
                Err(OrchestratorError::InvalidState(msg)) => {
                    debug!("Cascade cancel raced its resolution: {}", msg);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(result.outcome)
    }

    /// One sweep of the gateway over every in-flight lead call. Terminal
    /// answers feed the normal ingest path; gateway errors are left for the
    /// orphan sweeper's grace window.
    pub async fn poll_active_calls(self: &Arc<Self>) -> Result<usize> {
        let calling = self.store.calling_leads().await?;
        let mut applied = 0;

        for lead in calling {
            let Some(call_id) = &lead.external_call_id else {
                continue;
            };
            match self.gateway.call_status(call_id).await {
                Ok(update) => {
                    if matches!(self.ingest_update(update).await?, ApplyOutcome::Applied) {
                        applied += 1;
                    }
                }
                Err(e) => {
                    debug!("Status poll for call {} failed: {}", call_id, e);
                }
            }
        }

        Ok(applied)
    }

    /// Start every scheduled campaign whose time has come.
    pub async fn start_due_campaigns(self: &Arc<Self>) -> Result<usize> {
        let due = self.store.scheduled_campaigns_due(chrono::Utc::now()).await?;
        let mut started = 0;

        for campaign in due {
            match self.start_campaign(&campaign.id).await {
                Ok(_) => {
                    info!("⏰ Scheduled campaign {} started", campaign.id);
                    started += 1;
                }
                // Lost a race with an operator command; nothing to do.
                Err(OrchestratorError::InvalidState(msg)) => {
                    debug!("Scheduled start skipped: {}", msg);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(started)
    }

    // ========================================================================
    // Worker supervision
    // ========================================================================

    /// The wakeup handle for a campaign's runner.
    pub(crate) fn kick_handle(&self, campaign_id: &CampaignId) -> Arc<Notify> {
        self.campaign_kicks
            .entry(campaign_id.as_str().to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    pub(crate) fn kick_campaign(&self, campaign_id: &CampaignId) {
        self.kick_handle(campaign_id).notify_one();
    }

    /// Ensure exactly one live runner per campaign. An existing live runner
    /// is kicked instead of duplicated.
    pub(crate) fn spawn_campaign_runner(self: &Arc<Self>, campaign_id: &CampaignId) {
        let key = campaign_id.as_str().to_string();
        match self.runner_tasks.entry(key) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_finished() {
                    let engine = Arc::clone(self);
                    let id = campaign_id.clone();
                    occupied.insert(tokio::spawn(async move {
                        dialer::run_campaign(engine, id).await;
                    }));
                } else {
                    self.kick_campaign(campaign_id);
                }
            }
            Entry::Vacant(vacant) => {
                let engine = Arc::clone(self);
                let id = campaign_id.clone();
                vacant.insert(tokio::spawn(async move {
                    dialer::run_campaign(engine, id).await;
                }));
            }
        }
    }

    /// Called by a cascade task as it exits; drops its registry entries.
    pub(crate) fn finish_cascade(&self, transfer_id: &TransferId) {
        self.cascade_cancels.remove(transfer_id.as_str());
        self.cascade_tasks.remove(transfer_id.as_str());
    }

    /// True while the cascade's worker task is registered and running.
    pub(crate) fn cascade_task_is_live(&self, transfer_id: &TransferId) -> bool {
        self.cascade_tasks
            .get(transfer_id.as_str())
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Reconcile persisted state against the gateway, then resume runners
    /// for campaigns that were running when the previous process stopped.
    pub async fn recover(self: &Arc<Self>) -> Result<()> {
        if self.config.recovery.reconcile_on_start {
            recovery::run_startup(self).await?;
        }

        for campaign in self.store.running_campaigns().await? {
            info!("🔄 Resuming runner for campaign {}", campaign.id);
            self.spawn_campaign_runner(&campaign.id);
        }
        Ok(())
    }

    /// One pass of the periodic orphan sweep.
    pub async fn sweep_orphans(self: &Arc<Self>) -> Result<usize> {
        recovery::sweep(self).await
    }

    pub async fn stats(&self) -> Result<EngineStats> {
        Ok(EngineStats {
            campaigns_running: self.store.running_campaigns().await?.len(),
            leads_calling: self.store.calling_leads().await?.len(),
            cascades_dialing: self.store.dialing_cascades().await?.len(),
            tracked_calls: self.ingest_tracker.tracked(),
        })
    }

    /// Abort every worker task. State is safe: anything mid-flight is
    /// reconciled by the next process's recovery pass.
    pub fn shutdown(&self) {
        let mut aborted = 0;
        for entry in self.runner_tasks.iter() {
            entry.value().abort();
            aborted += 1;
        }
        for entry in self.cascade_tasks.iter() {
            entry.value().abort();
            aborted += 1;
        }
        self.runner_tasks.clear();
        self.cascade_tasks.clear();
        self.cascade_cancels.clear();
        info!("🛑 Engine shut down ({} worker tasks aborted)", aborted);
    }
}
