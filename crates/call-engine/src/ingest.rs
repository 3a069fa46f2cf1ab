//! Provider status ingestion.
//!
//! Status updates arrive from two directions with no delivery guarantee: the
//! HTTP callback endpoint and the periodic gateway poll. Both funnel through
//! [`apply_update`], so every effect is applied exactly once no matter how
//! many times a given state is observed.
//!
//! De-duplication is two layers deep. The in-memory [`IngestTracker`] ranks
//! call states (queued < ringing < in_progress < ended/failed) and discards
//! any update that does not advance the recorded rank for its call id. The
//! durable layer is the store's guarded seals: a terminal update that slips
//! past the tracker (restart, racing poll) dies on the row's
//! compare-and-set and reports `DuplicateEvent`.

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::error::{OrchestratorError, Result};
use crate::events::{EngineEvent, EngineEvents};
use crate::store::CallStore;
use crate::types::{CampaignId, LeadDisposition, TransferId};
use dialcast_gateway_core::CallStatusUpdate;

/// What an ingested update did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The update changed engine state (or was a live-call acknowledgement).
    Applied,
    /// Redelivery or non-advancing state. Acknowledged and discarded.
    Duplicate,
    /// No lead, attempt, or cascade knows this call id.
    Unmatched,
}

/// The result of ingesting one update, with follow-up directives for the
/// engine: which campaign runner to wake, which cascade to cancel.
#[derive(Debug)]
pub struct IngestResult {
    pub outcome: ApplyOutcome,
    pub kick_campaign: Option<CampaignId>,
    pub cancel_cascade: Option<(TransferId, String)>,
}

impl IngestResult {
    fn new(outcome: ApplyOutcome) -> Self {
        Self {
            outcome,
            kick_campaign: None,
            cancel_cascade: None,
        }
    }
}

/// Per-call-id state rank memory used to discard stale and repeated updates
/// before they touch the store.
#[derive(Debug, Default)]
pub struct IngestTracker {
    ranks: DashMap<String, u8>,
}

impl IngestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the update's rank. Returns false when the rank does not
    /// advance, meaning the update is a duplicate or arrived out of order.
    pub fn advances(&self, update: &CallStatusUpdate) -> bool {
        let rank = update.state.rank();
        let mut advanced = false;
        self.ranks
            .entry(update.call_id.as_str().to_string())
            .and_modify(|recorded| {
                if rank > *recorded {
                    *recorded = rank;
                    advanced = true;
                }
            })
            .or_insert_with(|| {
                advanced = true;
                rank
            });
        advanced
    }

    /// Drop the memory for a call once its terminal effect is durably
    /// applied; the store's seals handle any stragglers.
    pub fn forget(&self, call_id: &str) {
        self.ranks.remove(call_id);
    }

    pub fn tracked(&self) -> usize {
        self.ranks.len()
    }
}

/// Apply one status update to whatever row owns the call id.
///
/// Lead calls seal their lead on terminal states. Agent legs are
/// acknowledged only, because the cascade task owning that attempt is the
/// single writer for its rows. A terminal state on a call that is the
/// customer side of a live cascade additionally yields a cancel directive.
pub async fn apply_update(
    store: &CallStore,
    events: &EngineEvents,
    update: &CallStatusUpdate,
) -> Result<IngestResult> {
    let mut result = IngestResult::new(ApplyOutcome::Unmatched);

    if let Some(lead) = store.lead_by_external_call(&update.call_id).await? {
        if update.state.is_terminal() {
            let disposition = LeadDisposition::from_outcome(
                update.terminal_outcome(),
                update.duration_seconds.map(i64::from),
                update.summary.clone(),
            );
            match store.seal_lead(&lead.id, &disposition).await {
                Ok(campaign_id) => {
                    events.publish(EngineEvent::LeadFinished {
                        campaign_id: campaign_id.clone(),
                        lead_id: lead.id.clone(),
                        status: disposition.terminal,
                        at: chrono::Utc::now(),
                    });
                    result.outcome = ApplyOutcome::Applied;
                    result.kick_campaign = Some(campaign_id);
                }
                Err(OrchestratorError::DuplicateEvent(msg)) => {
                    debug!("Discarding duplicate terminal event: {}", msg);
                    result.outcome = ApplyOutcome::Duplicate;
                }
                Err(e) => return Err(e),
            }
        } else {
            // Mid-call progress carries no lead-row effect.
            debug!(
                "Lead {} call {} progressed to {:?}",
                lead.id, update.call_id, update.state
            );
            result.outcome = ApplyOutcome::Applied;
        }
    } else if let Some(attempt) = store.attempt_by_external_call(&update.call_id).await? {
        // The cascade task polls this leg itself; the callback is only an
        // acknowledgement here.
        result.outcome = if attempt.status.is_terminal() {
            debug!(
                "Update for sealed attempt #{} of {} discarded",
                attempt.attempt_number, attempt.transfer_id
            );
            ApplyOutcome::Duplicate
        } else {
            ApplyOutcome::Applied
        };
    }

    if update.state.is_terminal() {
        if let Some(cascade) = store.dialing_cascade_for_source(&update.call_id).await? {
            debug!(
                "Customer call {} ended while cascade {} is dialing",
                update.call_id, cascade.transfer_id
            );
            result.cancel_cascade =
                Some((cascade.transfer_id, "customer call ended".to_string()));
            if result.outcome == ApplyOutcome::Unmatched {
                result.outcome = ApplyOutcome::Applied;
            }
        }
    }

    if result.outcome == ApplyOutcome::Unmatched {
        warn!("⚠️ Status update for unknown call {}", update.call_id);
    }

    Ok(result)
}
