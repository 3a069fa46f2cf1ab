//! Engine event notifications
//!
//! Every significant lifecycle change is broadcast as a typed [`EngineEvent`]
//! so dashboards and tests can observe the engine without polling the store.
//! Delivery is best effort: publishing never blocks and never fails, and a
//! slow subscriber only loses its own backlog.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::types::{
    AgentId, AssistantId, AttemptStatus, CampaignId, CampaignStatus, CascadeStatus, LeadCallStatus,
    LeadId, TransferId,
};

const BROADCAST_CAPACITY: usize = 1024;

/// A lifecycle notification from the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    CampaignStatusChanged {
        campaign_id: CampaignId,
        status: CampaignStatus,
        at: DateTime<Utc>,
    },
    LeadCalling {
        campaign_id: CampaignId,
        lead_id: LeadId,
        at: DateTime<Utc>,
    },
    LeadFinished {
        campaign_id: CampaignId,
        lead_id: LeadId,
        status: LeadCallStatus,
        at: DateTime<Utc>,
    },
    TransferStarted {
        transfer_id: TransferId,
        assistant_id: AssistantId,
        at: DateTime<Utc>,
    },
    TransferAttemptSealed {
        transfer_id: TransferId,
        attempt_number: i64,
        agent_id: AgentId,
        status: AttemptStatus,
        at: DateTime<Utc>,
    },
    TransferFinished {
        transfer_id: TransferId,
        status: CascadeStatus,
        at: DateTime<Utc>,
    },
}

/// Broadcast hub for [`EngineEvent`]s.
#[derive(Debug, Clone)]
pub struct EngineEvents {
    sender: broadcast::Sender<EngineEvent>,
}

impl EngineEvents {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Publish to all current subscribers. A send error only means nobody is
    /// listening, which is fine.
    pub fn publish(&self, event: EngineEvent) {
        debug!("📡 Engine event: {:?}", event);
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EngineEvents {
    fn default() -> Self {
        Self::new()
    }
}
