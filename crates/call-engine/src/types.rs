//! Core types for campaign dialing and warm transfers.
//!
//! All lifecycle state lives in closed enums with explicit transition
//! predicates; the store encodes them as the lowercase strings returned by
//! `as_str` and refuses to decode anything else. Counters and ids are plain
//! newtypes so a campaign id can never be passed where a transfer id belongs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use dialcast_gateway_core::{CallOutcome, ExternalCallId};

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident, $prefix:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new() -> Self {
                Self(format!("{}{}", $prefix, Uuid::new_v4()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Identifies one outbound campaign.
    CampaignId,
    "camp-"
);
string_id!(
    /// Identifies one lead within a campaign.
    LeadId,
    "lead-"
);
string_id!(
    /// Identifies one transfer roster member.
    AgentId,
    "agent-"
);
string_id!(
    /// Groups the attempts of one warm-transfer cascade.
    TransferId,
    "transfer-"
);
string_id!(
    /// Provider-side AI assistant that owns rosters and settings.
    AssistantId,
    "asst-"
);

/// Campaign lifecycle.
///
/// `Completed` and `Cancelled` are terminal; `Completed` is only ever set by
/// the dialer loop once the queue is exhausted, never by an operator command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Running,
    Paused,
    Completed,
    Cancelled,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Scheduled => "scheduled",
            CampaignStatus::Running => "running",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(CampaignStatus::Draft),
            "scheduled" => Some(CampaignStatus::Scheduled),
            "running" => Some(CampaignStatus::Running),
            "paused" => Some(CampaignStatus::Paused),
            "completed" => Some(CampaignStatus::Completed),
            "cancelled" => Some(CampaignStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CampaignStatus::Completed | CampaignStatus::Cancelled)
    }

    /// States from which `start` moves the campaign to `Running`.
    pub fn can_start(&self) -> bool {
        matches!(
            self,
            CampaignStatus::Draft | CampaignStatus::Scheduled | CampaignStatus::Paused
        )
    }

    pub fn can_pause(&self) -> bool {
        matches!(self, CampaignStatus::Running)
    }

    pub fn can_cancel(&self) -> bool {
        matches!(self, CampaignStatus::Running | CampaignStatus::Paused)
    }

    /// Bulk retry is allowed whenever the dialer is not actively working the
    /// queue and the campaign was not cancelled (cancel never retries).
    pub fn can_retry_failed(&self) -> bool {
        matches!(
            self,
            CampaignStatus::Draft
                | CampaignStatus::Scheduled
                | CampaignStatus::Paused
                | CampaignStatus::Completed
        )
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-lead call progress. Strictly `Pending → Calling → {Completed, Failed}`,
/// with the single exception of an explicit bulk retry reopening `Failed`
/// leads to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadCallStatus {
    Pending,
    Calling,
    Completed,
    Failed,
}

impl LeadCallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadCallStatus::Pending => "pending",
            LeadCallStatus::Calling => "calling",
            LeadCallStatus::Completed => "completed",
            LeadCallStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(LeadCallStatus::Pending),
            "calling" => Some(LeadCallStatus::Calling),
            "completed" => Some(LeadCallStatus::Completed),
            "failed" => Some(LeadCallStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LeadCallStatus::Completed | LeadCallStatus::Failed)
    }

    /// The exhaustive transition table for lead status.
    pub fn can_transition(from: LeadCallStatus, to: LeadCallStatus) -> bool {
        match (from, to) {
            (LeadCallStatus::Pending, LeadCallStatus::Calling) => true,
            (LeadCallStatus::Calling, LeadCallStatus::Completed) => true,
            (LeadCallStatus::Calling, LeadCallStatus::Failed) => true,
            // Only the bulk retry path.
            (LeadCallStatus::Failed, LeadCallStatus::Pending) => true,
            (LeadCallStatus::Pending, _) => false,
            (LeadCallStatus::Calling, _) => false,
            (LeadCallStatus::Completed, _) => false,
            (LeadCallStatus::Failed, _) => false,
        }
    }
}

impl fmt::Display for LeadCallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One agent-dialing attempt within a cascade. `Dialing` is the only
/// non-terminal status; a sealed row never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Dialing,
    Answered,
    NoAnswer,
    Busy,
    Failed,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Dialing => "dialing",
            AttemptStatus::Answered => "answered",
            AttemptStatus::NoAnswer => "no_answer",
            AttemptStatus::Busy => "busy",
            AttemptStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "dialing" => Some(AttemptStatus::Dialing),
            "answered" => Some(AttemptStatus::Answered),
            "no_answer" => Some(AttemptStatus::NoAnswer),
            "busy" => Some(AttemptStatus::Busy),
            "failed" => Some(AttemptStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, AttemptStatus::Dialing)
    }

    /// Whether the cascade tries the next agent after sealing with this
    /// status. `Answered` resolves the cascade instead.
    pub fn advances_cascade(&self) -> bool {
        matches!(
            self,
            AttemptStatus::NoAnswer | AttemptStatus::Busy | AttemptStatus::Failed
        )
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Cascade-level resolution. `Cancelled` is deliberately distinct from
/// `Failed`: the first is someone choosing to stop, the second is the roster
/// running out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeStatus {
    Dialing,
    Connected,
    Failed,
    Cancelled,
}

impl CascadeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CascadeStatus::Dialing => "dialing",
            CascadeStatus::Connected => "connected",
            CascadeStatus::Failed => "failed",
            CascadeStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "dialing" => Some(CascadeStatus::Dialing),
            "connected" => Some(CascadeStatus::Connected),
            "failed" => Some(CascadeStatus::Failed),
            "cancelled" => Some(CascadeStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, CascadeStatus::Dialing)
    }
}

impl fmt::Display for CascadeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An outbound campaign with its aggregate counters.
///
/// The counters are maintained transactionally with lead seals, so at any
/// observable instant `calls_completed`/`calls_failed` equal the count of
/// leads in the matching terminal status and `calls_answered` counts the
/// completed leads whose outcome was `answered`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub workspace_id: String,
    pub name: String,
    pub assistant_id: AssistantId,
    pub caller_number: String,
    pub status: CampaignStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_leads: i64,
    pub calls_completed: i64,
    pub calls_answered: i64,
    pub calls_failed: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One contact in a campaign's dial queue. `seq` is the FIFO position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignLead {
    pub seq: i64,
    pub id: LeadId,
    pub campaign_id: CampaignId,
    pub phone_number: String,
    pub display_name: Option<String>,
    pub call_status: LeadCallStatus,
    pub external_call_id: Option<ExternalCallId>,
    pub outcome: Option<CallOutcome>,
    pub summary: Option<String>,
    pub duration_seconds: Option<i64>,
    pub called_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A transfer roster member. `seq` records insertion order and breaks
/// priority ties deterministically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferAgent {
    pub seq: i64,
    pub id: AgentId,
    pub assistant_id: AssistantId,
    pub phone_number: String,
    pub display_name: String,
    /// Lower dials first.
    pub priority: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Per-assistant transfer behavior. Always stored clamped; raw operator
/// input never reaches this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSettings {
    pub assistant_id: AssistantId,
    pub enabled: bool,
    pub ring_timeout_seconds: u32,
    pub max_attempts: u32,
    pub announcement_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Raw operator input for transfer settings, clamped before persistence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferSettingsUpdate {
    pub enabled: Option<bool>,
    pub ring_timeout_seconds: Option<u32>,
    pub max_attempts: Option<u32>,
    pub announcement_message: Option<String>,
}

/// Header row for one warm-transfer cascade; carries the operator-facing
/// resolution and reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferCascade {
    pub transfer_id: TransferId,
    pub assistant_id: AssistantId,
    /// The live customer call that triggered the transfer.
    pub source_call_id: ExternalCallId,
    pub status: CascadeStatus,
    pub reason: Option<String>,
    pub connected_agent_id: Option<AgentId>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Append-only audit row for one agent dial within a cascade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferAttempt {
    pub id: String,
    pub transfer_id: TransferId,
    /// 1-based and dense within a transfer.
    pub attempt_number: i64,
    pub agent_id: AgentId,
    pub agent_number: String,
    pub agent_name: String,
    pub status: AttemptStatus,
    pub external_call_id: Option<ExternalCallId>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
}

/// Input for campaign creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCampaign {
    pub workspace_id: String,
    pub name: String,
    pub assistant_id: AssistantId,
    pub caller_number: String,
    /// Present means the campaign is created `scheduled` and auto-starts.
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Input for lead ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLead {
    pub phone_number: String,
    pub display_name: Option<String>,
}

impl NewLead {
    pub fn new(phone_number: impl Into<String>) -> Self {
        Self {
            phone_number: phone_number.into(),
            display_name: None,
        }
    }

    pub fn named(phone_number: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            phone_number: phone_number.into(),
            display_name: Some(display_name.into()),
        }
    }
}

/// Input for roster additions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAgent {
    pub assistant_id: AssistantId,
    pub phone_number: String,
    pub display_name: String,
    pub priority: i64,
}

/// The terminal facts written when a lead is sealed.
#[derive(Debug, Clone)]
pub struct LeadDisposition {
    pub terminal: LeadCallStatus,
    pub outcome: CallOutcome,
    pub duration_seconds: Option<i64>,
    pub summary: Option<String>,
}

impl LeadDisposition {
    /// Map a provider-terminal outcome onto a lead seal: natural ends are
    /// `completed` with the outcome recorded, errors are `failed`.
    pub fn from_outcome(
        outcome: CallOutcome,
        duration_seconds: Option<i64>,
        summary: Option<String>,
    ) -> Self {
        let terminal = match outcome {
            CallOutcome::Answered | CallOutcome::NoAnswer | CallOutcome::Busy => {
                LeadCallStatus::Completed
            }
            CallOutcome::Failed => LeadCallStatus::Failed,
        };
        Self {
            terminal,
            outcome,
            duration_seconds,
            summary,
        }
    }

    /// Seal for a call that could not be placed or monitored at all.
    pub fn failed(summary: impl Into<String>) -> Self {
        Self {
            terminal: LeadCallStatus::Failed,
            outcome: CallOutcome::Failed,
            duration_seconds: None,
            summary: Some(summary.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn campaign_status_round_trips() {
        for status in [
            CampaignStatus::Draft,
            CampaignStatus::Scheduled,
            CampaignStatus::Running,
            CampaignStatus::Paused,
            CampaignStatus::Completed,
            CampaignStatus::Cancelled,
        ] {
            assert_eq!(CampaignStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(CampaignStatus::parse("bogus"), None);
    }

    #[test]
    fn campaign_command_guards_match_lifecycle() {
        assert!(CampaignStatus::Draft.can_start());
        assert!(CampaignStatus::Paused.can_start());
        assert!(!CampaignStatus::Running.can_start());
        assert!(!CampaignStatus::Completed.can_start());
        assert!(!CampaignStatus::Cancelled.can_start());

        assert!(CampaignStatus::Running.can_pause());
        assert!(!CampaignStatus::Paused.can_pause());

        assert!(CampaignStatus::Running.can_cancel());
        assert!(CampaignStatus::Paused.can_cancel());
        assert!(!CampaignStatus::Cancelled.can_cancel());

        assert!(CampaignStatus::Completed.can_retry_failed());
        assert!(!CampaignStatus::Running.can_retry_failed());
        assert!(!CampaignStatus::Cancelled.can_retry_failed());
    }

    #[test]
    fn lead_transitions_are_closed() {
        use LeadCallStatus::*;
        assert!(LeadCallStatus::can_transition(Pending, Calling));
        assert!(LeadCallStatus::can_transition(Calling, Completed));
        assert!(LeadCallStatus::can_transition(Calling, Failed));
        assert!(LeadCallStatus::can_transition(Failed, Pending));

        assert!(!LeadCallStatus::can_transition(Pending, Completed));
        assert!(!LeadCallStatus::can_transition(Pending, Failed));
        assert!(!LeadCallStatus::can_transition(Completed, Pending));
        assert!(!LeadCallStatus::can_transition(Completed, Calling));
        assert!(!LeadCallStatus::can_transition(Failed, Calling));
    }

    #[test]
    fn disposition_maps_natural_ends_to_completed() {
        let d = LeadDisposition::from_outcome(CallOutcome::Answered, Some(42), None);
        assert_eq!(d.terminal, LeadCallStatus::Completed);

        let d = LeadDisposition::from_outcome(CallOutcome::NoAnswer, None, None);
        assert_eq!(d.terminal, LeadCallStatus::Completed);

        let d = LeadDisposition::from_outcome(CallOutcome::Busy, None, None);
        assert_eq!(d.terminal, LeadCallStatus::Completed);

        let d = LeadDisposition::from_outcome(CallOutcome::Failed, None, None);
        assert_eq!(d.terminal, LeadCallStatus::Failed);
    }

    fn arb_lead_status() -> impl Strategy<Value = LeadCallStatus> {
        prop_oneof![
            Just(LeadCallStatus::Pending),
            Just(LeadCallStatus::Calling),
            Just(LeadCallStatus::Completed),
            Just(LeadCallStatus::Failed),
        ]
    }

    proptest! {
        /// A completed lead can never move again, through any path.
        #[test]
        fn completed_leads_never_transition(to in arb_lead_status()) {
            prop_assert!(!LeadCallStatus::can_transition(LeadCallStatus::Completed, to));
        }

        /// Self-transitions never exist; duplicate deliveries must be
        /// rejected by the transition table, not absorbed.
        #[test]
        fn no_self_transitions(status in arb_lead_status()) {
            prop_assert!(!LeadCallStatus::can_transition(status, status));
        }
    }
}
