//! Wire types shared between the orchestration engine and voice providers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Provider-assigned identifier for one call leg.
///
/// This is the idempotency key for all status handling: every update carries
/// it, and duplicate deliveries for the same id are detected through it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalCallId(pub String);

impl ExternalCallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a fresh id in the shape real providers use. The mock gateway and
    /// demo tooling use this; production ids come from the provider.
    pub fn generate() -> Self {
        Self(format!("call-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExternalCallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ExternalCallId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ExternalCallId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Coarse provider-side state of one call leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    /// Accepted by the provider, not yet ringing.
    Queued,
    /// Destination is being alerted.
    Ringing,
    /// Answered, media flowing.
    InProgress,
    /// Terminated normally; an outcome is available.
    Ended,
    /// Provider-side failure; the leg never completed normally.
    Failed,
}

impl CallState {
    /// Monotonic ordering used for duplicate detection. An update whose rank
    /// does not advance the last observed rank for its call id is a replay.
    pub fn rank(&self) -> u8 {
        match self {
            CallState::Queued => 0,
            CallState::Ringing => 1,
            CallState::InProgress => 2,
            CallState::Ended | CallState::Failed => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Ended | CallState::Failed)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallState::Queued => "queued",
            CallState::Ringing => "ringing",
            CallState::InProgress => "in_progress",
            CallState::Ended => "ended",
            CallState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for CallState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(CallState::Queued),
            "ringing" => Ok(CallState::Ringing),
            "in_progress" => Ok(CallState::InProgress),
            "ended" => Ok(CallState::Ended),
            "failed" => Ok(CallState::Failed),
            other => Err(format!("unknown call state: {}", other)),
        }
    }
}

/// How a terminal call leg resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    /// The callee picked up and the call ran to its natural end.
    Answered,
    /// Rang out without being picked up, or was abandoned while ringing.
    NoAnswer,
    /// Busy signal or active decline.
    Busy,
    /// Placement or provider error.
    Failed,
}

impl fmt::Display for CallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallOutcome::Answered => "answered",
            CallOutcome::NoAnswer => "no_answer",
            CallOutcome::Busy => "busy",
            CallOutcome::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for CallOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "answered" => Ok(CallOutcome::Answered),
            "no_answer" => Ok(CallOutcome::NoAnswer),
            "busy" => Ok(CallOutcome::Busy),
            "failed" => Ok(CallOutcome::Failed),
            other => Err(format!("unknown call outcome: {}", other)),
        }
    }
}

/// One status observation for a call leg, from a poll or a provider callback.
///
/// The same shape arrives over both paths and neither is at-most-once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallStatusUpdate {
    pub call_id: ExternalCallId,
    pub state: CallState,
    /// Populated once `state` is terminal.
    pub outcome: Option<CallOutcome>,
    /// Connected seconds, for answered calls.
    pub duration_seconds: Option<u32>,
    /// Provider-generated conversation summary, when the leg ran an AI
    /// assistant.
    pub summary: Option<String>,
}

impl CallStatusUpdate {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Terminal outcome, defaulting pessimistically when the provider ended
    /// the leg without saying how.
    pub fn terminal_outcome(&self) -> CallOutcome {
        match (self.state, self.outcome) {
            (_, Some(outcome)) => outcome,
            (CallState::Ended, None) => CallOutcome::NoAnswer,
            _ => CallOutcome::Failed,
        }
    }
}

/// Everything the provider needs to originate one call leg.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceCallRequest {
    /// Destination in E.164 form.
    pub to_number: String,
    /// Caller id presented to the destination.
    pub from_number: String,
    /// Provider-side AI assistant to run the conversation. `None` places a
    /// plain leg (agent dials that will be bridged, not driven by an
    /// assistant).
    pub assistant_id: Option<String>,
    /// Correlation keys echoed back by provider callbacks.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl PlaceCallRequest {
    /// An AI-assistant leg, as placed for campaign leads.
    pub fn assistant_call(
        to_number: impl Into<String>,
        from_number: impl Into<String>,
        assistant_id: impl Into<String>,
    ) -> Self {
        Self {
            to_number: to_number.into(),
            from_number: from_number.into(),
            assistant_id: Some(assistant_id.into()),
            metadata: HashMap::new(),
        }
    }

    /// A plain leg, as placed for human agents during a transfer.
    pub fn agent_call(to_number: impl Into<String>, from_number: impl Into<String>) -> Self {
        Self {
            to_number: to_number.into(),
            from_number: from_number.into(),
            assistant_id: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
