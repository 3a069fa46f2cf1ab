//! Scriptable in-memory voice provider.
//!
//! The mock models each leg as a deterministic timeline derived from a
//! [`CallScript`]: placement starts a clock, and `call_status` reports
//! whatever phase that clock has reached. Nothing runs in the background, so
//! tests driving a paused tokio clock see exact, reproducible transitions.
//!
//! Scripts are keyed by destination number, which is what orchestration tests
//! control; numbers without a script use the gateway-wide default.

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use async_trait::async_trait;

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::VoiceGateway;
use crate::types::{CallOutcome, CallState, CallStatusUpdate, ExternalCallId, PlaceCallRequest};

/// Per-number behavior of the mock provider.
#[derive(Debug, Clone)]
pub enum CallScript {
    /// Ring for `answer_after`, connect, then end normally after `talk_time`.
    Answer {
        answer_after: Duration,
        talk_time: Duration,
    },
    /// Busy signal straight away.
    Busy,
    /// Ring until cancelled.
    NoAnswer,
    /// Refuse the placement itself.
    RejectPlacement,
    /// Ring for the given time, then fail provider-side.
    FailAfter(Duration),
}

impl CallScript {
    /// Quick answered call, the default for unscripted numbers.
    pub fn quick_answer() -> Self {
        CallScript::Answer {
            answer_after: Duration::from_millis(10),
            talk_time: Duration::from_millis(20),
        }
    }

    pub fn answer_after(answer_after: Duration, talk_time: Duration) -> Self {
        CallScript::Answer {
            answer_after,
            talk_time,
        }
    }
}

#[derive(Debug, Clone)]
struct CancelRecord {
    at: Instant,
    was_in_progress: bool,
}

#[derive(Debug, Clone)]
struct MockCall {
    call_id: ExternalCallId,
    to_number: String,
    script: CallScript,
    placed_at: Instant,
    cancelled: Option<CancelRecord>,
    summary: Option<String>,
}

impl MockCall {
    /// Phase of this leg's timeline at `now`.
    fn status_at(&self, now: Instant) -> CallStatusUpdate {
        let (state, outcome, duration_seconds) = self.phase(now);
        CallStatusUpdate {
            call_id: self.call_id.clone(),
            state,
            outcome,
            duration_seconds,
            summary: if state == CallState::Ended && outcome == Some(CallOutcome::Answered) {
                self.summary.clone()
            } else {
                None
            },
        }
    }

    fn phase(&self, now: Instant) -> (CallState, Option<CallOutcome>, Option<u32>) {
        if let Some(cancel) = &self.cancelled {
            if cancel.was_in_progress {
                let connected = match self.script {
                    CallScript::Answer { answer_after, .. } => {
                        cancel.at.saturating_duration_since(self.placed_at + answer_after)
                    }
                    _ => Duration::ZERO,
                };
                return (
                    CallState::Ended,
                    Some(CallOutcome::Answered),
                    Some(connected.as_secs() as u32),
                );
            }
            return (CallState::Ended, Some(CallOutcome::NoAnswer), None);
        }

        let elapsed = now.saturating_duration_since(self.placed_at);
        match self.script {
            CallScript::Answer {
                answer_after,
                talk_time,
            } => {
                if elapsed < answer_after {
                    (CallState::Ringing, None, None)
                } else if elapsed < answer_after + talk_time {
                    (CallState::InProgress, None, None)
                } else {
                    (
                        CallState::Ended,
                        Some(CallOutcome::Answered),
                        Some(talk_time.as_secs() as u32),
                    )
                }
            }
            CallScript::Busy => (CallState::Ended, Some(CallOutcome::Busy), None),
            CallScript::NoAnswer => (CallState::Ringing, None, None),
            // Rejected placements never become calls.
            CallScript::RejectPlacement => (CallState::Failed, Some(CallOutcome::Failed), None),
            CallScript::FailAfter(after) => {
                if elapsed < after {
                    (CallState::Ringing, None, None)
                } else {
                    (CallState::Failed, Some(CallOutcome::Failed), None)
                }
            }
        }
    }

    fn is_terminal_at(&self, now: Instant) -> bool {
        self.phase(now).0.is_terminal()
    }
}

/// In-memory [`VoiceGateway`] with per-number scripts and full observation
/// hooks for assertions.
pub struct MockVoiceGateway {
    calls: DashMap<String, MockCall>,
    scripts: RwLock<HashMap<String, CallScript>>,
    default_script: RwLock<CallScript>,
    /// Successful placements in order, for FIFO and double-dial assertions.
    placement_log: Mutex<Vec<(ExternalCallId, String)>>,
    bridges: Mutex<Vec<(ExternalCallId, ExternalCallId)>>,
    announcements: Mutex<Vec<(ExternalCallId, String)>>,
    max_in_flight: Mutex<usize>,
}

impl MockVoiceGateway {
    pub fn new() -> Self {
        Self {
            calls: DashMap::new(),
            scripts: RwLock::new(HashMap::new()),
            default_script: RwLock::new(CallScript::quick_answer()),
            placement_log: Mutex::new(Vec::new()),
            bridges: Mutex::new(Vec::new()),
            announcements: Mutex::new(Vec::new()),
            max_in_flight: Mutex::new(0),
        }
    }

    /// Script the behavior of every future call to `number`.
    pub fn script_number(&self, number: impl Into<String>, script: CallScript) {
        self.scripts.write().insert(number.into(), script);
    }

    /// Behavior for numbers without an explicit script.
    pub fn set_default_script(&self, script: CallScript) {
        *self.default_script.write() = script;
    }

    /// Summary text attached to answered calls, as an AI provider would
    /// return after the conversation.
    pub fn set_summary_for(&self, number: impl Into<String>, summary: impl Into<String>) {
        let number = number.into();
        let summary = summary.into();
        for mut entry in self.calls.iter_mut() {
            if entry.to_number == number {
                entry.summary = Some(summary.clone());
            }
        }
    }

    /// Pre-register a call the provider already knows about, as if it had
    /// been placed before this process came up. Reconciliation tests use this
    /// to model resolvable orphans.
    pub fn register_call(&self, call_id: ExternalCallId, script: CallScript) {
        let call = MockCall {
            call_id: call_id.clone(),
            to_number: String::new(),
            script,
            placed_at: Instant::now(),
            cancelled: None,
            summary: None,
        };
        self.calls.insert(call_id.0, call);
    }

    fn script_for(&self, number: &str) -> CallScript {
        self.scripts
            .read()
            .get(number)
            .cloned()
            .unwrap_or_else(|| self.default_script.read().clone())
    }

    fn in_flight_at(&self, now: Instant) -> usize {
        self.calls
            .iter()
            .filter(|entry| !entry.is_terminal_at(now))
            .count()
    }

    // ---- observation hooks for tests ----

    /// All successful placements, oldest first.
    pub fn placements(&self) -> Vec<(ExternalCallId, String)> {
        self.placement_log.lock().clone()
    }

    pub fn placement_count(&self) -> usize {
        self.placement_log.lock().len()
    }

    pub fn placements_to(&self, number: &str) -> usize {
        self.placement_log
            .lock()
            .iter()
            .filter(|(_, n)| n == number)
            .count()
    }

    /// Highest number of simultaneously live legs ever observed.
    pub fn max_in_flight(&self) -> usize {
        *self.max_in_flight.lock()
    }

    pub fn bridged_pairs(&self) -> Vec<(ExternalCallId, ExternalCallId)> {
        self.bridges.lock().clone()
    }

    pub fn announcements_for(&self, call_id: &ExternalCallId) -> Vec<String> {
        self.announcements
            .lock()
            .iter()
            .filter(|(id, _)| id == call_id)
            .map(|(_, msg)| msg.clone())
            .collect()
    }

    pub fn was_cancelled(&self, call_id: &ExternalCallId) -> bool {
        self.calls
            .get(call_id.as_str())
            .map(|call| call.cancelled.is_some())
            .unwrap_or(false)
    }
}

impl Default for MockVoiceGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VoiceGateway for MockVoiceGateway {
    async fn place_call(&self, request: PlaceCallRequest) -> GatewayResult<ExternalCallId> {
        if request.to_number.trim().is_empty() {
            return Err(GatewayError::invalid_request("destination number is empty"));
        }

        let script = self.script_for(&request.to_number);
        if matches!(script, CallScript::RejectPlacement) {
            debug!("📞 mock: rejecting placement to {}", request.to_number);
            return Err(GatewayError::placement(format!(
                "provider rejected call to {}",
                request.to_number
            )));
        }

        let call_id = ExternalCallId::generate();
        let now = Instant::now();
        let call = MockCall {
            call_id: call_id.clone(),
            to_number: request.to_number.clone(),
            script,
            placed_at: now,
            cancelled: None,
            summary: None,
        };

        // Log lock held across insert so the in-flight peak is counted
        // consistently under concurrent placement.
        let mut log = self.placement_log.lock();
        self.calls.insert(call_id.0.clone(), call);
        log.push((call_id.clone(), request.to_number.clone()));
        let in_flight = self.in_flight_at(now);
        let mut max = self.max_in_flight.lock();
        if in_flight > *max {
            *max = in_flight;
        }
        drop(max);
        drop(log);

        debug!("📞 mock: placed {} to {}", call_id, request.to_number);
        Ok(call_id)
    }

    async fn call_status(&self, call_id: &ExternalCallId) -> GatewayResult<CallStatusUpdate> {
        let call = self
            .calls
            .get(call_id.as_str())
            .ok_or_else(|| GatewayError::call_not_found(call_id.as_str()))?;
        Ok(call.status_at(Instant::now()))
    }

    async fn cancel_call(&self, call_id: &ExternalCallId) -> GatewayResult<()> {
        let now = Instant::now();
        let mut call = self
            .calls
            .get_mut(call_id.as_str())
            .ok_or_else(|| GatewayError::call_not_found(call_id.as_str()))?;

        if call.is_terminal_at(now) {
            // Cancelling an already-ended leg is an ack, the race is normal.
            return Ok(());
        }

        let was_in_progress = call.phase(now).0 == CallState::InProgress;
        call.cancelled = Some(CancelRecord {
            at: now,
            was_in_progress,
        });
        debug!("📞 mock: cancelled {}", call_id);
        Ok(())
    }

    async fn bridge_calls(
        &self,
        call_id: &ExternalCallId,
        peer_call_id: &ExternalCallId,
    ) -> GatewayResult<()> {
        let now = Instant::now();
        for id in [call_id, peer_call_id] {
            let call = self
                .calls
                .get(id.as_str())
                .ok_or_else(|| GatewayError::call_not_found(id.as_str()))?;
            if call.is_terminal_at(now) {
                return Err(GatewayError::provider(format!("call {} is not active", id)));
            }
        }
        self.bridges
            .lock()
            .push((call_id.clone(), peer_call_id.clone()));
        debug!("🌉 mock: bridged {} <-> {}", call_id, peer_call_id);
        Ok(())
    }

    async fn play_announcement(
        &self,
        call_id: &ExternalCallId,
        message: &str,
    ) -> GatewayResult<()> {
        let now = Instant::now();
        let call = self
            .calls
            .get(call_id.as_str())
            .ok_or_else(|| GatewayError::call_not_found(call_id.as_str()))?;
        if call.is_terminal_at(now) {
            return Err(GatewayError::provider(format!(
                "call {} is not active",
                call_id
            )));
        }
        self.announcements
            .lock()
            .push((call_id.clone(), message.to_string()));
        Ok(())
    }
}
