//! The warm-transfer cascade task.
//!
//! One task per transfer walks the roster snapshot in priority order: open
//! an attempt row, dial the agent, watch the leg under a ring deadline, and
//! either bridge on answer or seal the attempt and move to the next agent.
//! The task is the single writer for its cascade's rows; cancellation (an
//! operator, or the customer leg ending) arrives through the watch channel
//! and is observed within one poll interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::events::EngineEvent;
use crate::orchestrator::core::OrchestratorEngine;
use crate::types::{
    AgentId, AttemptStatus, CascadeStatus, TransferAgent, TransferAttempt, TransferId,
    TransferSettings,
};
use dialcast_gateway_core::{
    CallOutcome, CallState, ExternalCallId, GatewayError, PlaceCallRequest,
};

/// What the ring watch decided for one agent leg.
enum RingOutcome {
    /// Agent picked up; the leg is live.
    Answered,
    /// The leg ended on its own before the deadline.
    Declined(AttemptStatus),
    /// Ring deadline expired with the agent still ringing.
    TimedOut,
    /// Leg state could not be followed; counts as a failed attempt.
    Errored,
    /// Cancellation reached us mid-ring.
    Cancelled(String),
}

pub(crate) async fn run_cascade(
    engine: Arc<OrchestratorEngine>,
    transfer_id: TransferId,
    source_call_id: ExternalCallId,
    roster: Vec<TransferAgent>,
    settings: TransferSettings,
    cancel: watch::Receiver<Option<String>>,
) {
    drive_cascade(
        &engine,
        &transfer_id,
        &source_call_id,
        roster,
        settings,
        cancel,
    )
    .await;
    engine.finish_cascade(&transfer_id);
}

async fn drive_cascade(
    engine: &Arc<OrchestratorEngine>,
    transfer_id: &TransferId,
    source_call_id: &ExternalCallId,
    roster: Vec<TransferAgent>,
    settings: TransferSettings,
    mut cancel: watch::Receiver<Option<String>>,
) {
    let ring_timeout = Duration::from_secs(u64::from(settings.ring_timeout_seconds));
    let poll_interval =
        Duration::from_millis(engine.config().transfer.leg_poll_interval_ms.max(10));
    let caller_number = engine.config().general.default_caller_number.clone();
    let max_attempts = settings.max_attempts as usize;
    let roster_len = roster.len();

    info!(
        "🎯 Cascade {} dialing up to {} of {} agents (ring {}s)",
        transfer_id,
        max_attempts.min(roster_len),
        roster_len,
        settings.ring_timeout_seconds
    );

    let mut attempts_made = 0usize;

    for agent in roster.into_iter().take(max_attempts) {
        let cancel_reason = cancel.borrow().clone();
        if let Some(reason) = cancel_reason {
            finish(engine, transfer_id, CascadeStatus::Cancelled, Some(&reason), None).await;
            return;
        }

        let attempt = match engine.store().begin_attempt(transfer_id, &agent).await {
            Ok(attempt) => attempt,
            Err(e) => {
                // The cascade was resolved out from under us.
                debug!("Cascade {} could not open attempt: {}", transfer_id, e);
                return;
            }
        };
        attempts_made += 1;

        let request = PlaceCallRequest::agent_call(&agent.phone_number, &caller_number)
            .with_metadata("transfer_id", transfer_id.as_str())
            .with_metadata("attempt_id", attempt.id.as_str());

        let leg = match engine.gateway().place_call(request).await {
            Ok(leg) => leg,
            Err(e) => {
                warn!(
                    "❌ Attempt #{} of {}: placing agent leg to {} failed: {}",
                    attempt.attempt_number, transfer_id, agent.phone_number, e
                );
                seal_attempt(engine, &attempt, AttemptStatus::Failed).await;
                continue;
            }
        };

        if let Err(e) = engine.store().attach_attempt_call(&attempt.id, &leg).await {
            warn!(
                "⚠️ Attempt #{} of {} lost before leg attach ({}), cancelling {}",
                attempt.attempt_number, transfer_id, e, leg
            );
            cancel_leg(engine, &leg).await;
            return;
        }

        let outcome = watch_ring(
            engine,
            source_call_id,
            &leg,
            ring_timeout,
            poll_interval,
            &mut cancel,
        )
        .await;

        match outcome {
            RingOutcome::Answered => {
                info!(
                    "✅ Agent {} answered attempt #{} of {}",
                    agent.display_name, attempt.attempt_number, transfer_id
                );
                if bridge_answered_leg(engine, transfer_id, source_call_id, &leg, &settings).await {
                    seal_attempt(engine, &attempt, AttemptStatus::Answered).await;
                    finish(
                        engine,
                        transfer_id,
                        CascadeStatus::Connected,
                        None,
                        Some(&agent.id),
                    )
                    .await;
                    return;
                }
                // Bridge or announcement failed; the agent leg is gone and
                // the cascade moves on.
                seal_attempt(engine, &attempt, AttemptStatus::Failed).await;
            }
            RingOutcome::Declined(status) => {
                info!(
                    "📵 Attempt #{} of {} ended: {} ({})",
                    attempt.attempt_number, transfer_id, status, agent.display_name
                );
                seal_attempt(engine, &attempt, status).await;
            }
            RingOutcome::TimedOut => {
                info!(
                    "⏰ Attempt #{} of {} rang out after {}s ({})",
                    attempt.attempt_number,
                    transfer_id,
                    settings.ring_timeout_seconds,
                    agent.display_name
                );
                cancel_leg(engine, &leg).await;
                seal_attempt(engine, &attempt, AttemptStatus::NoAnswer).await;
            }
            RingOutcome::Errored => {
                warn!(
                    "❌ Attempt #{} of {}: lost track of agent leg {}",
                    attempt.attempt_number, transfer_id, leg
                );
                cancel_leg(engine, &leg).await;
                seal_attempt(engine, &attempt, AttemptStatus::Failed).await;
            }
            RingOutcome::Cancelled(reason) => {
                info!(
                    "🛑 Cascade {} cancelled mid-ring at attempt #{}: {}",
                    transfer_id, attempt.attempt_number, reason
                );
                cancel_leg(engine, &leg).await;
                seal_attempt(engine, &attempt, AttemptStatus::NoAnswer).await;
                finish(engine, transfer_id, CascadeStatus::Cancelled, Some(&reason), None).await;
                return;
            }
        }
    }

    // Roster walk ended without a connection.
    let reason = if roster_len > attempts_made {
        "max transfer attempts reached"
    } else {
        "all agents unavailable"
    };
    finish(engine, transfer_id, CascadeStatus::Failed, Some(reason), None).await;
}

/// Follow one agent leg until it answers, ends, errors, times out, or the
/// cascade is cancelled. Also watches the customer leg: if it goes terminal
/// the cascade self-cancels rather than bridging into a dead call.
async fn watch_ring(
    engine: &Arc<OrchestratorEngine>,
    source_call_id: &ExternalCallId,
    leg: &ExternalCallId,
    ring_timeout: Duration,
    poll_interval: Duration,
    cancel: &mut watch::Receiver<Option<String>>,
) -> RingOutcome {
    let deadline = Instant::now() + ring_timeout;

    loop {
        if let Some(reason) = cancel.borrow().clone() {
            return RingOutcome::Cancelled(reason);
        }

        match engine.gateway().call_status(source_call_id).await {
            Ok(update) if update.state.is_terminal() => {
                return RingOutcome::Cancelled("customer call ended".to_string());
            }
            Err(GatewayError::CallNotFound(_)) => {
                return RingOutcome::Cancelled("customer call ended".to_string());
            }
            Ok(_) => {}
            Err(e) => {
                debug!("Source call {} status check failed: {}", source_call_id, e);
            }
        }

        match engine.gateway().call_status(leg).await {
            Ok(update) => match update.state {
                CallState::InProgress => return RingOutcome::Answered,
                CallState::Ended => {
                    let status = match update.outcome {
                        Some(CallOutcome::Busy) => AttemptStatus::Busy,
                        _ => AttemptStatus::NoAnswer,
                    };
                    return RingOutcome::Declined(status);
                }
                CallState::Failed => return RingOutcome::Errored,
                CallState::Queued | CallState::Ringing => {}
            },
            Err(e) => {
                warn!("Agent leg {} status check failed: {}", leg, e);
                return RingOutcome::Errored;
            }
        }

        if Instant::now() >= deadline {
            return RingOutcome::TimedOut;
        }

        tokio::select! {
            changed = cancel.changed() => {
                if changed.is_err() {
                    tokio::time::sleep(poll_interval).await;
                }
            }
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
}

/// Announce (when configured) and bridge the answered agent leg to the
/// customer. Returns false after tearing the leg down on any failure.
async fn bridge_answered_leg(
    engine: &Arc<OrchestratorEngine>,
    transfer_id: &TransferId,
    source_call_id: &ExternalCallId,
    leg: &ExternalCallId,
    settings: &TransferSettings,
) -> bool {
    if let Some(message) = &settings.announcement_message {
        if let Err(e) = engine.gateway().play_announcement(leg, message).await {
            warn!(
                "⚠️ Announcement to agent leg {} failed for {}: {}",
                leg, transfer_id, e
            );
            cancel_leg(engine, leg).await;
            return false;
        }
    }

    match engine.gateway().bridge_calls(source_call_id, leg).await {
        Ok(()) => {
            info!(
                "🌉 Transfer {} bridged: customer {} with agent leg {}",
                transfer_id, source_call_id, leg
            );
            true
        }
        Err(e) => {
            warn!("❌ Bridge failed for {}: {}", transfer_id, e);
            cancel_leg(engine, leg).await;
            false
        }
    }
}

async fn seal_attempt(
    engine: &Arc<OrchestratorEngine>,
    attempt: &TransferAttempt,
    status: AttemptStatus,
) {
    let duration = (chrono::Utc::now() - attempt.started_at).num_seconds().max(0);
    match engine
        .store()
        .seal_attempt(&attempt.id, status, Some(duration))
        .await
    {
        Ok(true) => {
            engine.events().publish(EngineEvent::TransferAttemptSealed {
                transfer_id: attempt.transfer_id.clone(),
                attempt_number: attempt.attempt_number,
                agent_id: attempt.agent_id.clone(),
                status,
                at: chrono::Utc::now(),
            });
        }
        Ok(false) => {
            debug!(
                "Attempt #{} of {} was already sealed",
                attempt.attempt_number, attempt.transfer_id
            );
        }
        Err(e) => {
            warn!(
                "⚠️ Sealing attempt #{} of {} failed: {}",
                attempt.attempt_number, attempt.transfer_id, e
            );
        }
    }
}

async fn finish(
    engine: &Arc<OrchestratorEngine>,
    transfer_id: &TransferId,
    status: CascadeStatus,
    reason: Option<&str>,
    connected_agent_id: Option<&AgentId>,
) {
    match engine
        .store()
        .seal_cascade(transfer_id, status, reason, connected_agent_id)
        .await
    {
        Ok(true) => {
            if status == CascadeStatus::Connected {
                info!("🎉 Transfer {} connected", transfer_id);
            }
            engine.events().publish(EngineEvent::TransferFinished {
                transfer_id: transfer_id.clone(),
                status,
                at: chrono::Utc::now(),
            });
        }
        Ok(false) => {
            debug!("Cascade {} was already terminal", transfer_id);
        }
        Err(e) => {
            warn!("⚠️ Sealing cascade {} failed: {}", transfer_id, e);
        }
    }
}

async fn cancel_leg(engine: &Arc<OrchestratorEngine>, leg: &ExternalCallId) {
    if let Err(e) = engine.gateway().cancel_call(leg).await {
        debug!("Cancel of agent leg {} failed: {}", leg, e);
    }
}
