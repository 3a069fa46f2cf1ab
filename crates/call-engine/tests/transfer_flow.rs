//! Warm transfer cascades end to end: priority dialing, ring timeouts,
//! bridging, cancellation, and the attempt audit trail.

mod common;

use std::time::Duration;

use serial_test::serial;

use common::*;
use dialcast_call_engine::prelude::*;
use dialcast_gateway_core::CallScript;

const ASSISTANT: &str = "asst-support";

/// A customer call that stays up for the whole test.
fn register_live_source(gateway: &MockVoiceGateway, call_id: &str) -> ExternalCallId {
    let id = ExternalCallId::from(call_id);
    gateway.register_call(
        id.clone(),
        CallScript::answer_after(Duration::ZERO, Duration::from_secs(3600)),
    );
    id
}

#[tokio::test(start_paused = true)]
#[serial]
async fn cascade_rings_down_the_roster_and_bridges_the_answer() {
    let (engine, _store, gateway) = create_test_engine().await;
    let assistant = AssistantId::from(ASSISTANT);

    // Roster inserted out of order; priority decides the dial order.
    gateway.script_number("+15550300002", CallScript::NoAnswer);
    gateway.script_number(
        "+15550300001",
        CallScript::answer_after(Duration::from_secs(1), Duration::from_secs(600)),
    );
    let roster = seed_roster(
        &engine,
        &assistant,
        &[
            ("+15550300002", "Backup desk", 2),
            ("+15550300001", "Front desk", 1),
        ],
        5,
        3,
    )
    .await;
    let source = register_live_source(&gateway, "call-cust-100");

    let cascade = engine
        .start_transfer(&assistant, &source)
        .await
        .expect("transfer should start");
    assert_eq!(cascade.status, CascadeStatus::Dialing);

    let done = wait_for_cascade_end(&engine, &cascade.transfer_id).await;
    assert_eq!(done.status, CascadeStatus::Connected);
    assert_eq!(done.connected_agent_id.as_ref(), Some(&roster[1].id));
    assert!(done.ended_at.is_some());

    let (_, attempts) = engine
        .transfer_detail(&cascade.transfer_id)
        .await
        .expect("transfer detail should succeed");
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].attempt_number, 1);
    assert_eq!(attempts[0].agent_number, "+15550300002");
    assert_eq!(attempts[0].status, AttemptStatus::NoAnswer);
    assert!(attempts[0].ended_at.is_some());
    assert_eq!(attempts[1].attempt_number, 2);
    assert_eq!(attempts[1].agent_number, "+15550300001");
    assert_eq!(attempts[1].status, AttemptStatus::Answered);

    // The timed-out leg was torn down; the answered one was announced to
    // and then bridged with the customer.
    let dialed = gateway.placements();
    assert_eq!(dialed.len(), 2);
    assert_eq!(dialed[0].1, "+15550300002");
    assert_eq!(dialed[1].1, "+15550300001");
    assert!(gateway.was_cancelled(&dialed[0].0));
    assert!(!gateway.was_cancelled(&dialed[1].0));
    assert_eq!(
        gateway.announcements_for(&dialed[1].0),
        vec!["Transferring a customer to you now"]
    );
    assert_eq!(
        gateway.bridged_pairs(),
        vec![(source.clone(), dialed[1].0.clone())]
    );
}

#[tokio::test(start_paused = true)]
#[serial]
async fn unavailable_roster_exhausts_as_failed() {
    let (engine, _store, gateway) = create_test_engine().await;
    let assistant = AssistantId::from(ASSISTANT);

    gateway.script_number("+15550301001", CallScript::NoAnswer);
    gateway.script_number("+15550301002", CallScript::Busy);
    seed_roster(
        &engine,
        &assistant,
        &[
            ("+15550301001", "First line", 1),
            ("+15550301002", "Second line", 2),
        ],
        5,
        5,
    )
    .await;
    let source = register_live_source(&gateway, "call-cust-101");

    let cascade = engine
        .start_transfer(&assistant, &source)
        .await
        .expect("transfer should start");
    let done = wait_for_cascade_end(&engine, &cascade.transfer_id).await;

    assert_eq!(done.status, CascadeStatus::Failed);
    assert_eq!(done.reason.as_deref(), Some("all agents unavailable"));
    assert!(done.connected_agent_id.is_none());

    let (_, attempts) = engine
        .transfer_detail(&cascade.transfer_id)
        .await
        .expect("transfer detail should succeed");
    let statuses: Vec<AttemptStatus> = attempts.iter().map(|a| a.status).collect();
    assert_eq!(statuses, vec![AttemptStatus::NoAnswer, AttemptStatus::Busy]);
    assert!(gateway.bridged_pairs().is_empty());
}

#[tokio::test(start_paused = true)]
#[serial]
async fn attempt_cap_cuts_the_cascade_short() {
    let (engine, _store, gateway) = create_test_engine().await;
    let assistant = AssistantId::from(ASSISTANT);

    gateway.set_default_script(CallScript::Busy);
    seed_roster(
        &engine,
        &assistant,
        &[
            ("+15550302001", "Desk 1", 1),
            ("+15550302002", "Desk 2", 2),
            ("+15550302003", "Desk 3", 3),
        ],
        5,
        2,
    )
    .await;
    let source = register_live_source(&gateway, "call-cust-102");

    let cascade = engine
        .start_transfer(&assistant, &source)
        .await
        .expect("transfer should start");
    let done = wait_for_cascade_end(&engine, &cascade.transfer_id).await;

    assert_eq!(done.status, CascadeStatus::Failed);
    assert_eq!(done.reason.as_deref(), Some("max transfer attempts reached"));

    let (_, attempts) = engine
        .transfer_detail(&cascade.transfer_id)
        .await
        .expect("transfer detail should succeed");
    assert_eq!(attempts.len(), 2);
    assert_eq!(gateway.placement_count(), 2);
}

#[tokio::test]
#[serial]
async fn empty_roster_fails_without_dialing() {
    let (engine, _store, gateway) = create_test_engine().await;
    let assistant = AssistantId::from(ASSISTANT);

    // Transfers enabled, nobody on the roster.
    seed_roster(&engine, &assistant, &[], 10, 3).await;

    let source = ExternalCallId::from("call-cust-103");
    let cascade = engine
        .start_transfer(&assistant, &source)
        .await
        .expect("transfer should record its immediate failure");
    assert_eq!(cascade.status, CascadeStatus::Failed);
    assert_eq!(cascade.reason.as_deref(), Some("no agents configured"));
    assert!(cascade.ended_at.is_some());

    let (_, attempts) = engine
        .transfer_detail(&cascade.transfer_id)
        .await
        .expect("transfer detail should succeed");
    assert!(attempts.is_empty());
    assert_eq!(gateway.placement_count(), 0);
}

#[tokio::test]
#[serial]
async fn disabled_transfers_record_nothing() {
    let (engine, _store, _gateway) = create_test_engine().await;
    let assistant = AssistantId::from(ASSISTANT);

    let source = ExternalCallId::from("call-cust-104");
    let err = engine
        .start_transfer(&assistant, &source)
        .await
        .expect_err("transfers default to disabled");
    assert!(matches!(err, OrchestratorError::Configuration(_)));

    let log = engine
        .transfer_log(None, 10)
        .await
        .expect("transfer log should succeed");
    assert!(log.is_empty());
}

#[tokio::test(start_paused = true)]
#[serial]
async fn cancel_during_ring_seals_the_cascade_cancelled() {
    let (engine, _store, gateway) = create_test_engine().await;
    let assistant = AssistantId::from(ASSISTANT);

    gateway.script_number("+15550303001", CallScript::NoAnswer);
    seed_roster(&engine, &assistant, &[("+15550303001", "Desk", 1)], 60, 3).await;
    let source = register_live_source(&gateway, "call-cust-105");

    let cascade = engine
        .start_transfer(&assistant, &source)
        .await
        .expect("transfer should start");

    // Let the first leg start ringing before the operator gives up.
    tokio::time::sleep(Duration::from_millis(600)).await;
    engine
        .cancel_transfer(&cascade.transfer_id, "operator requested")
        .await
        .expect("cancel of a dialing cascade should be accepted");

    let done = wait_for_cascade_end(&engine, &cascade.transfer_id).await;
    assert_eq!(done.status, CascadeStatus::Cancelled);
    assert_eq!(done.reason.as_deref(), Some("operator requested"));
    assert!(done.connected_agent_id.is_none());

    let (_, attempts) = engine
        .transfer_detail(&cascade.transfer_id)
        .await
        .expect("transfer detail should succeed");
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].status, AttemptStatus::NoAnswer);
    assert!(gateway.was_cancelled(&gateway.placements()[0].0));

    // A second cancel finds the cascade already resolved.
    let err = engine
        .cancel_transfer(&cascade.transfer_id, "again")
        .await
        .expect_err("cancel of a resolved cascade must be rejected");
    assert!(matches!(err, OrchestratorError::InvalidState(_)));
}

#[tokio::test(start_paused = true)]
#[serial]
async fn customer_hangup_cancels_the_cascade() {
    let (engine, _store, gateway) = create_test_engine().await;
    let assistant = AssistantId::from(ASSISTANT);

    gateway.script_number("+15550304001", CallScript::NoAnswer);
    seed_roster(&engine, &assistant, &[("+15550304001", "Desk", 1)], 60, 3).await;

    // The customer call ends three seconds in, mid-ring.
    let source = ExternalCallId::from("call-cust-106");
    gateway.register_call(
        source.clone(),
        CallScript::answer_after(Duration::ZERO, Duration::from_secs(3)),
    );

    let cascade = engine
        .start_transfer(&assistant, &source)
        .await
        .expect("transfer should start");
    let done = wait_for_cascade_end(&engine, &cascade.transfer_id).await;

    assert_eq!(done.status, CascadeStatus::Cancelled);
    assert_eq!(done.reason.as_deref(), Some("customer call ended"));

    let (_, attempts) = engine
        .transfer_detail(&cascade.transfer_id)
        .await
        .expect("transfer detail should succeed");
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].status, AttemptStatus::NoAnswer);
    assert!(gateway.was_cancelled(&gateway.placements()[0].0));
    assert!(gateway.bridged_pairs().is_empty());
}

#[tokio::test(start_paused = true)]
#[serial]
async fn source_terminal_event_cancels_via_ingest() {
    let (engine, _store, gateway) = create_test_engine().await;
    let assistant = AssistantId::from(ASSISTANT);

    gateway.script_number("+15550305001", CallScript::NoAnswer);
    seed_roster(&engine, &assistant, &[("+15550305001", "Desk", 1)], 60, 3).await;
    let source = register_live_source(&gateway, "call-cust-107");

    let cascade = engine
        .start_transfer(&assistant, &source)
        .await
        .expect("transfer should start");
    tokio::time::sleep(Duration::from_millis(500)).await;

    // The provider reports the customer call over before the mock timeline
    // says so; the ingest path must cancel the cascade.
    let update = CallStatusUpdate {
        call_id: source.clone(),
        state: CallState::Ended,
        outcome: Some(CallOutcome::Answered),
        duration_seconds: Some(12),
        summary: None,
    };
    assert_eq!(
        engine
            .ingest_update(update)
            .await
            .expect("source hangup event should apply"),
        ApplyOutcome::Applied
    );

    let done = wait_for_cascade_end(&engine, &cascade.transfer_id).await;
    assert_eq!(done.status, CascadeStatus::Cancelled);
    assert_eq!(done.reason.as_deref(), Some("customer call ended"));
}

#[tokio::test]
#[serial]
async fn settings_updates_clamp_to_engine_bounds() {
    let (engine, _store, _gateway) = create_test_engine().await;
    let assistant = AssistantId::from(ASSISTANT);

    let settings = engine
        .update_transfer_settings(
            &assistant,
            TransferSettingsUpdate {
                enabled: Some(true),
                ring_timeout_seconds: Some(999),
                max_attempts: Some(99),
                announcement_message: Some("   ".to_string()),
            },
        )
        .await
        .expect("settings update should succeed");
    assert!(settings.enabled);
    assert_eq!(settings.ring_timeout_seconds, 120);
    assert_eq!(settings.max_attempts, 10);
    assert_eq!(settings.announcement_message, None);

    // Sparse update: floors apply, untouched fields survive.
    let settings = engine
        .update_transfer_settings(
            &assistant,
            TransferSettingsUpdate {
                ring_timeout_seconds: Some(1),
                max_attempts: Some(0),
                ..Default::default()
            },
        )
        .await
        .expect("settings update should succeed");
    assert!(settings.enabled);
    assert_eq!(settings.ring_timeout_seconds, 5);
    assert_eq!(settings.max_attempts, 1);

    let stored = engine
        .transfer_settings(&assistant)
        .await
        .expect("settings fetch should succeed");
    assert_eq!(stored.ring_timeout_seconds, 5);
    assert_eq!(stored.max_attempts, 1);
}

#[tokio::test]
#[serial]
async fn transfer_log_filters_and_orders_recent_first() {
    let (engine, _store, _gateway) = create_test_engine().await;
    let support = AssistantId::from("asst-support");
    let sales = AssistantId::from("asst-sales");

    // Empty rosters make every transfer an instant audit row.
    seed_roster(&engine, &support, &[], 10, 3).await;
    seed_roster(&engine, &sales, &[], 10, 3).await;

    for call in ["call-log-1", "call-log-2"] {
        engine
            .start_transfer(&support, &ExternalCallId::from(call))
            .await
            .expect("transfer should record");
    }
    engine
        .start_transfer(&sales, &ExternalCallId::from("call-log-3"))
        .await
        .expect("transfer should record");

    let all = engine
        .transfer_log(None, 10)
        .await
        .expect("transfer log should succeed");
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].source_call_id.as_str(), "call-log-3");

    let sales_only = engine
        .transfer_log(Some(&sales), 10)
        .await
        .expect("transfer log should succeed");
    assert_eq!(sales_only.len(), 1);
    assert_eq!(sales_only[0].assistant_id, sales);

    let capped = engine
        .transfer_log(None, 2)
        .await
        .expect("transfer log should succeed");
    assert_eq!(capped.len(), 2);
}
