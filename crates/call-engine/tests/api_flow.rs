//! The HTTP operator surface: status codes, error bodies, and the provider
//! event webhook, all driven through the router without a listener.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use serial_test::serial;
use std::time::Duration;
use tower::ServiceExt;

use common::*;
use dialcast_call_engine::api;
use dialcast_call_engine::prelude::*;
use dialcast_gateway_core::CallScript;

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request should build")
}

fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .expect("request should build")
}

fn send_json(method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            serde_json::to_vec(body).expect("payload should serialize"),
        ))
        .expect("request should build")
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body should collect")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("response should be JSON")
}

#[tokio::test(start_paused = true)]
#[serial]
async fn campaign_lifecycle_over_http() {
    let (engine, _store, gateway) = create_test_engine().await;
    gateway.set_default_script(CallScript::quick_answer());
    let app = api::router(engine.clone());

    let response = app
        .clone()
        .oneshot(get("/health"))
        .await
        .expect("request should route");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");

    let campaign = seed_campaign(&engine, "HTTP wave", &["+15550500001"]).await;

    let response = app
        .clone()
        .oneshot(post_empty(&format!("/campaigns/{}/start", campaign.id)))
        .await
        .expect("request should route");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["campaign_id"], campaign.id.as_str());
    assert_eq!(body["status"], "running");

    run_campaign_to_status(&engine, &campaign.id, CampaignStatus::Completed).await;

    let response = app
        .clone()
        .oneshot(get(&format!("/campaigns/{}", campaign.id)))
        .await
        .expect("request should route");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["calls_completed"], 1);
    assert_eq!(body["calls_answered"], 1);

    let response = app
        .clone()
        .oneshot(get(&format!("/campaigns/{}/leads", campaign.id)))
        .await
        .expect("request should route");
    assert_eq!(response.status(), StatusCode::OK);
    let leads = body_json(response).await;
    assert_eq!(leads.as_array().map(Vec::len), Some(1));
    assert_eq!(leads[0]["call_status"], "completed");
    assert_eq!(leads[0]["phone_number"], "+15550500001");
}

#[tokio::test]
#[serial]
async fn lifecycle_errors_map_to_http_statuses() {
    let (engine, _store, _gateway) = create_test_engine().await;
    let app = api::router(engine.clone());

    let response = app
        .clone()
        .oneshot(get("/campaigns/camp-missing"))
        .await
        .expect("request should route");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"], "not_found");

    let response = app
        .clone()
        .oneshot(post_empty("/campaigns/camp-missing/start"))
        .await
        .expect("request should route");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // On a zero-lead draft every lifecycle command is a state violation.
    let campaign = seed_campaign(&engine, "Empty HTTP wave", &[]).await;
    for action in ["start", "pause", "cancel"] {
        let response = app
            .clone()
            .oneshot(post_empty(&format!("/campaigns/{}/{}", campaign.id, action)))
            .await
            .expect("request should route");
        assert_eq!(response.status(), StatusCode::CONFLICT, "action {action}");
        let body = body_json(response).await;
        assert_eq!(body["error"], "invalid_state");
        assert!(body["message"].as_str().is_some());
    }
}

#[tokio::test]
#[serial]
async fn transfer_settings_round_trip_over_http() {
    let (engine, _store, _gateway) = create_test_engine().await;
    let app = api::router(engine.clone());

    let response = app
        .clone()
        .oneshot(send_json(
            "PUT",
            "/assistants/asst-http/transfer-settings",
            &json!({"enabled": true, "ring_timeout_seconds": 999}),
        ))
        .await
        .expect("request should route");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["assistant_id"], "asst-http");
    assert_eq!(body["enabled"], true);
    // Clamped to the engine ceiling; untouched fields keep their defaults.
    assert_eq!(body["ring_timeout_seconds"], 120);
    assert_eq!(body["max_attempts"], 3);

    let response = app
        .clone()
        .oneshot(get("/assistants/asst-http/transfer-settings"))
        .await
        .expect("request should route");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["enabled"], true);
    assert_eq!(body["ring_timeout_seconds"], 120);

    // An assistant nobody configured reads as the disabled defaults.
    let response = app
        .clone()
        .oneshot(get("/assistants/asst-fresh/transfer-settings"))
        .await
        .expect("request should route");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["enabled"], false);
    assert_eq!(body["ring_timeout_seconds"], 25);
}

#[tokio::test]
#[serial]
async fn transfers_and_audit_log_over_http() {
    let (engine, _store, _gateway) = create_test_engine().await;
    let app = api::router(engine.clone());
    let assistant = AssistantId::from("asst-http");

    // Enabled with an empty roster: every transfer is an instant audit row.
    seed_roster(&engine, &assistant, &[], 10, 3).await;

    let response = app
        .clone()
        .oneshot(send_json(
            "POST",
            "/transfers",
            &json!({"source_call_id": "call-http-1", "assistant_id": "asst-http"}),
        ))
        .await
        .expect("request should route");
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["status"], "failed");
    assert_eq!(body["reason"], "no agents configured");
    let transfer_id = body["transfer_id"]
        .as_str()
        .expect("transfer id should be present")
        .to_string();

    let response = app
        .clone()
        .oneshot(get("/auto-transfer-logs"))
        .await
        .expect("request should route");
    assert_eq!(response.status(), StatusCode::OK);
    let log = body_json(response).await;
    assert_eq!(log.as_array().map(Vec::len), Some(1));

    let response = app
        .clone()
        .oneshot(get("/auto-transfer-logs?assistant_id=asst-other&limit=5"))
        .await
        .expect("request should route");
    let log = body_json(response).await;
    assert_eq!(log.as_array().map(Vec::len), Some(0));

    let response = app
        .clone()
        .oneshot(get(&format!("/auto-transfer-logs/{transfer_id}")))
        .await
        .expect("request should route");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["cascade"]["transfer_id"], transfer_id.as_str());
    assert_eq!(body["attempts"].as_array().map(Vec::len), Some(0));

    let response = app
        .clone()
        .oneshot(get("/auto-transfer-logs/transfer-missing"))
        .await
        .expect("request should route");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Transfers stay opt-in per assistant.
    let response = app
        .clone()
        .oneshot(send_json(
            "POST",
            "/transfers",
            &json!({"source_call_id": "call-http-2", "assistant_id": "asst-disabled"}),
        ))
        .await
        .expect("request should route");
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["error"], "configuration");
}

#[tokio::test(start_paused = true)]
#[serial]
async fn call_event_webhook_applies_once() {
    let (engine, _store, gateway) = create_test_engine().await;
    gateway.script_number(
        "+15550510001",
        CallScript::answer_after(Duration::from_millis(100), Duration::from_secs(600)),
    );
    let app = api::router(engine.clone());

    let campaign = seed_campaign(&engine, "Webhook wave", &["+15550510001"]).await;
    engine
        .start_campaign(&campaign.id)
        .await
        .expect("campaign should start");
    wait_for_placements(&gateway, 1).await;
    let call_id = lead_call_id(&engine, &campaign.id, 0).await;

    let event = json!({
        "state": "ended",
        "outcome": "answered",
        "duration_seconds": 33,
        "summary": "Call wrapped up"
    });
    let uri = format!("/calls/{}/events", call_id);

    let response = app
        .clone()
        .oneshot(send_json("POST", &uri, &event))
        .await
        .expect("request should route");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["result"], "applied");

    // The provider redelivers; the engine absorbs it.
    let response = app
        .clone()
        .oneshot(send_json("POST", &uri, &event))
        .await
        .expect("request should route");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["result"], "duplicate");

    let response = app
        .clone()
        .oneshot(send_json(
            "POST",
            "/calls/call-unknown/events",
            &json!({"state": "ended", "outcome": "failed"}),
        ))
        .await
        .expect("request should route");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["result"], "unmatched");

    let lead = &engine
        .campaign_leads(&campaign.id)
        .await
        .expect("leads fetch should succeed")[0];
    assert_eq!(lead.call_status, LeadCallStatus::Completed);
    assert_eq!(lead.duration_seconds, Some(33));
    assert_eq!(lead.summary.as_deref(), Some("Call wrapped up"));
}
