//! Campaign Server Example
//!
//! This example runs a complete orchestrator against the scripted mock
//! gateway:
//! 1. Seeds a campaign with demo leads (answer, busy, and failing numbers)
//! 2. Seeds a two-agent transfer roster and enables transfers
//! 3. Starts the campaign and serves the HTTP API
//!
//! Try `curl localhost:8080/campaigns/<id>` while it runs to watch the
//! counters advance, or POST to `/transfers` to fire a cascade.

use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use dialcast_call_engine::{
    config::OrchestratorConfig,
    server::{OrchestratorServer, OrchestratorServerBuilder},
    types::{AssistantId, NewAgent, NewCampaign, NewLead, TransferSettingsUpdate},
};
use dialcast_gateway_core::{CallScript, MockVoiceGateway};

#[derive(Parser, Debug)]
#[command(name = "campaign_server")]
#[command(about = "Run a demo orchestrator with a scripted mock gateway")]
struct Args {
    /// Address for the HTTP API
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Concurrent outbound calls for the demo campaign
    #[arg(long, default_value_t = 2)]
    concurrency: usize,

    /// Database file path (in-memory when omitted)
    #[arg(long)]
    database: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    let args = Args::parse();
    info!("🚀 Starting Campaign Server demo");

    // Step 1: Script the mock gateway
    let gateway = Arc::new(MockVoiceGateway::new());
    script_demo_numbers(&gateway);
    info!("✅ Mock gateway scripted");

    // Step 2: Configure the orchestrator
    let mut config = OrchestratorConfig::default();
    config.api.bind_addr = args.bind;
    config.dialer.max_concurrent_calls = args.concurrency.max(1);
    config.transfer.default_ring_timeout_seconds = 10;

    // Step 3: Build the server
    let mut server = match &args.database {
        Some(path) => {
            OrchestratorServerBuilder::new()
                .with_config(config)
                .with_gateway(gateway.clone())
                .with_database_path(path.clone())
                .build()
                .await?
        }
        None => {
            OrchestratorServerBuilder::new()
                .with_config(config)
                .with_gateway(gateway.clone())
                .with_in_memory_database()
                .build()
                .await?
        }
    };

    // Step 4: Seed the demo campaign and roster
    let campaign_id = seed_demo_campaign(&server).await?;
    seed_demo_roster(&server).await?;

    // Step 5: Start serving and dialing
    server.start().await?;
    server.engine().start_campaign(&campaign_id).await?;
    info!("✅ Campaign {} started", campaign_id);

    println!("\n👀 Watch it dial:");
    println!("  curl http://{}/campaigns/{}", args.bind, campaign_id);
    println!("  curl http://{}/campaigns/{}/leads", args.bind, campaign_id);
    println!("  curl http://{}/auto-transfer-logs", args.bind);

    // Keep the server running
    server.run().await?;
    Ok(())
}

/// Script answer, busy, no-answer, and rejected numbers so the campaign
/// shows every disposition.
fn script_demo_numbers(gateway: &MockVoiceGateway) {
    gateway.script_number(
        "+15550200001",
        CallScript::answer_after(Duration::from_secs(2), Duration::from_secs(8)),
    );
    gateway.script_number(
        "+15550200002",
        CallScript::answer_after(Duration::from_secs(1), Duration::from_secs(15)),
    );
    gateway.script_number("+15550200003", CallScript::Busy);
    gateway.script_number("+15550200004", CallScript::RejectPlacement);
    gateway.script_number(
        "+15550200005",
        CallScript::answer_after(Duration::from_secs(3), Duration::from_secs(5)),
    );

    // Transfer roster: first agent never picks up, second one does
    gateway.script_number("+15550300001", CallScript::NoAnswer);
    gateway.script_number(
        "+15550300002",
        CallScript::answer_after(Duration::from_secs(2), Duration::from_secs(120)),
    );
}

async fn seed_demo_campaign(
    server: &OrchestratorServer,
) -> Result<dialcast_call_engine::types::CampaignId, Box<dyn Error>> {
    let engine = server.engine();

    let campaign = engine
        .create_campaign(NewCampaign {
            workspace_id: "ws-demo".to_string(),
            name: "Renewal outreach demo".to_string(),
            assistant_id: AssistantId::from("asst-demo"),
            caller_number: "+15550100000".to_string(),
            scheduled_at: None,
        })
        .await?;

    let leads = vec![
        NewLead::named("+15550200001", "Ada Lovelace"),
        NewLead::named("+15550200002", "Grace Hopper"),
        NewLead::named("+15550200003", "Busy Line"),
        NewLead::named("+15550200004", "Dead Number"),
        NewLead::named("+15550200005", "Katherine Johnson"),
    ];
    let count = leads.len();
    engine.add_leads(&campaign.id, leads).await?;

    info!("📋 Seeded campaign {} with {} leads", campaign.id, count);
    Ok(campaign.id)
}

async fn seed_demo_roster(server: &OrchestratorServer) -> Result<(), Box<dyn Error>> {
    let engine = server.engine();
    let assistant_id = AssistantId::from("asst-demo");

    engine
        .add_agent(NewAgent {
            assistant_id: assistant_id.clone(),
            phone_number: "+15550300001".to_string(),
            display_name: "Front Desk".to_string(),
            priority: 1,
        })
        .await?;
    engine
        .add_agent(NewAgent {
            assistant_id: assistant_id.clone(),
            phone_number: "+15550300002".to_string(),
            display_name: "Escalation Desk".to_string(),
            priority: 2,
        })
        .await?;

    engine
        .update_transfer_settings(
            &assistant_id,
            TransferSettingsUpdate {
                enabled: Some(true),
                ring_timeout_seconds: Some(10),
                max_attempts: Some(3),
                announcement_message: Some(
                    "Warm transfer from the demo assistant.".to_string(),
                ),
            },
        )
        .await?;

    info!("👤 Seeded 2 transfer agents and enabled transfers for {}", assistant_id);
    Ok(())
}
