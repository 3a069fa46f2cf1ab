//! # Orchestrator Server
//!
//! This module provides a high-level server wrapper around the orchestration
//! engine: it owns the HTTP API, the gateway status poller, the campaign
//! scheduler, and the orphan sweeper, and manages their complete lifecycle
//! from startup reconciliation through graceful shutdown.
//!
//! ## Overview
//!
//! The server is the deployment entry point. Embedders who only need the
//! engine can construct [`OrchestratorEngine`] directly; everyone else builds
//! an `OrchestratorServer`, which wires the engine to its background loops
//! and serves the operator API. Startup always runs crash reconciliation
//! before the first request is accepted, so a restarted process never dials
//! on top of rows a previous process left in flight.
//!
//! ## Background Tasks
//!
//! - **HTTP API**: axum server on `api.bind_addr`
//! - **Status poller**: polls the gateway for every in-flight call and feeds
//!   the results through the same ingestion path as provider callbacks
//! - **Campaign scheduler**: starts `scheduled` campaigns whose time arrived
//! - **Orphan sweeper**: periodically re-runs the consistency repair so rows
//!   stranded mid-uptime are caught, not just at boot
//!
//! ## Examples
//!
//! ### Basic Server Setup and Operation
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dialcast_call_engine::config::OrchestratorConfig;
//! use dialcast_call_engine::server::OrchestratorServerBuilder;
//! use dialcast_gateway_core::MockVoiceGateway;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = OrchestratorServerBuilder::new()
//!     .with_config(OrchestratorConfig::default())
//!     .with_gateway(Arc::new(MockVoiceGateway::new()))
//!     .with_in_memory_database()
//!     .build()
//!     .await?;
//!
//! server.start().await?;
//! println!("✅ Orchestrator started");
//!
//! // In production you would now call server.run().await to keep it running
//!
//! server.stop().await;
//! println!("🛑 Server stopped gracefully");
//! # Ok(())
//! # }
//! ```
//!
//! ### Production Setup with a Persistent Database
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dialcast_call_engine::config::OrchestratorConfig;
//! use dialcast_call_engine::server::OrchestratorServerBuilder;
//! use dialcast_gateway_core::MockVoiceGateway;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = OrchestratorConfig::default();
//! config.api.bind_addr = "0.0.0.0:8080".parse()?;
//! config.dialer.max_concurrent_calls = 3;
//!
//! let mut server = OrchestratorServerBuilder::new()
//!     .with_config(config)
//!     .with_gateway(Arc::new(MockVoiceGateway::new()))
//!     .with_database_path("/var/lib/dialcast/orchestrator.db".to_string())
//!     .build()
//!     .await?;
//!
//! server.start().await?;
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, sleep};
use tracing::{error, info, warn};

use crate::api;
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::orchestrator::OrchestratorEngine;
use crate::store::CallStore;
use dialcast_gateway_core::VoiceGateway;

/// A complete orchestrator deployment: engine, HTTP API, and background
/// loops under one lifecycle.
pub struct OrchestratorServer {
    engine: Arc<OrchestratorEngine>,
    config: OrchestratorConfig,
    http_handle: Option<JoinHandle<()>>,
    poller_handle: Option<JoinHandle<()>>,
    scheduler_handle: Option<JoinHandle<()>>,
    sweeper_handle: Option<JoinHandle<()>>,
}

impl OrchestratorServer {
    /// Create a server with the given configuration and gateway. A database
    /// path of `None` selects an in-memory store.
    pub async fn new(
        config: OrchestratorConfig,
        gateway: Arc<dyn VoiceGateway>,
        db_path: Option<String>,
    ) -> Result<Self> {
        config.validate()?;

        let store = match &db_path {
            Some(path) => {
                let mut db_config = config.database.clone();
                db_config.database_path = path.clone();
                CallStore::connect(&db_config).await?
            }
            None => CallStore::in_memory().await?,
        };

        let engine = OrchestratorEngine::new(config.clone(), store, gateway);
        info!("✅ Orchestration engine initialized");

        Ok(Self {
            engine,
            config,
            http_handle: None,
            poller_handle: None,
            scheduler_handle: None,
            sweeper_handle: None,
        })
    }

    /// Create a server backed by an in-memory database.
    pub async fn new_in_memory(
        config: OrchestratorConfig,
        gateway: Arc<dyn VoiceGateway>,
    ) -> Result<Self> {
        Self::new(config, gateway, None).await
    }

    /// Reconcile persisted state, then start the API and background loops.
    pub async fn start(&mut self) -> Result<()> {
        self.engine.recover().await?;

        let bind_addr = self.config.api.bind_addr;
        let listener = tokio::net::TcpListener::bind(bind_addr)
            .await
            .map_err(|e| {
                OrchestratorError::internal(format!("binding API to {}: {}", bind_addr, e))
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| OrchestratorError::internal(e.to_string()))?;

        let router = api::router(Arc::clone(&self.engine));
        self.http_handle = Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!("❌ HTTP API exited: {}", e);
            }
        }));
        info!("✅ HTTP API listening on {}", local_addr);

        let engine = Arc::clone(&self.engine);
        let poll_every = Duration::from_millis(self.config.gateway.status_poll_interval_ms.max(50));
        self.poller_handle = Some(tokio::spawn(async move {
            Self::poller_loop(engine, poll_every).await;
        }));

        let engine = Arc::clone(&self.engine);
        let schedule_every = Duration::from_millis(self.config.dialer.schedule_tick_ms.max(50));
        self.scheduler_handle = Some(tokio::spawn(async move {
            Self::scheduler_loop(engine, schedule_every).await;
        }));

        let engine = Arc::clone(&self.engine);
        let sweep_every = Duration::from_secs(self.config.recovery.sweep_interval_seconds.max(1));
        self.sweeper_handle = Some(tokio::spawn(async move {
            Self::sweeper_loop(engine, sweep_every).await;
        }));

        info!("✅ Status poller, campaign scheduler, and orphan sweeper started");
        Ok(())
    }

    /// Stop the API and background loops, abort worker tasks, and close the
    /// database pool.
    pub async fn stop(&mut self) {
        info!("🛑 Stopping orchestrator server...");

        for handle in [
            self.http_handle.take(),
            self.poller_handle.take(),
            self.scheduler_handle.take(),
            self.sweeper_handle.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
            let _ = handle.await;
        }

        self.engine.shutdown();
        self.engine.store().close().await;
        info!("✅ Orchestrator server stopped");
    }

    /// Run the server indefinitely, logging a stats line each minute.
    pub async fn run(&self) -> Result<()> {
        info!("📞 Orchestrator server is running");
        self.display_info();

        loop {
            sleep(Duration::from_secs(60)).await;

            match self.engine.stats().await {
                Ok(stats) => info!(
                    "📊 Stats - Campaigns Running: {}, Leads Calling: {}, Cascades Dialing: {}",
                    stats.campaigns_running, stats.leads_calling, stats.cascades_dialing
                ),
                Err(e) => warn!("⚠️ Stats query failed: {}", e),
            }
        }
    }

    /// Get a reference to the engine (for advanced usage).
    pub fn engine(&self) -> &Arc<OrchestratorEngine> {
        &self.engine
    }

    /// Display server information.
    fn display_info(&self) {
        println!("\n📞 CALL ORCHESTRATOR IS READY!");
        println!("==============================");
        println!("\n🔧 Configuration:");
        println!("  - API Address: {}", self.config.api.bind_addr);
        println!(
            "  - Concurrent Calls: {}",
            self.config.dialer.max_concurrent_calls
        );
        println!(
            "  - Ring Timeout: {}s",
            self.config.transfer.default_ring_timeout_seconds
        );
        println!("\n📋 How to Test:");
        println!("  1. POST /campaigns/{{id}}/start to begin dialing");
        println!("  2. GET  /campaigns/{{id}} to watch the counters advance");
        println!("  3. PUT  /assistants/{{id}}/transfer-settings to enable transfers");
        println!("  4. POST /transfers with a live call id to fire a cascade");
        println!("  5. GET  /auto-transfer-logs to audit the attempt history");
        println!("\n🛑 Press Ctrl+C to stop the server\n");
    }

    /// Internal poller loop: feed gateway state for in-flight calls through
    /// the ingestion path.
    async fn poller_loop(engine: Arc<OrchestratorEngine>, every: Duration) {
        info!("📡 Starting gateway status poller ({:?} interval)", every);
        let mut ticker = interval(every);
        loop {
            ticker.tick().await;
            if let Err(e) = engine.poll_active_calls().await {
                error!("Status poll failed: {}", e);
            }
        }
    }

    /// Internal scheduler loop: start scheduled campaigns whose time came.
    async fn scheduler_loop(engine: Arc<OrchestratorEngine>, every: Duration) {
        info!("⏰ Starting campaign scheduler ({:?} interval)", every);
        let mut ticker = interval(every);
        loop {
            ticker.tick().await;
            if let Err(e) = engine.start_due_campaigns().await {
                error!("Scheduler pass failed: {}", e);
            }
        }
    }

    /// Internal sweeper loop: repair rows orphaned while the process is up.
    async fn sweeper_loop(engine: Arc<OrchestratorEngine>, every: Duration) {
        info!("🔄 Starting orphan sweeper ({:?} interval)", every);
        let mut ticker = interval(every);
        loop {
            ticker.tick().await;
            if let Err(e) = engine.sweep_orphans().await {
                error!("Orphan sweep failed: {}", e);
            }
        }
    }
}

/// Builder for [`OrchestratorServer`] with a fluent API.
pub struct OrchestratorServerBuilder {
    config: Option<OrchestratorConfig>,
    gateway: Option<Arc<dyn VoiceGateway>>,
    db_path: Option<String>,
}

impl OrchestratorServerBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            gateway: None,
            db_path: None,
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the voice gateway the engine dials through.
    pub fn with_gateway(mut self, gateway: Arc<dyn VoiceGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Set the database path.
    pub fn with_database_path(mut self, path: String) -> Self {
        self.db_path = Some(path);
        self
    }

    /// Use an in-memory database.
    pub fn with_in_memory_database(mut self) -> Self {
        self.db_path = None;
        self
    }

    /// Build the server.
    pub async fn build(self) -> Result<OrchestratorServer> {
        let config = self.config.unwrap_or_default();
        let gateway = self.gateway.ok_or_else(|| {
            OrchestratorError::configuration("voice gateway not provided".to_string())
        })?;

        OrchestratorServer::new(config, gateway, self.db_path).await
    }
}

impl Default for OrchestratorServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
