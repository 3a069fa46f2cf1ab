//! Configuration for the orchestration engine

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::types::{TransferSettings, TransferSettingsUpdate};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub general: GeneralConfig,
    pub dialer: DialerConfig,
    pub transfer: TransferConfig,
    pub gateway: GatewayConfig,
    pub recovery: RecoveryConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
}

/// Instance identity and fallbacks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    pub instance_name: String,
    /// Caller id used on agent legs during transfers.
    pub default_caller_number: String,
}

/// Campaign dialer loop tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialerConfig {
    /// Upper bound on simultaneously in-flight lead calls per campaign.
    pub max_concurrent_calls: usize,
    /// Fallback wakeup period for campaign runner loops, in milliseconds.
    pub loop_tick_ms: u64,
    /// How often scheduled campaigns are checked for their start time.
    pub schedule_tick_ms: u64,
}

/// Warm transfer cascade tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    pub default_ring_timeout_seconds: u32,
    pub min_ring_timeout_seconds: u32,
    pub max_ring_timeout_seconds: u32,
    pub default_max_attempts: u32,
    pub max_attempts_cap: u32,
    pub max_announcement_chars: usize,
    /// How often a ringing agent leg is polled for state changes.
    pub leg_poll_interval_ms: u64,
}

/// Voice gateway polling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Period between status sweeps over in-flight lead calls.
    pub status_poll_interval_ms: u64,
}

/// Crash reconciliation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Age after which an unresolved in-flight record is failed as orphaned.
    pub orphan_grace_seconds: u64,
    pub sweep_interval_seconds: u64,
    /// Run a reconciliation pass before accepting traffic.
    pub reconcile_on_start: bool,
}

/// Persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub database_path: String,
    pub max_connections: u32,
}

/// HTTP surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    pub enable_cors: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            dialer: DialerConfig::default(),
            transfer: TransferConfig::default(),
            gateway: GatewayConfig::default(),
            recovery: RecoveryConfig::default(),
            database: DatabaseConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            instance_name: "dialcast".to_string(),
            default_caller_number: "+15550100000".to_string(),
        }
    }
}

impl Default for DialerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 1,
            loop_tick_ms: 1000,
            schedule_tick_ms: 1000,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            default_ring_timeout_seconds: 25,
            min_ring_timeout_seconds: 5,
            max_ring_timeout_seconds: 120,
            default_max_attempts: 3,
            max_attempts_cap: 10,
            max_announcement_chars: 500,
            leg_poll_interval_ms: 250,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            status_poll_interval_ms: 1000,
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            orphan_grace_seconds: 180,
            sweep_interval_seconds: 60,
            reconcile_on_start: true,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_path: "dialcast.db".to_string(),
            max_connections: 5,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().unwrap(),
            enable_cors: true,
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.dialer.max_concurrent_calls == 0 {
            return Err(crate::OrchestratorError::configuration(
                "dialer.max_concurrent_calls must be at least 1",
            ));
        }
        if self.transfer.min_ring_timeout_seconds > self.transfer.max_ring_timeout_seconds {
            return Err(crate::OrchestratorError::configuration(
                "transfer ring timeout bounds are inverted",
            ));
        }
        if self.transfer.max_attempts_cap == 0 {
            return Err(crate::OrchestratorError::configuration(
                "transfer.max_attempts_cap must be at least 1",
            ));
        }
        if self.database.max_connections == 0 {
            return Err(crate::OrchestratorError::configuration(
                "database.max_connections must be at least 1",
            ));
        }
        Ok(())
    }
}

impl TransferConfig {
    /// Fold an operator update into current settings, clamping every field
    /// into its allowed range. Out-of-range input is corrected, not rejected.
    pub fn clamp_settings(
        &self,
        current: &TransferSettings,
        update: TransferSettingsUpdate,
    ) -> TransferSettings {
        let ring_timeout_seconds = update
            .ring_timeout_seconds
            .unwrap_or(current.ring_timeout_seconds)
            .clamp(self.min_ring_timeout_seconds, self.max_ring_timeout_seconds);
        let max_attempts = update
            .max_attempts
            .unwrap_or(current.max_attempts)
            .clamp(1, self.max_attempts_cap);
        let announcement_message = match update.announcement_message {
            Some(msg) => {
                let trimmed = msg.trim().to_string();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(truncate_chars(&trimmed, self.max_announcement_chars))
                }
            }
            None => current.announcement_message.clone(),
        };

        TransferSettings {
            assistant_id: current.assistant_id.clone(),
            enabled: update.enabled.unwrap_or(current.enabled),
            ring_timeout_seconds,
            max_attempts,
            announcement_message,
            updated_at: chrono::Utc::now(),
        }
    }

    /// Settings used when an assistant has never been configured.
    pub fn default_settings(&self, assistant_id: crate::types::AssistantId) -> TransferSettings {
        TransferSettings {
            assistant_id,
            enabled: false,
            ring_timeout_seconds: self.default_ring_timeout_seconds,
            max_attempts: self.default_max_attempts,
            announcement_message: None,
            updated_at: chrono::Utc::now(),
        }
    }
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}
