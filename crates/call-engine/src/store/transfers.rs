//! Transfer rosters, settings, cascades, and the append-only attempt audit.
//!
//! Cascade and attempt rows follow the same sealing discipline as leads: one
//! guarded update moves `dialing` to a terminal status, and a row that is
//! already terminal absorbs nothing further. Attempt numbering is assigned
//! inside the transaction that inserts the row, with a UNIQUE constraint
//! backing the density guarantee.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

use super::{decode_status, CallStore};
use crate::error::{OrchestratorError, Result};
use crate::types::{
    AgentId, AssistantId, AttemptStatus, CascadeStatus, NewAgent, TransferAgent, TransferAttempt,
    TransferCascade, TransferId, TransferSettings,
};
use dialcast_gateway_core::ExternalCallId;

impl TransferAgent {
    fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(TransferAgent {
            seq: row.try_get("seq")?,
            id: AgentId(row.try_get("id")?),
            assistant_id: AssistantId(row.try_get("assistant_id")?),
            phone_number: row.try_get("phone_number")?,
            display_name: row.try_get("display_name")?,
            priority: row.try_get("priority")?,
            is_active: row.try_get("is_active")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TransferSettings {
    fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(TransferSettings {
            assistant_id: AssistantId(row.try_get("assistant_id")?),
            enabled: row.try_get("enabled")?,
            ring_timeout_seconds: row.try_get::<i64, _>("ring_timeout_seconds")? as u32,
            max_attempts: row.try_get::<i64, _>("max_attempts")? as u32,
            announcement_message: row.try_get("announcement_message")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TransferCascade {
    fn from_row(row: &SqliteRow) -> Result<Self> {
        let status_raw: String = row.try_get("status")?;
        let connected: Option<String> = row.try_get("connected_agent_id")?;
        Ok(TransferCascade {
            transfer_id: TransferId(row.try_get("transfer_id")?),
            assistant_id: AssistantId(row.try_get("assistant_id")?),
            source_call_id: ExternalCallId(row.try_get("source_call_id")?),
            status: decode_status("cascade status", &status_raw, CascadeStatus::parse)?,
            reason: row.try_get("reason")?,
            connected_agent_id: connected.map(AgentId),
            started_at: row.try_get("started_at")?,
            ended_at: row.try_get("ended_at")?,
        })
    }
}

impl TransferAttempt {
    fn from_row(row: &SqliteRow) -> Result<Self> {
        let status_raw: String = row.try_get("status")?;
        let external: Option<String> = row.try_get("external_call_id")?;
        Ok(TransferAttempt {
            id: row.try_get("id")?,
            transfer_id: TransferId(row.try_get("transfer_id")?),
            attempt_number: row.try_get("attempt_number")?,
            agent_id: AgentId(row.try_get("agent_id")?),
            agent_number: row.try_get("agent_number")?,
            agent_name: row.try_get("agent_name")?,
            status: decode_status("attempt status", &status_raw, AttemptStatus::parse)?,
            external_call_id: external.map(ExternalCallId),
            started_at: row.try_get("started_at")?,
            ended_at: row.try_get("ended_at")?,
            duration_seconds: row.try_get("duration_seconds")?,
        })
    }
}

const CASCADE_COLUMNS: &str = "transfer_id, assistant_id, source_call_id, status, reason, \
     connected_agent_id, started_at, ended_at";

const ATTEMPT_COLUMNS: &str = "id, transfer_id, attempt_number, agent_id, agent_number, \
     agent_name, status, external_call_id, started_at, ended_at, duration_seconds";

impl CallStore {
    // ========================================================================
    // Roster
    // ========================================================================

    pub async fn add_agent(&self, new: NewAgent) -> Result<TransferAgent> {
        let id = AgentId::new();
        sqlx::query(
            "INSERT INTO transfer_agents (id, assistant_id, phone_number, display_name, \
             priority, is_active, created_at)
             VALUES (?, ?, ?, ?, ?, 1, ?)",
        )
        .bind(id.as_str())
        .bind(new.assistant_id.as_str())
        .bind(&new.phone_number)
        .bind(&new.display_name)
        .bind(new.priority)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        info!(
            "👤 Agent {} ({}) added to roster of {}",
            new.display_name, id, new.assistant_id
        );

        let row = sqlx::query(
            "SELECT seq, id, assistant_id, phone_number, display_name, priority, is_active, \
             created_at FROM transfer_agents WHERE id = ?",
        )
        .bind(id.as_str())
        .fetch_one(&self.pool)
        .await?;
        TransferAgent::from_row(&row)
    }

    pub async fn set_agent_active(&self, agent_id: &AgentId, active: bool) -> Result<()> {
        let result = sqlx::query("UPDATE transfer_agents SET is_active = ? WHERE id = ?")
            .bind(active)
            .bind(agent_id.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(OrchestratorError::not_found(format!("agent {}", agent_id)));
        }
        Ok(())
    }

    /// The active roster in dialing order: priority ascending, insertion
    /// order breaking ties.
    pub async fn active_roster(&self, assistant_id: &AssistantId) -> Result<Vec<TransferAgent>> {
        let rows = sqlx::query(
            "SELECT seq, id, assistant_id, phone_number, display_name, priority, is_active, \
             created_at
             FROM transfer_agents
             WHERE assistant_id = ? AND is_active = 1
             ORDER BY priority ASC, seq ASC",
        )
        .bind(assistant_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(TransferAgent::from_row).collect()
    }

    // ========================================================================
    // Settings
    // ========================================================================

    pub async fn transfer_settings(
        &self,
        assistant_id: &AssistantId,
    ) -> Result<Option<TransferSettings>> {
        let row = sqlx::query(
            "SELECT assistant_id, enabled, ring_timeout_seconds, max_attempts, \
             announcement_message, updated_at
             FROM transfer_settings WHERE assistant_id = ?",
        )
        .bind(assistant_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(TransferSettings::from_row).transpose()
    }

    /// Store settings that have already been clamped by the config layer.
    pub async fn put_transfer_settings(&self, settings: &TransferSettings) -> Result<()> {
        sqlx::query(
            "INSERT INTO transfer_settings (assistant_id, enabled, ring_timeout_seconds, \
             max_attempts, announcement_message, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(assistant_id) DO UPDATE SET
                enabled = excluded.enabled,
                ring_timeout_seconds = excluded.ring_timeout_seconds,
                max_attempts = excluded.max_attempts,
                announcement_message = excluded.announcement_message,
                updated_at = excluded.updated_at",
        )
        .bind(settings.assistant_id.as_str())
        .bind(settings.enabled)
        .bind(settings.ring_timeout_seconds as i64)
        .bind(settings.max_attempts as i64)
        .bind(&settings.announcement_message)
        .bind(settings.updated_at)
        .execute(&self.pool)
        .await?;

        info!(
            "⚙️ Transfer settings stored for {} (enabled={}, ring={}s, attempts={})",
            settings.assistant_id,
            settings.enabled,
            settings.ring_timeout_seconds,
            settings.max_attempts
        );
        Ok(())
    }

    // ========================================================================
    // Cascades
    // ========================================================================

    pub async fn create_cascade(
        &self,
        assistant_id: &AssistantId,
        source_call_id: &ExternalCallId,
    ) -> Result<TransferCascade> {
        let transfer_id = TransferId::new();
        sqlx::query(
            "INSERT INTO transfer_cascades (transfer_id, assistant_id, source_call_id, \
             status, started_at)
             VALUES (?, ?, ?, 'dialing', ?)",
        )
        .bind(transfer_id.as_str())
        .bind(assistant_id.as_str())
        .bind(source_call_id.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        info!(
            "🎯 Transfer cascade {} opened for call {}",
            transfer_id, source_call_id
        );
        self.cascade(&transfer_id).await
    }

    /// Seal a cascade. Returns false when it was already terminal, so
    /// competing finishers (task vs. cancel vs. recovery) collapse to one
    /// winner.
    pub async fn seal_cascade(
        &self,
        transfer_id: &TransferId,
        status: CascadeStatus,
        reason: Option<&str>,
        connected_agent_id: Option<&AgentId>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE transfer_cascades
             SET status = ?, reason = ?, connected_agent_id = ?, ended_at = ?
             WHERE transfer_id = ? AND status = 'dialing'",
        )
        .bind(status.as_str())
        .bind(reason)
        .bind(connected_agent_id.map(|a| a.as_str().to_string()))
        .bind(Utc::now())
        .bind(transfer_id.as_str())
        .execute(&self.pool)
        .await?;

        let sealed = result.rows_affected() > 0;
        if sealed {
            info!(
                "🎯 Transfer cascade {} sealed: {}{}",
                transfer_id,
                status,
                reason.map(|r| format!(" ({r})")).unwrap_or_default()
            );
        } else {
            debug!("Cascade {} already terminal, seal to {} ignored", transfer_id, status);
        }
        Ok(sealed)
    }

    pub async fn cascade(&self, transfer_id: &TransferId) -> Result<TransferCascade> {
        let row = sqlx::query(&format!(
            "SELECT {CASCADE_COLUMNS} FROM transfer_cascades WHERE transfer_id = ?"
        ))
        .bind(transfer_id.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| OrchestratorError::not_found(format!("transfer {}", transfer_id)))?;

        TransferCascade::from_row(&row)
    }

    /// Cascade history, newest first, optionally scoped to one assistant.
    pub async fn cascades(
        &self,
        assistant_id: Option<&AssistantId>,
        limit: i64,
    ) -> Result<Vec<TransferCascade>> {
        let rows = match assistant_id {
            Some(assistant) => {
                sqlx::query(&format!(
                    "SELECT {CASCADE_COLUMNS} FROM transfer_cascades
                     WHERE assistant_id = ? ORDER BY started_at DESC LIMIT ?"
                ))
                .bind(assistant.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {CASCADE_COLUMNS} FROM transfer_cascades
                     ORDER BY started_at DESC LIMIT ?"
                ))
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(TransferCascade::from_row).collect()
    }

    /// Cascades a previous process left mid-dial.
    pub async fn dialing_cascades(&self) -> Result<Vec<TransferCascade>> {
        let rows = sqlx::query(&format!(
            "SELECT {CASCADE_COLUMNS} FROM transfer_cascades WHERE status = 'dialing'"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(TransferCascade::from_row).collect()
    }

    /// The live cascade (if any) whose customer leg is the given call.
    pub async fn dialing_cascade_for_source(
        &self,
        source_call_id: &ExternalCallId,
    ) -> Result<Option<TransferCascade>> {
        let row = sqlx::query(&format!(
            "SELECT {CASCADE_COLUMNS} FROM transfer_cascades
             WHERE source_call_id = ? AND status = 'dialing'"
        ))
        .bind(source_call_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(TransferCascade::from_row).transpose()
    }

    // ========================================================================
    // Attempts
    // ========================================================================

    /// Open the next attempt row for a cascade. The number is allocated
    /// inside the transaction, which together with the UNIQUE constraint
    /// keeps numbering dense and strictly increasing.
    pub async fn begin_attempt(
        &self,
        transfer_id: &TransferId,
        agent: &TransferAgent,
    ) -> Result<TransferAttempt> {
        let mut tx = self.pool.begin().await?;

        let cascade_row = sqlx::query("SELECT status FROM transfer_cascades WHERE transfer_id = ?")
            .bind(transfer_id.as_str())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| OrchestratorError::not_found(format!("transfer {}", transfer_id)))?;
        let cascade_status: String = cascade_row.try_get("status")?;
        if cascade_status != "dialing" {
            return Err(OrchestratorError::invalid_state(format!(
                "cannot open attempt on {} cascade {}",
                cascade_status, transfer_id
            )));
        }

        let row = sqlx::query(
            "SELECT COALESCE(MAX(attempt_number), 0) + 1 AS next
             FROM transfer_attempts WHERE transfer_id = ?",
        )
        .bind(transfer_id.as_str())
        .fetch_one(&mut *tx)
        .await?;
        let attempt_number: i64 = row.try_get("next")?;

        let id = format!("att-{}", Uuid::new_v4());
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO transfer_attempts (id, transfer_id, attempt_number, agent_id, \
             agent_number, agent_name, status, started_at)
             VALUES (?, ?, ?, ?, ?, ?, 'dialing', ?)",
        )
        .bind(&id)
        .bind(transfer_id.as_str())
        .bind(attempt_number)
        .bind(agent.id.as_str())
        .bind(&agent.phone_number)
        .bind(&agent.display_name)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            "📞 Attempt #{} for transfer {}: dialing {} ({})",
            attempt_number, transfer_id, agent.display_name, agent.phone_number
        );
        self.attempt(&id).await
    }

    pub async fn attach_attempt_call(
        &self,
        attempt_id: &str,
        external_call_id: &ExternalCallId,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE transfer_attempts SET external_call_id = ?
             WHERE id = ? AND status = 'dialing'",
        )
        .bind(external_call_id.as_str())
        .bind(attempt_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OrchestratorError::invalid_state(format!(
                "attempt {} is not dialing",
                attempt_id
            )));
        }
        Ok(())
    }

    /// Seal an attempt with its terminal status. Returns false if something
    /// else sealed it first; the row is immutable either way afterwards.
    pub async fn seal_attempt(
        &self,
        attempt_id: &str,
        status: AttemptStatus,
        duration_seconds: Option<i64>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE transfer_attempts
             SET status = ?, ended_at = ?, duration_seconds = ?
             WHERE id = ? AND status = 'dialing'",
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(duration_seconds)
        .bind(attempt_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn attempt(&self, attempt_id: &str) -> Result<TransferAttempt> {
        let row = sqlx::query(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM transfer_attempts WHERE id = ?"
        ))
        .bind(attempt_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| OrchestratorError::not_found(format!("attempt {}", attempt_id)))?;

        TransferAttempt::from_row(&row)
    }

    pub async fn attempts_for_transfer(
        &self,
        transfer_id: &TransferId,
    ) -> Result<Vec<TransferAttempt>> {
        let rows = sqlx::query(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM transfer_attempts
             WHERE transfer_id = ? ORDER BY attempt_number ASC"
        ))
        .bind(transfer_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(TransferAttempt::from_row).collect()
    }

    pub async fn attempt_by_external_call(
        &self,
        external_call_id: &ExternalCallId,
    ) -> Result<Option<TransferAttempt>> {
        let row = sqlx::query(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM transfer_attempts WHERE external_call_id = ?"
        ))
        .bind(external_call_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(TransferAttempt::from_row).transpose()
    }

    /// Attempts a previous process left mid-dial.
    pub async fn dialing_attempts(&self) -> Result<Vec<TransferAttempt>> {
        let rows = sqlx::query(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM transfer_attempts WHERE status = 'dialing'"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(TransferAttempt::from_row).collect()
    }
}
