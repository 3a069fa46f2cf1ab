//! Campaign rows: creation, lifecycle transitions, counter bookkeeping.
//!
//! Lifecycle writes are compare-and-set: the expected prior status sits in
//! the `WHERE` clause and a zero `rows_affected` means the command lost to a
//! concurrent transition, which is then classified by re-reading the row.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, info};

use super::{decode_status, CallStore};
use crate::error::{OrchestratorError, Result};
use crate::types::{AssistantId, Campaign, CampaignId, CampaignStatus, NewCampaign};

impl Campaign {
    fn from_row(row: &SqliteRow) -> Result<Self> {
        let status_raw: String = row.try_get("status")?;
        Ok(Campaign {
            id: CampaignId(row.try_get("id")?),
            workspace_id: row.try_get("workspace_id")?,
            name: row.try_get("name")?,
            assistant_id: AssistantId(row.try_get("assistant_id")?),
            caller_number: row.try_get("caller_number")?,
            status: decode_status("campaign status", &status_raw, CampaignStatus::parse)?,
            scheduled_at: row.try_get("scheduled_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            total_leads: row.try_get("total_leads")?,
            calls_completed: row.try_get("calls_completed")?,
            calls_answered: row.try_get("calls_answered")?,
            calls_failed: row.try_get("calls_failed")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

const CAMPAIGN_COLUMNS: &str = "id, workspace_id, name, assistant_id, caller_number, status, \
     scheduled_at, started_at, completed_at, total_leads, calls_completed, \
     calls_answered, calls_failed, created_at, updated_at";

impl CallStore {
    /// Insert a new campaign. A future `scheduled_at` creates it `scheduled`
    /// so the schedule ticker will start it; otherwise it is `draft`.
    pub async fn create_campaign(&self, new: NewCampaign) -> Result<Campaign> {
        let id = CampaignId::new();
        let now = Utc::now();
        let status = if new.scheduled_at.is_some() {
            CampaignStatus::Scheduled
        } else {
            CampaignStatus::Draft
        };

        sqlx::query(
            "INSERT INTO campaigns (id, workspace_id, name, assistant_id, caller_number, \
             status, scheduled_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.as_str())
        .bind(&new.workspace_id)
        .bind(&new.name)
        .bind(new.assistant_id.as_str())
        .bind(&new.caller_number)
        .bind(status.as_str())
        .bind(new.scheduled_at)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        info!("📋 Campaign {} created ({})", id, status);
        self.campaign(&id).await
    }

    pub async fn campaign(&self, id: &CampaignId) -> Result<Campaign> {
        let row = sqlx::query(&format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = ?"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| OrchestratorError::not_found(format!("campaign {}", id)))?;

        Campaign::from_row(&row)
    }

    pub async fn list_campaigns(&self) -> Result<Vec<Campaign>> {
        let rows = sqlx::query(&format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Campaign::from_row).collect()
    }

    /// Move a campaign to `running`. The guard enforces both the allowed
    /// prior states and a non-empty lead queue in one statement.
    pub async fn try_start_campaign(&self, id: &CampaignId) -> Result<Campaign> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE campaigns
             SET status = 'running', started_at = COALESCE(started_at, ?), updated_at = ?
             WHERE id = ? AND status IN ('draft', 'scheduled', 'paused') AND total_leads > 0",
        )
        .bind(now)
        .bind(now)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let campaign = self.campaign(id).await?;
            if campaign.status.can_start() && campaign.total_leads == 0 {
                return Err(OrchestratorError::invalid_state(format!(
                    "cannot start campaign {}: no leads ingested",
                    id
                )));
            }
            return Err(OrchestratorError::invalid_state(format!(
                "cannot start campaign {} in state {}",
                id, campaign.status
            )));
        }

        info!("▶️ Campaign {} started", id);
        self.campaign(id).await
    }

    pub async fn try_pause_campaign(&self, id: &CampaignId) -> Result<Campaign> {
        let result = sqlx::query(
            "UPDATE campaigns SET status = 'paused', updated_at = ?
             WHERE id = ? AND status = 'running'",
        )
        .bind(Utc::now())
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let campaign = self.campaign(id).await?;
            return Err(OrchestratorError::invalid_state(format!(
                "cannot pause campaign {} in state {}",
                id, campaign.status
            )));
        }

        info!("⏸️ Campaign {} paused", id);
        self.campaign(id).await
    }

    pub async fn try_cancel_campaign(&self, id: &CampaignId) -> Result<Campaign> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE campaigns SET status = 'cancelled', completed_at = ?, updated_at = ?
             WHERE id = ? AND status IN ('running', 'paused')",
        )
        .bind(now)
        .bind(now)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let campaign = self.campaign(id).await?;
            return Err(OrchestratorError::invalid_state(format!(
                "cannot cancel campaign {} in state {}",
                id, campaign.status
            )));
        }

        info!("🛑 Campaign {} cancelled", id);
        self.campaign(id).await
    }

    /// Seal a running campaign as completed, but only while its queue is
    /// truly exhausted. Returns false when the guard did not hold (campaign
    /// no longer running, or a lead appeared or is still in flight).
    pub async fn try_complete_campaign(&self, id: &CampaignId) -> Result<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE campaigns SET status = 'completed', completed_at = ?, updated_at = ?
             WHERE id = ? AND status = 'running'
               AND NOT EXISTS (
                   SELECT 1 FROM campaign_leads
                   WHERE campaign_id = ? AND call_status IN ('pending', 'calling')
               )",
        )
        .bind(now)
        .bind(now)
        .bind(id.as_str())
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        let completed = result.rows_affected() > 0;
        if completed {
            info!("🎉 Campaign {} completed", id);
        }
        Ok(completed)
    }

    /// Reopen every failed lead of a campaign for another pass. Counters are
    /// adjusted in the same transaction as the lead resets; a completed
    /// campaign drops back to paused so the operator can start it again.
    pub async fn retry_failed_leads(&self, id: &CampaignId) -> Result<(Campaign, u64)> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT status FROM campaigns WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| OrchestratorError::not_found(format!("campaign {}", id)))?;
        let status_raw: String = row.try_get("status")?;
        let status = decode_status("campaign status", &status_raw, CampaignStatus::parse)?;

        if !status.can_retry_failed() {
            return Err(OrchestratorError::invalid_state(format!(
                "cannot retry failed leads of campaign {} in state {}",
                id, status
            )));
        }

        let reset = sqlx::query(
            "UPDATE campaign_leads
             SET call_status = 'pending', external_call_id = NULL, outcome = NULL,
                 summary = NULL, duration_seconds = NULL, called_at = NULL
             WHERE campaign_id = ? AND call_status = 'failed'",
        )
        .bind(id.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let now = Utc::now();
        if reset > 0 {
            sqlx::query(
                "UPDATE campaigns SET calls_failed = calls_failed - ?, updated_at = ?
                 WHERE id = ?",
            )
            .bind(reset as i64)
            .bind(now)
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        }

        if status == CampaignStatus::Completed {
            sqlx::query(
                "UPDATE campaigns SET status = 'paused', completed_at = NULL, updated_at = ?
                 WHERE id = ? AND status = 'completed'",
            )
            .bind(now)
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!("🔄 Campaign {}: {} failed leads requeued", id, reset);
        let campaign = self.campaign(id).await?;
        Ok((campaign, reset))
    }

    /// Campaigns whose scheduled start time has arrived.
    pub async fn scheduled_campaigns_due(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>> {
        let rows = sqlx::query(&format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns
             WHERE status = 'scheduled' AND scheduled_at IS NOT NULL AND scheduled_at <= ?
             ORDER BY scheduled_at ASC"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Campaign::from_row).collect()
    }

    /// Campaigns left in `running` by a previous process, for startup resume.
    pub async fn running_campaigns(&self) -> Result<Vec<Campaign>> {
        let rows = sqlx::query(&format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE status = 'running'"
        ))
        .fetch_all(&self.pool)
        .await?;

        debug!("Found {} campaigns in running state", rows.len());
        rows.iter().map(Campaign::from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::store::CallStore;
    use crate::types::{AssistantId, NewCampaign, NewLead};

    fn new_campaign() -> NewCampaign {
        NewCampaign {
            workspace_id: "ws-1".to_string(),
            name: "Q3 outreach".to_string(),
            assistant_id: AssistantId::from("asst-1"),
            caller_number: "+15550001111".to_string(),
            scheduled_at: None,
        }
    }

    #[tokio::test]
    async fn start_requires_leads() {
        let store = CallStore::in_memory().await.unwrap();
        let campaign = store.create_campaign(new_campaign()).await.unwrap();

        let err = store.try_start_campaign(&campaign.id).await.unwrap_err();
        assert!(err.to_string().contains("no leads"), "got: {err}");
    }

    #[tokio::test]
    async fn lifecycle_guards_reject_wrong_states() {
        let store = CallStore::in_memory().await.unwrap();
        let campaign = store.create_campaign(new_campaign()).await.unwrap();
        store
            .add_leads(&campaign.id, vec![NewLead::new("+15550002222")])
            .await
            .unwrap();

        // Pausing a draft fails.
        assert!(store.try_pause_campaign(&campaign.id).await.is_err());

        let started = store.try_start_campaign(&campaign.id).await.unwrap();
        assert!(started.started_at.is_some());

        // Starting again fails while running.
        assert!(store.try_start_campaign(&campaign.id).await.is_err());

        let paused = store.try_pause_campaign(&campaign.id).await.unwrap();
        assert_eq!(paused.status.as_str(), "paused");

        let cancelled = store.try_cancel_campaign(&campaign.id).await.unwrap();
        assert_eq!(cancelled.status.as_str(), "cancelled");

        // Terminal: no restart, no retry.
        assert!(store.try_start_campaign(&campaign.id).await.is_err());
        assert!(store.retry_failed_leads(&campaign.id).await.is_err());
    }

    #[tokio::test]
    async fn complete_requires_exhausted_queue() {
        let store = CallStore::in_memory().await.unwrap();
        let campaign = store.create_campaign(new_campaign()).await.unwrap();
        store
            .add_leads(&campaign.id, vec![NewLead::new("+15550003333")])
            .await
            .unwrap();
        store.try_start_campaign(&campaign.id).await.unwrap();

        // A pending lead blocks completion.
        assert!(!store.try_complete_campaign(&campaign.id).await.unwrap());
    }
}
