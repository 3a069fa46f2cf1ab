//! Lead queue: FIFO claim, terminal sealing, counter maintenance.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, info};

use super::{decode_status, CallStore};
use crate::error::{OrchestratorError, Result};
use crate::types::{
    CampaignId, CampaignLead, LeadCallStatus, LeadDisposition, LeadId, NewLead,
};
use dialcast_gateway_core::{CallOutcome, ExternalCallId};

/// The slice of a lead handed to the dialer when it wins the claim.
#[derive(Debug, Clone)]
pub struct ClaimedLead {
    pub seq: i64,
    pub id: LeadId,
    pub phone_number: String,
    pub display_name: Option<String>,
}

impl CampaignLead {
    fn from_row(row: &SqliteRow) -> Result<Self> {
        let status_raw: String = row.try_get("call_status")?;
        let outcome_raw: Option<String> = row.try_get("outcome")?;
        let outcome = match outcome_raw {
            Some(raw) => Some(decode_status("lead outcome", &raw, |s| {
                s.parse::<CallOutcome>().ok()
            })?),
            None => None,
        };
        let external: Option<String> = row.try_get("external_call_id")?;

        Ok(CampaignLead {
            seq: row.try_get("seq")?,
            id: LeadId(row.try_get("id")?),
            campaign_id: CampaignId(row.try_get("campaign_id")?),
            phone_number: row.try_get("phone_number")?,
            display_name: row.try_get("display_name")?,
            call_status: decode_status("lead status", &status_raw, LeadCallStatus::parse)?,
            external_call_id: external.map(ExternalCallId),
            outcome,
            summary: row.try_get("summary")?,
            duration_seconds: row.try_get("duration_seconds")?,
            called_at: row.try_get("called_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

const LEAD_COLUMNS: &str = "seq, id, campaign_id, phone_number, display_name, call_status, \
     external_call_id, outcome, summary, duration_seconds, called_at, created_at";

impl CallStore {
    /// Append leads to a campaign's queue and bump `total_leads` in the same
    /// transaction. Insertion order is the dialing order.
    pub async fn add_leads(
        &self,
        campaign_id: &CampaignId,
        leads: Vec<NewLead>,
    ) -> Result<Vec<LeadId>> {
        if leads.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT status FROM campaigns WHERE id = ?")
            .bind(campaign_id.as_str())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| OrchestratorError::not_found(format!("campaign {}", campaign_id)))?;
        let status_raw: String = row.try_get("status")?;
        let status = decode_status(
            "campaign status",
            &status_raw,
            crate::types::CampaignStatus::parse,
        )?;
        if status.is_terminal() {
            return Err(OrchestratorError::invalid_state(format!(
                "cannot add leads to campaign {} in state {}",
                campaign_id, status
            )));
        }

        let now = Utc::now();
        let mut ids = Vec::with_capacity(leads.len());
        for lead in &leads {
            let id = LeadId::new();
            sqlx::query(
                "INSERT INTO campaign_leads (id, campaign_id, phone_number, display_name, \
                 call_status, created_at)
                 VALUES (?, ?, ?, ?, 'pending', ?)",
            )
            .bind(id.as_str())
            .bind(campaign_id.as_str())
            .bind(&lead.phone_number)
            .bind(&lead.display_name)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            ids.push(id);
        }

        sqlx::query("UPDATE campaigns SET total_leads = total_leads + ?, updated_at = ? WHERE id = ?")
            .bind(ids.len() as i64)
            .bind(now)
            .bind(campaign_id.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!("📇 Campaign {}: {} leads ingested", campaign_id, ids.len());
        Ok(ids)
    }

    /// Claim the oldest pending lead for dialing.
    ///
    /// One statement moves the lead to `calling` while re-checking, in the
    /// same write, that the campaign is still `running`. A pause or cancel
    /// that lands first makes this return `None` instead of placing a call.
    pub async fn claim_next_pending_lead(
        &self,
        campaign_id: &CampaignId,
    ) -> Result<Option<ClaimedLead>> {
        let row = sqlx::query(
            "UPDATE campaign_leads
             SET call_status = 'calling', called_at = ?
             WHERE seq = (
                 SELECT MIN(seq) FROM campaign_leads
                 WHERE campaign_id = ? AND call_status = 'pending'
             )
               AND call_status = 'pending'
               AND (SELECT status FROM campaigns WHERE id = ?) = 'running'
             RETURNING seq, id, phone_number, display_name",
        )
        .bind(Utc::now())
        .bind(campaign_id.as_str())
        .bind(campaign_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let claimed = ClaimedLead {
                    seq: row.try_get("seq")?,
                    id: LeadId(row.try_get("id")?),
                    phone_number: row.try_get("phone_number")?,
                    display_name: row.try_get("display_name")?,
                };
                debug!(
                    "Lead {} claimed (seq {}) for campaign {}",
                    claimed.id, claimed.seq, campaign_id
                );
                Ok(Some(claimed))
            }
            None => Ok(None),
        }
    }

    /// Record the provider's call reference on a freshly claimed lead.
    pub async fn attach_lead_call(
        &self,
        lead_id: &LeadId,
        external_call_id: &ExternalCallId,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE campaign_leads SET external_call_id = ?
             WHERE id = ? AND call_status = 'calling'",
        )
        .bind(external_call_id.as_str())
        .bind(lead_id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OrchestratorError::invalid_state(format!(
                "lead {} is not in calling state",
                lead_id
            )));
        }
        Ok(())
    }

    /// Seal a calling lead with its terminal disposition and update the
    /// campaign counters transactionally. A lead already sealed reports
    /// `DuplicateEvent` so redelivered provider events die here.
    pub async fn seal_lead(
        &self,
        lead_id: &LeadId,
        disposition: &LeadDisposition,
    ) -> Result<CampaignId> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "UPDATE campaign_leads
             SET call_status = ?, outcome = ?, summary = COALESCE(?, summary),
                 duration_seconds = ?
             WHERE id = ? AND call_status = 'calling'
             RETURNING campaign_id",
        )
        .bind(disposition.terminal.as_str())
        .bind(disposition.outcome.to_string())
        .bind(&disposition.summary)
        .bind(disposition.duration_seconds)
        .bind(lead_id.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let campaign_id = match row {
            Some(row) => CampaignId(row.try_get::<String, _>("campaign_id")?),
            None => {
                drop(tx);
                let lead = self.lead(lead_id).await?;
                if lead.call_status.is_terminal() {
                    return Err(OrchestratorError::duplicate_event(format!(
                        "lead {} already sealed as {}",
                        lead_id, lead.call_status
                    )));
                }
                return Err(OrchestratorError::invalid_state(format!(
                    "cannot seal lead {} in state {}",
                    lead_id, lead.call_status
                )));
            }
        };

        let answered_bump = if disposition.terminal == LeadCallStatus::Completed
            && disposition.outcome == CallOutcome::Answered
        {
            1i64
        } else {
            0i64
        };
        let (completed_bump, failed_bump) = match disposition.terminal {
            LeadCallStatus::Completed => (1i64, 0i64),
            LeadCallStatus::Failed => (0i64, 1i64),
            // Unreachable: dispositions are terminal by construction.
            _ => (0i64, 0i64),
        };

        sqlx::query(
            "UPDATE campaigns
             SET calls_completed = calls_completed + ?,
                 calls_answered = calls_answered + ?,
                 calls_failed = calls_failed + ?,
                 updated_at = ?
             WHERE id = ?",
        )
        .bind(completed_bump)
        .bind(answered_bump)
        .bind(failed_bump)
        .bind(Utc::now())
        .bind(campaign_id.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            "📞 Lead {} sealed: {} ({})",
            lead_id, disposition.terminal, disposition.outcome
        );
        Ok(campaign_id)
    }

    pub async fn lead(&self, lead_id: &LeadId) -> Result<CampaignLead> {
        let row = sqlx::query(&format!(
            "SELECT {LEAD_COLUMNS} FROM campaign_leads WHERE id = ?"
        ))
        .bind(lead_id.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| OrchestratorError::not_found(format!("lead {}", lead_id)))?;

        CampaignLead::from_row(&row)
    }

    pub async fn lead_by_external_call(
        &self,
        external_call_id: &ExternalCallId,
    ) -> Result<Option<CampaignLead>> {
        let row = sqlx::query(&format!(
            "SELECT {LEAD_COLUMNS} FROM campaign_leads WHERE external_call_id = ?"
        ))
        .bind(external_call_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(CampaignLead::from_row).transpose()
    }

    /// All leads of a campaign in queue order.
    pub async fn leads_for_campaign(&self, campaign_id: &CampaignId) -> Result<Vec<CampaignLead>> {
        let rows = sqlx::query(&format!(
            "SELECT {LEAD_COLUMNS} FROM campaign_leads WHERE campaign_id = ? ORDER BY seq ASC"
        ))
        .bind(campaign_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(CampaignLead::from_row).collect()
    }

    pub async fn count_calling_leads(&self, campaign_id: &CampaignId) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) as n FROM campaign_leads
             WHERE campaign_id = ? AND call_status = 'calling'",
        )
        .bind(campaign_id.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("n")?)
    }

    /// Every lead currently marked `calling`, across all campaigns. Drives
    /// both the status poller and crash reconciliation.
    pub async fn calling_leads(&self) -> Result<Vec<CampaignLead>> {
        let rows = sqlx::query(&format!(
            "SELECT {LEAD_COLUMNS} FROM campaign_leads
             WHERE call_status = 'calling' ORDER BY called_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(CampaignLead::from_row).collect()
    }

    pub async fn count_leads_in_status(
        &self,
        campaign_id: &CampaignId,
        status: LeadCallStatus,
    ) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) as n FROM campaign_leads WHERE campaign_id = ? AND call_status = ?",
        )
        .bind(campaign_id.as_str())
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("n")?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AssistantId, NewCampaign};

    async fn campaign_with_leads(store: &CallStore, numbers: &[&str]) -> CampaignId {
        let campaign = store
            .create_campaign(NewCampaign {
                workspace_id: "ws-1".to_string(),
                name: "leads test".to_string(),
                assistant_id: AssistantId::from("asst-1"),
                caller_number: "+15550000000".to_string(),
                scheduled_at: None,
            })
            .await
            .unwrap();
        store
            .add_leads(
                &campaign.id,
                numbers.iter().map(|n| NewLead::new(*n)).collect(),
            )
            .await
            .unwrap();
        campaign.id
    }

    #[tokio::test]
    async fn claims_follow_insertion_order() {
        let store = CallStore::in_memory().await.unwrap();
        let id = campaign_with_leads(&store, &["+1111", "+2222", "+3333"]).await;
        store.try_start_campaign(&id).await.unwrap();

        let first = store.claim_next_pending_lead(&id).await.unwrap().unwrap();
        let second = store.claim_next_pending_lead(&id).await.unwrap().unwrap();
        let third = store.claim_next_pending_lead(&id).await.unwrap().unwrap();

        assert_eq!(first.phone_number, "+1111");
        assert_eq!(second.phone_number, "+2222");
        assert_eq!(third.phone_number, "+3333");
        assert!(first.seq < second.seq && second.seq < third.seq);

        assert!(store.claim_next_pending_lead(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_refuses_when_campaign_not_running() {
        let store = CallStore::in_memory().await.unwrap();
        let id = campaign_with_leads(&store, &["+1111"]).await;

        // Draft: never claims.
        assert!(store.claim_next_pending_lead(&id).await.unwrap().is_none());

        store.try_start_campaign(&id).await.unwrap();
        store.try_pause_campaign(&id).await.unwrap();

        // Paused: the in-statement status check blocks the claim.
        assert!(store.claim_next_pending_lead(&id).await.unwrap().is_none());
        assert_eq!(
            store
                .count_leads_in_status(&id, LeadCallStatus::Pending)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn sealing_updates_counters_and_rejects_duplicates() {
        let store = CallStore::in_memory().await.unwrap();
        let id = campaign_with_leads(&store, &["+1111"]).await;
        store.try_start_campaign(&id).await.unwrap();

        let claimed = store.claim_next_pending_lead(&id).await.unwrap().unwrap();
        let call_id = ExternalCallId::from("call-abc");
        store.attach_lead_call(&claimed.id, &call_id).await.unwrap();

        let disposition = LeadDisposition::from_outcome(CallOutcome::Answered, Some(30), None);
        let sealed_campaign = store.seal_lead(&claimed.id, &disposition).await.unwrap();
        assert_eq!(sealed_campaign, id);

        let campaign = store.campaign(&id).await.unwrap();
        assert_eq!(campaign.calls_completed, 1);
        assert_eq!(campaign.calls_answered, 1);
        assert_eq!(campaign.calls_failed, 0);

        // Redelivery of the same terminal event.
        let err = store.seal_lead(&claimed.id, &disposition).await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::OrchestratorError::DuplicateEvent(_)
        ));

        // Counters unchanged by the duplicate.
        let campaign = store.campaign(&id).await.unwrap();
        assert_eq!(campaign.calls_completed, 1);
        assert_eq!(campaign.calls_answered, 1);
    }

    #[tokio::test]
    async fn failed_seal_counts_failed_not_answered() {
        let store = CallStore::in_memory().await.unwrap();
        let id = campaign_with_leads(&store, &["+1111"]).await;
        store.try_start_campaign(&id).await.unwrap();

        let claimed = store.claim_next_pending_lead(&id).await.unwrap().unwrap();
        store
            .seal_lead(&claimed.id, &LeadDisposition::failed("placement rejected"))
            .await
            .unwrap();

        let campaign = store.campaign(&id).await.unwrap();
        assert_eq!(campaign.calls_completed, 0);
        assert_eq!(campaign.calls_answered, 0);
        assert_eq!(campaign.calls_failed, 1);

        let lead = store.lead(&claimed.id).await.unwrap();
        assert_eq!(lead.call_status, LeadCallStatus::Failed);
        assert_eq!(lead.summary.as_deref(), Some("placement rejected"));
    }

    #[tokio::test]
    async fn retry_resets_only_failed_leads() {
        let store = CallStore::in_memory().await.unwrap();
        let id = campaign_with_leads(&store, &["+1111", "+2222"]).await;
        store.try_start_campaign(&id).await.unwrap();

        let first = store.claim_next_pending_lead(&id).await.unwrap().unwrap();
        store
            .seal_lead(
                &first.id,
                &LeadDisposition::from_outcome(CallOutcome::Answered, Some(10), None),
            )
            .await
            .unwrap();

        let second = store.claim_next_pending_lead(&id).await.unwrap().unwrap();
        store
            .seal_lead(&second.id, &LeadDisposition::failed("network error"))
            .await
            .unwrap();

        store.try_pause_campaign(&id).await.unwrap();
        let (campaign, reset) = store.retry_failed_leads(&id).await.unwrap();
        assert_eq!(reset, 1);
        assert_eq!(campaign.calls_failed, 0);
        assert_eq!(campaign.calls_completed, 1);

        let requeued = store.lead(&second.id).await.unwrap();
        assert_eq!(requeued.call_status, LeadCallStatus::Pending);
        assert!(requeued.external_call_id.is_none());
        assert!(requeued.outcome.is_none());

        // The completed lead is untouched.
        let done = store.lead(&first.id).await.unwrap();
        assert_eq!(done.call_status, LeadCallStatus::Completed);
    }
}
