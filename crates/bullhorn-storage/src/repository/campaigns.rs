//! Campaign repository

use async_trait::async_trait;
use bullhorn_common::types::CampaignId;
use bullhorn_common::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::db_err;
use crate::models::{Campaign, CampaignStatus, Lease, PacingValues};

/// Campaign store: the durable campaign record (status, lease, cursor,
/// counters). All writes are single-row updates; the lease claim is the
/// only compare-and-swap write.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    /// Get a campaign by ID
    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>>;

    /// Campaigns with `status = scheduled` whose start time has arrived,
    /// earliest-due first
    async fn due_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>>;

    /// Read the lease fields of a campaign
    async fn read_lease(&self, id: CampaignId) -> Result<Option<Lease>>;

    /// Atomically claim the lease with a fresh token. Succeeds only if the
    /// lease is unheld or expired (acquired before `expired_cutoff`) and the
    /// campaign is not in a terminal state. Zero rows affected means the
    /// claim was lost to a concurrent writer.
    async fn try_claim_lease(
        &self,
        id: CampaignId,
        token: &str,
        now: DateTime<Utc>,
        expired_cutoff: DateTime<Utc>,
    ) -> Result<bool>;

    /// Clear the lease, but only if the stored token still matches
    async fn release_lease(&self, id: CampaignId, token: &str) -> Result<bool>;

    /// Update campaign status; stamps `started_at` on running and
    /// `completed_at` on terminal states, and records a failure reason
    async fn update_status(
        &self,
        id: CampaignId,
        status: CampaignStatus,
        reason: Option<&str>,
    ) -> Result<Option<Campaign>>;

    /// Persist the resumable cursor and counters
    async fn checkpoint(
        &self,
        id: CampaignId,
        current_index: i32,
        sent_count: i32,
        failed_count: i32,
    ) -> Result<()>;

    /// Persist new pacing values
    async fn update_pacing(&self, id: CampaignId, pacing: &PacingValues) -> Result<()>;

    /// Persist a new (or cleared) start time
    async fn update_schedule(
        &self,
        id: CampaignId,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Set the materialized recipient total
    async fn set_total_recipients(&self, id: CampaignId, total: i32) -> Result<()>;
}

/// Database campaign store
#[derive(Clone)]
pub struct DbCampaignStore {
    pool: PgPool,
}

impl DbCampaignStore {
    /// Create a new campaign store
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CampaignStore for DbCampaignStore {
    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>> {
        sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn due_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>> {
        sqlx::query_as::<_, Campaign>(
            r#"
            SELECT * FROM campaigns
            WHERE status = 'scheduled'
              AND scheduled_at IS NOT NULL
              AND scheduled_at <= $1
            ORDER BY scheduled_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn read_lease(&self, id: CampaignId) -> Result<Option<Lease>> {
        let row: Option<(Option<String>, Option<DateTime<Utc>>)> = sqlx::query_as(
            "SELECT processing_lock, lock_acquired_at FROM campaigns WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(|(token, acquired_at)| Lease { token, acquired_at }))
    }

    async fn try_claim_lease(
        &self,
        id: CampaignId,
        token: &str,
        now: DateTime<Utc>,
        expired_cutoff: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns SET
                processing_lock = $2,
                lock_acquired_at = $3,
                updated_at = NOW()
            WHERE id = $1
              AND (processing_lock IS NULL OR lock_acquired_at < $4)
              AND status NOT IN ('completed', 'cancelled', 'failed')
            "#,
        )
        .bind(id)
        .bind(token)
        .bind(now)
        .bind(expired_cutoff)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_lease(&self, id: CampaignId, token: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns SET
                processing_lock = NULL,
                lock_acquired_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND processing_lock = $2
            "#,
        )
        .bind(id)
        .bind(token)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_status(
        &self,
        id: CampaignId,
        status: CampaignStatus,
        reason: Option<&str>,
    ) -> Result<Option<Campaign>> {
        let started_at = if status == CampaignStatus::Running {
            Some(Utc::now())
        } else {
            None
        };

        let completed_at = if status.is_terminal() {
            Some(Utc::now())
        } else {
            None
        };

        sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns SET
                status = $2,
                failure_reason = COALESCE($3, failure_reason),
                started_at = COALESCE($4, started_at),
                completed_at = COALESCE($5, completed_at),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status.to_string())
        .bind(reason)
        .bind(started_at)
        .bind(completed_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn checkpoint(
        &self,
        id: CampaignId,
        current_index: i32,
        sent_count: i32,
        failed_count: i32,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE campaigns SET
                current_index = $2,
                sent_count = $3,
                failed_count = $4,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(current_index)
        .bind(sent_count)
        .bind(failed_count)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_pacing(&self, id: CampaignId, pacing: &PacingValues) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE campaigns SET
                delay_min = $2,
                delay_max = $3,
                sending_window = $4,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(pacing.delay_min)
        .bind(pacing.delay_max)
        .bind(&pacing.sending_window)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_schedule(
        &self,
        id: CampaignId,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE campaigns SET
                scheduled_at = $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(scheduled_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn set_total_recipients(&self, id: CampaignId, total: i32) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE campaigns SET
                total_recipients = $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(total)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}
