//! Send failure repository

use async_trait::async_trait;
use bullhorn_common::types::{CampaignId, ContactId};
use bullhorn_common::Result;
use sqlx::PgPool;
use uuid::Uuid;

use super::db_err;
use crate::models::SendFailure;

/// Durable record of per-recipient send failures
#[async_trait]
pub trait SendFailureStore: Send + Sync {
    /// Record a failed send for later inspection
    async fn record(
        &self,
        campaign_id: CampaignId,
        contact_id: ContactId,
        phone: &str,
        reason: &str,
    ) -> Result<()>;

    /// List recorded failures for a campaign
    async fn list_by_campaign(&self, campaign_id: CampaignId) -> Result<Vec<SendFailure>>;
}

/// Database send failure store
#[derive(Clone)]
pub struct DbSendFailureStore {
    pool: PgPool,
}

impl DbSendFailureStore {
    /// Create a new send failure store
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SendFailureStore for DbSendFailureStore {
    async fn record(
        &self,
        campaign_id: CampaignId,
        contact_id: ContactId,
        phone: &str,
        reason: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO send_failures (id, campaign_id, contact_id, phone, reason)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(campaign_id)
        .bind(contact_id)
        .bind(phone)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn list_by_campaign(&self, campaign_id: CampaignId) -> Result<Vec<SendFailure>> {
        sqlx::query_as::<_, SendFailure>(
            "SELECT * FROM send_failures WHERE campaign_id = $1 ORDER BY failed_at ASC",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }
}
