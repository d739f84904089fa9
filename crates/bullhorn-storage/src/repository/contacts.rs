//! Contact repository

use async_trait::async_trait;
use bullhorn_common::types::{CampaignId, ContactId};
use bullhorn_common::Result;
use sqlx::PgPool;

use super::db_err;
use crate::models::Contact;

/// Contact source: the ordered recipient list of a campaign. Order is fixed
/// by the `position` column, so a resumed campaign sees exactly the sequence
/// the original run used.
#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Load the campaign's contacts in dispatch order. With `only_pending`
    /// set, returns only contacts at or after the campaign's persisted
    /// cursor (used on resume; already-processed recipients are never
    /// replayed).
    async fn load_contacts(&self, campaign_id: CampaignId, only_pending: bool)
        -> Result<Vec<Contact>>;

    /// Count contacts in a campaign
    async fn count(&self, campaign_id: CampaignId) -> Result<i64>;

    /// Rewrite contact positions to the given order (one-time shuffle)
    async fn persist_order(&self, campaign_id: CampaignId, ordered: &[ContactId]) -> Result<()>;
}

/// Database contact store
#[derive(Clone)]
pub struct DbContactStore {
    pool: PgPool,
}

impl DbContactStore {
    /// Create a new contact store
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContactStore for DbContactStore {
    async fn load_contacts(
        &self,
        campaign_id: CampaignId,
        only_pending: bool,
    ) -> Result<Vec<Contact>> {
        sqlx::query_as::<_, Contact>(
            r#"
            SELECT * FROM contacts
            WHERE campaign_id = $1
              AND ($2 = FALSE OR position >= (
                  SELECT current_index FROM campaigns WHERE id = $1
              ))
            ORDER BY position ASC
            "#,
        )
        .bind(campaign_id)
        .bind(only_pending)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn count(&self, campaign_id: CampaignId) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM contacts WHERE campaign_id = $1")
            .bind(campaign_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(count.0)
    }

    async fn persist_order(&self, campaign_id: CampaignId, ordered: &[ContactId]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        for (position, contact_id) in ordered.iter().enumerate() {
            sqlx::query(
                "UPDATE contacts SET position = $3 WHERE campaign_id = $1 AND id = $2",
            )
            .bind(campaign_id)
            .bind(contact_id)
            .bind(position as i32)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }
}
