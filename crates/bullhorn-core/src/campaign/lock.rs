//! Lock manager - cross-process exclusive ownership of campaigns
//!
//! Ownership is a lease row on the campaign record: an opaque token plus the
//! acquisition timestamp, reclaimable once older than the TTL. The claim is a
//! single conditional update judged by rows-affected, so two processes
//! observing the same expired lease cannot both win. A process-local set of
//! held campaign ids short-circuits the common case of this process's own
//! poller re-examining a campaign it already owns.

use bullhorn_common::types::CampaignId;
use bullhorn_common::Result;
use bullhorn_storage::repository::CampaignStore;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Grants and revokes time-bounded exclusive leases on campaign ids
pub struct LockManager {
    campaigns: Arc<dyn CampaignStore>,
    instance_id: String,
    ttl: Duration,
    held: Mutex<HashMap<CampaignId, String>>,
}

impl LockManager {
    /// Create a new lock manager for this scheduler process
    pub fn new(campaigns: Arc<dyn CampaignStore>, instance_id: String, ttl_secs: i64) -> Self {
        Self {
            campaigns,
            instance_id,
            ttl: Duration::seconds(ttl_secs),
            held: Mutex::new(HashMap::new()),
        }
    }

    /// Try to acquire the lease for a campaign. Returns false when the lease
    /// is held elsewhere; losing the race is expected, not an error.
    pub async fn acquire(&self, campaign_id: CampaignId) -> Result<bool> {
        if self.held.lock().await.contains_key(&campaign_id) {
            debug!(campaign = %campaign_id, "Lock already held by this process");
            return Ok(false);
        }

        let now = Utc::now();

        let lease = match self.campaigns.read_lease(campaign_id).await? {
            Some(lease) => lease,
            None => {
                debug!(campaign = %campaign_id, "Campaign not found while acquiring lock");
                return Ok(false);
            }
        };

        if !lease.is_available(now, self.ttl) {
            debug!(campaign = %campaign_id, "Lock held by another process");
            return Ok(false);
        }

        let token = format!("{}-{}", self.instance_id, now.timestamp_millis());
        let expired_cutoff = now - self.ttl;

        if self
            .campaigns
            .try_claim_lease(campaign_id, &token, now, expired_cutoff)
            .await?
        {
            self.held.lock().await.insert(campaign_id, token);
            Ok(true)
        } else {
            debug!(campaign = %campaign_id, "Lost lock race");
            Ok(false)
        }
    }

    /// Release a held lease. The stored row is only cleared if it still
    /// carries our token; a lease reclaimed after TTL expiry is left alone.
    pub async fn release(&self, campaign_id: CampaignId) -> Result<()> {
        let token = self.held.lock().await.remove(&campaign_id);

        if let Some(token) = token {
            if !self.campaigns.release_lease(campaign_id, &token).await? {
                debug!(campaign = %campaign_id, "Lease was reclaimed before release");
            }
        }

        Ok(())
    }

    /// Whether this process currently holds the lease
    pub async fn holds(&self, campaign_id: CampaignId) -> bool {
        self.held.lock().await.contains_key(&campaign_id)
    }
}
