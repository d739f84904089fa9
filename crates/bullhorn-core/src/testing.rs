//! In-memory test doubles for the engine's storage and gateway seams

use async_trait::async_trait;
use bullhorn_common::types::{CampaignId, ContactId};
use bullhorn_common::Result;
use bullhorn_storage::models::{Campaign, CampaignStatus, Contact, Lease, PacingValues, SendFailure};
use bullhorn_storage::repository::{CampaignStore, ContactStore, SendFailureStore};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::gateway::{Gateway, GatewayError, InstanceValidation, OutboundMessage};

/// Campaign fixture
pub fn test_campaign() -> Campaign {
    let now = Utc::now();
    Campaign {
        id: uuid::Uuid::new_v4(),
        name: "Test campaign".to_string(),
        status: "scheduled".to_string(),
        scheduled_at: None,
        delay_min: 5,
        delay_max: 15,
        randomize_order: false,
        sending_window: None,
        message_type: "text".to_string(),
        message_body: "Hello {{name}}".to_string(),
        media_url: None,
        messages: None,
        current_index: 0,
        sent_count: 0,
        failed_count: 0,
        total_recipients: 0,
        processing_lock: None,
        lock_acquired_at: None,
        failure_reason: None,
        created_at: now,
        updated_at: now,
        started_at: None,
        completed_at: None,
    }
}

/// Contact list fixture with predictable phones and positions
pub fn test_contacts(campaign_id: CampaignId, count: usize) -> Vec<Contact> {
    (0..count)
        .map(|i| Contact {
            id: uuid::Uuid::new_v4(),
            campaign_id,
            phone: format!("+55000000000{}", i),
            name: Some(format!("Contact {}", i)),
            attributes: serde_json::json!({}),
            position: i as i32,
            created_at: Utc::now(),
        })
        .collect()
}

/// In-memory campaign store. All mutations run under one lock, so the lease
/// claim has the same atomicity as the conditional UPDATE it stands in for.
pub struct MemoryCampaignStore {
    rows: Mutex<HashMap<CampaignId, Campaign>>,
}

impl MemoryCampaignStore {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, campaign: Campaign) {
        self.rows.lock().await.insert(campaign.id, campaign);
    }

    /// Backdate a held lease, as if it had been acquired `by` earlier
    pub async fn age_lease(&self, id: CampaignId, by: Duration) {
        if let Some(row) = self.rows.lock().await.get_mut(&id) {
            if let Some(acquired_at) = row.lock_acquired_at {
                row.lock_acquired_at = Some(acquired_at - by);
            }
        }
    }
}

#[async_trait]
impl CampaignStore for MemoryCampaignStore {
    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>> {
        Ok(self.rows.lock().await.get(&id).cloned())
    }

    async fn due_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>> {
        let rows = self.rows.lock().await;
        let mut due: Vec<Campaign> = rows
            .values()
            .filter(|c| {
                c.status == "scheduled" && c.scheduled_at.map(|at| at <= now).unwrap_or(false)
            })
            .cloned()
            .collect();
        due.sort_by_key(|c| c.scheduled_at);
        Ok(due)
    }

    async fn read_lease(&self, id: CampaignId) -> Result<Option<Lease>> {
        Ok(self.rows.lock().await.get(&id).map(|c| Lease {
            token: c.processing_lock.clone(),
            acquired_at: c.lock_acquired_at,
        }))
    }

    async fn try_claim_lease(
        &self,
        id: CampaignId,
        token: &str,
        now: DateTime<Utc>,
        expired_cutoff: DateTime<Utc>,
    ) -> Result<bool> {
        let mut rows = self.rows.lock().await;
        let Some(row) = rows.get_mut(&id) else {
            return Ok(false);
        };

        if matches!(row.status.as_str(), "completed" | "cancelled" | "failed") {
            return Ok(false);
        }

        let claimable = match (&row.processing_lock, row.lock_acquired_at) {
            (Some(_), Some(acquired_at)) => acquired_at < expired_cutoff,
            _ => true,
        };

        if claimable {
            row.processing_lock = Some(token.to_string());
            row.lock_acquired_at = Some(now);
            row.updated_at = now;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn release_lease(&self, id: CampaignId, token: &str) -> Result<bool> {
        let mut rows = self.rows.lock().await;
        let Some(row) = rows.get_mut(&id) else {
            return Ok(false);
        };

        if row.processing_lock.as_deref() == Some(token) {
            row.processing_lock = None;
            row.lock_acquired_at = None;
            row.updated_at = Utc::now();
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn update_status(
        &self,
        id: CampaignId,
        status: CampaignStatus,
        reason: Option<&str>,
    ) -> Result<Option<Campaign>> {
        let mut rows = self.rows.lock().await;
        let Some(row) = rows.get_mut(&id) else {
            return Ok(None);
        };

        let now = Utc::now();
        row.status = status.to_string();
        if let Some(reason) = reason {
            row.failure_reason = Some(reason.to_string());
        }
        if status == CampaignStatus::Running {
            row.started_at = Some(now);
        }
        if status.is_terminal() {
            row.completed_at = Some(now);
        }
        row.updated_at = now;
        Ok(Some(row.clone()))
    }

    async fn checkpoint(
        &self,
        id: CampaignId,
        current_index: i32,
        sent_count: i32,
        failed_count: i32,
    ) -> Result<()> {
        if let Some(row) = self.rows.lock().await.get_mut(&id) {
            row.current_index = current_index;
            row.sent_count = sent_count;
            row.failed_count = failed_count;
            row.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn update_pacing(&self, id: CampaignId, pacing: &PacingValues) -> Result<()> {
        if let Some(row) = self.rows.lock().await.get_mut(&id) {
            row.delay_min = pacing.delay_min;
            row.delay_max = pacing.delay_max;
            row.sending_window = pacing.sending_window.clone();
            row.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn update_schedule(
        &self,
        id: CampaignId,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        if let Some(row) = self.rows.lock().await.get_mut(&id) {
            row.scheduled_at = scheduled_at;
            row.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_total_recipients(&self, id: CampaignId, total: i32) -> Result<()> {
        if let Some(row) = self.rows.lock().await.get_mut(&id) {
            row.total_recipients = total;
            row.updated_at = Utc::now();
        }
        Ok(())
    }
}

/// In-memory contact store. Reads the campaign cursor from the shared
/// campaign store to answer `only_pending` loads the way the SQL does.
pub struct MemoryContactStore {
    contacts: Mutex<HashMap<CampaignId, Vec<Contact>>>,
    campaigns: Arc<MemoryCampaignStore>,
}

impl MemoryContactStore {
    pub fn new(campaigns: Arc<MemoryCampaignStore>) -> Self {
        Self {
            contacts: Mutex::new(HashMap::new()),
            campaigns,
        }
    }

    pub async fn insert(&self, campaign_id: CampaignId, contacts: Vec<Contact>) {
        self.contacts.lock().await.insert(campaign_id, contacts);
    }
}

#[async_trait]
impl ContactStore for MemoryContactStore {
    async fn load_contacts(
        &self,
        campaign_id: CampaignId,
        only_pending: bool,
    ) -> Result<Vec<Contact>> {
        let cursor = if only_pending {
            self.campaigns
                .get(campaign_id)
                .await?
                .map(|c| c.current_index)
                .unwrap_or(0)
        } else {
            0
        };

        let mut contacts: Vec<Contact> = self
            .contacts
            .lock()
            .await
            .get(&campaign_id)
            .map(|list| list.iter().filter(|c| c.position >= cursor).cloned().collect())
            .unwrap_or_default();
        contacts.sort_by_key(|c| c.position);
        Ok(contacts)
    }

    async fn count(&self, campaign_id: CampaignId) -> Result<i64> {
        Ok(self
            .contacts
            .lock()
            .await
            .get(&campaign_id)
            .map(|list| list.len() as i64)
            .unwrap_or(0))
    }

    async fn persist_order(&self, campaign_id: CampaignId, ordered: &[ContactId]) -> Result<()> {
        if let Some(list) = self.contacts.lock().await.get_mut(&campaign_id) {
            for contact in list.iter_mut() {
                if let Some(position) = ordered.iter().position(|id| *id == contact.id) {
                    contact.position = position as i32;
                }
            }
        }
        Ok(())
    }
}

/// In-memory send failure store
pub struct MemorySendFailureStore {
    rows: Mutex<Vec<SendFailure>>,
}

impl MemorySendFailureStore {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
        }
    }

    pub async fn records(&self) -> Vec<SendFailure> {
        self.rows.lock().await.clone()
    }
}

#[async_trait]
impl SendFailureStore for MemorySendFailureStore {
    async fn record(
        &self,
        campaign_id: CampaignId,
        contact_id: ContactId,
        phone: &str,
        reason: &str,
    ) -> Result<()> {
        self.rows.lock().await.push(SendFailure {
            id: uuid::Uuid::new_v4(),
            campaign_id,
            contact_id,
            phone: phone.to_string(),
            reason: reason.to_string(),
            failed_at: Utc::now(),
        });
        Ok(())
    }

    async fn list_by_campaign(&self, campaign_id: CampaignId) -> Result<Vec<SendFailure>> {
        Ok(self
            .rows
            .lock()
            .await
            .iter()
            .filter(|f| f.campaign_id == campaign_id)
            .cloned()
            .collect())
    }
}

/// One recorded gateway send
#[derive(Debug, Clone)]
pub struct SendRecord {
    pub phone: String,
    pub at: tokio::time::Instant,
}

/// Scriptable gateway double: per-phone failures, instance validity, and an
/// optional cancel trigger after the nth send
pub struct MockGateway {
    instance_valid: Mutex<bool>,
    fail_phones: Mutex<HashSet<String>>,
    sends: Mutex<Vec<SendRecord>>,
    cancel_after: Mutex<Option<(usize, CancellationToken)>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            instance_valid: Mutex::new(true),
            fail_phones: Mutex::new(HashSet::new()),
            sends: Mutex::new(Vec::new()),
            cancel_after: Mutex::new(None),
        }
    }

    pub async fn set_instance_valid(&self, valid: bool) {
        *self.instance_valid.lock().await = valid;
    }

    pub async fn fail_phone(&self, phone: &str) {
        self.fail_phones.lock().await.insert(phone.to_string());
    }

    /// Trigger the token once the nth send has been attempted
    pub async fn cancel_after(&self, count: usize, token: CancellationToken) {
        *self.cancel_after.lock().await = Some((count, token));
    }

    pub async fn sends(&self) -> Vec<SendRecord> {
        self.sends.lock().await.clone()
    }
}

#[async_trait]
impl Gateway for MockGateway {
    fn is_valid_token_format(&self, token: &str) -> bool {
        !token.is_empty()
    }

    async fn validate_instance(&self, _token: &str) -> InstanceValidation {
        if *self.instance_valid.lock().await {
            InstanceValidation {
                valid: true,
                status: "connected".to_string(),
                error: None,
            }
        } else {
            InstanceValidation::invalid("qrcode", "instance not connected")
        }
    }

    async fn send(&self, _token: &str, message: &OutboundMessage) -> std::result::Result<(), GatewayError> {
        let total = {
            let mut sends = self.sends.lock().await;
            sends.push(SendRecord {
                phone: message.to.clone(),
                at: tokio::time::Instant::now(),
            });
            sends.len()
        };

        if let Some((count, token)) = self.cancel_after.lock().await.as_ref() {
            if total == *count {
                token.cancel();
            }
        }

        if self.fail_phones.lock().await.contains(&message.to) {
            return Err(GatewayError::Request("simulated send failure".to_string()));
        }

        Ok(())
    }
}
