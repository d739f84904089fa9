//! Campaign scheduler - polls for due campaigns and supervises dispatchers
//!
//! One scheduler runs per process. A fixed-interval poller discovers
//! campaigns whose start time has arrived, takes the cross-process lease for
//! each, and spawns a dispatcher loop whose cleanup (deregister + lease
//! release) is guaranteed to run whatever way the loop ends. Operator
//! actions are dispatched through the same instance and surface their errors
//! synchronously.

use bullhorn_common::config::SchedulerConfig;
use bullhorn_common::types::CampaignId;
use bullhorn_storage::models::{Campaign, CampaignStatus, PacingValues};
use bullhorn_storage::repository::{CampaignStore, ContactStore, SendFailureStore};
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::dispatcher::{Dispatcher, PacingConfig, Progress};
use super::lock::LockManager;
use super::window::SendingWindow;
use super::CampaignError;
use crate::gateway::Gateway;

/// Partial config update. Outer `None` leaves a field untouched; for the
/// clearable fields the inner `None` is an explicit null that clears.
#[derive(Debug, Clone, Default)]
pub struct ConfigUpdate {
    pub delay_min: Option<i64>,
    pub delay_max: Option<i64>,
    pub sending_window: Option<Option<serde_json::Value>>,
    pub scheduled_at: Option<Option<DateTime<Utc>>>,
}

impl ConfigUpdate {
    fn touches_pacing(&self) -> bool {
        self.delay_min.is_some() || self.delay_max.is_some() || self.sending_window.is_some()
    }
}

/// Dispatchers currently owned by one scheduler process, keyed by campaign id
type ActiveSet = Mutex<HashMap<CampaignId, Arc<Dispatcher>>>;

/// Campaign scheduler and dispatcher supervisor
pub struct CampaignScheduler {
    campaigns: Arc<dyn CampaignStore>,
    contacts: Arc<dyn ContactStore>,
    failures: Arc<dyn SendFailureStore>,
    gateway: Arc<dyn Gateway>,
    locks: Arc<LockManager>,
    /// Scoped to this scheduler instance, not a process-global
    active: Arc<ActiveSet>,
    running: AtomicBool,
    shutdown: CancellationToken,
    poll_interval: Duration,
    cancel_grace: Duration,
    account_token: String,
}

/// Deregister a dispatcher and release its lease. Idempotent; runs from the
/// supervising task when a loop ends and from the cancel grace path.
async fn cleanup(active: &ActiveSet, locks: &LockManager, id: CampaignId) {
    if active.lock().await.remove(&id).is_some() {
        debug!(campaign = %id, "Dispatcher deregistered");
    }
    if let Err(e) = locks.release(id).await {
        error!(campaign = %id, "Failed to release campaign lease: {}", e);
    }
}

impl CampaignScheduler {
    /// Create a new scheduler
    pub fn new(
        campaigns: Arc<dyn CampaignStore>,
        contacts: Arc<dyn ContactStore>,
        failures: Arc<dyn SendFailureStore>,
        gateway: Arc<dyn Gateway>,
        config: &SchedulerConfig,
        account_token: String,
    ) -> Self {
        let instance_id = config
            .instance_id
            .clone()
            .unwrap_or_else(|| format!("sched-{}", uuid::Uuid::new_v4().simple()));

        Self {
            campaigns: campaigns.clone(),
            contacts,
            failures,
            gateway,
            locks: Arc::new(LockManager::new(campaigns, instance_id, config.lease_ttl_secs)),
            active: Arc::new(Mutex::new(HashMap::new())),
            running: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            cancel_grace: Duration::from_secs(config.cancel_grace_secs),
            account_token,
        }
    }

    /// Run the poll loop until stopped. The first tick fires immediately.
    pub async fn run(self: Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Scheduler is already running");
            return;
        }

        info!(
            interval_secs = self.poll_interval.as_secs(),
            "Campaign scheduler started"
        );

        let mut ticker = interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.tick().await;
        }

        info!("Campaign scheduler stopped");
    }

    /// Stop the poll loop and best-effort pause every active dispatcher
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        self.shutdown.cancel();

        let dispatchers: Vec<(CampaignId, Arc<Dispatcher>)> = self
            .active
            .lock()
            .await
            .iter()
            .map(|(id, d)| (*id, d.clone()))
            .collect();

        for (id, dispatcher) in dispatchers {
            if let Err(e) = dispatcher.pause().await {
                warn!(campaign = %id, "Failed to pause dispatcher on shutdown: {}", e);
            }
        }
    }

    /// One poll pass. The autonomous path never propagates errors; there is
    /// no caller to receive them.
    async fn tick(&self) {
        let due = match self.campaigns.due_scheduled(Utc::now()).await {
            Ok(due) => due,
            Err(e) => {
                error!("Failed to query due campaigns: {}", e);
                return;
            }
        };

        if !due.is_empty() {
            debug!(count = due.len(), "Found due campaigns");
        }

        for campaign in due {
            let id = campaign.id;
            match self.dispatch_campaign(campaign, false).await {
                Ok(()) => {}
                // Another process or a previous tick owns it; next tick retries
                Err(CampaignError::LockUnavailable) => {}
                Err(e) => error!(campaign = %id, "Failed to start campaign: {}", e),
            }
        }
    }

    /// Start a campaign immediately, outside the schedule
    pub async fn start_now(&self, id: CampaignId) -> Result<(), CampaignError> {
        let campaign = self
            .campaigns
            .get(id)
            .await?
            .ok_or(CampaignError::NotFound)?;

        if self.active.lock().await.contains_key(&id) || self.locks.holds(id).await {
            return Err(CampaignError::AlreadyRunning);
        }

        self.dispatch_campaign(campaign, false).await
    }

    /// Pause a running campaign
    pub async fn pause(&self, id: CampaignId) -> Result<(), CampaignError> {
        let dispatcher = self
            .active
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or(CampaignError::NotRunning)?;

        dispatcher.pause().await
    }

    /// Resume a paused campaign. If no dispatcher is registered (the process
    /// restarted since the pause), one is reconstructed from persisted state.
    pub async fn resume(&self, id: CampaignId) -> Result<(), CampaignError> {
        if let Some(dispatcher) = self.active.lock().await.get(&id).cloned() {
            return dispatcher.resume().await;
        }

        if !self.locks.acquire(id).await? {
            return Err(CampaignError::LockUnavailable);
        }

        match self.reconstruct(id).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.release_lease(id).await;
                Err(e)
            }
        }
    }

    /// Cancel a running campaign. Cleanup is deferred by the grace delay so
    /// an in-flight send can finish instead of being interrupted.
    pub async fn cancel(&self, id: CampaignId) -> Result<(), CampaignError> {
        let dispatcher = self
            .active
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or(CampaignError::NotRunning)?;

        dispatcher.cancel().await?;

        let active = self.active.clone();
        let locks = self.locks.clone();
        let grace = self.cancel_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            cleanup(&active, &locks, id).await;
        });

        Ok(())
    }

    /// Validate and apply a config update. Valid pacing changes are pushed
    /// into a live dispatcher so an active loop honors them without restart.
    pub async fn update_config(
        &self,
        id: CampaignId,
        update: ConfigUpdate,
    ) -> Result<(), CampaignError> {
        let campaign = self
            .campaigns
            .get(id)
            .await?
            .ok_or(CampaignError::NotFound)?;

        let status = campaign
            .status_enum()
            .ok_or_else(|| CampaignError::InvalidConfig(format!("unknown status {}", campaign.status)))?;

        match status {
            CampaignStatus::Scheduled | CampaignStatus::Paused | CampaignStatus::Running => {}
            other => return Err(CampaignError::ConfigLocked(other.to_string())),
        }

        if update.scheduled_at.is_some() && status != CampaignStatus::Scheduled {
            return Err(CampaignError::FieldNotAllowed {
                field: "scheduled_at",
                status: campaign.status.clone(),
            });
        }

        for (field, value) in [
            ("delay_min", update.delay_min),
            ("delay_max", update.delay_max),
        ] {
            if let Some(v) = value {
                if !(1..=300).contains(&v) {
                    return Err(CampaignError::InvalidConfig(format!(
                        "{} must be an integer between 1 and 300",
                        field
                    )));
                }
            }
        }

        let delay_min = update.delay_min.map(|v| v as i32).unwrap_or(campaign.delay_min);
        let delay_max = update.delay_max.map(|v| v as i32).unwrap_or(campaign.delay_max);
        if delay_min > delay_max {
            return Err(CampaignError::InvalidConfig(
                "delay_min must be <= delay_max".to_string(),
            ));
        }

        let window_value = match &update.sending_window {
            None => campaign.sending_window.clone(),
            Some(None) => None,
            Some(Some(value)) => {
                SendingWindow::from_value(value).map_err(CampaignError::InvalidConfig)?;
                Some(value.clone())
            }
        };

        if update.touches_pacing() {
            let pacing = PacingValues {
                delay_min,
                delay_max,
                sending_window: window_value.clone(),
            };
            self.campaigns.update_pacing(id, &pacing).await?;
        }

        if let Some(scheduled_at) = update.scheduled_at {
            self.campaigns.update_schedule(id, scheduled_at).await?;
        }

        if update.touches_pacing() {
            if let Some(dispatcher) = self.active.lock().await.get(&id).cloned() {
                let sending_window = window_value
                    .as_ref()
                    .and_then(|v| SendingWindow::from_value(v).ok());
                dispatcher
                    .apply_pacing(PacingConfig {
                        delay_min: delay_min.max(1) as u64,
                        delay_max: delay_max.max(1) as u64,
                        sending_window,
                    })
                    .await;
            }
        }

        info!(campaign = %id, "Campaign config updated");
        Ok(())
    }

    /// Progress for a campaign: live from the dispatcher when registered,
    /// otherwise from the persisted row
    pub async fn progress(&self, id: CampaignId) -> Result<Progress, CampaignError> {
        if let Some(dispatcher) = self.active.lock().await.get(&id).cloned() {
            return Ok(dispatcher.progress());
        }

        let campaign = self
            .campaigns
            .get(id)
            .await?
            .ok_or(CampaignError::NotFound)?;

        Ok(Progress {
            current_index: campaign.current_index,
            sent_count: campaign.sent_count,
            failed_count: campaign.failed_count,
            total: campaign.total_recipients,
            percent_complete: campaign.progress_percentage(),
        })
    }

    /// Acquire the lease, then validate/materialize/launch. Every failure
    /// path after a successful acquire releases the lease.
    async fn dispatch_campaign(
        &self,
        campaign: Campaign,
        resuming: bool,
    ) -> Result<(), CampaignError> {
        let id = campaign.id;

        if !self.locks.acquire(id).await? {
            return Err(CampaignError::LockUnavailable);
        }

        match self.prepare_and_launch(campaign, resuming).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.release_lease(id).await;
                Err(e)
            }
        }
    }

    /// Reload a paused campaign and rebuild its dispatcher from persisted
    /// state. Caller holds the lease and releases it on error.
    async fn reconstruct(&self, id: CampaignId) -> Result<(), CampaignError> {
        let campaign = self
            .campaigns
            .get(id)
            .await?
            .ok_or(CampaignError::NotFound)?;

        if campaign.status_enum() != Some(CampaignStatus::Paused) {
            return Err(CampaignError::NotPaused(campaign.status.clone()));
        }

        self.prepare_and_launch(campaign, true).await
    }

    /// Gateway validation, recipient materialization, and the fire-and-forget
    /// dispatch with guaranteed cleanup. Caller holds the lease; on error it
    /// is the caller's job to release.
    async fn prepare_and_launch(
        &self,
        campaign: Campaign,
        resuming: bool,
    ) -> Result<(), CampaignError> {
        let id = campaign.id;

        if let Err(reason) = self.validate_gateway().await {
            warn!(campaign = %id, "Gateway validation failed: {}", reason);
            if !resuming {
                // Fatal setup error, not retried; surfaced on the campaign
                self.campaigns
                    .update_status(id, CampaignStatus::Failed, Some(&reason))
                    .await?;
            }
            return Err(CampaignError::GatewayValidation(reason));
        }

        let mut contacts = self.contacts.load_contacts(id, resuming).await?;

        if !resuming && campaign.randomize_order && campaign.current_index == 0 {
            contacts.shuffle(&mut rand::thread_rng());
            let order: Vec<_> = contacts.iter().map(|c| c.id).collect();
            self.contacts.persist_order(id, &order).await?;
            for (position, contact) in contacts.iter_mut().enumerate() {
                contact.position = position as i32;
            }
            debug!(campaign = %id, "Recipient order shuffled");
        }

        if contacts.is_empty() {
            if resuming {
                // The pause landed after the last recipient; nothing pending
                self.campaigns
                    .update_status(id, CampaignStatus::Completed, None)
                    .await?;
                self.release_lease(id).await;
                return Ok(());
            }

            self.campaigns
                .update_status(id, CampaignStatus::Failed, Some("campaign has no recipients"))
                .await?;
            return Err(CampaignError::NoRecipients);
        }

        if !resuming {
            self.campaigns
                .set_total_recipients(id, campaign.current_index + contacts.len() as i32)
                .await?;
        }

        // Only entered while holding a valid lease
        self.campaigns
            .update_status(id, CampaignStatus::Running, None)
            .await?;

        let dispatcher = Arc::new(Dispatcher::new(
            &campaign,
            contacts,
            self.account_token.clone(),
            self.campaigns.clone(),
            self.failures.clone(),
            self.gateway.clone(),
        ));

        self.active.lock().await.insert(id, dispatcher.clone());

        info!(campaign = %id, name = %campaign.name, resuming, "Campaign dispatch started");

        // Fire-and-forget: the poll loop is never blocked by a send loop.
        // The supervising task runs the cleanup continuation exactly once,
        // however the loop ends.
        let loop_handle = tokio::spawn(dispatcher.run());
        let active = self.active.clone();
        let locks = self.locks.clone();
        tokio::spawn(async move {
            if let Err(e) = loop_handle.await {
                error!(campaign = %id, "Dispatch task aborted: {}", e);
            }
            cleanup(&active, &locks, id).await;
        });

        Ok(())
    }

    /// Format check first, then the live connectivity check. Both failures
    /// are fatal setup errors for this attempt.
    async fn validate_gateway(&self) -> Result<(), String> {
        if !self.gateway.is_valid_token_format(&self.account_token) {
            return Err("invalid gateway token format".to_string());
        }

        let validation = self.gateway.validate_instance(&self.account_token).await;
        if !validation.valid {
            return Err(match validation.error {
                Some(error) => format!("gateway instance not ready ({}): {}", validation.status, error),
                None => format!("gateway instance not ready ({})", validation.status),
            });
        }

        Ok(())
    }

    async fn release_lease(&self, id: CampaignId) {
        if let Err(e) = self.locks.release(id).await {
            error!(campaign = %id, "Failed to release campaign lease: {}", e);
        }
    }
}
