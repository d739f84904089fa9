//! Dispatcher - the per-campaign paced send loop
//!
//! One dispatcher instance drives one campaign: it walks the recipient list
//! from the persisted cursor, enforces the inter-message delay and the
//! sending window, sends through the gateway, and checkpoints cursor and
//! counters after every recipient. Pause, cancel, and pacing updates are
//! cooperative signals observed at the loop's suspension points.

use bullhorn_common::types::{CampaignId, PhoneNumber};
use bullhorn_storage::models::{Campaign, CampaignStatus, Contact, MessageType};
use bullhorn_storage::repository::{CampaignStore, SendFailureStore};
use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::template::MessageRenderer;
use super::window::SendingWindow;
use super::CampaignError;
use crate::gateway::{Gateway, OutboundMessage};

/// Pacing settings read by the send loop. Hot-swappable while the loop runs.
#[derive(Debug, Clone)]
pub struct PacingConfig {
    /// Minimum inter-message delay (seconds)
    pub delay_min: u64,
    /// Maximum inter-message delay (seconds)
    pub delay_max: u64,
    /// Optional weekly sending window
    pub sending_window: Option<SendingWindow>,
}

impl PacingConfig {
    /// Build pacing from a persisted campaign row. A malformed stored
    /// window degrades to "no window" rather than failing the dispatch.
    pub fn from_campaign(campaign: &Campaign) -> Self {
        let sending_window = campaign.sending_window.as_ref().and_then(|value| {
            match SendingWindow::from_value(value) {
                Ok(window) => Some(window),
                Err(e) => {
                    warn!(campaign = %campaign.id, "Ignoring stored sending window: {}", e);
                    None
                }
            }
        });

        let delay_min = campaign.delay_min.max(1) as u64;
        Self {
            delay_min,
            delay_max: (campaign.delay_max.max(1) as u64).max(delay_min),
            sending_window,
        }
    }
}

/// Dispatcher lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Created,
    Running,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl DispatcherState {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            DispatcherState::Completed | DispatcherState::Cancelled | DispatcherState::Failed
        )
    }
}

/// Campaign progress snapshot
#[derive(Debug, Clone, Serialize)]
pub struct Progress {
    pub current_index: i32,
    pub sent_count: i32,
    pub failed_count: i32,
    pub total: i32,
    pub percent_complete: f64,
}

/// Per-campaign send loop worker
pub struct Dispatcher {
    campaign_id: CampaignId,
    message_type: MessageType,
    message_body: String,
    media_url: Option<String>,
    message_variants: Option<serde_json::Value>,
    account_token: String,

    /// Pending recipients in dispatch order (positions >= the cursor)
    contacts: Vec<Contact>,

    campaigns: Arc<dyn CampaignStore>,
    failures: Arc<dyn SendFailureStore>,
    gateway: Arc<dyn Gateway>,
    renderer: MessageRenderer,

    pacing: RwLock<PacingConfig>,
    config_changed: Notify,
    paused: watch::Sender<bool>,
    cancel_token: CancellationToken,
    state: RwLock<DispatcherState>,

    current_index: AtomicI32,
    sent_count: AtomicI32,
    failed_count: AtomicI32,
    total: i32,
}

impl Dispatcher {
    /// Build a dispatcher from a persisted campaign row and its pending
    /// recipient tail. Cursor and counters are restored from the row.
    pub fn new(
        campaign: &Campaign,
        contacts: Vec<Contact>,
        account_token: String,
        campaigns: Arc<dyn CampaignStore>,
        failures: Arc<dyn SendFailureStore>,
        gateway: Arc<dyn Gateway>,
    ) -> Self {
        let (paused, _) = watch::channel(false);
        let total = campaign.current_index + contacts.len() as i32;

        Self {
            campaign_id: campaign.id,
            message_type: campaign.message_type_enum(),
            message_body: campaign.message_body.clone(),
            media_url: campaign.media_url.clone(),
            message_variants: campaign.messages.clone(),
            account_token,
            contacts,
            campaigns,
            failures,
            gateway,
            renderer: MessageRenderer::new(),
            pacing: RwLock::new(PacingConfig::from_campaign(campaign)),
            config_changed: Notify::new(),
            paused,
            cancel_token: CancellationToken::new(),
            state: RwLock::new(DispatcherState::Created),
            current_index: AtomicI32::new(campaign.current_index),
            sent_count: AtomicI32::new(campaign.sent_count),
            failed_count: AtomicI32::new(campaign.failed_count),
            total,
        }
    }

    /// Current lifecycle state
    pub async fn state(&self) -> DispatcherState {
        *self.state.read().await
    }

    /// Progress snapshot
    pub fn progress(&self) -> Progress {
        let current_index = self.current_index.load(Ordering::Relaxed);
        let percent_complete = if self.total == 0 {
            0.0
        } else {
            (current_index as f64 / self.total as f64) * 100.0
        };

        Progress {
            current_index,
            sent_count: self.sent_count.load(Ordering::Relaxed),
            failed_count: self.failed_count.load(Ordering::Relaxed),
            total: self.total,
            percent_complete,
        }
    }

    /// Suspend the loop at its next suspension point
    pub async fn pause(&self) -> Result<(), CampaignError> {
        {
            let mut state = self.state.write().await;
            if *state != DispatcherState::Running {
                return Err(CampaignError::NotRunning);
            }
            *state = DispatcherState::Paused;
        }

        self.paused.send_replace(true);
        self.campaigns
            .update_status(self.campaign_id, CampaignStatus::Paused, None)
            .await?;

        info!(campaign = %self.campaign_id, "Campaign paused");
        Ok(())
    }

    /// Resume a paused loop
    pub async fn resume(&self) -> Result<(), CampaignError> {
        {
            let mut state = self.state.write().await;
            if *state != DispatcherState::Paused {
                return Err(CampaignError::NotPaused(format!("{:?}", *state).to_lowercase()));
            }
            *state = DispatcherState::Running;
        }

        self.paused.send_replace(false);
        self.campaigns
            .update_status(self.campaign_id, CampaignStatus::Running, None)
            .await?;

        info!(campaign = %self.campaign_id, "Campaign resumed");
        Ok(())
    }

    /// Request cancellation. Cooperative: the loop stops at its next
    /// checkpoint boundary, never mid-send.
    pub async fn cancel(&self) -> Result<(), CampaignError> {
        if self.state.read().await.is_terminal() {
            return Err(CampaignError::NotRunning);
        }

        info!(campaign = %self.campaign_id, "Campaign cancel requested");
        self.cancel_token.cancel();
        Ok(())
    }

    /// Hot-swap pacing. An active loop picks the new values up at its next
    /// wait without restarting.
    pub async fn apply_pacing(&self, pacing: PacingConfig) {
        *self.pacing.write().await = pacing;
        // notify_one stores a permit, so an update landing just before the
        // loop reaches its wait is still observed
        self.config_changed.notify_one();
        debug!(campaign = %self.campaign_id, "Pacing config updated");
    }

    /// Run the send loop to completion. Never propagates errors: send
    /// failures are counted per recipient and persistence failures are
    /// logged, with the in-memory state staying authoritative.
    pub async fn run(self: Arc<Self>) {
        {
            let mut state = self.state.write().await;
            if *state == DispatcherState::Created {
                *state = DispatcherState::Running;
            }
        }

        info!(
            campaign = %self.campaign_id,
            pending = self.contacts.len(),
            total = self.total,
            "Dispatch loop started"
        );

        for (i, contact) in self.contacts.iter().enumerate() {
            if self.cancel_token.is_cancelled() {
                self.finish(DispatcherState::Cancelled).await;
                return;
            }

            if !self.wait_while_paused().await {
                self.finish(DispatcherState::Cancelled).await;
                return;
            }

            if !self.wait_for_window().await {
                self.finish(DispatcherState::Cancelled).await;
                return;
            }

            self.send_to(contact).await;

            let next_index = contact.position + 1;
            self.current_index.store(next_index, Ordering::Relaxed);

            if let Err(e) = self
                .campaigns
                .checkpoint(
                    self.campaign_id,
                    next_index,
                    self.sent_count.load(Ordering::Relaxed),
                    self.failed_count.load(Ordering::Relaxed),
                )
                .await
            {
                error!(campaign = %self.campaign_id, "Checkpoint write failed: {}", e);
            }

            if i + 1 < self.contacts.len() && !self.paced_delay().await {
                self.finish(DispatcherState::Cancelled).await;
                return;
            }
        }

        self.finish(DispatcherState::Completed).await;
        info!(
            campaign = %self.campaign_id,
            sent = self.sent_count.load(Ordering::Relaxed),
            failed = self.failed_count.load(Ordering::Relaxed),
            "Dispatch loop completed"
        );
    }

    /// Send one message. A failure is counted and recorded; it never aborts
    /// the campaign.
    async fn send_to(&self, contact: &Contact) {
        // A phone that cannot be a number fails locally, skipping the
        // doomed gateway round trip.
        if PhoneNumber::parse(&contact.phone).is_none() {
            self.failed_count.fetch_add(1, Ordering::Relaxed);
            warn!(
                campaign = %self.campaign_id,
                phone = %contact.phone,
                "Recipient has an invalid phone number"
            );
            self.record_failure(contact, "invalid phone number").await;
            return;
        }

        let template = self.renderer.select_template(
            self.message_variants.as_ref(),
            &self.message_body,
            contact.position as usize,
        );
        let body = self.renderer.render(template, contact);

        let message = OutboundMessage {
            to: contact.phone.clone(),
            body,
            media_url: match self.message_type {
                MessageType::Media => self.media_url.clone(),
                MessageType::Text => None,
            },
        };

        match self.gateway.send(&self.account_token, &message).await {
            Ok(()) => {
                self.sent_count.fetch_add(1, Ordering::Relaxed);
                debug!(campaign = %self.campaign_id, phone = %contact.phone, "Message sent");
            }
            Err(e) => {
                self.failed_count.fetch_add(1, Ordering::Relaxed);
                warn!(
                    campaign = %self.campaign_id,
                    phone = %contact.phone,
                    "Send failed: {}", e
                );
                self.record_failure(contact, &e.to_string()).await;
            }
        }
    }

    async fn record_failure(&self, contact: &Contact, reason: &str) {
        if let Err(e) = self
            .failures
            .record(self.campaign_id, contact.id, &contact.phone, reason)
            .await
        {
            error!(campaign = %self.campaign_id, "Failed to record send failure: {}", e);
        }
    }

    /// Block while paused. Returns false if cancelled during the wait.
    async fn wait_while_paused(&self) -> bool {
        let mut rx = self.paused.subscribe();
        loop {
            if self.cancel_token.is_cancelled() {
                return false;
            }
            if !*rx.borrow_and_update() {
                return true;
            }

            debug!(campaign = %self.campaign_id, "Loop suspended (paused)");
            tokio::select! {
                _ = self.cancel_token.cancelled() => return false,
                changed = rx.changed() => {
                    if changed.is_err() {
                        return true;
                    }
                }
            }
        }
    }

    /// Block until the sending window (if any) is open. Re-evaluates on
    /// pacing updates, suspends on pause, and returns false if cancelled.
    async fn wait_for_window(&self) -> bool {
        loop {
            if self.cancel_token.is_cancelled() {
                return false;
            }

            let window = self.pacing.read().await.sending_window.clone();
            let Some(window) = window else {
                return true;
            };

            let now = Utc::now();
            if window.contains(now) {
                return true;
            }

            let next = window.next_open(now);
            let wait = (next - now).to_std().unwrap_or_default();
            info!(
                campaign = %self.campaign_id,
                until = %next,
                "Outside sending window, deferring sends"
            );

            let mut rx = self.paused.subscribe();
            tokio::select! {
                _ = self.cancel_token.cancelled() => return false,
                _ = self.config_changed.notified() => {}
                _ = tokio::time::sleep(wait) => {}
                changed = rx.changed() => {
                    if changed.is_ok() && *rx.borrow() && !self.wait_while_paused().await {
                        return false;
                    }
                }
            }
        }
    }

    /// Wait a duration drawn uniformly from [delay_min, delay_max] seconds.
    /// Fixed intervals are a detectable automation signature, hence the
    /// randomization. Returns false if cancelled during the wait.
    async fn paced_delay(&self) -> bool {
        let (delay_min, delay_max) = {
            let pacing = self.pacing.read().await;
            (pacing.delay_min, pacing.delay_max)
        };

        let secs = if delay_max > delay_min {
            rand::thread_rng().gen_range(delay_min..=delay_max)
        } else {
            delay_min
        };

        tokio::select! {
            _ = self.cancel_token.cancelled() => false,
            _ = tokio::time::sleep(Duration::from_secs(secs)) => true,
        }
    }

    /// Record the terminal state and persist the matching campaign status
    async fn finish(&self, state: DispatcherState) {
        *self.state.write().await = state;

        let status = match state {
            DispatcherState::Completed => CampaignStatus::Completed,
            DispatcherState::Cancelled => CampaignStatus::Cancelled,
            DispatcherState::Failed => CampaignStatus::Failed,
            _ => return,
        };

        if let Err(e) = self
            .campaigns
            .update_status(self.campaign_id, status, None)
            .await
        {
            error!(campaign = %self.campaign_id, "Failed to persist final status: {}", e);
        }
    }
}
