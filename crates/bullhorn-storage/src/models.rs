//! Database models

use bullhorn_common::types::{CampaignId, ContactId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Campaign status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Scheduled,
    Running,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl CampaignStatus {
    /// Terminal states never accept a new lease or status change
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CampaignStatus::Completed | CampaignStatus::Cancelled | CampaignStatus::Failed
        )
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CampaignStatus::Scheduled => write!(f, "scheduled"),
            CampaignStatus::Running => write!(f, "running"),
            CampaignStatus::Paused => write!(f, "paused"),
            CampaignStatus::Completed => write!(f, "completed"),
            CampaignStatus::Cancelled => write!(f, "cancelled"),
            CampaignStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(CampaignStatus::Scheduled),
            "running" => Ok(CampaignStatus::Running),
            "paused" => Ok(CampaignStatus::Paused),
            "completed" => Ok(CampaignStatus::Completed),
            "cancelled" => Ok(CampaignStatus::Cancelled),
            "failed" => Ok(CampaignStatus::Failed),
            _ => Err(format!("Invalid campaign status: {}", s)),
        }
    }
}

/// Message type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Media,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageType::Text => write!(f, "text"),
            MessageType::Media => write!(f, "media"),
        }
    }
}

impl std::str::FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageType::Text),
            "media" => Ok(MessageType::Media),
            _ => Err(format!("Invalid message type: {}", s)),
        }
    }
}

/// Campaign model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub name: String,
    pub status: String,
    pub scheduled_at: Option<DateTime<Utc>>,

    pub delay_min: i32,
    pub delay_max: i32,
    pub randomize_order: bool,
    pub sending_window: Option<serde_json::Value>,

    pub message_type: String,
    pub message_body: String,
    pub media_url: Option<String>,
    pub messages: Option<serde_json::Value>,

    pub current_index: i32,
    pub sent_count: i32,
    pub failed_count: i32,
    pub total_recipients: i32,

    pub processing_lock: Option<String>,
    pub lock_acquired_at: Option<DateTime<Utc>>,

    pub failure_reason: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Campaign {
    /// Get status enum
    pub fn status_enum(&self) -> Option<CampaignStatus> {
        self.status.parse().ok()
    }

    /// Get message type enum; unknown values degrade to text
    pub fn message_type_enum(&self) -> MessageType {
        self.message_type.parse().unwrap_or(MessageType::Text)
    }

    /// Calculate progress percentage
    pub fn progress_percentage(&self) -> f64 {
        if self.total_recipients == 0 {
            0.0
        } else {
            (self.current_index as f64 / self.total_recipients as f64) * 100.0
        }
    }
}

/// Contact model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub campaign_id: CampaignId,
    pub phone: String,
    pub name: Option<String>,
    pub attributes: serde_json::Value,
    pub position: i32,
    pub created_at: DateTime<Utc>,
}

/// Per-recipient send failure record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SendFailure {
    pub id: uuid::Uuid,
    pub campaign_id: CampaignId,
    pub contact_id: ContactId,
    pub phone: String,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

/// Resolved pacing values to persist after a config update
#[derive(Debug, Clone)]
pub struct PacingValues {
    pub delay_min: i32,
    pub delay_max: i32,
    pub sending_window: Option<serde_json::Value>,
}

/// Snapshot of a campaign's lease fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub token: Option<String>,
    pub acquired_at: Option<DateTime<Utc>>,
}

impl Lease {
    /// A lease is available if unheld or held longer than the TTL
    pub fn is_available(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        match (&self.token, self.acquired_at) {
            (Some(_), Some(acquired_at)) => now - acquired_at > ttl,
            _ => true,
        }
    }
}
