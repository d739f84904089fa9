//! Campaign engine: lock manager, scheduler/poller, and the per-campaign
//! dispatcher that drives the paced send loop.

pub mod dispatcher;
pub mod lock;
pub mod scheduler;
pub mod template;
pub mod window;

pub use dispatcher::{Dispatcher, DispatcherState, PacingConfig, Progress};
pub use lock::LockManager;
pub use scheduler::{CampaignScheduler, ConfigUpdate};
pub use window::SendingWindow;

use thiserror::Error;

/// Campaign engine errors, surfaced synchronously by operator-facing
/// operations. The autonomous poll path never propagates these; it logs.
#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("Campaign not found")]
    NotFound,

    #[error("Campaign is already running")]
    AlreadyRunning,

    #[error("Campaign is not running")]
    NotRunning,

    #[error("Could not acquire campaign lock")]
    LockUnavailable,

    #[error("Campaign is not paused (status: {0})")]
    NotPaused(String),

    #[error("Campaign has no recipients")]
    NoRecipients,

    #[error("Gateway validation failed: {0}")]
    GatewayValidation(String),

    #[error("Campaign config cannot be updated while {0}")]
    ConfigLocked(String),

    #[error("Field {field} cannot be updated while campaign is {status}")]
    FieldNotAllowed {
        field: &'static str,
        status: String,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Storage error: {0}")]
    Storage(#[from] bullhorn_common::Error),
}
