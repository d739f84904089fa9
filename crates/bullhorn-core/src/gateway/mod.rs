//! Messaging gateway interface
//!
//! The gateway is the external channel through which messages are actually
//! transmitted. The engine only depends on this trait; the HTTP client in
//! [`http`] is the production implementation.

pub mod http;

pub use http::HttpGateway;

use async_trait::async_trait;
use thiserror::Error;

/// One message handed to the gateway for a single recipient
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Destination phone number
    pub to: String,
    /// Rendered message body (or media caption)
    pub body: String,
    /// Media reference for media messages
    pub media_url: Option<String>,
}

/// Result of a live instance validation
#[derive(Debug, Clone)]
pub struct InstanceValidation {
    pub valid: bool,
    pub status: String,
    pub error: Option<String>,
}

impl InstanceValidation {
    /// Validation that failed before reaching the gateway
    pub fn invalid(status: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            valid: false,
            status: status.into(),
            error: Some(error.into()),
        }
    }
}

/// Gateway send errors. Timeouts and hard rejections are not distinguished:
/// both count as a failure for the recipient being processed.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Request(String),

    #[error("gateway rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Messaging gateway client
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Cheap syntactic check of the account token
    fn is_valid_token_format(&self, token: &str) -> bool;

    /// Live connectivity/authorization check against the gateway
    async fn validate_instance(&self, token: &str) -> InstanceValidation;

    /// Send one message for one recipient
    async fn send(&self, token: &str, message: &OutboundMessage) -> Result<(), GatewayError>;
}
