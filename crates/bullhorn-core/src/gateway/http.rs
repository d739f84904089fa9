//! HTTP messaging gateway client
//!
//! Talks to the gateway's HTTP API: instance status for validation, and the
//! send endpoints for text and media messages.

use async_trait::async_trait;
use bullhorn_common::config::GatewayConfig;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{Gateway, GatewayError, InstanceValidation, OutboundMessage};

/// Raw instance status response
#[derive(Debug, Deserialize)]
struct InstanceStatusResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    connected: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Send request body for text messages
#[derive(Debug, Serialize)]
struct SendTextRequest<'a> {
    phone: &'a str,
    message: &'a str,
}

/// Send request body for media messages
#[derive(Debug, Serialize)]
struct SendMediaRequest<'a> {
    phone: &'a str,
    caption: &'a str,
    media_url: &'a str,
}

/// HTTP gateway client
pub struct HttpGateway {
    config: GatewayConfig,
    client: Client,
    token_format: Regex,
}

impl HttpGateway {
    /// Create a new gateway client
    pub fn new(config: GatewayConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        // Account tokens are opaque but always URL-safe identifiers.
        let token_format = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{7,63}$")
            .expect("invalid token format pattern");

        Self {
            config,
            client,
            token_format,
        }
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    fn is_valid_token_format(&self, token: &str) -> bool {
        self.token_format.is_match(token)
    }

    async fn validate_instance(&self, token: &str) -> InstanceValidation {
        let url = format!("{}/instance/status", self.config.base_url);

        debug!("Validating gateway instance at {}", url);

        let response = match self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!("Gateway status request failed: {}", e);
                return InstanceValidation::invalid("unreachable", e.to_string());
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return InstanceValidation::invalid(status.to_string(), body);
        }

        match response.json::<InstanceStatusResponse>().await {
            Ok(r) => InstanceValidation {
                valid: r.connected,
                status: r.status,
                error: r.error,
            },
            Err(e) => {
                warn!("Failed to parse gateway status response: {}", e);
                InstanceValidation::invalid("bad_response", e.to_string())
            }
        }
    }

    async fn send(&self, token: &str, message: &OutboundMessage) -> Result<(), GatewayError> {
        let request = match &message.media_url {
            Some(media_url) => self
                .client
                .post(format!("{}/message/send-media", self.config.base_url))
                .bearer_auth(token)
                .json(&SendMediaRequest {
                    phone: &message.to,
                    caption: &message.body,
                    media_url,
                }),
            None => self
                .client
                .post(format!("{}/message/send-text", self.config.base_url))
                .bearer_auth(token)
                .json(&SendTextRequest {
                    phone: &message.to,
                    message: &message.body,
                }),
        };

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected { status, body });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway_for(server: &MockServer) -> HttpGateway {
        HttpGateway::new(GatewayConfig {
            base_url: server.uri(),
            token: "acct-1234567890".to_string(),
            timeout_secs: 5,
        })
    }

    #[test]
    fn test_token_format() {
        let gateway = HttpGateway::new(GatewayConfig {
            base_url: "http://localhost".to_string(),
            token: String::new(),
            timeout_secs: 5,
        });

        assert!(gateway.is_valid_token_format("acct-1234567890"));
        assert!(gateway.is_valid_token_format("A1b2C3d4"));
        assert!(!gateway.is_valid_token_format(""));
        assert!(!gateway.is_valid_token_format("short"));
        assert!(!gateway.is_valid_token_format("has spaces in it"));
        assert!(!gateway.is_valid_token_format("-leading-dash"));
    }

    #[tokio::test]
    async fn test_validate_instance_connected() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/instance/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "connected",
                "connected": true
            })))
            .mount(&server)
            .await;

        let gateway = gateway_for(&server);
        let result = gateway.validate_instance("acct-1234567890").await;
        assert!(result.valid);
        assert_eq!(result.status, "connected");
    }

    #[tokio::test]
    async fn test_validate_instance_disconnected() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/instance/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "qrcode",
                "connected": false,
                "error": "instance not paired"
            })))
            .mount(&server)
            .await;

        let gateway = gateway_for(&server);
        let result = gateway.validate_instance("acct-1234567890").await;
        assert!(!result.valid);
        assert_eq!(result.error.as_deref(), Some("instance not paired"));
    }

    #[tokio::test]
    async fn test_validate_instance_unreachable() {
        let gateway = HttpGateway::new(GatewayConfig {
            // Reserved port with nothing listening
            base_url: "http://127.0.0.1:1".to_string(),
            token: String::new(),
            timeout_secs: 1,
        });

        let result = gateway.validate_instance("acct-1234567890").await;
        assert!(!result.valid);
        assert_eq!(result.status, "unreachable");
    }

    #[tokio::test]
    async fn test_send_text_ok() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/message/send-text"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "m1"})))
            .mount(&server)
            .await;

        let gateway = gateway_for(&server);
        let message = OutboundMessage {
            to: "+5511999998888".to_string(),
            body: "hello".to_string(),
            media_url: None,
        };
        assert!(gateway.send("acct-1234567890", &message).await.is_ok());
    }

    #[tokio::test]
    async fn test_send_rejected() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/message/send-text"))
            .respond_with(ResponseTemplate::new(422).set_body_string("invalid number"))
            .mount(&server)
            .await;

        let gateway = gateway_for(&server);
        let message = OutboundMessage {
            to: "not-a-number".to_string(),
            body: "hello".to_string(),
            media_url: None,
        };

        match gateway.send("acct-1234567890", &message).await {
            Err(GatewayError::Rejected { status, .. }) => assert_eq!(status, 422),
            other => panic!("expected rejection, got {:?}", other),
        }
    }
}
