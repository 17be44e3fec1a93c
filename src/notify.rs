//! Notification delivery over HTTP, plus HMAC-SHA256 request signing shared
//! by outbound notifications and inbound webhook verification.

use std::time::Duration;

use async_trait::async_trait;
use git_watcher_core::contract::{NotificationPayload, Notifier, NotifyError};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use sha2::Sha256;
use tracing::{debug, info, warn};

use crate::load_config::WebhookConfig;

pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

type HmacSha256 = Hmac<Sha256>;

/// Lowercase hex HMAC-SHA256 of `body` keyed by `secret`.
pub fn sign_payload(body: &[u8], secret: &str) -> String {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a hex signature against `body`.
pub fn verify_signature(body: &[u8], secret: &str, signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[derive(Debug, Clone)]
pub struct WebhookClient {
    client: Client,
    callback_url: String,
    secret: String,
    method: Method,
}

impl WebhookClient {
    pub fn new(config: &WebhookConfig) -> anyhow::Result<Self> {
        let method = if config.method.trim().is_empty() {
            Method::POST
        } else {
            Method::from_bytes(config.method.trim().to_ascii_uppercase().as_bytes())
                .map_err(|e| anyhow::anyhow!("invalid webhook method {:?}: {e}", config.method))?
        };
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            client,
            callback_url: config.callback_url.clone(),
            secret: config.secret.clone(),
            method,
        })
    }
}

#[async_trait]
impl Notifier for WebhookClient {
    async fn send_notification(&self, payload: &NotificationPayload) -> Result<(), NotifyError> {
        if self.callback_url.is_empty() {
            return Err("webhook callback URL is not configured".into());
        }
        let body = serde_json::to_vec(payload)?;

        let mut request = self
            .client
            .request(self.method.clone(), &self.callback_url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if !self.secret.is_empty() {
            request = request.header(SIGNATURE_HEADER, sign_payload(&body, &self.secret));
        }

        debug!(url = %self.callback_url, method = %self.method, bytes = body.len(), "Sending notification");
        let response = request.body(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(url = %self.callback_url, status = %status, "Notification rejected");
            return Err(format!("webhook returned status {status}: {text}").into());
        }

        info!(
            url = %self.callback_url,
            status = %status,
            updates = payload.repo_updates.len(),
            "Notification delivered"
        );
        Ok(())
    }
}
