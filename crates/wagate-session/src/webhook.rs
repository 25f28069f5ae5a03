//! Per-number webhook registry and delivery.
//!
//! Delivery is fire-and-forget: the event stream must never stall on a slow
//! or dead webhook endpoint, so failures are logged and dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use wagate_core::error::GatewayError;
use wagate_core::message::{WebhookEvent, WebhookPayload};

#[derive(Clone)]
pub struct WebhookDispatcher {
    urls: Arc<RwLock<HashMap<String, String>>>,
    http: reqwest::Client,
    timeout: Duration,
}

impl WebhookDispatcher {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            urls: Arc::new(RwLock::new(HashMap::new())),
            http: reqwest::Client::new(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Register (or replace) the webhook URL for a number.
    /// Only absolute http(s) URLs are accepted.
    pub async fn register(&self, number: &str, url: &str) -> Result<(), GatewayError> {
        let parsed: reqwest::Url = url
            .parse()
            .map_err(|e| GatewayError::Webhook(format!("invalid URL '{url}': {e}")))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(GatewayError::Webhook(format!(
                "unsupported URL scheme '{}'",
                parsed.scheme()
            )));
        }
        self.urls
            .write()
            .await
            .insert(number.to_string(), url.to_string());
        Ok(())
    }

    pub async fn remove(&self, number: &str) {
        self.urls.write().await.remove(number);
    }

    pub async fn url_for(&self, number: &str) -> Option<String> {
        self.urls.read().await.get(number).cloned()
    }

    /// POST an event to the number's webhook, if one is registered.
    /// Spawns the request; never blocks the caller.
    pub fn dispatch(&self, number: &str, event: WebhookEvent) {
        let dispatcher = self.clone();
        let number = number.to_string();
        tokio::spawn(async move {
            let Some(url) = dispatcher.url_for(&number).await else {
                return;
            };
            let payload = WebhookPayload {
                number: number.clone(),
                event,
            };
            let result = dispatcher
                .http
                .post(&url)
                .timeout(dispatcher.timeout)
                .json(&payload)
                .send()
                .await;
            match result {
                Ok(resp) if resp.status().is_success() => {
                    debug!("webhook delivered for {number}");
                }
                Ok(resp) => {
                    warn!("webhook for {number} returned {}", resp.status());
                }
                Err(e) => {
                    warn!("webhook delivery for {number} failed: {e}");
                }
            }
        });
    }
}
