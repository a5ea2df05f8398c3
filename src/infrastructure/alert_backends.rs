//! Alert delivery sinks: the durable store (required) and an optional
//! chat webhook.

use crate::application::alerts::AlertBackend;
use crate::domain::alert::{Alert, AlertSeverity};
use crate::domain::repositories::AlertStore;
use crate::infrastructure::http::HttpClientFactory;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// Persists every alert through the `AlertStore` seam.
pub struct StoreBackend {
    store: Arc<dyn AlertStore>,
}

impl StoreBackend {
    pub fn new(store: Arc<dyn AlertStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AlertBackend for StoreBackend {
    fn name(&self) -> &str {
        "store"
    }

    async fn send_alert(&self, alert: &Alert) -> Result<()> {
        self.store.put_alert(alert).await
    }
}

/// Posts alerts to a chat webhook (Slack-compatible payload).
pub struct WebhookBackend {
    url: String,
    client: ClientWithMiddleware,
}

impl WebhookBackend {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            url: url.into(),
            client: HttpClientFactory::create_client(),
        })
    }

    fn marker(severity: AlertSeverity) -> &'static str {
        match severity {
            AlertSeverity::Critical => ":rotating_light:",
            AlertSeverity::Warning => ":warning:",
            AlertSeverity::Info => ":information_source:",
        }
    }
}

#[async_trait]
impl AlertBackend for WebhookBackend {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send_alert(&self, alert: &Alert) -> Result<()> {
        let mut blocks = vec![json!({
            "type": "section",
            "text": {
                "type": "mrkdwn",
                "text": format!("{} *{}*\n{}", Self::marker(alert.severity), alert.kind, alert.message),
            }
        })];
        if !alert.details.is_null() {
            blocks.push(json!({
                "type": "section",
                "text": {
                    "type": "mrkdwn",
                    "text": format!("```{}```", serde_json::to_string_pretty(&alert.details)?),
                }
            }));
        }

        let payload = json!({
            "text": format!("{} {}", Self::marker(alert.severity), alert.kind),
            "blocks": blocks,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .context("Webhook request failed")?;
        response
            .error_for_status()
            .context("Webhook returned an error status")?;
        debug!("Alert {} delivered to webhook", alert.kind);
        Ok(())
    }
}
