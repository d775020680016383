//! Operator notification channels.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::error;

/// What the operator is told.
#[derive(Debug, Clone, Serialize)]
pub struct Incident {
    pub description: String,
    pub occurred_at: DateTime<Utc>,
}

#[async_trait]
pub trait AlertChannel: Send + Sync {
    async fn notify(&self, incident: &Incident) -> Result<()>;
}

/// Writes the incident to the error log. Used when no webhook is configured.
pub struct LogAlertChannel;

#[async_trait]
impl AlertChannel for LogAlertChannel {
    async fn notify(&self, incident: &Incident) -> Result<()> {
        error!(
            occurred_at = %incident.occurred_at.to_rfc3339(),
            "🚨 OPERATOR ALERT: {}",
            incident.description
        );
        Ok(())
    }
}

/// POSTs the incident as JSON to a webhook (Slack-style `text` included).
pub struct WebhookAlertChannel {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl WebhookAlertChannel {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[async_trait]
impl AlertChannel for WebhookAlertChannel {
    async fn notify(&self, incident: &Incident) -> Result<()> {
        let resp = self.client.post(&self.url)
            .timeout(self.timeout)
            .json(&serde_json::json!({
                "text": format!("[chat-relay] {}", incident.description),
                "description": &incident.description,
                "occurred_at": incident.occurred_at.to_rfc3339(),
            }))
            .send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            bail!("Alert webhook returned {}: {}", status.as_u16(), snippet);
        }
        Ok(())
    }
}
