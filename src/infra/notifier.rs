use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info};

use crate::app::ports::{Alert, Notifier, Severity};
use crate::error::AlertError;

/// Writes alerts to the log. Used when no webhook is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: &Alert, severity: Severity) -> Result<(), AlertError> {
        let checks: Vec<String> = alert
            .failing_checks
            .iter()
            .map(|c| format!("{}={}", c.check_name, c.failing_record_count))
            .collect();
        let location = alert.quarantine_location.as_deref().unwrap_or("<not persisted>");
        error!(run_id = %alert.run_id, ?severity, checks = %checks.join(","), location, "{}", alert.summary);
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookBody<'a> {
    severity: Severity,
    text: &'a str,
    alert: &'a Alert,
}

/// POSTs alerts as JSON to a webhook (chat integration or incident tool).
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, AlertError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AlertError::Delivery(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, alert: &Alert, severity: Severity) -> Result<(), AlertError> {
        let body = WebhookBody {
            severity,
            text: &alert.summary,
            alert,
        };
        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AlertError::Delivery(format!("webhook request failed: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(AlertError::Delivery(format!(
                "webhook returned status {}: {}",
                status, text
            )));
        }
        info!(run_id = %alert.run_id, ?severity, "Alert delivered to webhook");
        Ok(())
    }
}
