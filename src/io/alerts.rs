//! Alert posting to the RFID alert service
//!
//! The alert endpoint is notified when the tag collection wipe completes and
//! when an outbound event post fails. Posting failures are logged and
//! counted by callers, never fatal.

use crate::domain::events::epoch_ms;
use crate::infra::config::Config;
use anyhow::Context;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Platform alert number for the inventory unload request/completion
pub const ALERT_INVENTORY_UNLOAD: i32 = 260;
/// Platform alert number raised when an event post fails
pub const ALERT_SEND_EVENT_FAILED: i32 = 261;

/// Alert value posted to the alert service
#[derive(Debug, Serialize)]
pub struct Alert {
    pub sent_on: u64,
    pub alert_number: i32,
    pub alert_description: String,
    pub severity: String,
    pub optional: String,
}

/// Envelope for the alert-service endpoint
#[derive(Debug, Serialize)]
pub struct MessagePayload {
    pub application: String,
    pub value: Alert,
}

/// HTTP client for the alert service. Disabled when no URL is configured.
pub struct AlertClient {
    client: Option<reqwest::Client>,
    alert_url: String,
    service_name: String,
}

impl AlertClient {
    pub fn new(config: &Config) -> Self {
        let client = (!config.alert_url().is_empty()).then(|| {
            reqwest::Client::builder()
                .timeout(Duration::from_secs(config.connection_timeout_secs()))
                .build()
                .unwrap_or_default()
        });

        Self {
            client,
            alert_url: config.alert_url().to_string(),
            service_name: config.service_name().to_string(),
        }
    }

    /// Signal that the tag collection wipe finished
    pub async fn post_delete_completion(&self) -> anyhow::Result<()> {
        self.post(Alert {
            sent_on: epoch_ms(),
            alert_number: ALERT_INVENTORY_UNLOAD,
            alert_description: "Deletion of inventory tag collection is done".to_string(),
            severity: "info".to_string(),
            optional: String::new(),
        })
        .await
    }

    /// Signal that publishing an inventory event failed
    pub async fn post_event_send_failed(&self, destination: &str) -> anyhow::Result<()> {
        self.post(Alert {
            sent_on: epoch_ms(),
            alert_number: ALERT_SEND_EVENT_FAILED,
            alert_description: "Unable to send the processed event downstream".to_string(),
            severity: "critical".to_string(),
            optional: format!("destination: {destination}"),
        })
        .await
    }

    async fn post(&self, alert: Alert) -> anyhow::Result<()> {
        let Some(ref client) = self.client else {
            debug!("alert endpoint not configured, alert skipped");
            return Ok(());
        };

        let payload = MessagePayload { application: self.service_name.clone(), value: alert };
        let response = client
            .post(&self.alert_url)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("failed to post alert to {}", self.alert_url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("alert service returned {status}: {body}");
        }

        debug!(url = %self.alert_url, "alert_posted");
        Ok(())
    }
}
