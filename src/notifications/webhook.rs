//! Webhook telemetry delivery

use anyhow::Result;
use serde_json::{json, Value};

use super::{Attributes, Telemetry};

/// Posts every telemetry event as JSON to a webhook
#[derive(Debug, Clone)]
pub struct WebhookTelemetry {
    client: reqwest::Client,
    url: String,
    source: String,
}

impl WebhookTelemetry {
    pub fn new(url: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            source: source.into(),
        }
    }

    fn payload(&self, event: &str, attributes: &Attributes) -> Value {
        json!({
            "event": event,
            "source": self.source,
            "attributes": attributes,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })
    }
}

impl Telemetry for WebhookTelemetry {
    fn track(&self, event: &str, attributes: Attributes) {
        let payload = self.payload(event, &attributes);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(event, "no async runtime, dropping webhook telemetry");
            return;
        };

        let client = self.client.clone();
        let url = self.url.clone();
        runtime.spawn(async move {
            if let Err(e) = send_webhook_event(&client, &url, &payload).await {
                tracing::warn!(error = %e, "webhook telemetry failed");
            }
        });
    }
}

/// Send one event to the webhook
pub async fn send_webhook_event(client: &reqwest::Client, url: &str, payload: &Value) -> Result<()> {
    let response = client.post(url).json(payload).send().await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("Webhook error ({}): {}", status, body);
    }

    Ok(())
}
