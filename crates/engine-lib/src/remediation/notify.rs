//! Notification sinks for alert actions

use super::{Notification, NotificationSink};
use crate::error::NotifyError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

/// Writes alerts to the log
#[derive(Debug, Default, Clone)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        warn!(
            event = "alert",
            policy = %notification.policy,
            service = %notification.service,
            channel = %notification.channel,
            severity = %notification.severity,
            "{}",
            notification.message
        );
        Ok(())
    }
}

/// Alertmanager webhook alert
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertmanagerAlert {
    /// firing or resolved
    pub status: String,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
    /// RFC3339
    pub starts_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generator_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertmanagerPayload {
    pub alerts: Vec<AlertmanagerAlert>,
}

impl From<&Notification> for AlertmanagerAlert {
    fn from(n: &Notification) -> Self {
        let labels = HashMap::from([
            ("alertname".to_string(), "AutoRemediationAlert".to_string()),
            ("severity".to_string(), n.severity.to_string()),
            ("service".to_string(), n.service.clone()),
            ("policy".to_string(), n.policy.clone()),
            ("channel".to_string(), n.channel.clone()),
        ]);
        let annotations = HashMap::from([
            (
                "summary".to_string(),
                format!("Policy {} fired for {}", n.policy, n.service),
            ),
            ("description".to_string(), n.message.clone()),
        ]);

        Self {
            status: "firing".to_string(),
            labels,
            annotations,
            starts_at: n.timestamp.to_rfc3339(),
            generator_url: None,
        }
    }
}

/// Posts alerts to an Alertmanager-compatible webhook
pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn payload(notification: &Notification) -> AlertmanagerPayload {
        AlertmanagerPayload {
            alerts: vec![AlertmanagerAlert::from(notification)],
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(&Self::payload(notification))
            .send()
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotifyError::Delivery(format!(
                "webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Severity;
    use chrono::Utc;

    fn notification() -> Notification {
        Notification {
            policy: "high_cpu_alert".to_string(),
            service: "orders".to_string(),
            channel: "#ops".to_string(),
            severity: Severity::Warning,
            message: "ALERT: orders - orders.cpu_usage = 92.00".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_alertmanager_payload() {
        let payload = WebhookSink::payload(&notification());
        let json = serde_json::to_value(&payload).unwrap();

        let alert = &json["alerts"][0];
        assert_eq!(alert["status"], "firing");
        assert_eq!(alert["labels"]["severity"], "warning");
        assert_eq!(alert["labels"]["policy"], "high_cpu_alert");
        assert_eq!(alert["labels"]["channel"], "#ops");
        assert!(alert["startsAt"].is_string());
        assert!(alert.get("generatorUrl").is_none());
        assert_eq!(
            alert["annotations"]["description"],
            "ALERT: orders - orders.cpu_usage = 92.00"
        );
    }

    #[tokio::test]
    async fn test_log_sink_always_delivers() {
        assert!(LogSink.send(&notification()).await.is_ok());
    }

    #[tokio::test]
    async fn test_webhook_unreachable_is_delivery_error() {
        let sink = WebhookSink::new("http://127.0.0.1:9/alerts", Duration::from_millis(200)).unwrap();
        assert!(matches!(
            sink.send(&notification()).await,
            Err(NotifyError::Delivery(_))
        ));
    }
}
