//! Built-in alert sinks

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, error, info, instrument, warn};

use crate::Alert;
use crate::Severity;
use crate::engine::AlertSink;
use crate::report::{HealthReport, OverallStatus};

/// Writes alerts and health changes to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    async fn on_alert(&self, alert: &Alert) {
        match alert.severity {
            Severity::Critical => error!("{}", format_alert(alert)),
            Severity::Warning => warn!("{}", format_alert(alert)),
        }
    }

    async fn on_health_change(&self, report: &HealthReport) {
        let message = format_health(report);
        match report.status {
            OverallStatus::Healthy => info!("{message}"),
            _ => warn!("{message}"),
        }
    }
}

/// Posts alerts and health changes as JSON to a webhook
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    #[instrument(skip(self, payload))]
    async fn post(&self, payload: Value) {
        match self.client.post(&self.url).json(&payload).send().await {
            Ok(response) => {
                if response.status().is_success() {
                    debug!("webhook accepted notification");
                } else {
                    error!("webhook failed with status: {}", response.status());
                }
            }
            Err(e) => {
                error!("failed to send webhook notification: {e}");
            }
        }
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    async fn on_alert(&self, alert: &Alert) {
        self.post(json!({
            "message": format_alert(alert),
            "source": alert.source_id,
            "metric": alert.metric,
            "value": alert.value,
            "severity": alert.severity,
            "timestamp": alert.timestamp.to_rfc3339(),
        }))
        .await;
    }

    async fn on_health_change(&self, report: &HealthReport) {
        let degraded: Vec<_> = report
            .degraded_sources()
            .map(|source| source.source_id.as_str())
            .collect();

        self.post(json!({
            "message": format_health(report),
            "status": report.status,
            "degraded": degraded,
            "timestamp": Utc::now().to_rfc3339(),
        }))
        .await;
    }
}

fn format_alert(alert: &Alert) -> String {
    let icon = match alert.severity {
        Severity::Critical => "🚨",
        Severity::Warning => "⚠️",
    };
    format!(
        "{icon} {} {}: `{}` is at {:.1}",
        alert.severity, alert.source_id, alert.metric, alert.value
    )
}

fn format_health(report: &HealthReport) -> String {
    let degraded = report.degraded_sources().count();
    if degraded == 0 {
        format!("health is now {} ({} source(s))", report.status, report.sources.len())
    } else {
        format!(
            "health is now {} ({} of {} source(s) degraded)",
            report.status,
            degraded,
            report.sources.len()
        )
    }
}
