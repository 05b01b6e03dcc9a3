//! Markdown chat webhook (DingTalk-style robot API)
//!
//! Posts `{"msgtype": "markdown", "markdown": {"title": ..., "text": ...}}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use serpbench_core::{Alert, AlertHook, HarnessError, Report, ReportSink};
use tracing::{debug, info};
use url::Url;

use crate::error::{BenchError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,

    /// Prepended to every title; robots that filter on a keyword need it
    #[serde(default = "default_title_prefix")]
    pub title_prefix: String,

    /// Also post the final summary of every run
    #[serde(default)]
    pub send_summary: bool,

    #[serde(default = "default_webhook_timeout")]
    pub timeout_secs: u64,
}

fn default_title_prefix() -> String {
    "serpbench".to_string()
}

fn default_webhook_timeout() -> u64 {
    10
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title_prefix: default_title_prefix(),
            send_summary: false,
            timeout_secs: default_webhook_timeout(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.url)
            .map_err(|e| BenchError::config(format!("invalid webhook url '{}': {}", self.url, e)))?;
        if self.timeout_secs == 0 {
            return Err(BenchError::config("webhook.timeout_secs must be at least 1"));
        }
        Ok(())
    }
}

/// Sends markdown messages to a chat robot
#[derive(Debug, Clone)]
pub struct MarkdownWebhook {
    client: Client,
    config: WebhookConfig,
}

impl MarkdownWebhook {
    pub fn new(config: WebhookConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn sends_summary(&self) -> bool {
        self.config.send_summary
    }

    /// Post one message; non-2xx answers are errors
    pub async fn send(&self, title: &str, text: &str) -> Result<()> {
        let title = format!("{} {}", self.config.title_prefix, title);
        let payload = json!({
            "msgtype": "markdown",
            "markdown": {
                "title": title,
                "text": format!("### {}\n\n{}", title, text),
            }
        });

        let response = self
            .client
            .post(&self.config.url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        debug!(status = %response.status(), "webhook delivered");
        Ok(())
    }
}

/// Markdown body for an alert
pub fn alert_text(alert: &Alert) -> String {
    let observations: Vec<String> = alert
        .observations
        .iter()
        .map(|v| format!("{:.2}", v))
        .collect();
    format!(
        "{}\n\n- rule: {}\n- recent: [{}]\n- time: {}",
        alert.message,
        alert.rule,
        observations.join(", "),
        alert.raised_at.format("%Y-%m-%d %H:%M:%S UTC"),
    )
}

/// Markdown body for a final report
pub fn summary_text(report: &Report) -> String {
    let stats = &report.cumulative;
    format!(
        "- concurrency: {}\n\
         - total: {}\n\
         - success: {} ({:.2}%)\n\
         - timeouts: {} ({:.2}%)\n\
         - http errors: {}\n\
         - transport errors: {}\n\
         - throughput: {:.2} req/s\n\
         - avg: {:.3}s p50: {:.3}s p95: {:.3}s p99: {:.3}s\n\
         - elapsed: {:.2}s",
        report.concurrency,
        stats.total,
        stats.success_count,
        stats.success_percent(),
        stats.timeouts,
        stats.timeout_percent(),
        stats.http_errors,
        stats.transport_errors,
        stats.throughput,
        stats.latency.avg_secs,
        stats.latency.p50_secs,
        stats.latency.p95_secs,
        stats.latency.p99_secs,
        stats.elapsed_secs,
    )
}

#[async_trait]
impl AlertHook for MarkdownWebhook {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, alert: &Alert) -> serpbench_core::Result<()> {
        let title = format!("{} alert: {}", alert.label.to_uppercase(), alert.rule);
        self.send(&title, &alert_text(alert))
            .await
            .map_err(|e| HarnessError::hook("webhook", e))?;
        info!(label = %alert.label, rule = %alert.rule, "alert sent to webhook");
        Ok(())
    }
}

/// Posts the final report of each run through a [`MarkdownWebhook`]
#[derive(Debug, Clone)]
pub struct SummaryWebhookSink {
    webhook: MarkdownWebhook,
}

impl SummaryWebhookSink {
    pub fn new(webhook: MarkdownWebhook) -> Self {
        Self { webhook }
    }
}

#[async_trait]
impl ReportSink for SummaryWebhookSink {
    fn name(&self) -> &str {
        "summary-webhook"
    }

    async fn emit(&self, report: &Report) -> serpbench_core::Result<()> {
        if !report.is_final() {
            return Ok(());
        }
        let title = format!("{} summary", report.label.to_uppercase());
        self.webhook
            .send(&title, &summary_text(report))
            .await
            .map_err(|e| HarnessError::sink(self.name(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_alert_text() {
        let alert = Alert {
            rule: "success_rate".into(),
            label: "google".into(),
            message: "google: success rate below 95% for 3 consecutive intervals".into(),
            observations: vec![90.0, 80.5, 70.25],
            raised_at: Utc::now(),
        };
        let text = alert_text(&alert);
        assert!(text.starts_with("google: success rate below 95%"));
        assert!(text.contains("[90.00, 80.50, 70.25]"));
    }

    #[test]
    fn test_config_validation() {
        assert!(WebhookConfig::new("https://oapi.dingtalk.com/robot/send?access_token=x")
            .validate()
            .is_ok());
        assert!(WebhookConfig::new("not a url").validate().is_err());
        assert!(MarkdownWebhook::new(WebhookConfig::new("::")).is_err());
    }
}
