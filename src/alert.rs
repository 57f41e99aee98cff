//! Security alerting
//!
//! Alert delivery is best-effort and out of band: dispatch never blocks the
//! request path and failures are logged, not propagated.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::threat::scorer::SignalHit;

#[derive(Debug, Clone, Serialize)]
pub struct SecurityAlert {
    pub identity: String,
    pub ip: String,
    pub user_id: Option<i64>,
    pub score: u32,
    pub threshold: u32,
    pub signals: Vec<SignalHit>,
    pub burst_triggered: bool,
    pub blocked: bool,
    pub developer_exempt: bool,
    pub url: String,
    pub occurred_at: DateTime<Utc>,
}

pub trait AlertSink: Send + Sync {
    fn dispatch(&self, alert: SecurityAlert);
}

/// Sink that only logs. Used when no webhook is configured.
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn dispatch(&self, alert: SecurityAlert) {
        warn!(
            identity = %alert.identity,
            score = alert.score,
            threshold = alert.threshold,
            blocked = alert.blocked,
            "Security alert"
        );
    }
}

/// Posts alerts as JSON to a configured webhook endpoint.
pub struct WebhookAlertSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookAlertSink {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }

    pub async fn send(&self, alert: &SecurityAlert) -> Result<(), reqwest::Error> {
        self.client
            .post(&self.url)
            .json(alert)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

impl AlertSink for WebhookAlertSink {
    fn dispatch(&self, alert: SecurityAlert) {
        let client = self.client.clone();
        let url = self.url.clone();
        tokio::spawn(async move {
            let result = client
                .post(&url)
                .json(&alert)
                .send()
                .await
                .and_then(|response| response.error_for_status());
            if let Err(e) = result {
                warn!("Failed to deliver security alert: {}", e);
            }
        });
    }
}
