//! notify.rs — operational alerts over a webhook.
//!
//! Used by the cache warmer when a council keeps failing to regenerate.
//! Configured via `FACTOID_ALERT_WEBHOOK`; absent config means alerts are
//! logged and dropped.

use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AlertPayload {
    pub council: String,
    pub consecutive_failures: u32,
    pub message: String,
    pub timestamp_iso: String,
}

#[derive(Serialize)]
struct WebhookBody {
    content: String,
}

#[derive(Clone)]
pub struct WebhookNotifier {
    webhook: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl WebhookNotifier {
    pub fn new(webhook: String) -> Self {
        Self {
            webhook,
            client: Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    pub fn from_env() -> Option<Self> {
        std::env::var("FACTOID_ALERT_WEBHOOK")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(Self::new)
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub async fn send_alert(&self, alert: &AlertPayload) -> Result<()> {
        let body = WebhookBody {
            content: format!(
                "Factoid warmup failing for '{}' ({} consecutive failures): {} [{}]",
                alert.council, alert.consecutive_failures, alert.message, alert.timestamp_iso
            ),
        };

        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&self.webhook)
                .timeout(self.timeout)
                .json(&body)
                .send()
                .await;

            match res {
                Ok(rsp) => {
                    if let Err(e) = rsp.error_for_status_ref() {
                        if attempt < self.max_retries {
                            tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1)))
                                .await;
                            continue;
                        }
                        return Err(anyhow!("alert webhook HTTP error: {e}"));
                    }
                    return Ok(());
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                        continue;
                    }
                    return Err(anyhow!("alert webhook send failed: {e}"));
                }
            }
        }
    }
}

/// Fire an alert if a notifier is configured; otherwise log at warn level.
pub async fn alert_or_log(notifier: &Option<WebhookNotifier>, alert: AlertPayload) {
    match notifier {
        Some(n) => {
            if let Err(e) = n.send_alert(&alert).await {
                tracing::warn!(council = %alert.council, error = %e, "alert delivery failed");
            }
        }
        None => {
            tracing::warn!(
                council = %alert.council,
                failures = alert.consecutive_failures,
                "{}",
                alert.message
            );
        }
    }
}
