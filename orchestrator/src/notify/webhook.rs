//! Webhook notification sink

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::errors::OrchestratorError;
use crate::notify::{ApprovalRequested, NotificationSink};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct WebhookBody<'a> {
    event: &'static str,
    #[serde(flatten)]
    payload: &'a ApprovalRequested,
}

/// POSTs each notification as JSON to a fixed URL
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: Url,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Result<Self, OrchestratorError> {
        let url = Url::parse(url)
            .map_err(|e| OrchestratorError::ConfigError(format!("invalid webhook url {}: {}", url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(OrchestratorError::ConfigError(format!(
                "webhook url must be http(s): {}",
                url
            )));
        }
        let client = reqwest::Client::builder().timeout(WEBHOOK_TIMEOUT).build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    async fn notify_approval_requested(
        &self,
        event: &ApprovalRequested,
    ) -> Result<(), OrchestratorError> {
        let body = WebhookBody {
            event: "approval_requested",
            payload: event,
        };
        self.client
            .post(self.url.clone())
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        debug!(approval_id = %event.approval_id, "Webhook notification delivered");
        Ok(())
    }
}
