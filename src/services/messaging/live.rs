use async_trait::async_trait;

use super::{Messenger, MessagingError, PaymentNotification};
use crate::config::MessagingSettings;

/// Posts payment notifications to the configured messaging webhook. When no
/// URL is configured every send reports `NotConfigured` and callers carry on.
pub struct WebhookMessenger {
    client: reqwest::Client,
    webhook_url: Option<String>,
    api_key: Option<String>,
}

impl WebhookMessenger {
    pub fn from_settings(settings: &MessagingSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url: settings.webhook_url.clone(),
            api_key: settings.api_key.clone(),
        }
    }
}

#[async_trait]
impl Messenger for WebhookMessenger {
    async fn send_payment_notification(
        &self,
        deal_id: i64,
        notification: PaymentNotification,
    ) -> Result<(), MessagingError> {
        let Some(url) = self.webhook_url.as_deref() else {
            return Err(MessagingError::NotConfigured);
        };

        let body = serde_json::json!({
            "deal_id": deal_id,
            "schedule": notification.schedule,
            "currency": notification.currency,
            "total_amount": notification.total_amount,
            "sessions": notification.sessions,
        });

        let mut req = self.client.post(url).json(&body);
        if let Some(key) = self.api_key.as_deref() {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| MessagingError::Api(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(MessagingError::Api(format!(
                "notification for deal {} rejected with status {}",
                deal_id,
                resp.status()
            )));
        }
        Ok(())
    }
}
