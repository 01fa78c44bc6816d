use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    #[error("messaging api error: {0}")]
    Api(String),
    #[error("messaging not configured")]
    NotConfigured,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSession {
    pub slot: String,
    pub checkout_url: Option<String>,
    pub amount: Decimal,
}

/// Summary sent to the customer-messaging channel after orchestration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentNotification {
    pub schedule: String,
    pub sessions: Vec<NotificationSession>,
    pub currency: String,
    pub total_amount: Decimal,
}

/// Best-effort outbound notifications; callers log failures and move on.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_payment_notification(
        &self,
        deal_id: i64,
        notification: PaymentNotification,
    ) -> Result<(), MessagingError>;
}

mod live;
mod mock;

#[allow(unused_imports)]
pub use live::WebhookMessenger;
#[allow(unused_imports)]
pub use mock::MockMessenger;
