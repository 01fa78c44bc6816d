#![allow(dead_code)]
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{Messenger, MessagingError, PaymentNotification};

#[derive(Clone, Default)]
pub struct MockMessenger {
    pub sent: Arc<Mutex<Vec<(i64, PaymentNotification)>>>,
}

impl MockMessenger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Messenger for MockMessenger {
    async fn send_payment_notification(
        &self,
        deal_id: i64,
        notification: PaymentNotification,
    ) -> Result<(), MessagingError> {
        self.sent.lock().unwrap().push((deal_id, notification));
        Ok(())
    }
}
